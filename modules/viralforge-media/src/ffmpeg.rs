use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Probed facts about a media file.
#[derive(Debug, Clone, Copy)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

/// Thin wrapper over the ffmpeg/ffprobe binaries. All media work runs
/// through subprocess invocations so render crashes never take the
/// worker down.
#[derive(Clone)]
pub struct FfmpegRunner {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_bin: std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string()),
        }
    }

    pub async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = tokio::process::Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        let duration = probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let video = probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));
        let has_audio = probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"));

        Ok(MediaInfo {
            duration,
            width: video.and_then(|s| s.width).unwrap_or(1080),
            height: video.and_then(|s| s.height).unwrap_or(1920),
            fps: video
                .and_then(|s| s.avg_frame_rate.as_deref())
                .map(parse_frame_rate)
                .unwrap_or(30.0),
            has_audio,
        })
    }

    /// Run ffmpeg with the given args (`-y` prepended). Stderr is
    /// captured for the error path.
    pub async fn run(&self, args: &[String]) -> Result<()> {
        debug!(args = %args.join(" "), "ffmpeg");
        let output = tokio::process::Command::new(&self.ffmpeg_bin)
            .arg("-y")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(6)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            warn!(stderr = %tail, "ffmpeg exited with error");
            return Err(anyhow!("ffmpeg failed: {tail}"));
        }
        Ok(())
    }

    /// Extract one frame every `every` frames into `dir` as PNGs.
    pub async fn sample_frames(&self, input: &Path, dir: &Path, every: u32) -> Result<Vec<std::path::PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;
        let pattern = dir.join("frame_%04d.png");
        self.run(&[
            "-i".to_string(),
            input.display().to_string(),
            "-vf".to_string(),
            format!("select=not(mod(n\\,{every}))"),
            "-vsync".to_string(),
            "vfr".to_string(),
            pattern.display().to_string(),
        ])
        .await?;

        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|e| e == "png") {
                frames.push(entry.path());
            }
        }
        frames.sort();
        Ok(frames)
    }
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(30.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 {
                num / den
            } else {
                30.0
            }
        }
        None => raw.parse().unwrap_or(30.0),
    }
}
