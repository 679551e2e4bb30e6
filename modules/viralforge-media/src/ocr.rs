use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use viralforge_common::CaptionPlacement;

use crate::ffmpeg::FfmpegRunner;

/// On-screen text detected in a sampled frame.
#[derive(Debug, Clone)]
pub struct TextRegion {
    pub text: String,
    pub confidence: f64,
    /// Vertical center of the region, 0.0 (top) to 1.0 (bottom).
    pub normalized_y: f64,
}

/// Detects existing on-screen text so rendered captions don't collide
/// with it.
#[async_trait]
pub trait FrameTextDetector: Send + Sync {
    async fn detect(&self, video: &Path) -> Result<Vec<TextRegion>>;
}

const MIN_CONFIDENCE: f64 = 30.0;
/// One sampled frame every this many source frames.
const SAMPLE_EVERY: u32 = 30;

/// Tesseract-backed detector: frames sampled via ffmpeg, each run
/// through `tesseract <frame> stdout tsv`.
pub struct TesseractDetector {
    ffmpeg: FfmpegRunner,
    tesseract_bin: String,
}

impl TesseractDetector {
    pub fn new(ffmpeg: FfmpegRunner) -> Self {
        Self {
            ffmpeg,
            tesseract_bin: std::env::var("TESSERACT_BIN")
                .unwrap_or_else(|_| "tesseract".to_string()),
        }
    }

    async fn ocr_frame(&self, frame: &Path, frame_height: f64) -> Result<Vec<TextRegion>> {
        let output = tokio::process::Command::new(&self.tesseract_bin)
            .arg(frame)
            .args(["stdout", "tsv"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .context("failed to run tesseract")?;

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv, frame_height))
    }
}

#[async_trait]
impl FrameTextDetector for TesseractDetector {
    async fn detect(&self, video: &Path) -> Result<Vec<TextRegion>> {
        let info = self.ffmpeg.probe(video).await?;
        let temp = tempfile::tempdir().context("failed to create frame dir")?;
        let frames = self
            .ffmpeg
            .sample_frames(video, temp.path(), SAMPLE_EVERY)
            .await?;

        let mut regions = Vec::new();
        for frame in &frames {
            regions.extend(self.ocr_frame(frame, info.height as f64).await?);
        }
        debug!(
            frames = frames.len(),
            regions = regions.len(),
            "OCR scan complete"
        );
        Ok(regions)
    }
}

/// Parse tesseract TSV output (level 5 = word rows) into regions.
fn parse_tsv(tsv: &str, frame_height: f64) -> Vec<TextRegion> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 {
                return None;
            }
            let level: u32 = cols[0].parse().ok()?;
            if level != 5 {
                return None;
            }
            let top: f64 = cols[7].parse().ok()?;
            let height: f64 = cols[9].parse().ok()?;
            let confidence: f64 = cols[10].parse().ok()?;
            let text = cols[11].trim();
            if confidence < MIN_CONFIDENCE || text.is_empty() {
                return None;
            }
            Some(TextRegion {
                text: text.to_string(),
                confidence,
                normalized_y: ((top + height / 2.0) / frame_height).clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Decide where rendered captions go, given the source's own text:
/// text concentrated in the bottom 40% pushes captions to the top; text
/// only in the top 40% leaves the bottom free; everything else defaults
/// to the bottom.
pub fn caption_placement(regions: &[TextRegion]) -> CaptionPlacement {
    if regions.is_empty() {
        return CaptionPlacement::Bottom;
    }
    let bottom = regions.iter().filter(|r| r.normalized_y > 0.6).count();
    let top = regions.iter().filter(|r| r.normalized_y < 0.4).count();

    if bottom > top {
        CaptionPlacement::Top
    } else if top > 0 && bottom == 0 {
        CaptionPlacement::Bottom
    } else if bottom > 0 && top > 0 {
        CaptionPlacement::Top
    } else {
        CaptionPlacement::Bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(normalized_y: f64) -> TextRegion {
        TextRegion {
            text: "word".to_string(),
            confidence: 90.0,
            normalized_y,
        }
    }

    #[test]
    fn no_text_defaults_bottom() {
        assert_eq!(caption_placement(&[]), CaptionPlacement::Bottom);
    }

    #[test]
    fn bottom_heavy_source_pushes_captions_up() {
        let regions = vec![region(0.8), region(0.9), region(0.1)];
        assert_eq!(caption_placement(&regions), CaptionPlacement::Top);
    }

    #[test]
    fn top_only_source_keeps_captions_down() {
        let regions = vec![region(0.1), region(0.2)];
        assert_eq!(caption_placement(&regions), CaptionPlacement::Bottom);
    }

    #[test]
    fn text_in_both_bands_goes_top() {
        let regions = vec![region(0.1), region(0.9)];
        assert_eq!(caption_placement(&regions), CaptionPlacement::Top);
    }

    #[test]
    fn middle_text_defaults_bottom() {
        let regions = vec![region(0.5), region(0.55)];
        assert_eq!(caption_placement(&regions), CaptionPlacement::Bottom);
    }

    #[test]
    fn tsv_parsing_filters_low_confidence() {
        let header = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";
        let tsv = format!(
            "{header}\n\
             5\t1\t1\t1\t1\t1\t10\t1700\t100\t60\t91.5\tsubscribe\n\
             5\t1\t1\t1\t1\t2\t10\t1700\t100\t60\t12.0\tnoise\n\
             4\t1\t1\t1\t1\t0\t10\t1700\t100\t60\t-1\t\n"
        );
        let regions = parse_tsv(&tsv, 1920.0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "subscribe");
        assert!((regions[0].normalized_y - (1730.0 / 1920.0)).abs() < 1e-9);
    }
}
