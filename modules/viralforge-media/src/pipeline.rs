use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{CaptionPlacement, FilterId, Strategy, TranscriptSegment};

use crate::broll::BRollSource;
use crate::ffmpeg::{FfmpegRunner, MediaInfo};
use crate::filters::{
    build_plan, build_trim_filter, encode_args, ordered_active, trimmed_duration, BRollOverlay,
    FilterPlan, PlanParams,
};
use crate::ocr::{caption_placement, FrameTextDetector};
use crate::transcribe::Transcriber;

/// Stage label + 0..100 progress, forwarded to the job store by the
/// task handler.
pub type ProgressFn = Arc<dyn Fn(&str, u8) + Send + Sync>;

pub struct TransformRequest {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub enabled_filters: Vec<FilterId>,
    pub strategy: Option<Strategy>,
    /// Fixes every random choice in the run. None draws from OS entropy.
    pub seed: Option<u64>,
}

#[derive(Debug)]
pub struct TransformOutcome {
    pub output_path: PathBuf,
    pub placement: CaptionPlacement,
    pub duration: f64,
    pub caption_count: usize,
    pub applied_filters: Vec<FilterId>,
}

/// Rendering seam for the job runner; lets tests substitute a fake for
/// the real ffmpeg-backed pipeline.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        request: &TransformRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransformOutcome>;
}

#[async_trait::async_trait]
impl Renderer for TransformPipeline {
    async fn render(
        &self,
        request: &TransformRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransformOutcome> {
        self.run(request, progress).await
    }
}

/// The ordered media-operation pipeline: transcribe → OCR → trim →
/// B-roll → base transform → filters → interrupts → captions → mux →
/// encode. Stages within one run execute strictly in sequence.
pub struct TransformPipeline {
    ffmpeg: FfmpegRunner,
    transcriber: Option<Arc<dyn Transcriber>>,
    ocr: Option<Arc<dyn FrameTextDetector>>,
    b_roll: Option<Arc<dyn BRollSource>>,
    font_path: String,
    use_gpu: bool,
}

impl TransformPipeline {
    pub fn new(ffmpeg: FfmpegRunner, font_path: &str, use_gpu: bool) -> Self {
        Self {
            ffmpeg,
            transcriber: None,
            ocr: None,
            b_roll: None,
            font_path: font_path.to_string(),
            use_gpu,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn FrameTextDetector>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_b_roll(mut self, source: Arc<dyn BRollSource>) -> Self {
        self.b_roll = Some(source);
        self
    }

    pub async fn run(
        &self,
        request: &TransformRequest,
        progress: Option<ProgressFn>,
    ) -> Result<TransformOutcome> {
        let report = |stage: &str, pct: u8| {
            if let Some(f) = &progress {
                f(stage, pct);
            }
        };
        let strategy = request
            .strategy
            .clone()
            .unwrap_or_default()
            .sanitized();
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let info = self
            .ffmpeg
            .probe(&request.source)
            .await
            .map_err(|e| ForgeError::Media(format!("probe failed: {e}")))?;

        // 1. Transcribe. Failure costs captions, not the job.
        report("Transcribing", 10);
        let transcript = match &self.transcriber {
            Some(transcriber) => match transcriber.transcribe(&request.source).await {
                Ok(segments) => segments,
                Err(e) => {
                    warn!(error = %e, "Transcription failed, rendering without captions");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        // 2. OCR-aware caption placement.
        report("Scanning on-screen text", 20);
        let placement = match &self.ocr {
            Some(detector) => match detector.detect(&request.source).await {
                Ok(regions) => caption_placement(&regions),
                Err(e) => {
                    warn!(error = %e, "OCR failed, defaulting caption placement");
                    CaptionPlacement::Bottom
                }
            },
            None => CaptionPlacement::Bottom,
        };
        info!(?placement, "Caption placement resolved");

        // 3. Semantic trim to hook points.
        report("Trimming", 30);
        let temp = tempfile::tempdir()
            .map_err(|e| ForgeError::Media(format!("temp dir failed: {e}")))?;
        let (work_path, work_info, transcript) = self
            .trim_stage(request, &strategy, &info, temp.path(), transcript)
            .await?;

        // 4. B-roll fetch (non-fatal).
        report("Fetching B-roll", 40);
        let (b_roll_path, b_roll_overlay) = self
            .b_roll_stage(&strategy, work_info.duration, temp.path(), &mut rng)
            .await;

        // 5-9. One render pass: base transform, filters, interrupts,
        // captions, original audio remux.
        report("Rendering", 50);
        let active = ordered_active(&request.enabled_filters, &strategy);
        let plan = build_plan(
            &PlanParams {
                info: work_info,
                strategy: &strategy,
                active_filters: &active,
                transcript: &transcript,
                placement,
                font_path: &self.font_path,
                b_roll: b_roll_overlay,
            },
            &mut rng,
        );

        // 10. Encode ladder: GPU first when configured, software
        // fallback, then a last try at 24 fps.
        report("Encoding", 70);
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| ForgeError::Media(format!("output dir failed: {e}")))?;
        let output_path = request.output_dir.join(format!("{}.mp4", Uuid::new_v4()));

        let mut rungs: Vec<(&str, u32)> = Vec::new();
        if self.use_gpu {
            rungs.push(("h264_nvenc", 30));
        }
        rungs.push(("libx264", 30));
        rungs.push(("libx264", 24));

        let mut last_error = String::new();
        let mut encoded = false;
        for (encoder, fps) in rungs {
            let args = render_args(
                &work_path,
                b_roll_path.as_deref(),
                &plan,
                work_info.has_audio,
                encoder,
                fps,
                &output_path,
            );
            match self.ffmpeg.run(&args).await {
                Ok(()) => {
                    encoded = true;
                    break;
                }
                Err(e) => {
                    warn!(encoder, fps, error = %e, "Encode attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        if !encoded {
            return Err(ForgeError::Media(format!(
                "all encoder fallbacks failed: {last_error}"
            )));
        }

        let caption_count = transcript.len();
        info!(
            output = %output_path.display(),
            captions = caption_count,
            filters = active.len(),
            "Transformation complete"
        );
        Ok(TransformOutcome {
            output_path,
            placement,
            duration: work_info.duration / plan.speed,
            caption_count,
            applied_filters: active,
        })
    }

    /// Cut the working clip to the strategy's hooks. Without hooks the
    /// source passes through untouched. Caption timings are rebased onto
    /// the trimmed timeline; segments outside every hook are dropped.
    async fn trim_stage(
        &self,
        request: &TransformRequest,
        strategy: &Strategy,
        info: &MediaInfo,
        temp: &Path,
        transcript: Vec<TranscriptSegment>,
    ) -> Result<(PathBuf, MediaInfo, Vec<TranscriptSegment>)> {
        let Some(graph) = build_trim_filter(&strategy.hook_points, info.duration, info.has_audio)
        else {
            return Ok((request.source.clone(), *info, transcript));
        };

        let work = temp.join("trimmed.mp4");
        let mut args: Vec<String> = vec![
            "-i".into(),
            request.source.display().to_string(),
            "-filter_complex".into(),
            graph,
            "-map".into(),
            "[vtrim]".into(),
        ];
        if info.has_audio {
            args.extend(["-map".into(), "[atrim]".into()]);
        }
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-crf".into(),
            "18".into(),
            "-c:a".into(),
            "aac".into(),
            work.display().to_string(),
        ]);
        self.ffmpeg
            .run(&args)
            .await
            .map_err(|e| ForgeError::Media(format!("trim pass failed: {e}")))?;

        let new_duration = trimmed_duration(&strategy.hook_points, info.duration);
        let rebased = rebase_transcript(&transcript, &strategy.hook_points, info.duration);
        Ok((
            work,
            MediaInfo {
                duration: new_duration,
                ..*info
            },
            rebased,
        ))
    }

    async fn b_roll_stage(
        &self,
        strategy: &Strategy,
        duration: f64,
        temp: &Path,
        rng: &mut StdRng,
    ) -> (Option<PathBuf>, Option<BRollOverlay>) {
        if strategy.b_roll_keywords.is_empty() {
            return (None, None);
        }
        // Draw keyword and window up front so the random stream is
        // identical whether or not the fetch succeeds.
        let keyword = strategy.b_roll_keywords[rng.gen_range(0..strategy.b_roll_keywords.len())]
            .clone();
        let overlay = b_roll_window(duration, rng);

        let Some(source) = &self.b_roll else {
            return (None, None);
        };
        match source.fetch_one(&keyword, temp).await {
            Ok(Some(path)) => {
                info!(keyword, start = overlay.start, "B-roll overlay prepared");
                (Some(path), Some(overlay))
            }
            Ok(None) => (None, None),
            Err(e) => {
                warn!(keyword, error = %e, "B-roll fetch failed, skipping overlay");
                (None, None)
            }
        }
    }
}

/// Uniform-random ≤3 s window starting in the first half of the clip.
pub(crate) fn b_roll_window(duration: f64, rng: &mut StdRng) -> BRollOverlay {
    let half = (duration / 2.0).max(0.1);
    let start = rng.gen_range(0.0..half);
    BRollOverlay {
        start,
        duration: 3.0f64.min(duration - start),
    }
}

/// Map source-timeline segments onto the concatenated hook timeline.
pub(crate) fn rebase_transcript(
    transcript: &[TranscriptSegment],
    hooks: &[[f64; 2]],
    duration: f64,
) -> Vec<TranscriptSegment> {
    if hooks.is_empty() {
        return transcript.to_vec();
    }
    let clips: Vec<[f64; 2]> = hooks
        .iter()
        .filter(|h| h[0] < duration && h[1] > h[0])
        .map(|h| [h[0], (h[1] + 0.5).min(duration)])
        .collect();
    if clips.is_empty() {
        return transcript.to_vec();
    }

    let mut rebased = Vec::new();
    for segment in transcript {
        let mut offset = 0.0;
        for [start, end] in &clips {
            if segment.start >= *start && segment.start < *end {
                let shift = segment.start - start + offset;
                rebased.push(TranscriptSegment {
                    start: shift,
                    end: shift + (segment.end - segment.start),
                    text: segment.text.clone(),
                });
                break;
            }
            offset += end - start;
        }
    }
    rebased
}

/// Full argument list for one render attempt.
#[allow(clippy::too_many_arguments)]
fn render_args(
    work: &Path,
    b_roll: Option<&Path>,
    plan: &FilterPlan,
    has_audio: bool,
    encoder: &str,
    fps: u32,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), work.display().to_string()];
    if let Some(b_roll) = b_roll {
        args.extend(["-i".into(), b_roll.display().to_string()]);
    }

    let mut filter_complex = plan.filter_complex.clone();
    let audio_map = if has_audio {
        match &plan.audio_filter {
            Some(audio) => {
                filter_complex.push_str(&format!(";[0:a]{audio}[aout]"));
                Some("[aout]".to_string())
            }
            None => Some("0:a:0".to_string()),
        }
    } else {
        None
    };

    args.extend(["-filter_complex".into(), filter_complex]);
    args.extend(["-map".into(), plan.video_out.clone()]);
    if let Some(audio_map) = audio_map {
        args.extend(["-map".into(), audio_map]);
    }
    args.extend(encode_args(encoder, fps));
    args.push(output.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: "w".to_string(),
        }
    }

    #[test]
    fn rebase_drops_segments_outside_hooks() {
        let transcript = vec![seg(1.0, 1.5), seg(6.0, 6.5), seg(11.0, 11.5)];
        let hooks = [[0.0, 2.0], [10.0, 12.0]];
        let rebased = rebase_transcript(&transcript, &hooks, 20.0);
        assert_eq!(rebased.len(), 2);
        assert!((rebased[0].start - 1.0).abs() < 1e-9);
        // Second hook starts at 2.5 on the output timeline (2.0 + 0.5 pad).
        assert!((rebased[1].start - (2.5 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn rebase_without_hooks_is_identity() {
        let transcript = vec![seg(1.0, 1.5)];
        let rebased = rebase_transcript(&transcript, &[], 20.0);
        assert_eq!(rebased.len(), 1);
        assert_eq!(rebased[0].start, 1.0);
    }

    #[test]
    fn b_roll_window_in_first_half() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let window = b_roll_window(30.0, &mut rng);
            assert!(window.start >= 0.0 && window.start < 15.0);
            assert!(window.duration <= 3.0 + 1e-9);
        }
    }

    #[test]
    fn b_roll_window_is_seed_deterministic() {
        let a = b_roll_window(30.0, &mut StdRng::seed_from_u64(9));
        let b = b_roll_window(30.0, &mut StdRng::seed_from_u64(9));
        assert_eq!(a.start, b.start);
        assert_eq!(a.duration, b.duration);
    }

    #[test]
    fn render_args_shape() {
        let plan = FilterPlan {
            filter_complex: "[0:v]hflip[v1]".to_string(),
            video_out: "[v1]".to_string(),
            audio_filter: Some("atempo=1.1000".to_string()),
            speed: 1.1,
        };
        let args = render_args(
            Path::new("/tmp/work.mp4"),
            None,
            &plan,
            true,
            "libx264",
            30,
            Path::new("/out/final.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-filter_complex [0:v]hflip[v1];[0:a]atempo=1.1000[aout]"));
        assert!(joined.contains("-map [v1] -map [aout]"));
        assert!(joined.ends_with("/out/final.mp4"));
    }

    #[test]
    fn render_args_silent_source() {
        let plan = FilterPlan {
            filter_complex: "[0:v]hflip[v1]".to_string(),
            video_out: "[v1]".to_string(),
            audio_filter: None,
            speed: 1.0,
        };
        let args = render_args(
            Path::new("/tmp/work.mp4"),
            Some(Path::new("/tmp/broll.mp4")),
            &plan,
            false,
            "h264_nvenc",
            30,
            Path::new("/out/final.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/broll.mp4"));
        assert!(!joined.contains("-map 0:a"));
    }
}
