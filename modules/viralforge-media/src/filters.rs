use rand::rngs::StdRng;
use rand::Rng;

use viralforge_common::{
    CaptionPlacement, FilterId, Strategy, TranscriptSegment, FILTER_ORDER,
};

use crate::ffmpeg::MediaInfo;

/// B-roll overlay already downloaded to disk, wired in as input 1.
#[derive(Debug, Clone)]
pub struct BRollOverlay {
    pub start: f64,
    pub duration: f64,
}

/// Everything the main render pass needs to know.
pub struct PlanParams<'a> {
    pub info: MediaInfo,
    pub strategy: &'a Strategy,
    /// Union of dashboard-enabled and strategy-recommended filters.
    pub active_filters: &'a [FilterId],
    pub transcript: &'a [TranscriptSegment],
    pub placement: CaptionPlacement,
    pub font_path: &'a str,
    pub b_roll: Option<BRollOverlay>,
}

/// A fully-built `-filter_complex` graph plus the audio chain.
#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub filter_complex: String,
    pub video_out: String,
    /// Audio filter applied to the source audio (speed compensation).
    pub audio_filter: Option<String>,
    /// Chosen speed multiplier when the speed ramp is active.
    pub speed: f64,
}

struct GraphBuilder {
    statements: Vec<String>,
    label_counter: usize,
    current: String,
}

impl GraphBuilder {
    fn new(input: &str) -> Self {
        Self {
            statements: Vec::new(),
            label_counter: 0,
            current: input.to_string(),
        }
    }

    fn next_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!("[{prefix}{}]", self.label_counter)
    }

    /// Append `[cur] filter [next]` and advance the current label.
    fn step(&mut self, filter: &str) {
        let next = self.next_label("v");
        self.statements
            .push(format!("{}{}{}", self.current, filter, next));
        self.current = next;
    }

    /// Append a free-form statement (sources, splits).
    fn raw(&mut self, statement: String) {
        self.statements.push(statement);
    }

    fn finish(self) -> (String, String) {
        (self.statements.join(";"), self.current)
    }
}

/// Order the active set by the fixed application order.
pub fn ordered_active(enabled: &[FilterId], strategy: &Strategy) -> Vec<FilterId> {
    FILTER_ORDER
        .iter()
        .copied()
        .filter(|f| enabled.contains(f) || strategy.recommended_filters.contains(f))
        .collect()
}

/// Pass-1 trim graph: concatenate hook sub-clips with +0.5 s tail
/// padding each, clamped to the source duration. `None` when there is
/// nothing to trim. Output labels: `[vtrim]` and, with audio, `[atrim]`.
pub fn build_trim_filter(hooks: &[[f64; 2]], duration: f64, with_audio: bool) -> Option<String> {
    let clips: Vec<[f64; 2]> = hooks
        .iter()
        .filter(|h| h[0] < duration && h[1] > h[0])
        .map(|h| [h[0], (h[1] + 0.5).min(duration)])
        .collect();
    if clips.is_empty() {
        return None;
    }

    let mut statements = Vec::new();
    for (i, [start, end]) in clips.iter().enumerate() {
        statements.push(format!(
            "[0:v]trim=start={start:.3}:end={end:.3},setpts=PTS-STARTPTS[tv{i}]"
        ));
        if with_audio {
            statements.push(format!(
                "[0:a]atrim=start={start:.3}:end={end:.3},asetpts=PTS-STARTPTS[ta{i}]"
            ));
        }
    }
    if with_audio {
        let pairs: String = (0..clips.len()).map(|i| format!("[tv{i}][ta{i}]")).collect();
        statements.push(format!(
            "{pairs}concat=n={}:v=1:a=1[vtrim][atrim]",
            clips.len()
        ));
    } else {
        let pairs: String = (0..clips.len()).map(|i| format!("[tv{i}]")).collect();
        statements.push(format!("{pairs}concat=n={}:v=1[vtrim]", clips.len()));
    }
    Some(statements.join(";"))
}

/// Trimmed duration implied by a hook set (for caption dropping).
pub fn trimmed_duration(hooks: &[[f64; 2]], duration: f64) -> f64 {
    let total: f64 = hooks
        .iter()
        .filter(|h| h[0] < duration && h[1] > h[0])
        .map(|h| (h[1] + 0.5).min(duration) - h[0])
        .sum();
    if total > 0.0 {
        total
    } else {
        duration
    }
}

/// Build the main render graph. All random draws come from `rng`, in a
/// fixed order, so a seeded run reproduces the exact same graph.
pub fn build_plan(params: &PlanParams<'_>, rng: &mut StdRng) -> FilterPlan {
    let info = params.info;
    let (w, h) = (info.width, info.height);
    let mut graph = GraphBuilder::new("[0:v]");

    // Base transform: the hash-changing invariant.
    graph.step(&format!(
        "hflip,scale={sw}:{sh},crop={w}:{h},eq=contrast=1.05",
        sw = (w as f64 * 1.05).round() as u32,
        sh = (h as f64 * 1.05).round() as u32,
    ));

    // Optional filters, fixed order. Draws happen even when a value ends
    // up unused in the fragment so the stream stays aligned.
    let mut speed = 1.0;
    for filter in params.active_filters {
        match filter {
            FilterId::SpeedRamp => {
                let [lo, hi] = params.strategy.speed_range;
                speed = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
                graph.step(&format!("setpts=PTS/{speed:.4}"));
            }
            FilterId::Jitter => {
                let intensity = params.strategy.jitter_intensity;
                let zoom = 1.04 + 0.01 * intensity;
                let amp = intensity.max(0.0);
                graph.step(&format!(
                    "scale={zw}:{zh},crop={w}:{h}:x='(iw-{w})/2+{amp:.2}*(random(1)-0.5)*2':y='(ih-{h})/2+{amp:.2}*(random(2)-0.5)*2'",
                    zw = (w as f64 * zoom).round() as u32,
                    zh = (h as f64 * zoom).round() as u32,
                ));
            }
            FilterId::CinematicOverlay => {
                let latest = (effective_duration(info.duration, speed) - 1.0).max(0.0);
                let start = if latest > 0.0 {
                    rng.gen_range(0.0..latest)
                } else {
                    0.0
                };
                overlay_color_source(
                    &mut graph,
                    "0xFFD2A0",
                    w,
                    h,
                    info.fps,
                    start,
                    0.6,
                    0.08,
                    0.2,
                );
            }
            FilterId::Glow => {
                let split_a = graph.next_label("ga");
                let split_b = graph.next_label("gb");
                let glow = graph.next_label("gl");
                let merged = graph.next_label("v");
                let cur = graph.current.clone();
                graph.raw(format!("{cur}split=2{split_a}{split_b}"));
                graph.raw(format!("{split_b}eq=brightness=0.02:contrast=1.1{glow}"));
                graph.raw(format!(
                    "{split_a}{glow}blend=all_mode=screen:all_opacity=0.3{merged}"
                ));
                graph.current = merged;
            }
            FilterId::FilmGrain => {
                graph.step("eq=contrast=1.08");
            }
            FilterId::Grayscale => {
                graph.step("hue=s=0");
            }
            FilterId::Glitch => {
                let factor: f64 = rng.gen_range(0.9..=1.1);
                graph.step(&format!(
                    "colorchannelmixer=rr={factor:.3}:gg={factor:.3}:bb={factor:.3},scale={gw}:{gh},crop={w}:{h}",
                    gw = (w as f64 * 1.01).round() as u32,
                    gh = (h as f64 * 1.01).round() as u32,
                ));
            }
        }
    }

    let out_duration = effective_duration(info.duration, speed);

    // Pattern interrupts: white flash every 3 s starting at t=2 s.
    let mut t = 2.0;
    while t + 0.15 < out_duration {
        overlay_color_source(&mut graph, "white", w, h, info.fps, t, 0.15, 0.12, 0.05);
        t += 3.0;
    }

    // B-roll overlay (input 1), centered, time-gated.
    if let Some(b_roll) = &params.b_roll {
        let scaled = graph.next_label("br");
        let merged = graph.next_label("v");
        let cur = graph.current.clone();
        graph.raw(format!(
            "[1:v]scale={w}:-2,setpts=PTS-STARTPTS+{start:.3}/TB{scaled}",
            start = b_roll.start,
        ));
        graph.raw(format!(
            "{cur}{scaled}overlay=(W-w)/2:(H-h)/2:eof_action=pass:enable='between(t,{start:.3},{end:.3})'{merged}",
            start = b_roll.start,
            end = b_roll.start + b_roll.duration,
        ));
        graph.current = merged;
    }

    // Captions: one drawtext per transcript word, timed on the
    // speed-adjusted clock; segments past the clip end are dropped.
    let color = params.strategy.vibe.caption_color();
    let rel_y = params.placement.relative_y();
    for segment in params.transcript {
        let start = segment.start / speed;
        let end = segment.end / speed;
        if start >= out_duration {
            continue;
        }
        graph.step(&format!(
            "drawtext=fontfile={font}:text='{text}':fontsize=72:fontcolor={color}:borderw=2.5:bordercolor=black:x=(w-text_w)/2:y=h*{rel_y:.2}:enable='between(t,{start:.3},{end:.3})'",
            font = params.font_path,
            text = escape_drawtext(&segment.text),
        ));
    }

    let (filter_complex, video_out) = graph.finish();
    let audio_filter = if (speed - 1.0).abs() > f64::EPSILON {
        Some(format!("atempo={speed:.4}"))
    } else {
        None
    };

    FilterPlan {
        filter_complex,
        video_out,
        audio_filter,
        speed,
    }
}

fn effective_duration(duration: f64, speed: f64) -> f64 {
    if speed > 0.0 {
        duration / speed
    } else {
        duration
    }
}

/// A faded, translucent color layer overlaid at `start`, used for both
/// pattern-interrupt flashes and the cinematic leak.
#[allow(clippy::too_many_arguments)]
fn overlay_color_source(
    graph: &mut GraphBuilder,
    color: &str,
    w: u32,
    h: u32,
    fps: f64,
    start: f64,
    duration: f64,
    opacity: f64,
    fade: f64,
) {
    let src = graph.next_label("fs");
    let faded = graph.next_label("ff");
    let merged = graph.next_label("v");
    let cur = graph.current.clone();
    graph.raw(format!(
        "color=c={color}:s={w}x{h}:r={fps:.2}:d={duration:.3}{src}"
    ));
    graph.raw(format!(
        "{src}format=yuva420p,colorchannelmixer=aa={opacity:.2},fade=t=in:st=0:d={fade:.2}:alpha=1,fade=t=out:st={fade_out:.3}:d={fade:.2}:alpha=1,setpts=PTS-STARTPTS+{start:.3}/TB{faded}",
        fade_out = (duration - fade).max(0.0),
    ));
    graph.raw(format!("{cur}{faded}overlay=eof_action=pass{merged}"));
    graph.current = merged;
}

/// Escape a caption word for a drawtext text literal.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\u{2019}")
        .replace(':', "\\:")
        .replace('%', "\\%")
}

/// Encode arguments for one rung of the encoder ladder.
pub fn encode_args(encoder: &str, fps: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-c:v".into(),
        encoder.into(),
        "-maxrate".into(),
        "12M".into(),
        "-bufsize".into(),
        "24M".into(),
        "-r".into(),
        fps.to_string(),
        "-c:a".into(),
        "aac".into(),
    ];
    if encoder == "h264_nvenc" {
        args.extend(["-preset".into(), "slow".into(), "-rc".into(), "vbr".into(), "-cq".into(), "18".into()]);
    } else {
        args.extend(["-preset".into(), "slower".into(), "-crf".into(), "18".into()]);
    }
    args
}
