use std::sync::Arc;

use ai_client::{ChatModel, Message, StructuredOutput};
use tracing::warn;

use viralforge_common::{FilterId, Strategy, StylePreset, TranscriptSegment, Vibe};

/// Builds the visual plan for one transformation run. LLM-backed when a
/// model is configured; the hard-coded style presets only apply when the
/// model is missing or fails.
pub struct StrategyPlanner {
    model: Option<Arc<dyn ChatModel>>,
}

impl StrategyPlanner {
    pub fn new(model: Option<Arc<dyn ChatModel>>) -> Self {
        Self { model }
    }

    pub async fn plan(
        &self,
        transcript: &[TranscriptSegment],
        niche: &str,
        style: Option<StylePreset>,
        visual_insights: Option<&serde_json::Value>,
    ) -> Strategy {
        if let Some(model) = &self.model {
            match self
                .plan_with_model(model, transcript, niche, style, visual_insights)
                .await
            {
                Ok(strategy) => return strategy.sanitized(),
                Err(e) => warn!(niche, error = %e, "Strategy planning fell back to preset"),
            }
        }
        fallback(style)
    }

    async fn plan_with_model(
        &self,
        model: &Arc<dyn ChatModel>,
        transcript: &[TranscriptSegment],
        niche: &str,
        style: Option<StylePreset>,
        visual_insights: Option<&serde_json::Value>,
    ) -> anyhow::Result<Strategy> {
        let transcript_text: String = transcript
            .iter()
            .map(|s| format!("[{:.1}-{:.1}] {}", s.start, s.end, s.text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Design a visual transformation strategy for a derivative short-form \
             video in the {niche} niche.\n\n\
             Available filters:\n\
             - f6: speed ramp (speed_range controls the multiplier window)\n\
             - f7: cinematic warm overlay\n\
             - f8: handheld jitter (jitter_intensity scales the shake)\n\
             - f9: atmospheric glow\n\
             - f10: film grain\n\
             - f11: grayscale\n\
             - f12: glitch\n\n\
             Transcript:\n{transcript}\n",
            niche = niche,
            transcript = if transcript_text.is_empty() {
                "(no transcript available)"
            } else {
                &transcript_text
            },
        );
        if let Some(style) = style {
            prompt.push_str(&format!("\nRequested style preset: {style:?}\n"));
        }
        if let Some(insights) = visual_insights {
            prompt.push_str(&format!("\nVisual analysis of the source:\n{insights}\n"));
        }
        prompt.push_str(&format!(
            "\nRespond with JSON matching this schema exactly:\n{}",
            Strategy::json_schema()
        ));

        let raw = model
            .complete_json(vec![
                Message::system(
                    "You are an expert short-form video editor. Output strict JSON only.",
                ),
                Message::user(prompt),
            ])
            .await?;
        Ok(Strategy::parse_output(&raw)?)
    }
}

/// Strategy used when the LLM is unavailable: the conservative default,
/// overridden by a hard-coded preset when one was requested.
fn fallback(style: Option<StylePreset>) -> Strategy {
    match style {
        Some(preset) => preset_strategy(preset),
        None => Strategy::default(),
    }
}

pub fn preset_strategy(preset: StylePreset) -> Strategy {
    match preset {
        StylePreset::Cinematic => Strategy {
            speed_range: [0.97, 1.03],
            jitter_intensity: 0.5,
            recommended_filters: vec![FilterId::CinematicOverlay, FilterId::Glow],
            vibe: Vibe::Dramatic,
            explanation: "cinematic preset".to_string(),
            ..Strategy::default()
        },
        StylePreset::AsmrCalm => Strategy {
            speed_range: [0.95, 1.0],
            jitter_intensity: 0.2,
            recommended_filters: vec![FilterId::Glow],
            vibe: Vibe::Calm,
            explanation: "asmr preset".to_string(),
            ..Strategy::default()
        },
        StylePreset::GlitchHighArt => Strategy {
            speed_range: [0.95, 1.1],
            jitter_intensity: 2.0,
            recommended_filters: vec![FilterId::Jitter, FilterId::Glitch],
            vibe: Vibe::Energetic,
            explanation: "glitch preset".to_string(),
            ..Strategy::default()
        },
        StylePreset::NoirClassic => Strategy {
            speed_range: [0.97, 1.02],
            jitter_intensity: 0.4,
            recommended_filters: vec![FilterId::Grayscale, FilterId::FilmGrain],
            vibe: Vibe::Dramatic,
            explanation: "noir preset".to_string(),
            ..Strategy::default()
        },
    }
}
