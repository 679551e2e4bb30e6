use std::sync::Arc;

use ai_client::{ChatModel, Message, StructuredOutput};
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use viralforge_common::{ContentCandidate, ViralPattern};

/// LLM-facing shape of a pattern analysis.
#[derive(Debug, Deserialize, JsonSchema)]
struct PatternResponse {
    /// Strength of the first three seconds, 0.0-1.0.
    hook_score: f64,
    /// Estimated watch-through rate, 0.0-1.0.
    retention_estimate: f64,
    pacing_bpm: Option<f64>,
    style_keywords: Vec<String>,
    emotional_triggers: Vec<String>,
}

/// Deconstructs a candidate's structure into a `ViralPattern`.
/// LLM-assisted when a model is available, deterministic engagement
/// heuristics otherwise.
pub struct PatternAnalyzer {
    model: Option<Arc<dyn ChatModel>>,
}

impl PatternAnalyzer {
    pub fn new(model: Option<Arc<dyn ChatModel>>) -> Self {
        Self { model }
    }

    pub async fn analyze(&self, candidate: &ContentCandidate, transcript: &str) -> ViralPattern {
        if let Some(model) = &self.model {
            match self.analyze_with_model(model, candidate, transcript).await {
                Ok(pattern) => return pattern,
                Err(e) => {
                    warn!(id = %candidate.id, error = %e, "Pattern analysis fell back to heuristics")
                }
            }
        }
        Self::heuristic(candidate)
    }

    async fn analyze_with_model(
        &self,
        model: &Arc<dyn ChatModel>,
        candidate: &ContentCandidate,
        transcript: &str,
    ) -> anyhow::Result<ViralPattern> {
        let prompt = format!(
            "Deconstruct why this short-form video performs.\n\n\
             Title: {title}\nPlatform: {platform}\nViews: {views}\n\
             Engagement rate: {engagement:.3}\nTranscript:\n{transcript}\n\n\
             Respond with JSON matching this schema:\n{schema}",
            title = candidate.title,
            platform = candidate.platform,
            views = candidate.views,
            engagement = candidate.engagement_score,
            transcript = transcript,
            schema = <PatternResponse as StructuredOutput>::json_schema(),
        );
        let raw = model
            .complete_json(vec![
                Message::system("You are a short-form video structure analyst."),
                Message::user(prompt),
            ])
            .await?;
        let parsed = PatternResponse::parse_output(&raw)?;

        Ok(ViralPattern {
            id: Uuid::new_v4(),
            content_id: candidate.id.clone(),
            hook_score: parsed.hook_score.clamp(0.0, 1.0),
            retention_estimate: parsed.retention_estimate.clamp(0.0, 1.0),
            pacing_bpm: parsed.pacing_bpm,
            style_keywords: parsed.style_keywords,
            emotional_triggers: parsed.emotional_triggers,
            analyzed_at: Utc::now(),
        })
    }

    /// Engagement-derived estimate used when no model is configured.
    fn heuristic(candidate: &ContentCandidate) -> ViralPattern {
        let engagement = candidate.engagement_score.clamp(0.0, 1.0);
        ViralPattern {
            id: Uuid::new_v4(),
            content_id: candidate.id.clone(),
            hook_score: (0.3 + engagement * 0.6).min(1.0),
            retention_estimate: (0.25 + engagement * 0.5).min(1.0),
            pacing_bpm: None,
            style_keywords: candidate.tags.clone(),
            emotional_triggers: Vec::new(),
            analyzed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use viralforge_common::Platform;

    struct CannedModel(&'static str);

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn complete(&self, _messages: Vec<Message>) -> anyhow::Result<String> {
            Err(anyhow!("unused"))
        }
        async fn complete_json(&self, _messages: Vec<Message>) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn candidate() -> ContentCandidate {
        ContentCandidate::new("yt_1", Platform::YouTube, "https://yt/1")
            .with_engagement(0.5)
            .with_title("test")
    }

    #[tokio::test]
    async fn model_output_is_clamped() {
        let model: Arc<dyn ChatModel> = Arc::new(CannedModel(
            r#"{"hook_score": 3.0, "retention_estimate": -1.0, "pacing_bpm": 120,
                "style_keywords": ["fast cuts"], "emotional_triggers": ["awe"]}"#,
        ));
        let analyzer = PatternAnalyzer::new(Some(model));
        let pattern = analyzer.analyze(&candidate(), "transcript").await;
        assert_eq!(pattern.hook_score, 1.0);
        assert_eq!(pattern.retention_estimate, 0.0);
        assert_eq!(pattern.pacing_bpm, Some(120.0));
        assert_eq!(pattern.style_keywords, vec!["fast cuts"]);
    }

    #[tokio::test]
    async fn malformed_model_falls_back() {
        let model: Arc<dyn ChatModel> = Arc::new(CannedModel("NOT-JSON"));
        let analyzer = PatternAnalyzer::new(Some(model));
        let pattern = analyzer.analyze(&candidate(), "transcript").await;
        assert!((pattern.hook_score - 0.6).abs() < 1e-9);
        assert!(pattern.pacing_bpm.is_none());
    }

    #[tokio::test]
    async fn no_model_uses_heuristic() {
        let analyzer = PatternAnalyzer::new(None);
        let pattern = analyzer.analyze(&candidate(), "").await;
        assert_eq!(pattern.content_id, "yt_1");
        assert!(pattern.hook_score > 0.0 && pattern.hook_score <= 1.0);
    }
}
