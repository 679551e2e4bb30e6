use std::collections::HashSet;
use std::sync::Arc;

use ai_client::{ChatModel, Message};
use async_trait::async_trait;
use tracing::debug;

use viralforge_common::ContentCandidate;

/// Number of top-by-views candidates submitted to the ranker.
pub const RANK_WINDOW: usize = 15;

/// Orders candidates by predicted viral potential. Returns a permutation
/// prefix: indices into the submitted slice, best first. Must never
/// drop candidates: unranked indices keep their original relative order
/// at the tail (see [`apply_ranking`]).
#[async_trait]
pub trait CandidateRanker: Send + Sync {
    async fn rank(&self, niche: &str, candidates: &[ContentCandidate])
        -> anyhow::Result<Vec<usize>>;
}

/// LLM-backed ranker. Any malformed model response is an error; the
/// aggregator falls back to views-descending order.
pub struct LlmRanker {
    model: Arc<dyn ChatModel>,
}

impl LlmRanker {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(niche: &str, candidates: &[ContentCandidate]) -> String {
        let summaries: Vec<serde_json::Value> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                serde_json::json!({
                    "index": i,
                    "platform": c.platform.as_str(),
                    "title": c.title,
                    "author": c.author,
                    "engagement": format!("{:.2}%", c.engagement_score * 100.0),
                })
            })
            .collect();

        format!(
            "You are a viral content strategist. Analyze these {count} content \
             candidates in the {niche} niche.\n\n\
             Goal: identify which candidates have the most translatability (the \
             best psychological hook that can be remixed) and flag high-potential \
             pillar content that should be chopped into clips.\n\n\
             Candidates:\n{candidates}\n\n\
             Return ONLY a JSON array of indices in priority order (most viral \
             first), e.g. [4, 0, 2, 1, 3].",
            count = candidates.len(),
            niche = niche,
            candidates = serde_json::to_string_pretty(&summaries).unwrap_or_default(),
        )
    }

    /// The model may answer with a bare array or wrap it in an object
    /// under a few common keys. Anything else is a protocol error.
    pub(crate) fn parse_indices(raw: &str) -> anyhow::Result<Vec<usize>> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())?;
        let array = match &value {
            serde_json::Value::Array(items) => items.clone(),
            serde_json::Value::Object(map) => map
                .get("indices")
                .or_else(|| map.get("priority_order"))
                .or_else(|| map.values().next())
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no index array in ranker response"))?,
            _ => anyhow::bail!("ranker response is not an array or object"),
        };
        let indices: Vec<usize> = array
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect();
        if indices.is_empty() {
            anyhow::bail!("ranker returned no usable indices");
        }
        Ok(indices)
    }
}

#[async_trait]
impl CandidateRanker for LlmRanker {
    async fn rank(
        &self,
        niche: &str,
        candidates: &[ContentCandidate],
    ) -> anyhow::Result<Vec<usize>> {
        let messages = vec![
            Message::system("You are a viral content strategist."),
            Message::user(Self::prompt(niche, candidates)),
        ];
        let raw = self.model.complete_json(messages).await?;
        let indices = Self::parse_indices(&raw)?;
        debug!(niche, ranked = indices.len(), "Ranker returned priority order");
        Ok(indices)
    }
}

/// Apply a ranker permutation: ranked indices first (invalid or repeated
/// indices skipped), then every unranked candidate in its original
/// relative order. The output always contains every input exactly once.
pub fn apply_ranking(
    candidates: Vec<ContentCandidate>,
    indices: &[usize],
) -> Vec<ContentCandidate> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut order: Vec<usize> = Vec::with_capacity(candidates.len());
    for &idx in indices {
        if idx < candidates.len() && seen.insert(idx) {
            order.push(idx);
        }
    }
    for idx in 0..candidates.len() {
        if seen.insert(idx) {
            order.push(idx);
        }
    }

    let mut slots: Vec<Option<ContentCandidate>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use viralforge_common::Platform;

    fn candidate(id: &str, views: u64) -> ContentCandidate {
        ContentCandidate::new(id, Platform::YouTube, format!("https://yt/{id}"))
            .with_views(views)
    }

    #[test]
    fn apply_ranking_preserves_unranked_tail() {
        let candidates = vec![
            candidate("a", 100),
            candidate("b", 50),
            candidate("c", 200),
            candidate("d", 10),
        ];
        let ranked = apply_ranking(candidates, &[2, 0]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b", "d"]);
    }

    #[test]
    fn apply_ranking_ignores_garbage_indices() {
        let candidates = vec![candidate("a", 1), candidate("b", 2)];
        let ranked = apply_ranking(candidates, &[9, 1, 1, 0]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn parse_bare_array() {
        assert_eq!(LlmRanker::parse_indices("[2, 0, 1]").unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn parse_wrapped_object() {
        assert_eq!(
            LlmRanker::parse_indices("{\"indices\": [1, 0]}").unwrap(),
            vec![1, 0]
        );
        assert_eq!(
            LlmRanker::parse_indices("{\"priority_order\": [0, 1]}").unwrap(),
            vec![0, 1]
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(LlmRanker::parse_indices("NOT-JSON").is_err());
        assert!(LlmRanker::parse_indices("\"just a string\"").is_err());
        assert!(LlmRanker::parse_indices("{}").is_err());
    }
}
