use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use viralforge_common::error::Result;
use viralforge_common::{NicheTrend, Platform};
use viralforge_store::{CandidateStore, NicheStore};

const TOP_KEYWORDS: usize = 10;
const MIN_WORD_LEN: usize = 4;

const STOP_WORDS: &[&str] = &[
    "the", "a", "to", "in", "and", "for", "of", "on", "with", "at", "by", "is", "it", "this",
    "that", "you", "your", "how", "what", "when", "will", "from", "are", "was", "not", "but",
    "have", "has",
];

/// Recompute a niche's trend aggregate from its stored candidates:
/// top title keywords and average engagement.
pub async fn aggregate_niche_trends(
    candidates: &Arc<dyn CandidateStore>,
    niches: &Arc<dyn NicheStore>,
    niche: &str,
) -> Result<Option<NicheTrend>> {
    let stored = candidates.list_by_niche(niche).await?;
    if stored.is_empty() {
        return Ok(None);
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for candidate in &stored {
        for word in keywords(&candidate.title) {
            *counts.entry(word).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top_keywords: Vec<String> = ranked.into_iter().take(TOP_KEYWORDS).map(|(w, _)| w).collect();

    let avg_engagement =
        stored.iter().map(|c| c.engagement_score).sum::<f64>() / stored.len() as f64;

    let trend = NicheTrend {
        niche: niche.to_string(),
        platform: Platform::YouTube,
        top_keywords,
        avg_engagement,
        last_updated: Utc::now(),
    };
    niches.upsert_trend(&trend).await?;
    info!(
        niche,
        candidates = stored.len(),
        avg_engagement,
        "Niche trend aggregated"
    );
    Ok(Some(trend))
}

fn keywords(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_WORD_LEN && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use viralforge_common::ContentCandidate;
    use viralforge_store::{MemoryCandidateStore, MemoryNicheStore};

    #[test]
    fn keyword_extraction_filters_noise() {
        let words = keywords("The BEST morning routine for the gym, with discipline!");
        assert_eq!(words, ["best", "morning", "routine", "discipline"]);
    }

    #[tokio::test]
    async fn trend_aggregation_counts_keywords() {
        let candidates: Arc<dyn CandidateStore> = Arc::new(MemoryCandidateStore::new());
        let niches: Arc<dyn NicheStore> = Arc::new(MemoryNicheStore::new());

        for (i, title) in [
            "morning discipline routine",
            "discipline wins every time",
            "gym discipline mindset",
        ]
        .iter()
        .enumerate()
        {
            let c = ContentCandidate::new(
                format!("yt_{i}"),
                Platform::YouTube,
                format!("https://yt/{i}"),
            )
            .with_title(*title)
            .with_engagement(0.5);
            candidates.upsert(&c, "Motivation").await.unwrap();
        }

        let trend = aggregate_niche_trends(&candidates, &niches, "Motivation")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trend.top_keywords[0], "discipline");
        assert!((trend.avg_engagement - 0.5).abs() < 1e-9);
        assert!(niches.get_trend("Motivation").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_niche_has_no_trend() {
        let candidates: Arc<dyn CandidateStore> = Arc::new(MemoryCandidateStore::new());
        let niches: Arc<dyn NicheStore> = Arc::new(MemoryNicheStore::new());
        let trend = aggregate_niche_trends(&candidates, &niches, "Nothing")
            .await
            .unwrap();
        assert!(trend.is_none());
    }
}
