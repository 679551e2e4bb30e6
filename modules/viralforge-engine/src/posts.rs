use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use viralforge_common::error::Result;
use viralforge_common::{PostStatus, PublishedRecord};
use viralforge_publish::PublisherRegistry;
use viralforge_store::ScheduledPostStore;

use crate::scheduler::PeriodicJob;

/// Peak engagement windows (UTC hours, inclusive).
const PEAK_WINDOWS: [(u32, u32); 3] = [(9, 11), (12, 14), (18, 21)];

/// The 5-minute scheduled-post sweep: claim due posts, publish, record
/// history. The claim CAS keeps concurrent sweeps from double-posting.
pub struct PostSweeper {
    posts: Arc<dyn ScheduledPostStore>,
    publishers: PublisherRegistry,
}

impl PostSweeper {
    pub fn new(posts: Arc<dyn ScheduledPostStore>, publishers: PublisherRegistry) -> Self {
        Self { posts, publishers }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<()> {
        let due = self.posts.due(now).await?;
        if due.is_empty() {
            return Ok(());
        }
        info!(due = due.len(), "Scheduled post sweep");

        for post in due {
            if !self.posts.claim(post.id).await? {
                continue;
            }

            let Some(publisher) = self.publishers.get(post.platform) else {
                warn!(post = %post.id, platform = %post.platform, "No publisher configured");
                self.posts.mark(post.id, PostStatus::Failed).await?;
                continue;
            };

            match publisher
                .upload(Path::new(&post.video_ref), &post.metadata, post.account_id)
                .await
            {
                Ok(url) => {
                    self.posts.mark(post.id, PostStatus::Published).await?;
                    self.posts
                        .add_history(&PublishedRecord {
                            id: Uuid::new_v4(),
                            title: post.metadata.title.clone(),
                            platform: post.platform,
                            url,
                            account_id: post.account_id,
                            published_at: Utc::now(),
                        })
                        .await?;
                    info!(post = %post.id, "Scheduled post published");
                }
                Err(e) => {
                    warn!(post = %post.id, kind = ?e.kind(), error = %e, "Scheduled post failed");
                    self.posts.mark(post.id, PostStatus::Failed).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for PostSweeper {
    async fn run(&self) -> anyhow::Result<()> {
        self.sweep(Utc::now()).await?;
        Ok(())
    }
}

/// Next posting slot: a 30-90 minute jittered buffer after the later of
/// `last_post`/`now`, snapped into the next peak engagement window.
pub fn next_posting_slot(
    last_post: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rng: &mut StdRng,
) -> DateTime<Utc> {
    let base = match last_post {
        Some(last) if last > now => last,
        _ => now,
    };
    let next = base + Duration::minutes(rng.gen_range(30..=90));

    let hour = next.hour();
    for (start, end) in PEAK_WINDOWS {
        if hour >= start && hour <= end {
            return next;
        }
    }
    for (start, _) in PEAK_WINDOWS {
        if start > hour {
            return with_hour_minute(next, start, rng.gen_range(0..=30));
        }
    }
    // Past the last window: first window tomorrow.
    with_hour_minute(next + Duration::days(1), PEAK_WINDOWS[0].0, rng.gen_range(0..=30))
}

fn with_hour_minute(at: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    at.with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use viralforge_common::{Platform, PostMetadata, ScheduledPost};
    use viralforge_publish::{PublishError, Publisher};
    use viralforge_store::MemoryPostStore;

    struct CountingPublisher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn upload(
            &self,
            _video: &Path,
            _metadata: &PostMetadata,
            _account_id: Option<i64>,
        ) -> std::result::Result<String, PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PublishError::Transient("down".into()))
            } else {
                Ok("https://platform/v/1".into())
            }
        }
        fn platform(&self) -> Platform {
            Platform::TikTok
        }
    }

    fn due_post(at: DateTime<Utc>) -> ScheduledPost {
        ScheduledPost {
            id: Uuid::new_v4(),
            video_ref: "/outputs/a.mp4".into(),
            platform: Platform::TikTok,
            account_id: None,
            scheduled_for: at,
            status: PostStatus::Pending,
            metadata: PostMetadata {
                title: "clip".into(),
                description: String::new(),
                hashtags: vec![],
            },
        }
    }

    #[tokio::test]
    async fn due_post_publishes_once_with_history() {
        let posts = Arc::new(MemoryPostStore::new());
        let now = Utc::now();
        let post = due_post(now - Duration::minutes(1));
        posts.schedule(&post).await.unwrap();

        let publisher = Arc::new(CountingPublisher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sweeper = PostSweeper::new(
            posts.clone(),
            PublisherRegistry::new().register(publisher.clone()),
        );

        sweeper.sweep(now).await.unwrap();
        // A second sweep must not re-publish.
        sweeper.sweep(now).await.unwrap();

        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(posts.get(post.id).unwrap().status, PostStatus::Published);
        assert_eq!(posts.history().len(), 1);
        assert_eq!(posts.history()[0].url, "https://platform/v/1");
    }

    #[tokio::test]
    async fn publish_failure_marks_failed_without_history() {
        let posts = Arc::new(MemoryPostStore::new());
        let now = Utc::now();
        let post = due_post(now);
        posts.schedule(&post).await.unwrap();

        let sweeper = PostSweeper::new(
            posts.clone(),
            PublisherRegistry::new().register(Arc::new(CountingPublisher {
                calls: AtomicUsize::new(0),
                fail: true,
            })),
        );
        sweeper.sweep(now).await.unwrap();

        assert_eq!(posts.get(post.id).unwrap().status, PostStatus::Failed);
        assert!(posts.history().is_empty());
    }

    #[tokio::test]
    async fn future_posts_are_left_alone() {
        let posts = Arc::new(MemoryPostStore::new());
        let now = Utc::now();
        let post = due_post(now + Duration::hours(2));
        posts.schedule(&post).await.unwrap();

        let publisher = Arc::new(CountingPublisher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sweeper = PostSweeper::new(
            posts.clone(),
            PublisherRegistry::new().register(publisher.clone()),
        );
        sweeper.sweep(now).await.unwrap();
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(posts.get(post.id).unwrap().status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn unconfigured_platform_fails_the_post() {
        let posts = Arc::new(MemoryPostStore::new());
        let now = Utc::now();
        let post = due_post(now);
        posts.schedule(&post).await.unwrap();

        let sweeper = PostSweeper::new(posts.clone(), PublisherRegistry::new());
        sweeper.sweep(now).await.unwrap();
        assert_eq!(posts.get(post.id).unwrap().status, PostStatus::Failed);
    }

    #[test]
    fn posting_slot_lands_in_or_before_a_window() {
        let mut rng = StdRng::seed_from_u64(11);
        // 08:00 → buffer puts it at 08:30-09:30; snap target is the 9-11
        // window, either directly or via the window start.
        let morning = Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap();
        for _ in 0..20 {
            let slot = next_posting_slot(None, morning, &mut rng);
            assert!(slot > morning);
            let h = slot.hour();
            assert!((9..=11).contains(&h) || h == 8, "got hour {h}");
        }
    }

    #[test]
    fn late_night_rolls_to_next_morning() {
        let mut rng = StdRng::seed_from_u64(3);
        let late = Utc.with_ymd_and_hms(2026, 7, 1, 23, 30, 0).unwrap();
        let slot = next_posting_slot(None, late, &mut rng);
        assert_eq!(slot.hour(), 9);
        assert_eq!(slot.date_naive(), late.date_naive() + Duration::days(1));
    }

    #[test]
    fn future_last_post_is_the_base() {
        let mut rng = StdRng::seed_from_u64(5);
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
        let last = now + Duration::hours(1);
        let slot = next_posting_slot(Some(last), now, &mut rng);
        assert!(slot >= last + Duration::minutes(30));
    }
}
