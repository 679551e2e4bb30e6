use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ai_client::{ChatModel, Message};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{FilterId, JobStatus, Platform, PostMetadata, PublishedRecord};
use viralforge_discovery::{trends, DiscoveryService};
use viralforge_media::strategy::StrategyPlanner;
use viralforge_media::{Renderer, TransformRequest};
use viralforge_publish::PublisherRegistry;
use viralforge_store::{CandidateStore, JobStore, NicheStore, ScheduledPostStore};

use crate::queue::{TaskEnvelope, TaskKind, TaskQueue};
use crate::runtime::TaskHandler;

/// Fetches a source video to local disk.
#[async_trait]
pub trait SourceDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<PathBuf>;
}

/// yt-dlp subprocess downloader; handles every platform the scanners
/// surface.
pub struct YtDlpDownloader {
    bin: String,
}

impl YtDlpDownloader {
    pub fn new() -> Self {
        Self {
            bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
        }
    }
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceDownloader for YtDlpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dest).await?;
        let target = dest.join(format!("{}.mp4", Uuid::new_v4()));
        let output = tokio::process::Command::new(&self.bin)
            .args([
                "-f",
                "mp4/bestvideo*+bestaudio/best",
                "--no-playlist",
                "-o",
            ])
            .arg(&target)
            .arg(url)
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!(
                "yt-dlp failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(target)
    }
}

/// SEO package for the upload: LLM-written when a model is available,
/// deterministic from the niche otherwise.
pub async fn package_metadata(model: Option<&Arc<dyn ChatModel>>, niche: &str) -> PostMetadata {
    if let Some(model) = model {
        let prompt = format!(
            "Write a viral short-form video package for the {niche} niche. \
             Respond as JSON: \
             {{\"title\": \"...\", \"description\": \"...\", \"hashtags\": [\"#...\"]}}"
        );
        match model.complete_json(vec![Message::user(prompt)]).await {
            Ok(raw) => {
                if let Ok(metadata) = serde_json::from_str::<PostMetadata>(&raw) {
                    return metadata;
                }
                warn!(niche, "Metadata package unparseable, using fallback");
            }
            Err(e) => warn!(niche, error = %e, "Metadata package failed, using fallback"),
        }
    }

    let tag = niche.to_lowercase().replace(' ', "");
    PostMetadata {
        title: format!("{niche} Daily Short"),
        description: format!("Daily {niche} content."),
        hashtags: vec![format!("#{tag}"), "#shorts".to_string(), "#viral".to_string()],
    }
}

// --- video.download_and_process ---

pub struct DownloadAndProcessHandler {
    jobs: Arc<dyn JobStore>,
    niches: Arc<dyn NicheStore>,
    queue: Arc<dyn TaskQueue>,
    downloader: Arc<dyn SourceDownloader>,
    planner: Arc<StrategyPlanner>,
    renderer: Arc<dyn Renderer>,
    packager: Option<Arc<dyn ChatModel>>,
    enabled_filters: Vec<FilterId>,
    downloads_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl DownloadAndProcessHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        niches: Arc<dyn NicheStore>,
        queue: Arc<dyn TaskQueue>,
        downloader: Arc<dyn SourceDownloader>,
        planner: Arc<StrategyPlanner>,
        renderer: Arc<dyn Renderer>,
        packager: Option<Arc<dyn ChatModel>>,
        enabled_filters: Vec<FilterId>,
        downloads_dir: impl Into<PathBuf>,
        outputs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            niches,
            queue,
            downloader,
            planner,
            renderer,
            packager,
            enabled_filters,
            downloads_dir: downloads_dir.into(),
            outputs_dir: outputs_dir.into(),
        }
    }

    async fn stage(&self, job_id: Uuid, label: &str, progress: u8) -> Result<()> {
        self.jobs
            .update(job_id, JobStatus::Running(label.to_string()), progress)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TaskHandler for DownloadAndProcessHandler {
    fn name(&self) -> &'static str {
        "video.download_and_process"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(30 * 60)
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<()> {
        let TaskKind::DownloadAndProcess {
            source_url,
            niche,
            platform,
        } = &envelope.kind
        else {
            return Err(ForgeError::Validation("wrong task payload".to_string()));
        };
        let job_id = envelope
            .job_id
            .ok_or_else(|| ForgeError::Validation("transform task without a job".to_string()))?;

        // Idempotency: at-least-once delivery means this envelope can
        // arrive twice; only the claiming worker proceeds.
        if !self.jobs.claim(job_id, "Downloading").await? {
            info!(%job_id, "Job already claimed, skipping duplicate delivery");
            return Ok(());
        }
        self.stage(job_id, "Downloading", 10).await?;

        let source = self
            .downloader
            .download(source_url, &self.downloads_dir)
            .await
            .map_err(|e| ForgeError::Transient(format!("download failed: {e}")))?;

        self.stage(job_id, "Rendering", 30).await?;
        let strategy = self.planner.plan(&[], niche, None, None).await;

        let request = TransformRequest {
            source,
            output_dir: self.outputs_dir.clone(),
            enabled_filters: self.enabled_filters.clone(),
            strategy: Some(strategy),
            seed: None,
        };
        let progress = {
            let jobs = self.jobs.clone();
            Arc::new(move |stage: &str, pct: u8| {
                let jobs = jobs.clone();
                let stage = stage.to_string();
                // Render progress maps into the job's 30-70 band.
                let job_pct = 30 + (pct as u32 * 40 / 100) as u8;
                tokio::spawn(async move {
                    let _ = jobs
                        .update(job_id, JobStatus::Running(stage), job_pct)
                        .await;
                });
            }) as viralforge_media::pipeline::ProgressFn
        };
        let outcome = self.renderer.render(&request, Some(progress)).await?;

        self.stage(job_id, "Optimizing", 70).await?;
        let metadata = package_metadata(self.packager.as_ref(), niche).await;

        let output_ref = outcome.output_path.display().to_string();
        self.jobs.set_output(job_id, &output_ref).await?;

        // Chain the autopilot publish off the completed transform.
        if self.niches.autopilot_enabled().await.unwrap_or(false) {
            self.stage(job_id, "Uploading", 85).await?;
            let publish = TaskEnvelope::new(
                TaskKind::PublishOutput {
                    video_ref: output_ref.clone(),
                    platform: *platform,
                    title: metadata.title.clone(),
                },
                None,
            );
            if let Err(e) = self.queue.enqueue(&publish).await {
                warn!(%job_id, error = %e, "Autopilot publish enqueue failed");
            }
        }

        self.jobs.update(job_id, JobStatus::Completed, 100).await?;
        info!(%job_id, output = %output_ref, "Transform job complete");
        Ok(())
    }
}

// --- optimization.publish_output (autopilot chain) ---

pub struct PublishOutputHandler {
    publishers: PublisherRegistry,
    posts: Arc<dyn ScheduledPostStore>,
}

impl PublishOutputHandler {
    pub fn new(publishers: PublisherRegistry, posts: Arc<dyn ScheduledPostStore>) -> Self {
        Self { publishers, posts }
    }
}

#[async_trait]
impl TaskHandler for PublishOutputHandler {
    fn name(&self) -> &'static str {
        "optimization.publish_output"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<()> {
        let TaskKind::PublishOutput {
            video_ref,
            platform,
            title,
        } = &envelope.kind
        else {
            return Err(ForgeError::Validation("wrong task payload".to_string()));
        };

        let Some(publisher) = self.publishers.get(*platform) else {
            warn!(platform = %platform, "No publisher configured, dropping autopilot publish");
            return Ok(());
        };
        let metadata = PostMetadata {
            title: title.clone(),
            description: String::new(),
            hashtags: vec!["#shorts".to_string()],
        };
        let url = publisher
            .upload(Path::new(video_ref), &metadata, None)
            .await
            .map_err(|e| match e.kind() {
                viralforge_common::FailureKind::Auth => ForgeError::Auth(e.to_string()),
                _ => ForgeError::Transient(e.to_string()),
            })?;

        self.posts
            .add_history(&PublishedRecord {
                id: Uuid::new_v4(),
                title: title.clone(),
                platform: *platform,
                url: url.clone(),
                account_id: None,
                published_at: chrono::Utc::now(),
            })
            .await?;
        info!(url = %url, "Autopilot publish complete");
        Ok(())
    }
}

// --- discovery.scan_trends ---

pub struct ScanTrendsHandler {
    jobs: Arc<dyn JobStore>,
    discovery: Arc<DiscoveryService>,
    candidates: Arc<dyn CandidateStore>,
    niches: Arc<dyn NicheStore>,
}

impl ScanTrendsHandler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        discovery: Arc<DiscoveryService>,
        candidates: Arc<dyn CandidateStore>,
        niches: Arc<dyn NicheStore>,
    ) -> Self {
        Self {
            jobs,
            discovery,
            candidates,
            niches,
        }
    }
}

#[async_trait]
impl TaskHandler for ScanTrendsHandler {
    fn name(&self) -> &'static str {
        "discovery.scan_trends"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<()> {
        let TaskKind::ScanTrends { niche } = &envelope.kind else {
            return Err(ForgeError::Validation("wrong task payload".to_string()));
        };

        if let Some(job_id) = envelope.job_id {
            if !self.jobs.claim(job_id, "Scanning").await? {
                return Ok(());
            }
        }

        let found = self
            .discovery
            .aggregate(niche, viralforge_common::Horizon::Month)
            .await?;
        trends::aggregate_niche_trends(&self.candidates, &self.niches, niche).await?;
        info!(niche, found = found.len(), "Trend scan complete");

        if let Some(job_id) = envelope.job_id {
            self.jobs.update(job_id, JobStatus::Completed, 100).await?;
        }
        Ok(())
    }
}
