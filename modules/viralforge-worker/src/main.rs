use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::{ChatModel, OpenAiCompatClient};
use stock_client::StockClient;
use viralforge_common::{Config, Platform};
use viralforge_discovery::adapters::{
    ArchiveOrgScanner, MetaSearchScanner, RedditScanner, TikTokScanner, YouTubeScanner,
};
use viralforge_discovery::{
    CandidateRanker, DiscoveryService, LlmRanker, NoopScanner, ScannerRegistry,
};
use viralforge_engine::{
    DownloadAndProcessHandler, PeriodicJob, PeriodicTask, PostSweeper, PublishOutputHandler,
    RedisQueue, ScanTrendsHandler, Scheduler, SecurityAuditor, Sentinel, ShutdownToken,
    TaskQueue, WorkerRuntime, YtDlpDownloader,
};
use viralforge_media::ffmpeg::FfmpegRunner;
use viralforge_media::strategy::StrategyPlanner;
use viralforge_media::{
    HttpTranscriber, PexelsBRoll, Renderer, TesseractDetector, TransformPipeline,
};
use viralforge_publish::{
    OAuthRefresher, PublisherRegistry, RefreshEndpoint, TikTokPublisher, YouTubePublisher,
};
use viralforge_storage::{ObjectStore, S3ObjectStore, StorageLifecycle};
use viralforge_store::{
    cache::{KvCache, RedisCache},
    CandidateStore, JobNotifier, JobStore, NicheStore, PgCandidateStore, PgJobStore,
    PgNicheStore, PgPostStore, PgRefRewriter, PgTokenStore, ScheduledPostStore, TokenManager,
    TokenStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("viralforge=info".parse()?))
        .init();

    info!("ViralForge worker starting...");

    let config = Config::from_env();
    config.log_redacted();

    // Persistence
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    viralforge_store::schema::ensure_schema(&pool).await?;

    let cache: Arc<dyn KvCache> = Arc::new(RedisCache::connect(&config.redis_url).await?);
    let queue: Arc<dyn TaskQueue> = Arc::new(RedisQueue::connect(&config.redis_url).await?);

    let notifier = JobNotifier::default();
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone(), notifier));
    let candidates: Arc<dyn CandidateStore> = Arc::new(PgCandidateStore::new(pool.clone()));
    let niches: Arc<dyn NicheStore> = Arc::new(PgNicheStore::new(pool.clone()));
    let posts: Arc<dyn ScheduledPostStore> = Arc::new(PgPostStore::new(pool.clone()));
    let tokens: Arc<dyn TokenStore> = Arc::new(PgTokenStore::new(pool.clone()));

    // LLM for ranking, strategy and metadata. Optional.
    let model: Option<Arc<dyn ChatModel>> = if config.llm_api_key.is_empty() {
        None
    } else {
        Some(Arc::new(OpenAiCompatClient::new(
            &config.llm_api_key,
            &config.llm_base_url,
            &config.llm_model,
        )))
    };

    // Discovery
    let scanners = build_scanners(&config);
    info!(scanners = scanners.len(), "Scanner registry built");
    let ranker = model
        .clone()
        .map(|m| Arc::new(LlmRanker::new(m)) as Arc<dyn CandidateRanker>);
    let discovery = Arc::new(DiscoveryService::new(
        scanners,
        candidates.clone(),
        cache.clone(),
        ranker,
    ));

    // Tokens and publishers
    let token_manager = Arc::new(
        TokenManager::new(tokens)
            .with_refresher(
                Platform::TikTok,
                Arc::new(OAuthRefresher::new(RefreshEndpoint {
                    token_url: "https://open.tiktokapis.com/v2/oauth/token/".to_string(),
                    client_id: config.tiktok_client_key.clone(),
                    client_secret: config.tiktok_client_secret.clone(),
                    client_id_field: "client_key",
                })),
            )
            .with_refresher(
                Platform::YouTube,
                Arc::new(OAuthRefresher::new(RefreshEndpoint {
                    token_url: "https://oauth2.googleapis.com/token".to_string(),
                    client_id: config.google_client_id.clone(),
                    client_secret: config.google_client_secret.clone(),
                    client_id_field: "client_id",
                })),
            ),
    );
    let publishers = PublisherRegistry::new()
        .register(Arc::new(TikTokPublisher::new(token_manager.clone())))
        .register(Arc::new(YouTubePublisher::new(token_manager)));

    // Media pipeline
    let ffmpeg = FfmpegRunner::new();
    let mut pipeline = TransformPipeline::new(ffmpeg.clone(), &config.font_path, config.use_gpu)
        .with_ocr(Arc::new(TesseractDetector::new(ffmpeg)));
    if !config.transcribe_base_url.is_empty() {
        pipeline = pipeline.with_transcriber(Arc::new(HttpTranscriber::new(
            &config.transcribe_base_url,
            &config.transcribe_api_key,
        )));
    }
    let stock = Arc::new(StockClient::new(&config.pexels_api_key));
    if stock.is_configured() {
        pipeline = pipeline.with_b_roll(Arc::new(PexelsBRoll::new(stock)));
    }
    let renderer: Arc<dyn Renderer> = Arc::new(pipeline);
    let planner = Arc::new(StrategyPlanner::new(model.clone()));

    // Storage lifecycle
    let objects: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::connect(
            &config.s3_bucket,
            &config.s3_region,
            config.s3_endpoint.as_deref(),
        )
        .await,
    );
    let lifecycle = Arc::new(StorageLifecycle::new(
        &config.outputs_dir,
        config.storage_threshold_gb,
        config.retention_days,
        objects,
        Arc::new(PgRefRewriter::new(pool)),
        &config.public_base_url,
    ));

    // Task handlers
    let runtime = Arc::new(
        WorkerRuntime::new(queue.clone(), jobs.clone())
            .register(Arc::new(DownloadAndProcessHandler::new(
                jobs.clone(),
                niches.clone(),
                queue.clone(),
                Arc::new(YtDlpDownloader::new()),
                planner,
                renderer,
                model,
                config.enabled_filters.clone(),
                "downloads",
                config.outputs_dir.clone(),
            )))
            .register(Arc::new(ScanTrendsHandler::new(
                jobs.clone(),
                discovery.clone(),
                candidates,
                niches.clone(),
            )))
            .register(Arc::new(PublishOutputHandler::new(
                publishers.clone(),
                posts.clone(),
            ))),
    );

    // Periodic tasks
    let sentinel = Arc::new(Sentinel::new(niches, jobs, queue, discovery));
    let sweeper = Arc::new(PostSweeper::new(posts, publishers));
    let auditor = Arc::new(SecurityAuditor::new(
        cache,
        &config.secret_key,
        config.production,
    ));
    let scheduler = Scheduler::new()
        .register(PeriodicTask::new(
            "discovery.sentinel_watcher",
            Duration::from_secs(14_400),
            sentinel,
        ))
        .register(PeriodicTask::new(
            "optimization.check_and_post_scheduled",
            Duration::from_secs(300),
            sweeper,
        ))
        .register(PeriodicTask::new(
            "security.system_audit",
            Duration::from_secs(86_400),
            auditor,
        ))
        .register(PeriodicTask::new(
            "storage.lifecycle",
            Duration::from_secs(86_400),
            Arc::new(LifecycleJob(lifecycle)),
        ));

    let shutdown = ShutdownToken::new();
    let periodic = scheduler.spawn_all(shutdown.clone());
    let workers = tokio::spawn(runtime.run(config.worker_concurrency, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, draining workers");
    shutdown.cancel();
    let _ = workers.await;
    for task in periodic {
        let _ = task.await;
    }
    info!("ViralForge worker stopped");
    Ok(())
}

/// One scanner per platform; adapters with missing credentials come up
/// disabled and the remaining platforms get no-op scanners.
fn build_scanners(config: &Config) -> ScannerRegistry {
    ScannerRegistry::new()
        .register(Arc::new(YouTubeScanner::new(&config.youtube_api_key)))
        .register(Arc::new(YouTubeScanner::long_form(&config.youtube_api_key)))
        .register(Arc::new(TikTokScanner::new(&config.tiktok_api_key)))
        .register(Arc::new(RedditScanner::new(&config.reddit_user_agent)))
        .register(Arc::new(MetaSearchScanner::new(&config.metasearch_base_url)))
        .register(Arc::new(ArchiveOrgScanner::new()))
        .register(Arc::new(NoopScanner::new("instagram")))
        .register(Arc::new(NoopScanner::new("facebook")))
        .register(Arc::new(NoopScanner::new("x")))
        .register(Arc::new(NoopScanner::new("rumble")))
        .register(Arc::new(NoopScanner::new("twitch")))
        .register(Arc::new(NoopScanner::new("snapchat")))
        .register(Arc::new(NoopScanner::new("pinterest")))
        .register(Arc::new(NoopScanner::new("linkedin")))
        .register(Arc::new(NoopScanner::new("bilibili")))
}

/// Adapter so the storage lifecycle runs under the scheduler's
/// single-flight guard.
struct LifecycleJob(Arc<StorageLifecycle>);

#[async_trait::async_trait]
impl PeriodicJob for LifecycleJob {
    async fn run(&self) -> Result<()> {
        self.0.enforce_threshold().await?;
        self.0.apply_retention(chrono::Utc::now()).await?;
        Ok(())
    }
}
