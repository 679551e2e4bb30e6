pub mod audit;
pub mod handlers;
pub mod posts;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod sentinel;

pub use audit::SecurityAuditor;
pub use handlers::{
    package_metadata, DownloadAndProcessHandler, PublishOutputHandler, ScanTrendsHandler,
    SourceDownloader, YtDlpDownloader,
};
pub use posts::{next_posting_slot, PostSweeper};
pub use queue::{MemoryQueue, RedisQueue, TaskEnvelope, TaskKind, TaskQueue};
pub use runtime::{ShutdownToken, TaskHandler, WorkerRuntime};
pub use scheduler::{PeriodicJob, PeriodicTask, Scheduler};
pub use sentinel::Sentinel;
