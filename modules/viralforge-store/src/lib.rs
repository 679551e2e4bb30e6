pub mod cache;
pub mod candidates;
pub mod jobs;
pub mod niches;
pub mod posts;
pub mod refs;
pub mod schema;
pub mod tokens;

pub use cache::{KvCache, MemoryCache, RedisCache};
pub use candidates::{CandidateStore, MemoryCandidateStore, PgCandidateStore};
pub use jobs::{JobNotifier, JobStore, JobUpdate, MemoryJobStore, PgJobStore};
pub use niches::{MemoryNicheStore, NicheStore, PgNicheStore};
pub use posts::{MemoryPostStore, PgPostStore, ScheduledPostStore};
pub use refs::{MemoryRefRewriter, PgRefRewriter, RefRewriter};
pub use tokens::{MemoryTokenStore, PgTokenStore, TokenManager, TokenRefresher, TokenStore};
