pub mod error;
pub mod publisher;
pub mod refresh;
pub mod retry;
pub mod tiktok;
pub mod youtube;

pub use error::PublishError;
pub use publisher::{Publisher, PublisherRegistry};
pub use refresh::{OAuthRefresher, RefreshEndpoint};
pub use tiktok::{ChunkedUploadState, TikTokPublisher, CHUNK_SIZE};
pub use youtube::YouTubePublisher;
