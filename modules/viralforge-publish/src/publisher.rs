use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use viralforge_common::{Platform, PostMetadata};

use crate::error::PublishError;

/// Uniform upload surface over per-platform state machines. Returns the
/// public URL of the published video.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload(
        &self,
        video: &Path,
        metadata: &PostMetadata,
        account_id: Option<i64>,
    ) -> Result<String, PublishError>;

    fn platform(&self) -> Platform;
}

#[derive(Default, Clone)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.publishers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePublisher(Platform);

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn upload(
            &self,
            _video: &Path,
            _metadata: &PostMetadata,
            _account_id: Option<i64>,
        ) -> Result<String, PublishError> {
            Ok("https://example.com/v/1".to_string())
        }

        fn platform(&self) -> Platform {
            self.0
        }
    }

    #[test]
    fn registry_routes_by_platform() {
        let registry = PublisherRegistry::new()
            .register(Arc::new(FakePublisher(Platform::TikTok)))
            .register(Arc::new(FakePublisher(Platform::YouTube)));
        assert!(registry.get(Platform::TikTok).is_some());
        assert!(registry.get(Platform::Reddit).is_none());
    }
}
