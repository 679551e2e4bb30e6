pub mod lifecycle;
pub mod object_store;

pub use lifecycle::{LifecycleStats, StorageLifecycle};
pub use object_store::{MemoryObjectStore, ObjectStore, S3ObjectStore, StoredObject};
