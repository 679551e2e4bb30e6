pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, EnvSecrets, SecretResolver};
pub use error::{FailureKind, ForgeError};
pub use types::*;
