use std::env;

use crate::types::FilterId;

/// Resolves named secrets. The default implementation reads environment
/// variables; tests substitute a map-backed resolver.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;
}

pub struct EnvSecrets;

impl SecretResolver for EnvSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Application configuration constructed once at startup and passed
/// explicitly. Missing optional keys disable the corresponding adapter
/// rather than failing startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Persistence
    pub database_url: String,
    pub redis_url: String,

    // LLM (OpenAI-compatible endpoint; ranking + strategy planning)
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,

    // Scanner credentials (empty string = adapter disabled)
    pub youtube_api_key: String,
    pub tiktok_api_key: String,
    pub reddit_user_agent: String,
    pub metasearch_base_url: String,

    // OAuth client credentials for token refresh
    pub tiktok_client_key: String,
    pub tiktok_client_secret: String,
    pub google_client_id: String,
    pub google_client_secret: String,

    // B-roll
    pub pexels_api_key: String,

    // Transcription (whisper-style OpenAI-compatible endpoint)
    pub transcribe_base_url: String,
    pub transcribe_api_key: String,

    // Object storage
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,

    // Rendering
    pub outputs_dir: String,
    pub font_path: String,
    pub use_gpu: bool,
    /// Dashboard-enabled optional filters, e.g. `f6,f8`.
    pub enabled_filters: Vec<FilterId>,

    // Public asset serving
    pub public_base_url: String,

    // Storage lifecycle
    pub storage_threshold_gb: f64,
    pub retention_days: i64,

    // Worker
    pub worker_concurrency: usize,
    pub secret_key: String,
    pub production: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self::from_secrets(&EnvSecrets)
    }

    pub fn from_secrets(secrets: &dyn SecretResolver) -> Self {
        let get = |name: &str| secrets.resolve(name).unwrap_or_default();
        Self {
            database_url: required(secrets, "DATABASE_URL"),
            redis_url: secrets
                .resolve("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            llm_api_key: get("LLM_API_KEY"),
            llm_base_url: secrets
                .resolve("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
            llm_model: secrets
                .resolve("LLM_MODEL")
                .unwrap_or_else(|| "llama-3.1-8b-instant".to_string()),
            youtube_api_key: get("YOUTUBE_API_KEY"),
            tiktok_api_key: get("TIKTOK_API_KEY"),
            reddit_user_agent: secrets
                .resolve("REDDIT_USER_AGENT")
                .unwrap_or_else(|| "viralforge/0.1".to_string()),
            metasearch_base_url: get("METASEARCH_BASE_URL"),
            tiktok_client_key: get("TIKTOK_CLIENT_KEY"),
            tiktok_client_secret: get("TIKTOK_CLIENT_SECRET"),
            google_client_id: get("GOOGLE_CLIENT_ID"),
            google_client_secret: get("GOOGLE_CLIENT_SECRET"),
            pexels_api_key: get("PEXELS_API_KEY"),
            transcribe_base_url: get("TRANSCRIBE_BASE_URL"),
            transcribe_api_key: get("TRANSCRIBE_API_KEY"),
            s3_bucket: get("S3_BUCKET"),
            s3_region: secrets
                .resolve("S3_REGION")
                .unwrap_or_else(|| "us-east-1".to_string()),
            s3_endpoint: secrets.resolve("S3_ENDPOINT"),
            outputs_dir: secrets
                .resolve("OUTPUTS_DIR")
                .unwrap_or_else(|| "outputs".to_string()),
            font_path: secrets.resolve("FONT_PATH").unwrap_or_else(|| {
                "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_string()
            }),
            use_gpu: secrets
                .resolve("USE_GPU")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            enabled_filters: secrets
                .resolve("ENABLED_FILTERS")
                .map(|csv| {
                    csv.split(',')
                        .filter_map(|f| f.trim().parse::<FilterId>().ok())
                        .collect()
                })
                .unwrap_or_default(),
            public_base_url: secrets
                .resolve("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            storage_threshold_gb: secrets
                .resolve("STORAGE_THRESHOLD_GB")
                .and_then(|v| v.parse().ok())
                .unwrap_or(140.0),
            retention_days: secrets
                .resolve("RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            worker_concurrency: secrets
                .resolve("WORKER_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            secret_key: get("SECRET_KEY"),
            production: secrets
                .resolve("ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
        }
    }

    /// Log what is configured without leaking values.
    pub fn log_redacted(&self) {
        tracing::info!(
            llm = !self.llm_api_key.is_empty(),
            youtube = !self.youtube_api_key.is_empty(),
            tiktok = !self.tiktok_api_key.is_empty(),
            pexels = !self.pexels_api_key.is_empty(),
            transcribe = !self.transcribe_base_url.is_empty(),
            s3 = !self.s3_bucket.is_empty(),
            gpu = self.use_gpu,
            outputs_dir = %self.outputs_dir,
            concurrency = self.worker_concurrency,
            "Configuration loaded"
        );
    }
}

fn required(secrets: &dyn SecretResolver, name: &str) -> String {
    secrets
        .resolve(name)
        .unwrap_or_else(|| panic!("{name} must be set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapSecrets(HashMap<&'static str, &'static str>);

    impl SecretResolver for MapSecrets {
        fn resolve(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|v| v.to_string())
        }
    }

    #[test]
    fn optional_keys_default_to_disabled() {
        let secrets = MapSecrets(HashMap::from([(
            "DATABASE_URL",
            "postgres://localhost/forge",
        )]));
        let config = Config::from_secrets(&secrets);
        assert!(config.youtube_api_key.is_empty());
        assert!(config.pexels_api_key.is_empty());
        assert_eq!(config.storage_threshold_gb, 140.0);
        assert_eq!(config.retention_days, 90);
        assert!(config.use_gpu);
        assert!(config.enabled_filters.is_empty());
        assert!(!config.production);
    }

    #[test]
    fn filter_list_parses_and_skips_garbage() {
        let secrets = MapSecrets(HashMap::from([
            ("DATABASE_URL", "postgres://localhost/forge"),
            ("ENABLED_FILTERS", "f6, f8,bogus,f11"),
        ]));
        let config = Config::from_secrets(&secrets);
        assert_eq!(
            config.enabled_filters,
            vec![FilterId::SpeedRamp, FilterId::Jitter, FilterId::Grayscale]
        );
    }

    #[test]
    #[should_panic(expected = "DATABASE_URL must be set")]
    fn missing_required_panics() {
        let secrets = MapSecrets(HashMap::new());
        let _ = Config::from_secrets(&secrets);
    }
}
