use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use viralforge_common::error::Result;
use viralforge_common::{AuditEvent, AuditReport, AuditSeverity};
use viralforge_store::KvCache;

use crate::scheduler::PeriodicJob;

const LOG_KEY: &str = "sentinel:security_logs";
const HEALTH_KEY: &str = "sentinel:security_health";
const LOG_RING_SIZE: usize = 1000;

const INSECURE_KEYS: &[&str] = &[
    "",
    "dev_secret_key_change_me_in_production",
    "dev_secret_key_vforge_2026_change_in_prod",
];

/// Threat level derived from the integrity score.
pub fn threat_level(score: u8) -> &'static str {
    if score > 80 {
        "LOW"
    } else if score < 50 {
        "CRITICAL"
    } else {
        "MEDIUM"
    }
}

/// Daily integrity audit plus the append-only security event ring
/// (most recent 1000 events kept).
pub struct SecurityAuditor {
    cache: Arc<dyn KvCache>,
    secret_key: String,
    production: bool,
}

impl SecurityAuditor {
    pub fn new(cache: Arc<dyn KvCache>, secret_key: &str, production: bool) -> Self {
        Self {
            cache,
            secret_key: secret_key.to_string(),
            production,
        }
    }

    pub async fn log_event(
        &self,
        event_type: &str,
        severity: AuditSeverity,
        details: serde_json::Value,
    ) -> Result<()> {
        let event = AuditEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            severity,
            details,
        };
        let payload = serde_json::to_string(&event)
            .map_err(|e| viralforge_common::ForgeError::Protocol(e.to_string()))?;
        self.cache.lpush_trim(LOG_KEY, &payload, LOG_RING_SIZE).await
    }

    /// Compute the integrity score and persist the report.
    pub async fn audit(&self) -> Result<AuditReport> {
        let mut findings = Vec::new();
        let mut score: i32 = 100;

        if INSECURE_KEYS.contains(&self.secret_key.as_str()) {
            findings.push("CRITICAL: default or missing SECRET_KEY detected".to_string());
            score -= 50;
        }

        if self.production {
            if let Some(mode) = env_file_mode() {
                if mode != 0o600 && mode != 0o400 {
                    findings.push(format!(
                        "WARNING: .env has permissive mode {mode:o}"
                    ));
                    score -= 10;
                }
            }
        }

        let report = AuditReport {
            score: score.clamp(0, 100) as u8,
            findings,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&report)
            .map_err(|e| viralforge_common::ForgeError::Protocol(e.to_string()))?;
        self.cache.set(HEALTH_KEY, &payload).await?;
        info!(score = report.score, findings = report.findings.len(), "Security audit complete");
        Ok(report)
    }

    /// Latest report plus the most recent events.
    pub async fn status(&self) -> Result<(Option<AuditReport>, Vec<AuditEvent>)> {
        let report = match self.cache.get(HEALTH_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).ok(),
            None => None,
        };
        let events = self
            .cache
            .lrange(LOG_KEY, 0, 19)
            .await?
            .into_iter()
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect();
        Ok((report, events))
    }
}

#[cfg(unix)]
fn env_file_mode() -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(".env")
        .ok()
        .map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn env_file_mode() -> Option<u32> {
    None
}

#[async_trait]
impl PeriodicJob for SecurityAuditor {
    async fn run(&self) -> anyhow::Result<()> {
        let report = self.audit().await?;
        if let Err(e) = self
            .log_event(
                "scheduled_audit",
                AuditSeverity::Info,
                serde_json::json!({
                    "score": report.score,
                    "findings_count": report.findings.len(),
                }),
            )
            .await
        {
            warn!(error = %e, "Audit event logging failed");
        }
        Ok(())
    }
}
