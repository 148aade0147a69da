//! Aggregated runtime configuration (§6 "Configuration"): pure data loaded
//! from YAML at process construction, validated before anything is wired.
//!
//! Grounded on the teacher's `config.rs` (`Config::from_file`/`validate`),
//! generalized from TOML + early-return validation to YAML (this crate's
//! `serde_yaml` dependency, already used for replay/alert payloads) plus
//! this crate's own accumulating `Validator` (module D) so a caller sees
//! every malformed field in one pass rather than one-at-a-time.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, ValidationError};
use crate::policy::tool_policy::ToolPolicyRule;
use crate::policy::PolicyConfig;
use crate::replay::store::file::FileReplayStore;
#[cfg(feature = "sql-store")]
use crate::replay::store::sqlite::SqliteReplayStore;
use crate::replay::store::{memory::InMemoryReplayStore, ReplayStore};
use crate::replay::{CompactionConfig, RetentionConfig};
use crate::runtime::RetryConfig;
use crate::validation::Validator;
use crate::verifier_lane::VerifierLaneConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Required for `File`/`Sqlite` backends; ignored for `Memory`.
    pub path: Option<String>,
    pub retention: RetentionConfig,
    pub compaction: CompactionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            path: None,
            retention: RetentionConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Constructs the concrete backend this section names.
    pub async fn build(&self) -> Result<Arc<dyn ReplayStore>, StoreError> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryReplayStore::new(self.retention, self.compaction))),
            StoreBackend::File => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| StoreError::Corrupt("file store requires store.path".to_string()))?;
                Ok(Arc::new(FileReplayStore::open(path.clone(), self.retention, self.compaction).await?))
            }
            #[cfg(feature = "sql-store")]
            StoreBackend::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| StoreError::Corrupt("sqlite store requires store.path".to_string()))?;
                Ok(Arc::new(SqliteReplayStore::open(Path::new(path), self.retention, self.compaction)?))
            }
            #[cfg(not(feature = "sql-store"))]
            StoreBackend::Sqlite => Err(StoreError::Corrupt("sqlite store requires the sql-store feature".to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    const VALID_LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];
}

/// Top-level process configuration: every recognized option named in §6,
/// gathered into one value passed once at construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    pub verifier: VerifierLaneConfig,
    pub store: StoreConfig,
    pub policy: PolicyConfig,
    pub tool_policy: Vec<ToolPolicyRule>,
    pub logging: LoggingConfig,
    pub retry: RetryConfig,
}

impl RuntimeConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ValidationError> {
        serde_yaml::from_str(content).map_err(|e| ValidationError::Field {
            field: "config".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ValidationError::Field {
            field: "config_file".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validates every recognized section, accumulating every problem
    /// rather than stopping at the first (module D's `Validator`).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::new();

        v.require(
            LoggingConfig::VALID_LEVELS.contains(&self.logging.level.as_str()),
            "logging.level",
            &format!("must be one of: {}", LoggingConfig::VALID_LEVELS.join(", ")),
        );

        v.require(
            self.verifier.plain_budget.max_verification_retries > 0,
            "verifier.plain_budget.max_verification_retries",
            "must be > 0",
        );
        v.require_in_unit_range("verifier.plain_budget.min_confidence", self.verifier.plain_budget.min_confidence);

        if self.verifier.multi_candidate.enabled {
            v.require(
                self.verifier.multi_candidate.max_candidates > 0,
                "verifier.multi_candidate.max_candidates",
                "must be > 0 when multi-candidate mode is enabled",
            );
        }

        if matches!(self.store.backend, StoreBackend::File | StoreBackend::Sqlite) {
            v.require(
                self.store.path.as_ref().is_some_and(|p| !p.is_empty()),
                "store.path",
                "required for file/sqlite backends",
            );
        }

        if let Some(max_risk) = self.policy.max_risk_score {
            v.require(max_risk >= 0.0, "policy.max_risk_score", "must be >= 0");
        }

        v.require(self.retry.max_attempts >= 1, "retry.max_attempts", "must be >= 1");
        v.require(self.retry.factor >= 1, "retry.factor", "must be >= 1");

        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.logging.level = "shout".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_backend_without_path_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.store.backend = StoreBackend::File;
        config.store.path = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn multi_candidate_enabled_with_zero_max_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.verifier.multi_candidate.enabled = true;
        config.verifier.multi_candidate.max_candidates = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accumulates_multiple_validation_errors() {
        let mut config = RuntimeConfig::default();
        config.logging.level = "shout".to_string();
        config.retry.max_attempts = 0;
        match config.validate() {
            Err(ValidationError::Multiple(n)) => assert!(n >= 2),
            other => panic!("expected Multiple(>=2), got {other:?}"),
        }
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = RuntimeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reloaded = RuntimeConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(reloaded.logging.level, config.logging.level);
    }

    #[tokio::test]
    async fn memory_backend_builds_without_a_path() {
        let config = StoreConfig::default();
        assert!(config.build().await.is_ok());
    }
}
