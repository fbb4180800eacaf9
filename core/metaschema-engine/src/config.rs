//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Configuration for the schema engine. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema used for entities that do not name one.
    pub default_schema: String,
    /// How long a resolved table name may be served from cache (ms).
    pub resolver_cache_ttl_ms: u64,
    /// How long a compiled lookup may be served from cache (ms).
    pub lookup_cache_ttl_ms: u64,
    /// Migrations running longer than this abort and roll back (ms).
    pub migration_timeout_ms: u64,
    /// SQLite busy timeout for cross-process writers (ms).
    pub busy_timeout_ms: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Recent lookup selections of a session idle this long are dropped (ms).
    pub recent_session_ttl_ms: u64,
    /// Sessions with recent selections kept in memory; the least recently
    /// used is evicted beyond this.
    pub max_recent_sessions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_schema: metaschema_model::DEFAULT_SCHEMA.to_string(),
            resolver_cache_ttl_ms: 60_000,
            lookup_cache_ttl_ms: 30_000,
            migration_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            default_page_size: 25,
            max_page_size: 200,
            recent_session_ttl_ms: 30 * 60 * 1000,
            max_recent_sessions: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !metaschema_model::is_identifier(&self.default_schema) {
            return Err(EngineError::Config(format!(
                "default_schema '{}' is not a valid identifier",
                self.default_schema
            )));
        }
        if self.max_page_size == 0 || self.default_page_size == 0 {
            return Err(EngineError::Config("page sizes must be positive".into()));
        }
        if self.max_recent_sessions == 0 {
            return Err(EngineError::Config("max_recent_sessions must be positive".into()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(EngineError::Config(
                "default_page_size must not exceed max_page_size".into(),
            ));
        }
        Ok(())
    }

    pub fn resolver_ttl(&self) -> Duration {
        Duration::from_millis(self.resolver_cache_ttl_ms)
    }

    pub fn lookup_ttl(&self) -> Duration {
        Duration::from_millis(self.lookup_cache_ttl_ms)
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_millis(self.migration_timeout_ms)
    }

    pub fn recent_session_ttl(&self) -> Duration {
        Duration::from_millis(self.recent_session_ttl_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Page size to use for a request, clamped to `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}
