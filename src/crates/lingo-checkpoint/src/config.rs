//! Store configuration
//!
//! [`StoreConfig`] is built once at process start (from code, environment
//! variables or a TOML document), validated, and handed to
//! [`StoreConfig::open_backend`]. It is never mutated afterwards.
//!
//! # Environment
//!
//! With prefix `LINGO_CHECKPOINT_`:
//!
//! | Variable                        | Field        | Default   |
//! |---------------------------------|--------------|-----------|
//! | `LINGO_CHECKPOINT_BACKEND`      | `backend`    | `memory`  |
//! | `LINGO_CHECKPOINT_URL`          | `url`        | none      |
//! | `LINGO_CHECKPOINT_NAMESPACE`    | `namespace`  | `default` |
//! | `LINGO_CHECKPOINT_TTL_SECS`     | `ttl_secs`   | `3600`    |
//! | `LINGO_CHECKPOINT_TIMEOUT_MS`   | `timeout_ms` | `5000`    |
//! | `LINGO_CHECKPOINT_CODEC`        | `codec`      | `json`    |
//!
//! # TOML
//!
//! ```toml
//! backend = "ttl"
//! url = "redis://127.0.0.1:6379"
//! namespace = "tutor-prod"
//! ttl_secs = 86400
//! ```

use crate::{
    checkpoint::DEFAULT_NAMESPACE,
    error::{CheckpointError, Result},
    memory::InMemoryCheckpointSaver,
    serializer::Codec,
    sqlite::SqliteCheckpointSaver,
    traits::CheckpointBackend,
    ttl::{InMemoryCache, TtlCheckpointSaver},
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Conventional environment prefix
pub const ENV_PREFIX: &str = "LINGO_CHECKPOINT_";

/// Which backend family to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Volatile process memory
    #[default]
    #[serde(alias = "volatile")]
    Memory,
    /// Durable relational store
    #[serde(alias = "relational")]
    Sqlite,
    /// Expiring key-value store
    #[serde(alias = "ttl-keyed")]
    Ttl,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Sqlite => f.write_str("sqlite"),
            BackendKind::Ttl => f.write_str("ttl"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "volatile" => Ok(BackendKind::Memory),
            "sqlite" | "relational" => Ok(BackendKind::Sqlite),
            "ttl" | "ttl-keyed" => Ok(BackendKind::Ttl),
            other => Err(format!(
                "unknown backend `{other}` (expected memory, sqlite or ttl)"
            )),
        }
    }
}

/// Checkpoint store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Connection URL; required for `sqlite` and `ttl`
    pub url: Option<String>,
    /// Namespace every thread key is placed under
    pub namespace: String,
    /// Expiry for the `ttl` backend
    pub ttl_secs: u64,
    /// Bound on each backend I/O call
    pub timeout_ms: u64,
    /// Record encoding for the `ttl` backend
    pub codec: Codec,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            url: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl_secs: 3600,
            timeout_ms: 5000,
            codec: Codec::Json,
        }
    }
}

fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(CheckpointError::configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                CheckpointError::configuration(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

/// Seconds in `ttl`, rounded up so a sub-second expiry stays positive
fn whole_secs(ttl: Duration) -> u64 {
    ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn sqlite(url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn ttl(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend: BackendKind::Ttl,
            url: Some(url.into()),
            ttl_secs: whole_secs(ttl),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Read overrides from `{prefix}*` variables on top of the defaults
    pub fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = get_env_parse::<BackendKind>(&build_env_key(prefix, "backend"))? {
            config.backend = backend;
        }
        if let Some(url) = get_env(&build_env_key(prefix, "url"))? {
            config.url = Some(url);
        }
        if let Some(namespace) = get_env(&build_env_key(prefix, "namespace"))? {
            config.namespace = namespace;
        }
        if let Some(ttl) = get_env_parse::<u64>(&build_env_key(prefix, "ttl_secs"))? {
            config.ttl_secs = ttl;
        }
        if let Some(timeout) = get_env_parse::<u64>(&build_env_key(prefix, "timeout_ms"))? {
            config.timeout_ms = timeout;
        }
        if let Some(codec) = get_env_parse::<Codec>(&build_env_key(prefix, "codec"))? {
            config.codec = codec;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| CheckpointError::configuration(format!("invalid store config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CheckpointError::configuration("namespace must not be empty"));
        }
        if self.namespace.contains(':') {
            return Err(CheckpointError::configuration(format!(
                "namespace `{}` must not contain ':'",
                self.namespace
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CheckpointError::configuration("timeout_ms must be positive"));
        }

        match self.backend {
            BackendKind::Memory => {}
            BackendKind::Sqlite | BackendKind::Ttl => {
                if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(CheckpointError::configuration(format!(
                        "the {} backend requires a connection url",
                        self.backend
                    )));
                }
            }
        }
        if self.backend == BackendKind::Ttl && self.ttl_secs == 0 {
            return Err(CheckpointError::configuration("ttl_secs must be positive"));
        }
        Ok(())
    }

    /// Construct the configured backend.
    ///
    /// Opening never provisions schema; run the backend's `setup` before
    /// first use.
    pub fn open_backend(&self) -> Result<Arc<dyn CheckpointBackend>> {
        self.validate()?;
        let url = self.url.as_deref().unwrap_or_default().trim();

        let backend: Arc<dyn CheckpointBackend> = match self.backend {
            BackendKind::Memory => Arc::new(InMemoryCheckpointSaver::new()),
            BackendKind::Sqlite => Arc::new(SqliteCheckpointSaver::open(url, self.timeout())?),
            BackendKind::Ttl => self.open_ttl(url)?,
        };

        tracing::info!(
            backend = backend.name(),
            namespace = %self.namespace,
            "opened checkpoint backend"
        );
        Ok(backend)
    }

    fn open_ttl(&self, url: &str) -> Result<Arc<dyn CheckpointBackend>> {
        if url.starts_with("memory://") {
            let saver = TtlCheckpointSaver::new(InMemoryCache::new(), self.ttl_duration())
                .with_codec(self.codec)
                .with_op_timeout(self.timeout());
            return Ok(Arc::new(saver));
        }

        if url.starts_with("redis://") || url.starts_with("rediss://") {
            return self.open_redis(url);
        }

        Err(CheckpointError::configuration(format!(
            "unsupported ttl backend url `{url}` (expected memory:// or redis://)"
        )))
    }

    #[cfg(feature = "redis")]
    fn open_redis(&self, url: &str) -> Result<Arc<dyn CheckpointBackend>> {
        let cache = crate::ttl::RedisCache::open(url)
            .map_err(|e| CheckpointError::configuration(e.to_string()))?;
        let saver = TtlCheckpointSaver::new(cache, self.ttl_duration())
            .with_codec(self.codec)
            .with_op_timeout(self.timeout());
        Ok(Arc::new(saver))
    }

    #[cfg(not(feature = "redis"))]
    fn open_redis(&self, url: &str) -> Result<Arc<dyn CheckpointBackend>> {
        Err(CheckpointError::configuration(format!(
            "`{url}` needs the `redis` feature of lingo-checkpoint"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.namespace, "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durable_backend_requires_url() {
        let config = StoreConfig {
            backend: BackendKind::Sqlite,
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CheckpointError::Configuration(_))
        ));
        assert!(config.open_backend().is_err());
    }

    #[test]
    fn test_namespace_rules() {
        assert!(StoreConfig::memory().with_namespace("").validate().is_err());
        assert!(StoreConfig::memory().with_namespace("a:b").validate().is_err());
        assert!(StoreConfig::memory().with_namespace("staging").validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        let prefix = "LINGO_CFG_TEST_ENV_";
        env::set_var(build_env_key(prefix, "backend"), "relational");
        env::set_var(build_env_key(prefix, "url"), "sqlite::memory:");
        env::set_var(build_env_key(prefix, "ttl_secs"), "90");

        let config = StoreConfig::from_env(prefix).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.ttl_secs, 90);
        assert_eq!(config.namespace, "default");

        env::remove_var(build_env_key(prefix, "backend"));
        env::remove_var(build_env_key(prefix, "url"));
        env::remove_var(build_env_key(prefix, "ttl_secs"));
    }

    #[test]
    fn test_from_env_rejects_bad_numbers() {
        let prefix = "LINGO_CFG_TEST_BAD_";
        env::set_var(build_env_key(prefix, "timeout_ms"), "soon");
        let err = StoreConfig::from_env(prefix).unwrap_err();
        env::remove_var(build_env_key(prefix, "timeout_ms"));
        assert!(matches!(err, CheckpointError::Configuration(_)));
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            backend = "ttl"
            url = "memory://"
            namespace = "tutor"
            ttl_secs = 1
            codec = "msgpack"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::Ttl);
        assert_eq!(config.codec, Codec::MsgPack);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_open_backend_kinds() {
        let memory = StoreConfig::memory().open_backend().unwrap();
        assert_eq!(memory.name(), "memory");

        let sqlite = StoreConfig::sqlite("sqlite::memory:").open_backend().unwrap();
        assert_eq!(sqlite.name(), "sqlite");
        assert!(!sqlite.capabilities().supports_async);

        let ttl = StoreConfig::ttl("memory://", Duration::from_secs(5))
            .open_backend()
            .unwrap();
        assert_eq!(ttl.name(), "ttl");
        assert!(ttl.capabilities().expiring);
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let config = StoreConfig::ttl("memory://", Duration::from_millis(500));
        assert_eq!(config.ttl_secs, 1);
        assert!(config.open_backend().is_ok());

        let config = StoreConfig::ttl("memory://", Duration::from_millis(2500));
        assert_eq!(config.ttl_duration(), Duration::from_secs(3));
        assert_eq!(StoreConfig::ttl("memory://", Duration::ZERO).ttl_secs, 0);
    }

    #[test]
    fn test_unknown_ttl_scheme() {
        let err = StoreConfig::ttl("memcached://localhost", Duration::from_secs(5))
            .open_backend()
            .err()
            .unwrap();
        assert!(matches!(err, CheckpointError::Configuration(_)));
    }
}
