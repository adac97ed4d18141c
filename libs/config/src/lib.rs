use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod wire;

/// lock coordination config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    namespace: Option<String>,
    locks_root: String,
    session_timeout: Duration,
    connect_timeout: Duration,
    default_wait: Duration,
    path: Option<PathBuf>,
}

impl Default for LockConfig {
    fn default() -> Self {
        // wire defaults always validate
        Self::from_wire(wire::Config::default(), None)
    }
}

impl TryFrom<wire::Config> for LockConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        if !cfg.locks_root.starts_with('/') {
            bail!("locks_root must be an absolute path, got '{}'", cfg.locks_root);
        }
        if cfg.locks_root.len() > 1 && cfg.locks_root.ends_with('/') {
            bail!("locks_root must not end with '/', got '{}'", cfg.locks_root);
        }
        if cfg.locks_root.contains("//") {
            bail!("locks_root contains an empty path segment: '{}'", cfg.locks_root);
        }
        if let Some(ns) = &cfg.namespace {
            if ns.is_empty() || ns.contains('/') {
                bail!("namespace must be a single non-empty path segment, got '{ns}'");
            }
        }
        if cfg.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }
        Ok(Self::from_wire(cfg, None))
    }
}

impl LockConfig {
    fn from_wire(cfg: wire::Config, path: Option<PathBuf>) -> Self {
        let wire::Config {
            namespace,
            locks_root,
            session_timeout,
            connect_timeout,
            default_wait,
        } = cfg;
        Self {
            namespace,
            locks_root,
            session_timeout,
            connect_timeout,
            default_wait: default_wait.unwrap_or(session_timeout),
            path,
        }
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = Self::new(input)?;
        config.path = Some(path.to_path_buf());
        debug!(?config);
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let config = Self::new(s)?;
        debug!(?config);
        Ok(config)
    }

    fn new<S: AsRef<str>>(input: S) -> Result<Self> {
        match Self::json(input.as_ref()) {
            Ok(r) => Ok(r),
            Err(_err) => Self::yaml(input.as_ref()),
        }
    }

    fn yaml(input: &str) -> Result<Self> {
        Self::try_from(
            serde_yaml::from_str::<wire::Config>(input).context("failed to decode YAML config")?,
        )
    }

    fn json(input: &str) -> Result<Self> {
        Self::try_from(serde_json::from_str::<wire::Config>(input)?)
    }

    /// override the namespace prefix
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn default_wait(&self) -> Duration {
        self.default_wait
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// the root every lock key lives under, with the namespace applied
    ///
    /// `/locks` with namespace `inventory` becomes `/inventory/locks`
    pub fn locks_root(&self) -> String {
        match &self.namespace {
            Some(ns) if self.locks_root == "/" => format!("/{ns}"),
            Some(ns) => format!("/{ns}{}", self.locks_root),
            None => self.locks_root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = "namespace: billing\nconnect_timeout: 1s\n";
        let cfg = LockConfig::parse_str(yaml).unwrap();
        assert_eq!(cfg.namespace(), Some("billing"));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.locks_root(), "/billing/locks");

        let json = r#"{"locks_root": "/mutex", "session_timeout": "5s"}"#;
        let cfg = LockConfig::parse_str(json).unwrap();
        assert_eq!(cfg.locks_root(), "/mutex");
        // default_wait follows the session timeout when unset
        assert_eq!(cfg.default_wait(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_config() {
        let cfg = LockConfig::default();
        assert_eq!(cfg.locks_root(), "/locks");
        assert_eq!(cfg.session_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.default_wait(), Duration::from_secs(30));
        assert!(cfg.path().is_none());
    }

    #[test]
    fn test_root_namespace() {
        let cfg = LockConfig::parse_str(r#"{"locks_root": "/", "namespace": "ns"}"#).unwrap();
        assert_eq!(cfg.locks_root(), "/ns");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(LockConfig::parse_str(r#"{"locks_root": "locks"}"#).is_err());
        assert!(LockConfig::parse_str(r#"{"locks_root": "/locks/"}"#).is_err());
        assert!(LockConfig::parse_str(r#"{"locks_root": "/a//b"}"#).is_err());
        assert!(LockConfig::parse_str(r#"{"namespace": "a/b"}"#).is_err());
        assert!(LockConfig::parse_str(r#"{"namespace": ""}"#).is_err());
        assert!(LockConfig::parse_str(r#"{"connect_timeout": 0}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let cfg = LockConfig::default()
            .with_namespace("orders")
            .with_connect_timeout(Duration::from_millis(10))
            .with_default_wait(Duration::from_millis(20));
        assert_eq!(cfg.locks_root(), "/orders/locks");
        assert_eq!(cfg.connect_timeout(), Duration::from_millis(10));
        assert_eq!(cfg.default_wait(), Duration::from_millis(20));
    }

    #[test]
    fn test_parse_file() {
        let path = std::env::temp_dir().join(format!("lock-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "namespace: files\ndefault_wait: 250\n").unwrap();
        let cfg = LockConfig::parse(&path).unwrap();
        assert_eq!(cfg.path(), Some(path.as_path()));
        assert_eq!(cfg.default_wait(), Duration::from_millis(250));
        std::fs::remove_file(&path).unwrap();

        assert!(LockConfig::parse("/nonexistent/lock-config.yaml").is_err());
    }
}
