use arc_swap::ArcSwap;
use isr_cache::normalize_domain;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Environment variable that overrides `invalidation.secret_token`.
pub const SECRET_TOKEN_ENV: &str = "ISR_INVALIDATE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
    /// Scheme used to build cache keys from the `Host` header.
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CacheConfig {
    /// Base URLs or hostnames served by this process. Fixed for its lifetime.
    pub domains: Vec<String>,
    #[serde(default)]
    pub default_revalidate_seconds: Option<u64>,
    #[serde(default = "default_max_body_size")]
    pub max_body_size_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default)]
    pub secret_token: Option<String>,
}

/// The subset of the config that can change while the process runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub default_revalidate_seconds: Option<u64>,
    pub max_body_size: usize,
    pub secret_token: Option<String>,
}

impl RuntimeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_revalidate_seconds: config.cache.default_revalidate_seconds,
            max_body_size: config.cache.max_body_size_bytes,
            secret_token: config.invalidation.secret_token.clone(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides(std::env::var(SECRET_TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Used when no config file exists: serve localhost over plain HTTP.
    pub fn default_config() -> Self {
        let mut config = Config {
            server: ServerConfig {
                public_scheme: "http".to_string(),
                ..ServerConfig::default()
            },
            upstream: UpstreamConfig::default(),
            cache: CacheConfig {
                domains: vec!["localhost".to_string(), "127.0.0.1".to_string()],
                default_revalidate_seconds: None,
                max_body_size_bytes: default_max_body_size(),
            },
            invalidation: InvalidationConfig::default(),
        };
        config.apply_env_overrides(std::env::var(SECRET_TOKEN_ENV).ok());
        config
    }

    fn apply_env_overrides(&mut self, secret_token: Option<String>) {
        if let Some(token) = secret_token.filter(|t| !t.is_empty()) {
            self.invalidation.secret_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.domains.is_empty() {
            return Err(ConfigError::Invalid(
                "cache.domains must list at least one domain".into(),
            ));
        }
        for domain in &self.cache.domains {
            normalize_domain(domain)
                .map_err(|e| ConfigError::Invalid(format!("cache.domains: {e}")))?;
        }
        if !matches!(self.server.public_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "server.public_scheme must be http or https, got {:?}",
                self.server.public_scheme
            )));
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::Invalid("upstream.timeout_ms must be > 0".into()));
        }
        if matches!(self.invalidation.secret_token.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "invalidation.secret_token must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: default_admin_addr(),
            public_scheme: default_public_scheme(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Compare old and new config, apply safe changes, reject unsafe ones.
///
/// - Revalidate default, body limit, secret token → swapped in atomically
/// - Domains → WARN log, ignore (the domain set is fixed for the process)
/// - Listen addresses, scheme, upstream → WARN log, ignore (restart required)
pub fn diff_and_apply(old: &Config, new: &Config, settings: &ArcSwap<RuntimeSettings>) {
    if old.cache.domains != new.cache.domains {
        tracing::warn!(
            old = ?old.cache.domains,
            new = ?new.cache.domains,
            "domain list change detected — ignoring. Restart to change served domains"
        );
    }

    if old.server != new.server || old.upstream != new.upstream {
        tracing::warn!("server or upstream change detected — ignoring. Restart required");
    }

    let current = settings.load_full();
    let next = RuntimeSettings::from_config(new);
    if *current == next {
        return;
    }

    if current.default_revalidate_seconds != next.default_revalidate_seconds {
        tracing::info!(
            old = ?current.default_revalidate_seconds,
            new = ?next.default_revalidate_seconds,
            "config reloaded: default revalidate changed"
        );
    }
    if current.max_body_size != next.max_body_size {
        tracing::info!(
            old = current.max_body_size,
            new = next.max_body_size,
            "config reloaded: max body size changed"
        );
    }
    if current.secret_token != next.secret_token {
        tracing::info!(
            enabled = next.secret_token.is_some(),
            "config reloaded: invalidation token changed"
        );
    }

    settings.store(Arc::new(next));
}

fn default_listen_addr() -> String {
    "0.0.0.0:4000".to_string()
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_public_scheme() -> String {
    "https".to_string()
}
fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_max_body_size() -> usize {
    1_048_576
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        listen_addr = "127.0.0.1:4000"

        [upstream]
        url = "http://127.0.0.1:3000"

        [cache]
        domains = ["https://test1.com", "https://test2.com", "test3.com"]
        default_revalidate_seconds = 60

        [invalidation]
        secret_token = "MY_TOKEN"
    "#;

    #[test]
    fn parses_with_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.server.admin_addr, "0.0.0.0:9090");
        assert_eq!(config.server.public_scheme, "https");
        assert_eq!(config.upstream.timeout_ms, 5000);
        assert_eq!(config.cache.domains.len(), 3);
        assert_eq!(config.cache.default_revalidate_seconds, Some(60));
        assert_eq!(config.cache.max_body_size_bytes, 1_048_576);
        assert_eq!(config.invalidation.secret_token.as_deref(), Some("MY_TOKEN"));
    }

    #[test]
    fn cache_section_is_required() {
        assert!(matches!(
            Config::parse("[server]\nlisten_addr = \"0.0.0.0:1\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.cache.domains.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::parse(SAMPLE).unwrap();
        config.cache.domains.push("/not-a-domain".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::parse(SAMPLE).unwrap();
        config.server.public_scheme = "ftp".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::parse(SAMPLE).unwrap();
        config.invalidation.secret_token = Some("  ".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_token_overrides_file() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.apply_env_overrides(Some("FROM_ENV".into()));
        assert_eq!(config.invalidation.secret_token.as_deref(), Some("FROM_ENV"));

        config.apply_env_overrides(Some(String::new()));
        assert_eq!(config.invalidation.secret_token.as_deref(), Some("FROM_ENV"));
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default_config();
        config.validate().unwrap();
        assert_eq!(config.server.public_scheme, "http");
        assert!(config.cache.domains.iter().any(|d| d == "localhost"));
    }

    #[test]
    fn hot_reload_applies_runtime_settings_only() {
        let old = Config::parse(SAMPLE).unwrap();
        let settings = ArcSwap::from_pointee(RuntimeSettings::from_config(&old));

        let mut new = old.clone();
        new.cache.default_revalidate_seconds = Some(120);
        new.cache.domains.push("https://test4.com".into());
        new.invalidation.secret_token = Some("ROTATED".into());

        diff_and_apply(&old, &new, &settings);

        let current = settings.load();
        assert_eq!(current.default_revalidate_seconds, Some(120));
        assert_eq!(current.secret_token.as_deref(), Some("ROTATED"));
    }

    #[test]
    fn hot_reload_without_changes_keeps_settings() {
        let old = Config::parse(SAMPLE).unwrap();
        let settings = ArcSwap::from_pointee(RuntimeSettings::from_config(&old));
        let before = settings.load_full();

        diff_and_apply(&old, &old.clone(), &settings);

        assert!(Arc::ptr_eq(&before, &settings.load_full()));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
