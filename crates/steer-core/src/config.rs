//! steer.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SteerConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub resolver: ResolverConfig,
    pub failover: FailoverConfig,
    pub balancer: BalancerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Capacity of the store's watch event buffer.
    pub event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/steer/steer.redb"),
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub prefix: String,
    /// How long a registration outlives its last keepalive.
    pub lease_ttl: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "/notification".to_string(),
            lease_ttl: "60s".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn lease_ttl(&self) -> CoreResult<Duration> {
        parse_duration(&self.lease_ttl)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub scheme: String,
    pub timeout: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: "registry".to_string(),
            timeout: "3s".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> CoreResult<Duration> {
        parse_duration(&self.timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub prefix: String,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            prefix: "/config/failover".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancerPolicy {
    /// Adaptive single-weight picker.
    Weighted,
    /// Single-weight picker that ignores call outcomes.
    StaticWeighted,
    #[default]
    RwWeighted,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub policy: BalancerPolicy,
}

impl SteerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SteerConfig = toml::from_str(&content)?;
        config.resolver.timeout()?;
        config.registry.lease_ttl()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse `"3s"` or `"500ms"` into a `Duration`.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::Config(format!("invalid duration: {s:?}"));
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_uses_defaults() {
        let config: SteerConfig = toml::from_str("").unwrap();
        assert_eq!(config.registry.prefix, "/notification");
        assert_eq!(config.registry.lease_ttl().unwrap(), Duration::from_secs(60));
        assert_eq!(config.failover.prefix, "/config/failover");
        assert_eq!(config.resolver.scheme, "registry");
        assert_eq!(config.resolver.timeout().unwrap(), Duration::from_secs(3));
        assert_eq!(config.balancer.policy, BalancerPolicy::RwWeighted);
        assert_eq!(config.store.event_buffer, 1024);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[resolver]
timeout = "250ms"

[balancer]
policy = "static_weighted"
"#;
        let config: SteerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resolver.scheme, "registry");
        assert_eq!(config.resolver.timeout().unwrap(), Duration::from_millis(250));
        assert_eq!(config.balancer.policy, BalancerPolicy::StaticWeighted);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("5m").is_err());
    }

    #[test]
    fn from_file_rejects_bad_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steer.toml");
        std::fs::write(&path, "[resolver]\ntimeout = \"soon\"\n").unwrap();
        assert!(SteerConfig::from_file(&path).is_err());
    }

    #[test]
    fn from_file_reads_lease_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steer.toml");
        std::fs::write(&path, "[registry]\nlease_ttl = \"1500ms\"\n").unwrap();
        let config = SteerConfig::from_file(&path).unwrap();
        assert_eq!(config.registry.lease_ttl().unwrap(), Duration::from_millis(1500));

        std::fs::write(&path, "[registry]\nlease_ttl = \"forever\"\n").unwrap();
        assert!(SteerConfig::from_file(&path).is_err());
    }

    #[test]
    fn to_toml_round_trips() {
        let config = SteerConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("/config/failover"));
        let parsed: SteerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.registry.prefix, config.registry.prefix);
    }
}
