//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Shared types, domain events, and configuration."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::system::SystemType;

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_reconcile_initial_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_reconcile_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_policy_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_policy_systems() -> Vec<SystemType> {
    SystemType::ALL.to_vec()
}

fn default_policy_max_retries() -> u32 {
    3
}

fn default_outbox_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_outbox_batch_size() -> usize {
    100
}

fn default_outbox_max_retries() -> u32 {
    5
}

fn default_outbox_base_backoff() -> Duration {
    Duration::from_millis(1000)
}

fn default_outbox_max_backoff() -> Duration {
    Duration::from_millis(300_000)
}

fn default_outbox_stale_after() -> Duration {
    Duration::from_secs(300)
}

fn default_proxy_base_url() -> String {
    "http://127.0.0.1:8474".to_owned()
}

fn default_proxy_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_proxy_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9464"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the C-Plane runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reconciliation loop settings.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Policy engine settings.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Outbox dispatcher settings.
    #[serde(default)]
    pub outbox: OutboxConfig,
    /// Chaos / fault-proxy settings.
    #[serde(default)]
    pub chaos: ChaosConfig,
    /// Metrics exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Environment variable overriding the configuration path.
    pub const ENV_CONFIG_PATH: &'static str = "CPLANE_CONFIG";

    /// Load configuration from the first readable candidate path, honoring
    /// the `CPLANE_CONFIG` override. Falls back to defaults when no candidate
    /// exists.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            let path = PathBuf::from(env_path);
            return Self::from_file(&path);
        }
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                return Self::from_file(path);
            }
        }
        debug!("no configuration file found; using built-in defaults");
        Ok(Self::default())
    }

    /// Parse configuration from a single TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Settings for the reconciliation loop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Interval between reconciliation cycles.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_reconcile_interval", rename = "interval_seconds")]
    pub interval: Duration,
    /// Delay before the first cycle after startup.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        default = "default_reconcile_initial_delay",
        rename = "initial_delay_seconds"
    )]
    pub initial_delay: Duration,
    /// Fixed per-system cooldown between convergence actions.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_reconcile_cooldown", rename = "cooldown_seconds")]
    pub cooldown: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: default_reconcile_interval(),
            initial_delay: default_reconcile_initial_delay(),
            cooldown: default_reconcile_cooldown(),
        }
    }
}

/// Settings for the policy engine sweep.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whether the periodic sweep runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between sweeps.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_policy_interval", rename = "interval_seconds")]
    pub interval: Duration,
    /// Systems covered by the sweep.
    #[serde(default = "default_policy_systems")]
    pub systems: Vec<SystemType>,
    /// Evaluation attempts per system before the sweep gives up.
    #[serde(default = "default_policy_max_retries")]
    pub max_retries: u32,
    /// Seed the built-in default policies when the store is empty.
    #[serde(default = "default_enabled")]
    pub seed_defaults: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_policy_interval(),
            systems: default_policy_systems(),
            max_retries: default_policy_max_retries(),
            seed_defaults: true,
        }
    }
}

/// Settings for the outbox dispatcher.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Whether the dispatch loop runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between dispatch cycles.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        default = "default_outbox_poll_interval",
        rename = "poll_interval_seconds"
    )]
    pub poll_interval: Duration,
    /// Maximum entries claimed per cycle.
    #[serde(default = "default_outbox_batch_size")]
    pub batch_size: usize,
    /// Delivery attempts before an entry moves to the DLQ.
    #[serde(default = "default_outbox_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_outbox_base_backoff", rename = "base_backoff_ms")]
    pub base_backoff: Duration,
    /// Upper bound on the backoff delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_outbox_max_backoff", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Age after which a Processing entry is considered orphaned.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_outbox_stale_after", rename = "stale_after_seconds")]
    pub stale_after: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_outbox_poll_interval(),
            batch_size: default_outbox_batch_size(),
            max_retries: default_outbox_max_retries(),
            base_backoff: default_outbox_base_backoff(),
            max_backoff: default_outbox_max_backoff(),
            stale_after: default_outbox_stale_after(),
        }
    }
}

/// Settings for the chaos subsystem and its fault-proxy client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Base URL of the fault-proxy admin API.
    #[serde(default = "default_proxy_base_url")]
    pub proxy_base_url: String,
    /// Connect timeout for proxy calls.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        default = "default_proxy_connect_timeout",
        rename = "proxy_connect_timeout_seconds"
    )]
    pub proxy_connect_timeout: Duration,
    /// Per-request timeout for proxy calls.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        default = "default_proxy_request_timeout",
        rename = "proxy_request_timeout_seconds"
    )]
    pub proxy_request_timeout: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            proxy_base_url: default_proxy_base_url(),
            proxy_connect_timeout: default_proxy_connect_timeout(),
            proxy_request_timeout: default_proxy_request_timeout(),
        }
    }
}

/// Settings for the metrics exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the `/metrics` endpoint is served.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Listen address for the exporter.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.reconciliation.interval, Duration::from_secs(30));
        assert_eq!(config.reconciliation.cooldown, Duration::from_secs(300));
        assert_eq!(config.policy.interval, Duration::from_secs(10));
        assert_eq!(config.outbox.max_retries, 5);
        assert_eq!(config.outbox.base_backoff, Duration::from_millis(1000));
        assert_eq!(config.outbox.max_backoff, Duration::from_millis(300_000));
        assert_eq!(config.chaos.proxy_base_url, "http://127.0.0.1:8474");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let raw = r#"
        [reconciliation]
        interval_seconds = 5
        cooldown_seconds = 60

        [outbox]
        batch_size = 10
        max_retries = 2

        [policy]
        systems = ["mysql", "redis"]
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.reconciliation.interval, Duration::from_secs(5));
        assert_eq!(config.reconciliation.cooldown, Duration::from_secs(60));
        assert_eq!(
            config.reconciliation.initial_delay,
            Duration::from_secs(60)
        );
        assert_eq!(config.outbox.batch_size, 10);
        assert_eq!(config.outbox.max_retries, 2);
        assert_eq!(
            config.policy.systems,
            vec![SystemType::Mysql, SystemType::Redis]
        );
        assert!(config.policy.enabled);
    }

    #[test]
    fn load_falls_back_to_defaults_when_no_candidates_exist() {
        let config = AppConfig::load(&[Path::new("does/not/exist.toml")]).unwrap();
        assert!(config.outbox.enabled);
    }

    #[test]
    fn load_reads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cplane.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[metrics]\nlisten = \"127.0.0.1:9000\"").unwrap();
        let config = AppConfig::load(&[path]).unwrap();
        assert_eq!(config.metrics.listen, "127.0.0.1:9000".parse().unwrap());
    }
}
