//! Service Layer Configuration
//!
//! A single configuration object covers the whole engine. Values load from
//! a TOML file; the binary applies targeted CLI overrides on top. Every
//! tunable has a named default below.

use nsl_core::{ServiceKind, UInt160};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Process exit codes.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG_ERROR: i32 = 64;
pub const EXIT_DEPENDENCY_UNAVAILABLE: i32 = 69;
pub const EXIT_INTERNAL: i32 = 70;

/// Dispatcher defaults.
pub const DEFAULT_WORKER_POOL_WIDTH: usize = 16;
pub const DEFAULT_PER_KIND_QUOTA: usize = 8;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_MS: u64 = 2_000;
pub const DEFAULT_RETRY_CAP_MS: u64 = 300_000;
pub const DEFAULT_LEASE_DURATION_MS: u64 = 120_000;

/// Listener defaults.
pub const DEFAULT_LISTENER_RPC_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_LISTENER_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_LISTENER_BACKOFF_CAP_MS: u64 = 30_000;
pub const DEFAULT_REORG_DEPTH: u32 = 8;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Handler runtime ceilings, per kind.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RANDOMNESS_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MIXER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONFIDENTIAL_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_AUTOMATION_TIMEOUT_SECS: u64 = 30;
/// Per-request oracle HTTP timeout, inside the handler ceiling.
pub const DEFAULT_ORACLE_HTTP_TIMEOUT_SECS: u64 = 20;

/// Submitter defaults.
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_SUBMIT_ATTEMPTS: u32 = 5;
pub const DEFAULT_SUBMIT_PARALLELISM: usize = 32;

/// Signer defaults.
pub const DEFAULT_SIGNER_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SIGNER_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTESTATION_CACHE_TTL_SECS: u64 = 3_600;

/// Data-feed defaults.
pub const DEFAULT_FEED_UPDATE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FEED_DEVIATION_THRESHOLD: f64 = 0.005;
pub const DEFAULT_FEED_HEARTBEAT_SECS: u64 = 3_600;
pub const DEFAULT_MAX_SAMPLE_AGE_SECS: u64 = 300;
pub const DEFAULT_OUTLIER_STD: f64 = 3.0;
pub const DEFAULT_MIN_SOURCES: usize = 2;
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 5_000;

/// Automation defaults.
pub const DEFAULT_AUTOMATION_TICK_SECS: u64 = 15;

/// Supervisor defaults.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_RETENTION_DAYS: u64 = 7;
pub const DEFAULT_LEASE_SWEEP_SECS: u64 = 30;
pub const DEFAULT_TIP_STALENESS_SECS: u64 = 60;

/// Mixer refund safety window past the session deadline, in blocks.
pub const DEFAULT_MIXER_SAFETY_WINDOW_BLOCKS: u32 = 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Chain connectivity and contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_endpoints: Vec<String>,
    pub network_magic: u32,
    pub gateway_contract: UInt160,
    /// Per-service contract addresses keyed by kind name
    /// (`datafeed`, `mixer`, `randomness_log`, ...).
    #[serde(default)]
    pub service_contracts: HashMap<String, UInt160>,
}

/// Dispatcher and registry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "defaults::worker_pool_width")]
    pub worker_pool_width: usize,
    #[serde(default)]
    pub per_kind_quota: HashMap<String, usize>,
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "defaults::retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "defaults::lease_duration_ms")]
    pub lease_duration_ms: u64,
    #[serde(default = "defaults::reorg_depth")]
    pub reorg_depth: u32,
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u64,
    #[serde(default = "defaults::event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_width: DEFAULT_WORKER_POOL_WIDTH,
            per_kind_quota: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            retry_cap_ms: DEFAULT_RETRY_CAP_MS,
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            reorg_depth: DEFAULT_REORG_DEPTH,
            retention_days: DEFAULT_RETENTION_DAYS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Effective concurrent-execution quota for a kind.
    pub fn quota_for(&self, kind: ServiceKind) -> usize {
        self.per_kind_quota
            .get(kind.as_str())
            .copied()
            .unwrap_or(DEFAULT_PER_KIND_QUOTA)
            .max(1)
    }
}

/// Handler ceilings and the oracle allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default = "defaults::oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "defaults::randomness_timeout_secs")]
    pub randomness_timeout_secs: u64,
    #[serde(default = "defaults::mixer_timeout_secs")]
    pub mixer_timeout_secs: u64,
    #[serde(default = "defaults::confidential_timeout_secs")]
    pub confidential_timeout_secs: u64,
    #[serde(default = "defaults::automation_timeout_secs")]
    pub automation_timeout_secs: u64,
    #[serde(default = "defaults::oracle_http_timeout_secs")]
    pub oracle_http_timeout_secs: u64,
    /// Exact hosts, or prefixes written with a trailing dot
    /// (`"api."` matches `api.example.com`).
    #[serde(default)]
    pub url_allowlist: Vec<String>,
    #[serde(default = "defaults::mixer_safety_window_blocks")]
    pub mixer_safety_window_blocks: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            randomness_timeout_secs: DEFAULT_RANDOMNESS_TIMEOUT_SECS,
            mixer_timeout_secs: DEFAULT_MIXER_TIMEOUT_SECS,
            confidential_timeout_secs: DEFAULT_CONFIDENTIAL_TIMEOUT_SECS,
            automation_timeout_secs: DEFAULT_AUTOMATION_TIMEOUT_SECS,
            oracle_http_timeout_secs: DEFAULT_ORACLE_HTTP_TIMEOUT_SECS,
            url_allowlist: Vec::new(),
            mixer_safety_window_blocks: DEFAULT_MIXER_SAFETY_WINDOW_BLOCKS,
        }
    }
}

impl HandlerConfig {
    /// The per-kind `handler_max_runtime` ceiling.
    pub fn max_runtime(&self, kind: ServiceKind) -> Duration {
        let secs = match kind {
            ServiceKind::Oracle => self.oracle_timeout_secs,
            ServiceKind::Randomness => self.randomness_timeout_secs,
            ServiceKind::Mixer => self.mixer_timeout_secs,
            ServiceKind::Confidential => self.confidential_timeout_secs,
            ServiceKind::Automation => self.automation_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Submission tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    #[serde(default = "defaults::submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "defaults::max_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "defaults::submit_parallelism")]
    pub submit_parallelism: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            submit_timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
            max_submit_attempts: DEFAULT_MAX_SUBMIT_ATTEMPTS,
            submit_parallelism: DEFAULT_SUBMIT_PARALLELISM,
        }
    }
}

/// Where signatures come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    /// In-process key; attestation is simulated. Development only.
    #[default]
    Local,
    /// Remote attested signer over the Signer RPC.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default)]
    pub mode: SignerMode,
    /// Required in remote mode.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Hex-encoded P-256 scalar for local mode; generated when absent.
    #[serde(default)]
    pub local_key_hex: Option<String>,
    #[serde(default = "defaults::signer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::signer_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "defaults::attestation_cache_ttl_secs")]
    pub attestation_cache_ttl_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            mode: SignerMode::Local,
            endpoint: None,
            local_key_hex: None,
            timeout_secs: DEFAULT_SIGNER_TIMEOUT_SECS,
            retry_attempts: DEFAULT_SIGNER_RETRY_ATTEMPTS,
            attestation_cache_ttl_secs: DEFAULT_ATTESTATION_CACHE_TTL_SECS,
        }
    }
}

/// One upstream price source for a feed: an HTTP API, or an on-chain
/// oracle contract when `contract`/`method` are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub json_path: Option<String>,
    /// On-chain oracle contract exposing a read method that returns the
    /// already-scaled price on top of the stack.
    #[serde(default)]
    pub contract: Option<UInt160>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default = "defaults::source_weight")]
    pub weight: f64,
    #[serde(default = "defaults::source_timeout_ms")]
    pub timeout_ms: u64,
    /// Priority 0 sources are primary; their failures are reported
    /// louder.
    #[serde(default)]
    pub priority: u32,
}

/// One configured price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Pair name, e.g. `BTC-USD`.
    pub pair: String,
    pub decimals: u32,
    pub sources: Vec<FeedSourceConfig>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl FeedConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFeedConfig {
    #[serde(default = "defaults::feed_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "defaults::feed_deviation_threshold")]
    pub deviation_threshold: f64,
    #[serde(default = "defaults::feed_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "defaults::max_sample_age_secs")]
    pub max_sample_age_secs: u64,
    #[serde(default = "defaults::outlier_std")]
    pub outlier_std: f64,
    #[serde(default = "defaults::min_sources")]
    pub min_sources: usize,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Default for DataFeedConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: DEFAULT_FEED_UPDATE_INTERVAL_SECS,
            deviation_threshold: DEFAULT_FEED_DEVIATION_THRESHOLD,
            heartbeat_secs: DEFAULT_FEED_HEARTBEAT_SECS,
            max_sample_age_secs: DEFAULT_MAX_SAMPLE_AGE_SECS,
            outlier_std: DEFAULT_OUTLIER_STD,
            min_sources: DEFAULT_MIN_SOURCES,
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "defaults::automation_tick_secs")]
    pub tick_interval_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_AUTOMATION_TICK_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Rocksdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "defaults::storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: defaults::storage_path(),
        }
    }
}

/// Operational HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    #[serde(default = "defaults::ops_bind_address")]
    pub bind_address: String,
    #[serde(default = "defaults::ops_port")]
    pub port: u16,
    /// Bearer token required by `POST /random`; unauthenticated when unset.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::ops_bind_address(),
            port: defaults::ops_port(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "defaults::shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "defaults::lease_sweep_secs")]
    pub lease_sweep_secs: u64,
    #[serde(default = "defaults::tip_staleness_secs")]
    pub tip_staleness_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            lease_sweep_secs: DEFAULT_LEASE_SWEEP_SECS,
            tip_staleness_secs: DEFAULT_TIP_STALENESS_SECS,
        }
    }
}

/// The full service-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLayerConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub handlers: HandlerConfig,
    #[serde(default)]
    pub submitter: SubmitterConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub datafeed: DataFeedConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ops: OpsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl ServiceLayerConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation independent of the environment. The
    /// enclave-mode allowlist rule is checked here: a remote (attested)
    /// signer with an empty oracle allowlist cannot boot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_endpoints.is_empty() {
            return Err(ConfigError::Invalid("no rpc_endpoints configured".into()));
        }
        for endpoint in &self.network.rpc_endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "rpc endpoint is not an http(s) url: {endpoint}"
                )));
            }
        }
        if self.network.gateway_contract.is_zero() {
            return Err(ConfigError::Invalid("gateway_contract is zero".into()));
        }
        if self.engine.worker_pool_width == 0 {
            return Err(ConfigError::Invalid("worker_pool_width must be > 0".into()));
        }
        if self.engine.retry_base_ms == 0 || self.engine.retry_cap_ms < self.engine.retry_base_ms {
            return Err(ConfigError::Invalid(
                "retry_base_ms/retry_cap_ms out of order".into(),
            ));
        }
        if self.signer.mode == SignerMode::Remote {
            if self.signer.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(ConfigError::Invalid(
                    "remote signer requires signer.endpoint".into(),
                ));
            }
            if self.handlers.url_allowlist.is_empty() {
                return Err(ConfigError::Invalid(
                    "empty url_allowlist is not permitted with an attested signer".into(),
                ));
            }
        }
        if !(0.0..1.0).contains(&self.datafeed.deviation_threshold) {
            return Err(ConfigError::Invalid(
                "deviation_threshold must be in [0, 1)".into(),
            ));
        }
        if self.datafeed.min_sources == 0 {
            return Err(ConfigError::Invalid("min_sources must be > 0".into()));
        }
        for feed in &self.datafeed.feeds {
            if feed.sources.len() < self.datafeed.min_sources {
                return Err(ConfigError::Invalid(format!(
                    "feed {} has {} sources, fewer than min_sources {}",
                    feed.pair,
                    feed.sources.len(),
                    self.datafeed.min_sources
                )));
            }
            for source in &feed.sources {
                let http = source.url.is_some() && source.json_path.is_some();
                let onchain = source.contract.is_some() && source.method.is_some();
                if http == onchain {
                    return Err(ConfigError::Invalid(format!(
                        "source {} of feed {} must set either url+json_path or contract+method",
                        source.name, feed.pair
                    )));
                }
            }
        }
        Ok(())
    }

    /// Contract address for a named per-service contract.
    pub fn service_contract(&self, name: &str) -> Option<UInt160> {
        self.network.service_contracts.get(name).copied()
    }
}

mod defaults {
    use super::*;

    pub fn worker_pool_width() -> usize {
        DEFAULT_WORKER_POOL_WIDTH
    }
    pub fn max_attempts() -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }
    pub fn retry_base_ms() -> u64 {
        DEFAULT_RETRY_BASE_MS
    }
    pub fn retry_cap_ms() -> u64 {
        DEFAULT_RETRY_CAP_MS
    }
    pub fn lease_duration_ms() -> u64 {
        DEFAULT_LEASE_DURATION_MS
    }
    pub fn reorg_depth() -> u32 {
        DEFAULT_REORG_DEPTH
    }
    pub fn retention_days() -> u64 {
        DEFAULT_RETENTION_DAYS
    }
    pub fn event_channel_capacity() -> usize {
        DEFAULT_EVENT_CHANNEL_CAPACITY
    }
    pub fn oracle_timeout_secs() -> u64 {
        DEFAULT_ORACLE_TIMEOUT_SECS
    }
    pub fn randomness_timeout_secs() -> u64 {
        DEFAULT_RANDOMNESS_TIMEOUT_SECS
    }
    pub fn mixer_timeout_secs() -> u64 {
        DEFAULT_MIXER_TIMEOUT_SECS
    }
    pub fn confidential_timeout_secs() -> u64 {
        DEFAULT_CONFIDENTIAL_TIMEOUT_SECS
    }
    pub fn automation_timeout_secs() -> u64 {
        DEFAULT_AUTOMATION_TIMEOUT_SECS
    }
    pub fn oracle_http_timeout_secs() -> u64 {
        DEFAULT_ORACLE_HTTP_TIMEOUT_SECS
    }
    pub fn mixer_safety_window_blocks() -> u32 {
        DEFAULT_MIXER_SAFETY_WINDOW_BLOCKS
    }
    pub fn submit_timeout_secs() -> u64 {
        DEFAULT_SUBMIT_TIMEOUT_SECS
    }
    pub fn max_submit_attempts() -> u32 {
        DEFAULT_MAX_SUBMIT_ATTEMPTS
    }
    pub fn submit_parallelism() -> usize {
        DEFAULT_SUBMIT_PARALLELISM
    }
    pub fn signer_timeout_secs() -> u64 {
        DEFAULT_SIGNER_TIMEOUT_SECS
    }
    pub fn signer_retry_attempts() -> u32 {
        DEFAULT_SIGNER_RETRY_ATTEMPTS
    }
    pub fn attestation_cache_ttl_secs() -> u64 {
        DEFAULT_ATTESTATION_CACHE_TTL_SECS
    }
    pub fn feed_update_interval_secs() -> u64 {
        DEFAULT_FEED_UPDATE_INTERVAL_SECS
    }
    pub fn feed_deviation_threshold() -> f64 {
        DEFAULT_FEED_DEVIATION_THRESHOLD
    }
    pub fn feed_heartbeat_secs() -> u64 {
        DEFAULT_FEED_HEARTBEAT_SECS
    }
    pub fn max_sample_age_secs() -> u64 {
        DEFAULT_MAX_SAMPLE_AGE_SECS
    }
    pub fn outlier_std() -> f64 {
        DEFAULT_OUTLIER_STD
    }
    pub fn min_sources() -> usize {
        DEFAULT_MIN_SOURCES
    }
    pub fn source_weight() -> f64 {
        1.0
    }
    pub fn source_timeout_ms() -> u64 {
        DEFAULT_SOURCE_TIMEOUT_MS
    }
    pub fn automation_tick_secs() -> u64 {
        DEFAULT_AUTOMATION_TICK_SECS
    }
    pub fn storage_path() -> String {
        "./data/service-layer".to_string()
    }
    pub fn ops_bind_address() -> String {
        "127.0.0.1".to_string()
    }
    pub fn ops_port() -> u16 {
        8080
    }
    pub fn shutdown_grace_secs() -> u64 {
        DEFAULT_SHUTDOWN_GRACE_SECS
    }
    pub fn lease_sweep_secs() -> u64 {
        DEFAULT_LEASE_SWEEP_SECS
    }
    pub fn tip_staleness_secs() -> u64 {
        DEFAULT_TIP_STALENESS_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GATEWAY: &str = "0xd2a4cff31913016155e38e474a2c06d08be276cf";

    fn minimal_toml() -> String {
        format!(
            r#"
[network]
rpc_endpoints = ["http://localhost:10332"]
network_magic = 894710606
gateway_contract = "{GATEWAY}"
"#
        )
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(&minimal_toml());
        let config = ServiceLayerConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.worker_pool_width, DEFAULT_WORKER_POOL_WIDTH);
        assert_eq!(config.submitter.max_submit_attempts, 5);
        assert_eq!(config.signer.mode, SignerMode::Local);
        assert_eq!(
            config.handlers.max_runtime(ServiceKind::Randomness),
            Duration::from_secs(5)
        );
        assert_eq!(config.engine.quota_for(ServiceKind::Oracle), 8);
    }

    #[test]
    fn remote_signer_requires_allowlist() {
        let toml = format!(
            "{}\n[signer]\nmode = \"remote\"\nendpoint = \"https://signer.internal\"\n",
            minimal_toml()
        );
        let file = write_config(&toml);
        let err = ServiceLayerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("url_allowlist")));
    }

    #[test]
    fn remote_signer_with_allowlist_boots() {
        let toml = format!(
            "{}\n[signer]\nmode = \"remote\"\nendpoint = \"https://signer.internal\"\n\n[handlers]\nurl_allowlist = [\"api.example.com\"]\n",
            minimal_toml()
        );
        let file = write_config(&toml);
        assert!(ServiceLayerConfig::load(file.path()).is_ok());
    }

    #[test]
    fn rejects_zero_gateway() {
        let toml = minimal_toml().replace(GATEWAY, &format!("0x{}", "0".repeat(40)));
        let file = write_config(&toml);
        assert!(ServiceLayerConfig::load(file.path()).is_err());
    }

    #[test]
    fn feed_needs_min_sources() {
        let toml = format!(
            r#"{}
[[datafeed.feeds]]
pair = "BTC-USD"
decimals = 8

[[datafeed.feeds.sources]]
name = "one"
url = "https://api.example.com/btc"
json_path = "$.price"
"#,
            minimal_toml()
        );
        let file = write_config(&toml);
        let err = ServiceLayerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("min_sources")));
    }

    #[test]
    fn per_kind_quota_overrides() {
        let toml = format!(
            "{}\n[engine.per_kind_quota]\noracle = 2\n",
            minimal_toml()
        );
        let file = write_config(&toml);
        let config = ServiceLayerConfig::load(file.path()).unwrap();
        assert_eq!(config.engine.quota_for(ServiceKind::Oracle), 2);
        assert_eq!(
            config.engine.quota_for(ServiceKind::Mixer),
            DEFAULT_PER_KIND_QUOTA
        );
    }
}
