//! Configuration management for the bridge
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every section has defaults, so an empty file yields a working local setup.

use crate::bridge::{decimal, Amount, AssetMapping, AssetType, BridgeStatus, ChainId, FeeRate};
use crate::consensus::SignatureScheme;
use crate::error::{BridgeError, BridgeResult};

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "XCHAIN_BRIDGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

const NATIVE_ASSET: &str = "0x0000000000000000000000000000000000000000";

fn wei(raw: &str) -> Amount {
    // only called on literals below
    Amount::from_str(raw).unwrap_or_default()
}

fn one_ether() -> Amount {
    wei("1000000000000000000")
}

fn milli_ether() -> Amount {
    wei("1000000000000000")
}

fn ten_ether() -> Amount {
    wei("10000000000000000000")
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bridge: BridgeSettings,
    pub consensus: ConsensusSettings,
    pub security: SecuritySettings,
    pub batch: BatchSettings,
    pub events: EventSettings,
    pub maintenance: MaintenanceSettings,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub asset_mappings: Vec<AssetMappingConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings::default(),
            consensus: ConsensusSettings::default(),
            security: SecuritySettings::default(),
            batch: BatchSettings::default(),
            events: EventSettings::default(),
            maintenance: MaintenanceSettings::default(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            asset_mappings: default_asset_mappings(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub bridge_id: String,
    pub status: BridgeStatus,
    pub supported_chains: Vec<ChainId>,
    pub required_confirmations: usize,
    pub min_validators: usize,
    #[serde(with = "decimal")]
    pub min_amount: Amount,
    #[serde(with = "decimal")]
    pub max_amount: Amount,
    #[serde(with = "decimal")]
    pub max_daily_volume: Amount,
    pub transaction_timeout_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bridge_id: "gochain_bridge".to_string(),
            status: BridgeStatus::Active,
            supported_chains: ["gochain", "ethereum", "polygon", "arbitrum", "optimism"]
                .into_iter()
                .map(ChainId::from)
                .collect(),
            required_confirmations: 2,
            min_validators: 3,
            min_amount: milli_ether(),
            max_amount: one_ether(),
            max_daily_volume: ten_ether(),
            transaction_timeout_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    #[serde(with = "decimal")]
    pub min_stake: Amount,
    pub confirmation_timeout_secs: u64,
    pub signature_scheme: SignatureScheme,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            min_stake: one_ether(),
            confirmation_timeout_secs: 30 * 60,
            signature_scheme: SignatureScheme::Secp256k1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: usize,
    pub max_security_events: usize,
    /// Transfers above this are logged as large
    #[serde(with = "decimal")]
    pub emergency_threshold: Amount,
    pub blacklist: Vec<BlacklistSeed>,
    pub patterns: Vec<PatternSeed>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: 3600,
            rate_limit_max_requests: 10,
            max_security_events: 1000,
            emergency_threshold: ten_ether(),
            blacklist: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistSeed {
    pub address: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternSeed {
    pub pattern: String,
    pub risk_score: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub batch_timeout_secs: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_timeout_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Per-subscriber queue depth
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub confirmation_sweep_secs: u64,
    pub batch_sweep_secs: u64,
    pub transaction_sweep_secs: u64,
    pub rate_limiter_cleanup_secs: u64,
    pub daily_reset_secs: u64,
    /// Depth of the watcher event channel
    pub watcher_queue: usize,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            confirmation_sweep_secs: 60,
            batch_sweep_secs: 60,
            transaction_sweep_secs: 300,
            rate_limiter_cleanup_secs: 300,
            daily_reset_secs: 24 * 3600,
            watcher_queue: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON output instead of human-readable lines
    pub json: bool,
    /// Overrides the default filter when `RUST_LOG` is unset
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMappingConfig {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub asset_type: AssetType,
    #[serde(default = "native_asset")]
    pub source_asset: String,
    #[serde(default = "native_asset")]
    pub destination_asset: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(with = "decimal")]
    pub min_amount: Amount,
    #[serde(with = "decimal")]
    pub max_amount: Amount,
    #[serde(with = "decimal")]
    pub daily_limit: Amount,
    pub fee_percentage: FeeRate,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn native_asset() -> String {
    NATIVE_ASSET.to_string()
}

fn default_decimals() -> u8 {
    18
}

fn default_true() -> bool {
    true
}

fn default_asset_mappings() -> Vec<AssetMappingConfig> {
    let native = |source: &str, destination: &str| AssetMappingConfig {
        source_chain: source.into(),
        destination_chain: destination.into(),
        asset_type: AssetType::Native,
        source_asset: native_asset(),
        destination_asset: native_asset(),
        decimals: 18,
        min_amount: milli_ether(),
        max_amount: one_ether(),
        daily_limit: ten_ether(),
        fee_percentage: FeeRate::from_milli_percent(100).unwrap_or_default(),
        active: true,
    };
    vec![native("gochain", "ethereum"), native("ethereum", "gochain")]
}

impl Settings {
    /// Load settings from the file named by `XCHAIN_BRIDGE_CONFIG`, or from
    /// `config/default.toml`. A missing default file yields built-in defaults.
    pub fn load() -> BridgeResult<Self> {
        match env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(PathBuf::from(path)),
            Err(_) => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    tracing::warn!("No configuration file found, using defaults");
                    let settings = Self::default();
                    settings.validate()?;
                    Ok(settings)
                }
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(raw: &str) -> BridgeResult<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw)?;

        let settings: Settings = toml::from_str(&config_str)
            .map_err(|e| BridgeError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> BridgeResult<()> {
        let bridge = &self.bridge;
        let fail = |msg: String| Err(BridgeError::Config(msg));

        if bridge.supported_chains.is_empty() {
            return fail("At least one chain must be supported".to_string());
        }
        if bridge.required_confirmations == 0 {
            return fail("required_confirmations must be at least 1".to_string());
        }
        if bridge.min_validators < bridge.required_confirmations {
            return fail(format!(
                "min_validators ({}) is below required_confirmations ({})",
                bridge.min_validators, bridge.required_confirmations
            ));
        }
        if bridge.min_amount > bridge.max_amount {
            return fail(format!(
                "min_amount {} exceeds max_amount {}",
                bridge.min_amount, bridge.max_amount
            ));
        }
        if self.batch.max_batch_size == 0 {
            return fail("max_batch_size must be at least 1".to_string());
        }
        if self.security.rate_limit_max_requests == 0 {
            return fail("rate_limit_max_requests must be at least 1".to_string());
        }

        let supported: HashSet<&ChainId> = bridge.supported_chains.iter().collect();
        let mut seen = HashSet::new();
        for mapping in &self.asset_mappings {
            let key = AssetMapping::key(
                &mapping.source_chain,
                &mapping.destination_chain,
                mapping.asset_type,
            );
            if !supported.contains(&mapping.source_chain)
                || !supported.contains(&mapping.destination_chain)
            {
                return fail(format!("Asset mapping {} uses an unsupported chain", key));
            }
            if mapping.source_chain == mapping.destination_chain {
                return fail(format!("Asset mapping {} has identical chains", key));
            }
            if mapping.min_amount > mapping.max_amount {
                return fail(format!("Asset mapping {} has min_amount above max_amount", key));
            }
            if !seen.insert(key.clone()) {
                return fail(format!("Duplicate asset mapping {}", key));
            }
        }

        Ok(())
    }

    /// Materialize configured mappings with zeroed daily counters
    pub fn build_asset_mappings(&self) -> Vec<AssetMapping> {
        let now = Utc::now();
        self.asset_mappings
            .iter()
            .map(|m| AssetMapping {
                id: AssetMapping::key(&m.source_chain, &m.destination_chain, m.asset_type),
                source_chain: m.source_chain.clone(),
                destination_chain: m.destination_chain.clone(),
                source_asset: m.source_asset.clone(),
                destination_asset: m.destination_asset.clone(),
                asset_type: m.asset_type,
                decimals: m.decimals,
                active: m.active,
                min_amount: m.min_amount.clone(),
                max_amount: m.max_amount.clone(),
                daily_limit: m.daily_limit.clone(),
                daily_used: Amount::default(),
                fee_rate: m.fee_percentage,
                created_at: now,
                updated_at: now,
            })
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> BridgeResult<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| BridgeError::Internal(format!("env substitution pattern: {}", e)))?;

    let result = re.replace_all(input, |cap: &regex::Captures| {
        env::var(&cap[1]).unwrap_or_default()
    });
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("XCHAIN_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${XCHAIN_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_match_reference_network() {
        let settings = Settings::default();
        settings.validate().unwrap();

        assert_eq!(settings.bridge.required_confirmations, 2);
        assert_eq!(settings.bridge.min_validators, 3);
        assert_eq!(settings.bridge.supported_chains.len(), 5);
        assert_eq!(settings.consensus.confirmation_timeout_secs, 1800);
        assert_eq!(settings.security.rate_limit_max_requests, 10);
        assert_eq!(settings.batch.max_batch_size, 100);

        let mappings = settings.build_asset_mappings();
        let ids: Vec<&str> = mappings.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gochain_ethereum_native", "ethereum_gochain_native"]);
        assert_eq!(mappings[0].fee_rate.milli_percent(), 100);
        assert_eq!(mappings[0].daily_limit, ten_ether());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bridge]
supported_chains = ["ethereum", "polygon"]
required_confirmations = 3
min_validators = 5
max_amount = "5000000000000000000"

[batch]
max_batch_size = 10

[[asset_mappings]]
source_chain = "ethereum"
destination_chain = "polygon"
asset_type = "erc20"
source_asset = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
destination_asset = "0x2791bca1f2de4661ed88a30c99a7a9449aa84174"
decimals = 6
min_amount = "1000"
max_amount = "1000000000"
daily_limit = "50000000000"
fee_percentage = "0.25"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.bridge.required_confirmations, 3);
        assert_eq!(settings.bridge.max_amount, wei("5000000000000000000"));
        assert_eq!(settings.bridge.min_amount, milli_ether());
        assert_eq!(settings.batch.max_batch_size, 10);
        assert_eq!(settings.asset_mappings.len(), 1);
        assert_eq!(settings.asset_mappings[0].fee_percentage.milli_percent(), 250);
        assert_eq!(settings.asset_mappings[0].decimals, 6);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let shipped = Settings::load_from(path).unwrap();
        let defaults = Settings::default();

        assert_eq!(shipped.bridge.supported_chains, defaults.bridge.supported_chains);
        assert_eq!(shipped.bridge.max_daily_volume, defaults.bridge.max_daily_volume);
        assert_eq!(shipped.consensus.min_stake, defaults.consensus.min_stake);
        assert_eq!(
            shipped.security.emergency_threshold,
            defaults.security.emergency_threshold
        );
        assert_eq!(shipped.security.patterns.len(), 1);
        assert_eq!(
            shipped.maintenance.transaction_sweep_secs,
            defaults.maintenance.transaction_sweep_secs
        );
        assert_eq!(
            shipped.build_asset_mappings().len(),
            defaults.build_asset_mappings().len()
        );
        assert_eq!(shipped.asset_mappings[0].fee_percentage.milli_percent(), 100);
    }

    #[test]
    fn test_invalid_settings_are_config_errors() {
        let bad_fee = r#"
[[asset_mappings]]
source_chain = "gochain"
destination_chain = "ethereum"
asset_type = "native"
min_amount = "1"
max_amount = "10"
daily_limit = "100"
fee_percentage = "0.12345"
"#;
        assert!(matches!(Settings::from_toml(bad_fee), Err(BridgeError::Config(_))));

        let bad_amount = "[bridge]\nmin_amount = \"12abc\"\n";
        assert!(matches!(Settings::from_toml(bad_amount), Err(BridgeError::Config(_))));

        let unsupported = r#"
[[asset_mappings]]
source_chain = "gochain"
destination_chain = "solana"
asset_type = "native"
min_amount = "1"
max_amount = "10"
daily_limit = "100"
fee_percentage = "0.1"
"#;
        assert!(matches!(Settings::from_toml(unsupported), Err(BridgeError::Config(_))));

        let quorum = "[bridge]\nrequired_confirmations = 4\nmin_validators = 3\n";
        assert!(matches!(Settings::from_toml(quorum), Err(BridgeError::Config(_))));
    }
}
