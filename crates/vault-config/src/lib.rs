//! Vault Config - Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";
pub const DEFAULT_CHAIN_ID: u64 = 8453;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub addresses: AddressesConfig,
    pub execution: ExecutionConfig,
    pub vaults: Vec<VaultEntry>,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub polling_interval_ms: u64,
    pub confirmations: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            private_key: String::new(),
            polling_interval_ms: 500,
            confirmations: 1,
        }
    }
}

/// Protocol contracts, Base mainnet by default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressesConfig {
    pub bundler: String,
    pub general_adapter: String,
    pub morpho: String,
    pub wrapped_native: String,
}

impl Default for AddressesConfig {
    fn default() -> Self {
        Self {
            bundler: "0x6BFd8137e702540E7A42B74178A4a49Ba43920C4".to_string(),
            general_adapter: "0xb98c948CFA24072e58935BC004a8A7b376AE746A".to_string(),
            morpho: "0xBBBBBbbBBb9cC5e90e3b3Af64bdAF62C37EEFFCb".to_string(),
            wrapped_native: "0x4200000000000000000000000000000000000006".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub approval_settle_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub state_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub history_max_entries: usize,
    pub max_withdraw_queue_items: usize,
    /// Decimal wei string
    pub gas_reserve_wei: String,
    pub supports_signature: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            approval_settle_delay_ms: 1_000,
            retry_delay_ms: 2_000,
            state_ttl_secs: 60,
            history_ttl_secs: 300,
            history_max_entries: 256,
            max_withdraw_queue_items: 30,
            gas_reserve_wei: "100000000000000".to_string(),
            supports_signature: false,
        }
    }
}

/// A vault the CLI can address by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub name: String,
    pub symbol: String,
    pub address: String,
    #[serde(default)]
    pub asset_price_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub metrics_enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false, metrics_enabled: false }
    }
}

/// `0x` followed by 40 hex digits
pub fn is_hex_address(value: &str) -> bool {
    match value.strip_prefix("0x") {
        Some(digits) => digits.len() == 40 && hex::decode(digits).is_ok(),
        None => false,
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let network = NetworkConfig::default();
        let execution = ExecutionConfig::default();
        let monitoring = MonitoringConfig::default();

        let config = Config {
            network: NetworkConfig {
                rpc_url: std::env::var("RPC_URL").unwrap_or(network.rpc_url),
                chain_id: env_parse("CHAIN_ID", network.chain_id),
                private_key: std::env::var("PRIVATE_KEY").unwrap_or_default(),
                polling_interval_ms: env_parse("POLLING_INTERVAL_MS", network.polling_interval_ms),
                confirmations: env_parse("CONFIRMATIONS", network.confirmations),
            },
            addresses: AddressesConfig::default(),
            execution: ExecutionConfig {
                approval_settle_delay_ms: env_parse("APPROVAL_SETTLE_DELAY_MS", execution.approval_settle_delay_ms),
                retry_delay_ms: env_parse("RETRY_DELAY_MS", execution.retry_delay_ms),
                state_ttl_secs: env_parse("STATE_TTL_SECS", execution.state_ttl_secs),
                history_ttl_secs: env_parse("HISTORY_TTL_SECS", execution.history_ttl_secs),
                history_max_entries: env_parse("HISTORY_MAX_ENTRIES", execution.history_max_entries),
                max_withdraw_queue_items: env_parse("MAX_WITHDRAW_QUEUE_ITEMS", execution.max_withdraw_queue_items),
                gas_reserve_wei: std::env::var("GAS_RESERVE_WEI").unwrap_or(execution.gas_reserve_wei),
                supports_signature: env_parse("SUPPORTS_SIGNATURE", execution.supports_signature),
            },
            vaults: Vec::new(),
            monitoring: MonitoringConfig {
                log_level: std::env::var("LOG_LEVEL").unwrap_or(monitoring.log_level),
                json_logs: env_parse("JSON_LOGS", monitoring.json_logs),
                metrics_enabled: env_parse("METRICS_ENABLED", monitoring.metrics_enabled),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = &self.network.rpc_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("rpc_url must start with http:// or https://, got: {}", url);
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("chain_id must be greater than 0");
        }
        if self.network.polling_interval_ms == 0 {
            anyhow::bail!("polling_interval_ms must be greater than 0");
        }

        let addresses = [
            ("bundler", &self.addresses.bundler),
            ("general_adapter", &self.addresses.general_adapter),
            ("morpho", &self.addresses.morpho),
            ("wrapped_native", &self.addresses.wrapped_native),
        ];
        for (name, value) in addresses {
            if !is_hex_address(value) {
                anyhow::bail!("{} is not a valid address: {}", name, value);
            }
        }

        let execution = &self.execution;
        if execution.retry_delay_ms > 60_000 || execution.approval_settle_delay_ms > 60_000 {
            anyhow::bail!("approval_settle_delay_ms and retry_delay_ms must not exceed 60000");
        }
        if execution.state_ttl_secs == 0 {
            anyhow::bail!("state_ttl_secs must be greater than 0");
        }
        if execution.max_withdraw_queue_items == 0 {
            anyhow::bail!("max_withdraw_queue_items must be greater than 0");
        }
        if execution.gas_reserve_wei.is_empty() || !execution.gas_reserve_wei.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("gas_reserve_wei must be a decimal integer, got: {}", execution.gas_reserve_wei);
        }

        for vault in &self.vaults {
            if !is_hex_address(&vault.address) {
                anyhow::bail!("vault {} has an invalid address: {}", vault.name, vault.address);
            }
        }

        Ok(())
    }

    /// Look a vault up by name, symbol or address (case-insensitive)
    pub fn find_vault(&self, key: &str) -> Option<&VaultEntry> {
        self.vaults.iter().find(|v| {
            v.name.eq_ignore_ascii_case(key) || v.symbol.eq_ignore_ascii_case(key) || v.address.eq_ignore_ascii_case(key)
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
network:
  rpc_url: "https://base.example.org"
  private_key: ""
execution:
  retry_delay_ms: 500
  supports_signature: true
vaults:
  - name: "Moonwell Flagship USDC"
    symbol: "mwUSDC"
    address: "0xc1256Ae5FF1cf2719D4937adb3bbCCab2E00A2Ca"
    asset_price_usd: 1.0
monitoring:
  json_logs: true
"#;

    #[test]
    fn test_defaults_target_base() {
        let config = Config::default();
        assert_eq!(config.network.chain_id, 8453);
        assert_eq!(config.execution.approval_settle_delay_ms, 1_000);
        assert_eq!(config.execution.retry_delay_ms, 2_000);
        assert_eq!(config.execution.max_withdraw_queue_items, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.network.rpc_url, "https://base.example.org");
        assert_eq!(config.network.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(config.execution.retry_delay_ms, 500);
        assert_eq!(config.execution.approval_settle_delay_ms, 1_000);
        assert!(config.execution.supports_signature);
        assert!(config.monitoring.json_logs);
        assert_eq!(config.monitoring.log_level, "info");
        assert_eq!(config.vaults.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("vault-config-{}.yaml", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.vaults[0].symbol, "mwUSDC");
    }

    #[test]
    fn test_find_vault_by_symbol_or_address() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert!(config.find_vault("MWUSDC").is_some());
        assert!(config.find_vault("0xc1256ae5ff1cf2719d4937adb3bbccab2e00a2ca").is_some());
        assert!(config.find_vault("nope").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.network.rpc_url = "ws://localhost:8546".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.addresses.bundler = "0x1234".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.execution.gas_reserve_wei = "0.0001".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.chain_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hex_address_check() {
        assert!(is_hex_address("0x4200000000000000000000000000000000000006"));
        assert!(!is_hex_address("4200000000000000000000000000000000000006"));
        assert!(!is_hex_address("0xZZ00000000000000000000000000000000000006"));
    }
}
