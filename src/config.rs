use crate::{
    error::{AppError, AppResult},
    implementations::classifier::MatchRule,
};
use dotenvy::dotenv;
use serde::Deserialize;
use std::{env, fs, path::Path};

const DEFAULT_CONFIG_PATH: &str = "Config.toml";
/// Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
const DEFAULT_LOCK_PERIOD_SECS: u64 = 15;
const DEFAULT_INSTALL_URL: &str = "https://metamask.io";

/// Strongly-typed configuration derived from a `Config.toml` or environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub eth_rpc_url: String,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_keys: Vec<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Kept raw so that a malformed value surfaces when connecting rather than at startup.
    pub staking_address: String,
    pub token_address: String,
    #[serde(default = "default_lock_period_secs")]
    pub lock_period_secs: u64,
    #[serde(default = "default_min_stake_wei")]
    pub min_stake_wei: String,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
    #[serde(default = "default_chain_poll_interval_ms")]
    pub chain_poll_interval_ms: u64,
    #[serde(default = "default_install_url")]
    pub wallet_install_url: String,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
    #[serde(default)]
    pub uniform_preflight: bool,
    #[serde(default)]
    pub error_markers: Option<Vec<MatchRule>>,
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_lock_period_secs() -> u64 {
    DEFAULT_LOCK_PERIOD_SECS
}

fn default_min_stake_wei() -> String {
    "1".to_string()
}

fn default_confirmations() -> usize {
    1
}

fn default_chain_poll_interval_ms() -> u64 {
    4_000
}

fn default_install_url() -> String {
    DEFAULT_INSTALL_URL.to_string()
}

fn default_token_symbol() -> String {
    "FIT".to_string()
}

impl AppConfig {
    /// Load configuration, preferring a user-provided config file and falling back to env vars.
    pub fn load() -> AppResult<Self> {
        dotenv().ok();

        let configured_path =
            env::var("STAKEDESK_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config_path = Path::new(&configured_path);

        if config_path.exists() {
            let raw = fs::read_to_string(config_path)
                .map_err(|err| AppError::Config(format!("failed to read config file: {err}")))?;
            let cfg = Self::from_toml(&raw)?;
            return Ok(cfg);
        }

        Self::from_env()
    }

    pub fn from_toml(raw: &str) -> AppResult<Self> {
        let mut cfg: AppConfig = toml::from_str(raw)
            .map_err(|err| AppError::Config(format!("failed to parse config file: {err}")))?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Helper used when no config file is present.
    fn from_env() -> AppResult<Self> {
        let eth_rpc_url = env::var("ETH_RPC_URL")
            .map_err(|_| AppError::Config("ETH_RPC_URL missing (config file not found)".into()))?;
        let staking_address = env::var("STAKING_ADDRESS").map_err(|_| {
            AppError::Config("STAKING_ADDRESS missing (config file not found)".into())
        })?;
        let token_address = env::var("TOKEN_ADDRESS")
            .map_err(|_| AppError::Config("TOKEN_ADDRESS missing (config file not found)".into()))?;

        let private_key = env::var("PRIVATE_KEY").ok();
        let private_keys = env::var("PRIVATE_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut cfg = Self {
            eth_rpc_url,
            private_key,
            private_keys,
            chain_id: env_parse("CHAIN_ID").unwrap_or(DEFAULT_CHAIN_ID),
            staking_address,
            token_address,
            lock_period_secs: env_parse("LOCK_PERIOD_SECS").unwrap_or(DEFAULT_LOCK_PERIOD_SECS),
            min_stake_wei: env::var("MIN_STAKE_WEI").unwrap_or_else(|_| default_min_stake_wei()),
            confirmations: env_parse("CONFIRMATIONS").unwrap_or_else(default_confirmations),
            chain_poll_interval_ms: env_parse("CHAIN_POLL_INTERVAL_MS")
                .unwrap_or_else(default_chain_poll_interval_ms),
            wallet_install_url: env::var("WALLET_INSTALL_URL")
                .unwrap_or_else(|_| default_install_url()),
            token_symbol: env::var("TOKEN_SYMBOL").unwrap_or_else(|_| default_token_symbol()),
            uniform_preflight: env_parse("UNIFORM_PREFLIGHT").unwrap_or(false),
            error_markers: None,
        };
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Every configured key, the single `private_key` first.
    pub fn keyring(&self) -> Vec<String> {
        self.private_key
            .iter()
            .chain(self.private_keys.iter())
            .cloned()
            .collect()
    }

    /// Ensure we never surface a zero chain id or zero confirmations from user input.
    fn apply_defaults(&mut self) {
        if self.chain_id == 0 {
            self.chain_id = DEFAULT_CHAIN_ID;
        }
        if self.confirmations == 0 {
            self.confirmations = default_confirmations();
        }
    }

    fn validate(&self) -> AppResult<()> {
        if ethers::types::U256::from_dec_str(&self.min_stake_wei).is_err() {
            return Err(AppError::Config(format!(
                "min_stake_wei is not a decimal integer: {}",
                self.min_stake_wei
            )));
        }
        if let Some(rules) = &self.error_markers {
            for rule in rules {
                if !rule.is_well_formed() {
                    return Err(AppError::Config(format!(
                        "error marker for {:?} needs a code or a substring",
                        rule.category
                    )));
                }
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implementations::classifier::ErrorCategory;

    const MINIMAL: &str = r#"
        eth_rpc_url = "http://localhost:8545"
        staking_address = "0x00000000000000000000000000000000000000aa"
        token_address = "0x00000000000000000000000000000000000000bb"
    "#;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.chain_id, DEFAULT_CHAIN_ID);
        assert_eq!(cfg.lock_period_secs, 15);
        assert_eq!(cfg.min_stake_wei, "1");
        assert_eq!(cfg.confirmations, 1);
        assert_eq!(cfg.wallet_install_url, "https://metamask.io");
        assert_eq!(cfg.token_symbol, "FIT");
        assert!(!cfg.uniform_preflight);
        assert!(cfg.error_markers.is_none());
        assert!(cfg.keyring().is_empty());
    }

    #[test]
    fn zero_chain_id_falls_back_to_default() {
        let raw = format!("{MINIMAL}\nchain_id = 0\n");
        let cfg = AppConfig::from_toml(&raw).unwrap();
        assert_eq!(cfg.chain_id, DEFAULT_CHAIN_ID);
    }

    #[test]
    fn keyring_puts_single_key_first() {
        let raw = format!(
            "{MINIMAL}\nprivate_key = \"0x01\"\nprivate_keys = [\"0x02\", \"0x03\"]\n"
        );
        let cfg = AppConfig::from_toml(&raw).unwrap();
        assert_eq!(cfg.keyring(), vec!["0x01", "0x02", "0x03"]);
    }

    #[test]
    fn custom_error_markers_are_parsed() {
        let raw = format!(
            "{MINIMAL}\n[[error_markers]]\ncontains = \"too early\"\ncategory = \"lock_period_not_elapsed\"\n"
        );
        let cfg = AppConfig::from_toml(&raw).unwrap();
        let rules = cfg.error_markers.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, ErrorCategory::LockPeriodNotElapsed);
    }

    #[test]
    fn empty_error_marker_is_rejected() {
        let raw = format!("{MINIMAL}\n[[error_markers]]\ncategory = \"unknown\"\n");
        let err = AppConfig::from_toml(&raw).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn bad_min_stake_is_rejected() {
        let raw = format!("{MINIMAL}\nmin_stake_wei = \"0.5\"\n");
        assert!(AppConfig::from_toml(&raw).is_err());
    }
}
