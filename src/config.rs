use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::access::{CreditPackage, TierLevel};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub karma: KarmaConfig,
    #[serde(default)]
    pub eligibility: EligibilityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub prediction_market: PredictionMarketConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub wagers: WagerConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://data/sigmarket.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Reputation deltas applied when a signal settles
#[derive(Debug, Clone, Deserialize)]
pub struct KarmaConfig {
    /// Karma a new provider starts with
    #[serde(default = "default_initial_karma")]
    pub initial: i64,
    #[serde(default = "default_hit_delta")]
    pub hit_delta: i64,
    #[serde(default = "default_miss_delta")]
    pub miss_delta: i64,
    /// Lowest karma a provider can fall to (None = unbounded)
    #[serde(default)]
    pub floor: Option<i64>,
}

fn default_initial_karma() -> i64 {
    50
}

fn default_hit_delta() -> i64 {
    10
}

fn default_miss_delta() -> i64 {
    -5
}

impl Default for KarmaConfig {
    fn default() -> Self {
        Self {
            initial: default_initial_karma(),
            hit_delta: default_hit_delta(),
            miss_delta: default_miss_delta(),
            floor: None,
        }
    }
}

/// Gate a provider must pass before posting a signal
#[derive(Debug, Clone, Deserialize)]
pub struct EligibilityConfig {
    #[serde(default = "default_min_karma")]
    pub min_karma: i64,
    /// Minimum platform token balance, in whole tokens
    #[serde(default = "default_min_token_balance")]
    pub min_token_balance: i64,
}

fn default_min_karma() -> i64 {
    25
}

fn default_min_token_balance() -> i64 {
    100
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_karma: default_min_karma(),
            min_token_balance: default_min_token_balance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Oldest accepted signed-message timestamp
    #[serde(default = "default_max_signature_age")]
    pub max_signature_age_secs: i64,
    /// How far in the future a signed timestamp may be
    #[serde(default = "default_max_clock_skew")]
    pub max_clock_skew_secs: i64,
    /// Secret for bearer session tokens (None = random per process)
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    /// Token for settlement and market callbacks (None = admin routes disabled)
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_max_signature_age() -> i64 {
    300
}

fn default_max_clock_skew() -> i64 {
    60
}

/// Sample values that must never sign real tokens
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-in-production", "changeme", "secret"];

/// Most decimals a token amount can carry before 10^d overflows U256
pub const MAX_TOKEN_DECIMALS: u32 = 77;

fn default_session_ttl() -> i64 {
    3600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_signature_age_secs: default_max_signature_age(),
            max_clock_skew_secs: default_max_clock_skew(),
            session_secret: None,
            session_ttl_secs: default_session_ttl(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint (None = balances are treated as zero)
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// ERC-20 contract of the platform token
    #[serde(default)]
    pub token_contract: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
    /// How long a fetched balance is reused
    #[serde(default = "default_balance_cache_secs")]
    pub balance_cache_secs: i64,
}

fn default_token_decimals() -> u32 {
    18
}

fn default_rpc_timeout_ms() -> u64 {
    3000
}

fn default_balance_cache_secs() -> i64 {
    60
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            token_contract: String::new(),
            token_decimals: default_token_decimals(),
            timeout_ms: default_rpc_timeout_ms(),
            balance_cache_secs: default_balance_cache_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionMarketConfig {
    /// REST endpoint of the remote market service (None = linkage disabled)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_market_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_market_timeout_ms() -> u64 {
    5000
}

impl Default for PredictionMarketConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: default_market_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
}

/// Threshold tables and fees for gated features
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Tiers by token holdings (knowledge queries)
    #[serde(default = "default_token_tiers")]
    pub token_tiers: Vec<TierLevel>,
    /// Tiers by active stake (scanner)
    #[serde(default = "default_stake_tiers")]
    pub stake_tiers: Vec<TierLevel>,
    /// Pay-per-credit catalogue, keyed by price
    #[serde(default = "default_packages")]
    pub packages: Vec<CreditPackage>,
    /// Fee multiplier for premium items
    #[serde(default = "default_premium_multiplier")]
    pub premium_multiplier: i64,
    /// Unstake fee in basis points
    #[serde(default = "default_unstake_fee_bps")]
    pub unstake_fee_bps: i64,
    /// Minimum stake required to use the scanner at all
    #[serde(default)]
    pub scanner_min_stake: i64,
    /// Minimum token balance required to query the knowledge pool
    #[serde(default)]
    pub knowledge_min_balance: i64,
}

fn default_token_tiers() -> Vec<TierLevel> {
    vec![
        TierLevel::limited("NONE", 0, 10, 0, 0),
        TierLevel::limited("HOLDER", 100, 8, 5, 2000),
        TierLevel::limited("WHALE", 500, 5, 20, 5000),
        TierLevel::unlimited("GURU", 1000),
    ]
}

fn default_stake_tiers() -> Vec<TierLevel> {
    vec![
        TierLevel::limited("NONE", 0, 10, 0, 0),
        TierLevel::limited("SCOUT", 50, 5, 10, 2500),
        TierLevel::limited("HUNTER", 250, 2, 50, 6000),
        TierLevel::unlimited("ORACLE", 1000),
    ]
}

fn default_packages() -> Vec<CreditPackage> {
    vec![
        CreditPackage::credits("SINGLE", 1, 1),
        CreditPackage::credits("PACK_10", 8, 10),
        CreditPackage::credits("PACK_50", 35, 50),
        CreditPackage::unlimited("MONTHLY", 50, 30),
    ]
}

fn default_premium_multiplier() -> i64 {
    3
}

fn default_unstake_fee_bps() -> i64 {
    500
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            token_tiers: default_token_tiers(),
            stake_tiers: default_stake_tiers(),
            packages: default_packages(),
            premium_multiplier: default_premium_multiplier(),
            unstake_fee_bps: default_unstake_fee_bps(),
            scanner_min_stake: 0,
            knowledge_min_balance: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WagerConfig {
    /// Virtual liquidity added to both sides when pricing from pools
    #[serde(default = "default_virtual_liquidity")]
    pub virtual_liquidity: i64,
    #[serde(default = "default_max_stake")]
    pub max_stake: i64,
}

fn default_virtual_liquidity() -> i64 {
    1000
}

fn default_max_stake() -> i64 {
    1_000_000
}

impl Default for WagerConfig {
    fn default() -> Self {
        Self {
            virtual_liquidity: default_virtual_liquidity(),
            max_stake: default_max_stake(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_upvote_delta")]
    pub upvote_delta: i64,
    #[serde(default = "default_downvote_delta")]
    pub downvote_delta: i64,
    /// Share of each paid query credited to the contributor, in basis points
    #[serde(default = "default_contributor_share")]
    pub contributor_share_bps: i64,
}

fn default_upvote_delta() -> i64 {
    10
}

fn default_downvote_delta() -> i64 {
    -10
}

fn default_contributor_share() -> i64 {
    7000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            upvote_delta: default_upvote_delta(),
            downvote_delta: default_downvote_delta(),
            contributor_share_bps: default_contributor_share(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SIGMARKET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SIGMARKET_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("SIGMARKET")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Complete in-code configuration, backed by an in-memory database
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            ..Self::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.karma.hit_delta <= 0 {
            errors.push("karma.hit_delta must be positive".to_string());
        }
        if self.karma.miss_delta > 0 {
            errors.push("karma.miss_delta must not be positive".to_string());
        }

        if self.eligibility.min_token_balance < 0 {
            errors.push("eligibility.min_token_balance cannot be negative".to_string());
        }

        if self.auth.max_signature_age_secs <= 0 {
            errors.push("auth.max_signature_age_secs must be positive".to_string());
        }
        if let Some(ref secret) = self.auth.session_secret {
            let secret = secret.trim();
            if PLACEHOLDER_SECRETS.iter().any(|p| secret.eq_ignore_ascii_case(p)) {
                errors.push("auth.session_secret is a placeholder; set a real secret or leave it unset".to_string());
            } else if secret.len() < 16 {
                errors.push("auth.session_secret must be at least 16 characters".to_string());
            }
        }

        if let Some(ref url) = self.chain.rpc_url {
            if url::Url::parse(url).is_err() {
                errors.push(format!("chain.rpc_url is not a valid URL: {url}"));
            }
            if self.chain.token_decimals > MAX_TOKEN_DECIMALS {
                errors.push(format!(
                    "chain.token_decimals must be at most {MAX_TOKEN_DECIMALS}"
                ));
            }
            if self.chain.token_contract.trim().is_empty() {
                errors.push("chain.token_contract is required when chain.rpc_url is set".to_string());
            }
        }
        if let Some(ref url) = self.prediction_market.base_url {
            if url::Url::parse(url).is_err() {
                errors.push(format!("prediction_market.base_url is not a valid URL: {url}"));
            }
        }

        if !(0..10_000).contains(&self.access.unstake_fee_bps) {
            errors.push("access.unstake_fee_bps must be in [0, 10000)".to_string());
        }
        if self.access.premium_multiplier < 1 {
            errors.push("access.premium_multiplier must be at least 1".to_string());
        }
        for (name, table) in [
            ("access.token_tiers", &self.access.token_tiers),
            ("access.stake_tiers", &self.access.stake_tiers),
        ] {
            if let Err(e) = crate::access::TierTable::new(table.clone()) {
                errors.push(format!("{name}: {e}"));
            }
        }
        if let Err(e) = crate::access::PackageCatalog::new(self.access.packages.clone()) {
            errors.push(format!("access.packages: {e}"));
        }

        if self.wagers.virtual_liquidity <= 0 {
            errors.push("wagers.virtual_liquidity must be positive".to_string());
        }
        if !(0..=10_000).contains(&self.knowledge.contributor_share_bps) {
            errors.push("knowledge.contributor_share_bps must be in [0, 10000]".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default_config();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.karma.hit_delta, 10);
        assert_eq!(config.karma.miss_delta, -5);
        assert_eq!(config.access.unstake_fee_bps, 500);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = AppConfig::default_config();
        config.karma.hit_delta = 0;
        config.access.unstake_fee_bps = 10_000;
        config.chain.rpc_url = Some("not a url".to_string());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_placeholder_session_secret_rejected() {
        let mut config = AppConfig::default_config();
        config.auth.session_secret = Some("change-me-in-production".to_string());
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("placeholder"));

        config.auth.session_secret = Some("short".to_string());
        assert!(config.validate().unwrap_err()[0].contains("16 characters"));

        config.auth.session_secret = Some("a-real-deployment-secret-value".to_string());
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_token_decimals_bounded() {
        let mut config = AppConfig::default_config();
        config.chain.rpc_url = Some("http://localhost:8545".to_string());
        config.chain.token_contract = "0x0000000000000000000000000000000000000001".to_string();
        config.chain.token_decimals = MAX_TOKEN_DECIMALS;
        assert_eq!(config.validate(), Ok(()));

        config.chain.token_decimals = 78;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("chain.token_decimals"));
    }

    #[test]
    fn test_validate_rejects_unordered_tiers() {
        let mut config = AppConfig::default_config();
        config.access.stake_tiers = vec![
            TierLevel::limited("B", 100, 5, 1, 0),
            TierLevel::limited("A", 100, 10, 0, 0),
        ];
        let errors = config.validate().unwrap_err();
        assert!(errors[0].starts_with("access.stake_tiers"));
    }
}
