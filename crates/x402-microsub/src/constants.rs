use alloy::primitives::{address, Address};
use std::env;

use crate::validation::{is_valid_address, is_valid_amount};

/// x402 protocol version carried in every payment header.
pub const X402_VERSION: u32 = 1;

/// x402 scheme name for ERC-3009 exact-amount transfers.
pub const SCHEME_NAME: &str = "exact";

/// Request header carrying the base64 payment payload.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Request header carrying a microsub reference instead of a fresh payment.
pub const MICROSUB_HEADER: &str = "X-MICROSUB-TX";

/// Base mainnet chain ID.
pub const BASE_CHAIN_ID: u64 = 8453;

/// Base Sepolia chain ID.
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// USDC on Base mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// Default authorization lifetime in seconds.
pub const DEFAULT_VALID_DURATION_SECS: u64 = 300;

/// 0.01 USDC (6 decimals).
pub const DEFAULT_AMOUNT: &str = "10000";

const DEFAULT_NETWORK: &str = "base-sepolia";
const DEFAULT_QUERY_LIMIT: u32 = 1;
const DEFAULT_EXPIRATION_DAYS: u32 = 30;

/// EIP-712 name/version for a deployed token, keyed by (chain, contract).
/// The values must match what the token contract hashes into its own domain.
pub fn token_domain_params(token: Address, chain_id: u64) -> (&'static str, &'static str) {
    match (chain_id, token) {
        (BASE_CHAIN_ID, t) if t == USDC_BASE => ("USD Coin", "2"),
        (BASE_SEPOLIA_CHAIN_ID, t) if t == USDC_BASE_SEPOLIA => ("USDC", "2"),
        _ => ("USD Coin", "2"),
    }
}

/// Errors raised while loading or validating [`PaymentConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid number for {0}: {1}")]
    InvalidNumber(&'static str, String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl From<ConfigError> for crate::X402Error {
    fn from(e: ConfigError) -> Self {
        crate::X402Error::ConfigError(e.to_string())
    }
}

/// Payment configuration handed to the typed-data builder and the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfig {
    /// ERC-3009 token contract (EIP-712 verifying contract).
    pub token_address: Address,
    /// Address receiving the payments.
    pub recipient_address: Address,
    /// x402 network name, e.g. `base-sepolia`.
    pub network: String,
    pub chain_id: u64,
    /// Amount in the token's smallest unit when the caller does not supply one.
    pub default_amount: String,
    /// Queries granted per settled payment; above 1 the backend creates a microsub.
    pub query_limit: u32,
    pub expiration_days: u32,
    /// Lifetime of each signed authorization.
    pub valid_duration_secs: u64,
}

impl Default for PaymentConfig {
    /// Base Sepolia USDC, recipient unset (zero address).
    fn default() -> Self {
        Self {
            token_address: USDC_BASE_SEPOLIA,
            recipient_address: Address::ZERO,
            network: DEFAULT_NETWORK.to_string(),
            chain_id: BASE_SEPOLIA_CHAIN_ID,
            default_amount: DEFAULT_AMOUNT.to_string(),
            query_limit: DEFAULT_QUERY_LIMIT,
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            valid_duration_secs: DEFAULT_VALID_DURATION_SECS,
        }
    }
}

impl PaymentConfig {
    /// Load configuration from `X402_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Required: recipient
        let recipient = env::var("X402_RECIPIENT_ADDRESS")
            .map_err(|_| ConfigError::MissingRequired("X402_RECIPIENT_ADDRESS"))?;
        let recipient_address = parse_address(&recipient)?;

        let token_address = match env::var("X402_TOKEN_ADDRESS") {
            Ok(s) if !s.is_empty() => parse_address(&s)?,
            _ => defaults.token_address,
        };

        let network = env::var("X402_NETWORK")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.network);

        let chain_id = parse_env_number("X402_CHAIN_ID", defaults.chain_id)?;
        let query_limit = parse_env_number("X402_QUERY_LIMIT", defaults.query_limit)?;
        let expiration_days = parse_env_number("X402_EXPIRATION_DAYS", defaults.expiration_days)?;
        let valid_duration_secs =
            parse_env_number("X402_VALID_DURATION_SECS", defaults.valid_duration_secs)?;

        let default_amount = env::var("X402_DEFAULT_AMOUNT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.default_amount);

        let config = Self {
            token_address,
            recipient_address,
            network,
            chain_id,
            default_amount,
            query_limit,
            expiration_days,
            valid_duration_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the builder itself does not enforce.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::InvalidNumber("chain_id", "0".to_string()));
        }
        if self.valid_duration_secs == 0 {
            return Err(ConfigError::InvalidNumber(
                "valid_duration_secs",
                "0".to_string(),
            ));
        }
        if !is_valid_amount(&self.default_amount) {
            return Err(ConfigError::InvalidAmount(self.default_amount.clone()));
        }
        Ok(())
    }
}

fn parse_address(s: &str) -> Result<Address, ConfigError> {
    if !is_valid_address(s) {
        return Err(ConfigError::InvalidAddress(s.to_string()));
    }
    s.parse()
        .map_err(|_| ConfigError::InvalidAddress(s.to_string()))
}

fn parse_env_number<T: std::str::FromStr>(
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(s) if !s.trim().is_empty() => s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(key, s)),
        _ => Ok(default),
    }
}
