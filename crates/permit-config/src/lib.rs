//! Configuration module for the gasless permit relay.
//!
//! This module provides structures and utilities for managing relay configuration.
//! It supports loading configuration from TOML files with environment variable
//! substitution and validates that every referenced implementation is configured.

use permit_types::{Address, TokenConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, not the input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Settings of the relay instance itself.
	pub relayer: RelayerConfig,
	/// The permit token the relay operates on.
	pub token: TokenConfig,
	/// Ledger the token lives on.
	pub ledger: LedgerConfig,
	/// Signing accounts of the token owner and the relayer.
	pub accounts: AccountsConfig,
	/// Default transfer performed by the relay binary.
	pub transfer: Option<TransferConfig>,
}

/// Settings of the relay instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayerConfig {
	/// Identifier used in logs.
	pub id: String,
	/// Validity window of a requested signature, added to the ledger time.
	/// Defaults to one hour.
	#[serde(default = "default_deadline_seconds")]
	pub deadline_seconds: u64,
}

fn default_deadline_seconds() -> u64 {
	3600
}

/// Configuration for ledger access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Confirmations to wait for before a receipt is trusted.
	#[serde(default = "default_confirmations")]
	pub min_confirmations: u64,
	/// Map of ledger implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

fn default_confirmations() -> u64 {
	1
}

/// The two signing roles in a gasless transfer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountsConfig {
	/// Token holder; only signs, never pays fees.
	pub owner: AccountConfig,
	/// Spender; submits both transactions and pays their fees.
	pub relayer: AccountConfig,
}

/// Configuration for one account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

impl AccountConfig {
	/// Configuration table of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Default transfer parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
	/// Address receiving the tokens.
	pub recipient: Address,
	/// Amount in base units, as a decimal string.
	#[serde(default)]
	pub amount: Option<String>,
	/// Authorize and move the owner's whole balance instead of `amount`.
	#[serde(default)]
	pub full_balance: bool,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)));
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, resolving environment variables.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path.as_ref()).await?;
		content.parse()
	}

	/// Validates the configuration to ensure all required fields are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.relayer.id.is_empty() {
			return Err(ConfigError::Validation("Relayer ID cannot be empty".into()));
		}
		if self.relayer.deadline_seconds == 0 {
			return Err(ConfigError::Validation(
				"Relayer deadline_seconds must be greater than 0".into(),
			));
		}

		if self.token.name.is_empty() {
			return Err(ConfigError::Validation("Token name cannot be empty".into()));
		}
		if self.token.address == Address::ZERO {
			return Err(ConfigError::Validation(
				"Token address cannot be the zero address".into(),
			));
		}

		validate_primary("ledger", &self.ledger.primary, &self.ledger.implementations)?;
		validate_primary(
			"accounts.owner",
			&self.accounts.owner.primary,
			&self.accounts.owner.implementations,
		)?;
		validate_primary(
			"accounts.relayer",
			&self.accounts.relayer.primary,
			&self.accounts.relayer.implementations,
		)?;

		if let Some(transfer) = &self.transfer {
			if transfer.amount.is_none() && !transfer.full_balance {
				return Err(ConfigError::Validation(
					"Transfer needs an amount or full_balance = true".into(),
				));
			}
		}

		Ok(())
	}
}

fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses TOML, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const CONFIG: &str = r#"
[relayer]
id = "${TEST_RELAYER_ID:-gasless-relayer}"

[token]
name = "MyGaslessToken"
address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[ledger]
primary = "memory"
[ledger.implementations.memory]
chain_id = 1337

[accounts.owner]
primary = "local"
[accounts.owner.implementations.local]
private_key = "${TEST_OWNER_KEY:-0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80}"

[accounts.relayer]
primary = "local"
[accounts.relayer.implementations.local]
private_key = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"

[transfer]
recipient = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"
amount = "30"
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("TEST_PERMIT_HOST", "localhost");
		std::env::set_var("TEST_PERMIT_PORT", "8545");

		let input = "url = \"http://${TEST_PERMIT_HOST}:${TEST_PERMIT_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "url = \"http://localhost:8545\"");

		std::env::remove_var("TEST_PERMIT_HOST");
		std::env::remove_var("TEST_PERMIT_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${MISSING_PERMIT_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${MISSING_PERMIT_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_PERMIT_VAR"));
	}

	#[test]
	fn test_parse_config_with_defaults() {
		let config: Config = CONFIG.parse().unwrap();

		assert_eq!(config.relayer.id, "gasless-relayer");
		assert_eq!(config.relayer.deadline_seconds, 3600);
		assert_eq!(config.ledger.min_confirmations, 1);
		assert_eq!(config.token.version, "1");
		assert_eq!(config.token.decimals, 18);
		assert_eq!(
			config.transfer.as_ref().and_then(|t| t.amount.as_deref()),
			Some("30")
		);

		let owner = config.accounts.owner.primary_config().unwrap();
		assert!(owner["private_key"].as_str().unwrap().starts_with("0xac0974"));
	}

	#[test]
	fn test_unknown_primary_rejected() {
		let config = CONFIG.replace("primary = \"memory\"", "primary = \"evm\"");
		let err = config.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary ledger 'evm'"));
	}

	#[test]
	fn test_zero_deadline_window_rejected() {
		let config = CONFIG.replace(
			"id = \"${TEST_RELAYER_ID:-gasless-relayer}\"",
			"id = \"r\"\ndeadline_seconds = 0",
		);
		assert!(matches!(
			config.parse::<Config>(),
			Err(ConfigError::Validation(_))
		));
	}

	#[test]
	fn test_transfer_without_amount_rejected() {
		let config = CONFIG.replace("amount = \"30\"", "");
		assert!(config.parse::<Config>().is_err());

		let config = CONFIG.replace("amount = \"30\"", "full_balance = true");
		assert!(config.parse::<Config>().unwrap().transfer.unwrap().full_balance);
	}

	#[test]
	fn test_parse_error_is_reported() {
		let err = "[relayer".parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[tokio::test]
	async fn test_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(CONFIG.as_bytes()).unwrap();

		let config = Config::from_file(file.path()).await.unwrap();
		assert_eq!(config.token.name, "MyGaslessToken");
		assert_eq!(config.ledger.primary, "memory");
	}

	#[tokio::test]
	async fn test_from_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let result = Config::from_file(dir.path().join("missing.toml")).await;
		assert!(matches!(result, Err(ConfigError::Io(_))));
	}
}
