//! Builder pattern for constructing the relay.
//!
//! Composes a [`RelayOrchestrator`] and the owner's signer from configuration,
//! using factory functions to create the account and ledger implementations.

use crate::RelayOrchestrator;
use permit_account::{AccountError, AccountInterface, AccountService};
use permit_config::{AccountConfig, Config};
use permit_ledger::{LedgerError, LedgerInterface, LedgerService};
use permit_types::TokenConfig;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during relay construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions needed to build the relay, keyed by implementation name.
pub struct RelayFactories<AF, LF> {
	pub account_factories: HashMap<String, AF>,
	pub ledger_factories: HashMap<String, LF>,
}

/// A ready-to-run relay.
pub struct Relay {
	/// Orchestrator paying fees from the relayer's account.
	pub orchestrator: RelayOrchestrator,
	/// Signer of the token owner.
	pub owner: Arc<AccountService>,
	/// Signer of the relayer, also the fee payer.
	pub relayer: Arc<AccountService>,
}

/// Builder for constructing a [`Relay`] with pluggable implementations.
pub struct RelayBuilder {
	config: Config,
}

impl RelayBuilder {
	/// Creates a new RelayBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the relay using the factory for each configured primary.
	pub async fn build<AF, LF>(
		self,
		factories: RelayFactories<AF, LF>,
	) -> Result<Relay, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		LF: Fn(&toml::Value, &TokenConfig) -> Result<Box<dyn LedgerInterface>, LedgerError>,
	{
		let owner = Arc::new(build_account(
			"owner",
			&self.config.accounts.owner,
			&factories.account_factories,
		)?);
		let relayer = Arc::new(build_account(
			"relayer",
			&self.config.accounts.relayer,
			&factories.account_factories,
		)?);

		let owner_address = owner
			.get_address()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to get owner address: {}", e)))?;
		let relayer_address = relayer
			.get_address()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to get relayer address: {}", e)))?;
		if owner_address == relayer_address {
			return Err(BuilderError::Config(
				"Owner and relayer must be different accounts".into(),
			));
		}

		let ledger_config = &self.config.ledger;
		let primary = &ledger_config.primary;
		let factory = factories
			.ledger_factories
			.get(primary)
			.ok_or_else(|| BuilderError::MissingComponent(format!("ledger '{}'", primary)))?;
		let implementation_config = ledger_config.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Primary ledger '{}' is not configured", primary))
		})?;
		let implementation = factory(implementation_config, &self.config.token).map_err(|e| {
			tracing::error!(
				component = "ledger",
				implementation = %primary,
				error = %e,
				"Failed to create ledger implementation"
			);
			BuilderError::Config(format!(
				"Failed to create ledger implementation '{}': {}",
				primary, e
			))
		})?;
		tracing::info!(component = "ledger", implementation = %primary, "Loaded");

		let token_address = implementation
			.token_address()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to read token address: {}", e)))?;
		if token_address != self.config.token.address {
			return Err(BuilderError::Config(format!(
				"Ledger hosts token {} but configuration names {}",
				token_address, self.config.token.address
			)));
		}

		let ledger = Arc::new(LedgerService::new(
			implementation,
			relayer.clone(),
			ledger_config.min_confirmations,
		));

		tracing::info!(
			relayer_id = %self.config.relayer.id,
			owner = %owner_address,
			relayer = %relayer_address,
			token = %self.config.token.name,
			"Relay initialized"
		);

		Ok(Relay {
			orchestrator: RelayOrchestrator::new(
				ledger,
				self.config.token.clone(),
				self.config.relayer.deadline_seconds,
			),
			owner,
			relayer,
		})
	}
}

fn build_account<AF>(
	role: &str,
	config: &AccountConfig,
	factories: &HashMap<String, AF>,
) -> Result<AccountService, BuilderError>
where
	AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
{
	let factory = factories.get(&config.primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!("{} account '{}'", role, config.primary))
	})?;
	let implementation_config = config.primary_config().ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} account '{}' is not configured",
			role, config.primary
		))
	})?;

	let implementation = factory(implementation_config).map_err(|e| {
		tracing::error!(
			component = "account",
			role,
			implementation = %config.primary,
			error = %e,
			"Failed to create account implementation"
		);
		BuilderError::Config(format!(
			"Failed to create {} account '{}': {}",
			role, config.primary, e
		))
	})?;
	tracing::info!(component = "account", role, implementation = %config.primary, "Loaded");

	Ok(AccountService::new(implementation))
}
