//! Account management module for the gasless permit relay.
//!
//! This module provides the signing capability of token holders. The relay
//! only ever talks to an [`AccountService`], which exposes the account's
//! address and signs permits; private key material stays inside the
//! implementation.

use async_trait::async_trait;
use permit_types::{
	Address, ConfigSchema, DomainDescriptor, ImplementationRegistry, PermitRequest,
	PermitSignature,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// The account was asked to sign a permit for a different owner.
	#[error("Account {account} cannot sign for owner {owner}")]
	NotOwner { account: Address, owner: Address },
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for account implementations.
///
/// An implementation holds one account's key and signs EIP-712 permits on
/// behalf of that account only.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Retrieves the address associated with this account.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs the EIP-712 digest of `request` under `domain`.
	///
	/// Implementations must refuse requests whose owner is not this account.
	async fn sign_permit(
		&self,
		domain: &DomainDescriptor,
		request: &PermitRequest,
	) -> Result<PermitSignature, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
///
/// Returns a vector of (name, factory) tuples for all available account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
///
/// This struct provides a high-level interface for account management,
/// wrapping an underlying account implementation.
pub struct AccountService {
	/// The underlying account implementation.
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	/// Creates a new AccountService with the specified implementation.
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	/// Retrieves the address associated with the managed account.
	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	/// Signs a permit using the managed account.
	pub async fn sign_permit(
		&self,
		domain: &DomainDescriptor,
		request: &PermitRequest,
	) -> Result<PermitSignature, AccountError> {
		let signature = self.implementation.sign_permit(domain, request).await?;
		tracing::debug!(
			owner = %request.owner,
			spender = %request.spender,
			nonce = %request.nonce,
			"Signed permit"
		);
		Ok(signature)
	}
}
