//! Ledger access module for the gasless permit relay.
//!
//! This module abstracts the chain the permit token lives on: reading token
//! state and fee balances, submitting operations on behalf of a fee payer,
//! and waiting for their receipts. [`LedgerService`] binds a ledger to the
//! relayer's account so every submission is paid for by the relayer.

use async_trait::async_trait;
use permit_account::AccountService;
use permit_token::TokenError;
use permit_types::{
	Address, ConfigSchema, ImplementationRegistry, Operation, TokenConfig, TransactionHash, U256,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod memory;
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
	/// Error that occurs during communication with the ledger.
	#[error("Network error: {0}")]
	Network(String),
	/// The fee payer cannot cover the submission fee; nothing was submitted.
	#[error("Insufficient fee balance for {account}: {balance} < {fee}")]
	InsufficientFee {
		account: Address,
		balance: U256,
		fee: U256,
	},
	/// No transaction with this hash is known to the ledger.
	#[error("Unknown transaction: {0}")]
	UnknownTransaction(TransactionHash),
	/// The transaction was included but the token rejected it.
	#[error("Transaction {hash} reverted: {reason}")]
	Reverted {
		hash: TransactionHash,
		reason: TokenError,
	},
	/// Error that occurs when the ledger configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// Error that occurs when resolving the fee payer's account.
	#[error("Account error: {0}")]
	Account(#[from] permit_account::AccountError),
}

/// Result of executing an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
	Success,
	Reverted(TokenError),
}

/// Transaction receipt containing execution details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Account that paid the fee and acted as the caller.
	pub fee_payer: Address,
	/// Fee charged to the fee payer.
	pub fee_paid: U256,
	/// Whether the operation took effect.
	pub status: ExecutionStatus,
}

impl TransactionReceipt {
	pub fn success(&self) -> bool {
		self.status == ExecutionStatus::Success
	}
}

/// Snapshot of a fee payer's position, used to assert who paid for a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSnapshot {
	pub account: Address,
	pub balance: U256,
}

/// Trait defining the interface for ledger implementations.
///
/// Every read and submission is an await point; callers must not assume an
/// operation took effect until [`LedgerInterface::wait_for_confirmation`]
/// returns its receipt. Implementations apply submissions in the order they
/// are received.
#[async_trait]
pub trait LedgerInterface: Send + Sync {
	/// Returns the configuration schema for this ledger implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Chain identifier used in the permit domain.
	async fn chain_id(&self) -> Result<u64, LedgerError>;

	/// Current ledger time in seconds, against which deadlines are checked.
	async fn current_time(&self) -> Result<u64, LedgerError>;

	/// Address of the permit token contract.
	async fn token_address(&self) -> Result<Address, LedgerError>;

	/// Token name as reported by the token contract.
	async fn token_name(&self) -> Result<String, LedgerError>;

	/// The owner's current permit nonce.
	async fn nonce(&self, owner: &Address) -> Result<U256, LedgerError>;

	/// Token balance of `account`.
	async fn token_balance(&self, account: &Address) -> Result<U256, LedgerError>;

	/// Allowance of `spender` over `owner`'s tokens.
	async fn allowance(&self, owner: &Address, spender: &Address) -> Result<U256, LedgerError>;

	/// Native balance `account` pays fees from.
	async fn fee_balance(&self, account: &Address) -> Result<U256, LedgerError>;

	/// Submits `operation` with `fee_payer` as caller and payer.
	async fn submit(
		&self,
		operation: Operation,
		fee_payer: &Address,
	) -> Result<TransactionHash, LedgerError>;

	/// Retrieves the receipt of an included transaction.
	async fn get_receipt(&self, hash: &TransactionHash) -> Result<TransactionReceipt, LedgerError>;

	/// Waits until the transaction has `confirmations` confirmations.
	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		confirmations: u64,
	) -> Result<TransactionReceipt, LedgerError>;
}

/// Type alias for ledger factory functions.
pub type LedgerFactory =
	fn(&toml::Value, &TokenConfig) -> Result<Box<dyn LedgerInterface>, LedgerError>;

/// Registry trait for ledger implementations.
pub trait LedgerRegistry: ImplementationRegistry<Factory = LedgerFactory> {}

/// Get all registered ledger implementations.
pub fn get_all_implementations() -> Vec<(&'static str, LedgerFactory)> {
	use implementations::memory;

	vec![(memory::Registry::NAME, memory::Registry::factory())]
}

/// Service that submits operations to the ledger on behalf of the relayer.
///
/// The relayer's account is the fee payer and caller of every submission
/// made through this service.
pub struct LedgerService {
	/// The underlying ledger implementation.
	ledger: Box<dyn LedgerInterface>,
	/// Account paying for submissions.
	relayer: Arc<AccountService>,
	/// Number of confirmations to wait for.
	min_confirmations: u64,
}

impl LedgerService {
	/// Creates a new LedgerService paying fees from `relayer`.
	pub fn new(
		ledger: Box<dyn LedgerInterface>,
		relayer: Arc<AccountService>,
		min_confirmations: u64,
	) -> Self {
		Self {
			ledger,
			relayer,
			min_confirmations,
		}
	}

	/// Address of the relayer paying for submissions.
	pub async fn relayer_address(&self) -> Result<Address, LedgerError> {
		Ok(self.relayer.get_address().await?)
	}

	/// Submits an operation with the relayer as fee payer.
	pub async fn deliver(&self, operation: Operation) -> Result<TransactionHash, LedgerError> {
		let fee_payer = self.relayer_address().await?;
		let kind = operation.kind();
		let owner = operation.owner();
		let hash = self.ledger.submit(operation, &fee_payer).await?;
		tracing::info!(
			tx_hash = %hash,
			operation = kind,
			owner = %owner,
			fee_payer = %fee_payer,
			"Submitted operation"
		);
		Ok(hash)
	}

	/// Waits for the transaction and fails if it reverted.
	pub async fn confirm(&self, hash: &TransactionHash) -> Result<TransactionReceipt, LedgerError> {
		let receipt = self
			.ledger
			.wait_for_confirmation(hash, self.min_confirmations)
			.await?;

		match &receipt.status {
			ExecutionStatus::Success => {
				tracing::debug!(
					tx_hash = %hash,
					block = receipt.block_number,
					fee = %receipt.fee_paid,
					"Transaction confirmed"
				);
				Ok(receipt)
			},
			ExecutionStatus::Reverted(reason) => {
				tracing::warn!(tx_hash = %hash, reason = %reason, "Transaction reverted");
				Err(LedgerError::Reverted {
					hash: *hash,
					reason: reason.clone(),
				})
			},
		}
	}

	/// Submits an operation and waits for its successful confirmation.
	pub async fn submit_and_confirm(
		&self,
		operation: Operation,
	) -> Result<TransactionReceipt, LedgerError> {
		let hash = self.deliver(operation).await?;
		self.confirm(&hash).await
	}

	pub async fn chain_id(&self) -> Result<u64, LedgerError> {
		self.ledger.chain_id().await
	}

	pub async fn current_time(&self) -> Result<u64, LedgerError> {
		self.ledger.current_time().await
	}

	pub async fn token_address(&self) -> Result<Address, LedgerError> {
		self.ledger.token_address().await
	}

	pub async fn token_name(&self) -> Result<String, LedgerError> {
		self.ledger.token_name().await
	}

	pub async fn nonce(&self, owner: &Address) -> Result<U256, LedgerError> {
		self.ledger.nonce(owner).await
	}

	pub async fn token_balance(&self, account: &Address) -> Result<U256, LedgerError> {
		self.ledger.token_balance(account).await
	}

	pub async fn allowance(&self, owner: &Address, spender: &Address) -> Result<U256, LedgerError> {
		self.ledger.allowance(owner, spender).await
	}

	pub async fn fee_balance(&self, account: &Address) -> Result<U256, LedgerError> {
		self.ledger.fee_balance(account).await
	}

	/// Captures `account`'s current fee balance.
	pub async fn fee_snapshot(&self, account: &Address) -> Result<FeeSnapshot, LedgerError> {
		Ok(FeeSnapshot {
			account: *account,
			balance: self.ledger.fee_balance(account).await?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryLedger;
	use permit_account::implementations::local::LocalAccount;
	use permit_types::{SecretString, TokenConfig};

	const RELAYER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

	async fn service() -> (LedgerService, MemoryLedger, Address) {
		let token = TokenConfig {
			name: "MyGaslessToken".to_string(),
			version: "1".to_string(),
			address: Address::repeat_byte(0xaa),
			decimals: 18,
		};
		let ledger = MemoryLedger::new(1337, &token, U256::from(100));
		let account = LocalAccount::new(&SecretString::from(RELAYER_KEY)).unwrap();
		let relayer = Arc::new(AccountService::new(Box::new(account)));
		let relayer_address = relayer.get_address().await.unwrap();
		ledger.fund(relayer_address, U256::from(1_000)).await;

		let service = LedgerService::new(Box::new(ledger.clone()), relayer, 1);
		(service, ledger, relayer_address)
	}

	#[tokio::test]
	async fn test_relayer_pays_for_delivery() {
		let (service, ledger, relayer) = service().await;
		let owner = Address::repeat_byte(0x11);
		ledger.mint(owner, U256::from(5)).await.unwrap();

		// No allowance yet, so the transfer reverts but is still paid for.
		let hash = service
			.deliver(Operation::TransferFrom {
				spender: relayer,
				owner,
				recipient: Address::repeat_byte(0x33),
				amount: U256::from(1),
			})
			.await
			.unwrap();

		let err = service.confirm(&hash).await.unwrap_err();
		assert!(matches!(
			err,
			LedgerError::Reverted {
				reason: TokenError::InsufficientAllowance { .. },
				..
			}
		));
		let snapshot = service.fee_snapshot(&relayer).await.unwrap();
		assert_eq!(snapshot.balance, U256::from(900));
		assert_eq!(service.fee_balance(&owner).await.unwrap(), U256::ZERO);
	}

	#[tokio::test]
	async fn test_caller_is_always_the_relayer() {
		let (service, ledger, _) = service().await;
		let owner = Address::repeat_byte(0x11);
		let other = Address::repeat_byte(0x44);
		ledger.mint(owner, U256::from(5)).await.unwrap();

		let err = service
			.submit_and_confirm(Operation::TransferFrom {
				spender: other,
				owner,
				recipient: other,
				amount: U256::from(1),
			})
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			LedgerError::Reverted {
				reason: TokenError::CallerNotSpender { .. },
				..
			}
		));
	}

	#[test]
	fn test_registered_implementations() {
		let names: Vec<_> = get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["memory"]);
	}
}
