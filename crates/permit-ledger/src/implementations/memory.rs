//! In-memory ledger implementation.
//!
//! Hosts a single [`PermitToken`] together with native fee balances and
//! transaction receipts. Every submission takes one lock on the whole
//! state, charges a flat fee to the fee payer, executes the operation and
//! stores the receipt, so operations are applied one at a time in the order
//! they acquire the lock. Blocks are final as soon as they are produced.
//!
//! The clock follows system time unless pinned with [`MemoryLedger::set_time`].

use crate::{
	ExecutionStatus, LedgerError, LedgerFactory, LedgerInterface, LedgerRegistry,
	TransactionReceipt,
};
use async_trait::async_trait;
use permit_token::PermitToken;
use permit_types::{
	current_timestamp, Address, ConfigSchema, Field, FieldType, ImplementationRegistry,
	Operation, Schema, TokenConfig, TransactionHash, ValidationError, U256,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fee charged per submission when none is configured (21000 gas at 1 gwei).
pub const DEFAULT_FEE_PER_TRANSACTION: u64 = 21_000_000_000_000;

struct LedgerState {
	token: PermitToken,
	fee_balances: HashMap<Address, U256>,
	receipts: HashMap<TransactionHash, TransactionReceipt>,
	block_number: u64,
	pinned_time: Option<u64>,
}

impl LedgerState {
	fn now(&self) -> u64 {
		self.pinned_time.unwrap_or_else(current_timestamp)
	}

	fn fee_balance(&self, account: &Address) -> U256 {
		self.fee_balances.get(account).copied().unwrap_or_default()
	}
}

/// Ledger that keeps all state in process memory.
///
/// Clones share the same state, so a test can keep a handle for fixtures
/// while a [`crate::LedgerService`] owns another.
#[derive(Clone)]
pub struct MemoryLedger {
	chain_id: u64,
	token_address: Address,
	fee_per_transaction: U256,
	state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
	/// Creates an empty ledger hosting the token described by `token`.
	pub fn new(chain_id: u64, token: &TokenConfig, fee_per_transaction: U256) -> Self {
		let state = LedgerState {
			token: PermitToken::new(token.domain(chain_id)),
			fee_balances: HashMap::new(),
			receipts: HashMap::new(),
			block_number: 0,
			pinned_time: None,
		};
		Self {
			chain_id,
			token_address: token.address,
			fee_per_transaction,
			state: Arc::new(Mutex::new(state)),
		}
	}

	/// Fee charged for every submission.
	pub fn fee_per_transaction(&self) -> U256 {
		self.fee_per_transaction
	}

	/// Creates tokens in `account`'s balance.
	pub async fn mint(&self, account: Address, amount: U256) -> Result<(), LedgerError> {
		let mut state = self.state.lock().await;
		state
			.token
			.mint(account, amount)
			.map_err(|e| LedgerError::Configuration(format!("Cannot mint to {}: {}", account, e)))
	}

	/// Credits native fee balance to `account`.
	pub async fn fund(&self, account: Address, amount: U256) {
		let mut state = self.state.lock().await;
		*state.fee_balances.entry(account).or_default() += amount;
	}

	/// Pins the ledger clock to `timestamp`.
	pub async fn set_time(&self, timestamp: u64) {
		self.state.lock().await.pinned_time = Some(timestamp);
	}

	/// Moves the ledger clock forward, pinning it if it followed system time.
	pub async fn advance_time(&self, seconds: u64) {
		let mut state = self.state.lock().await;
		let now = state.now();
		state.pinned_time = Some(now + seconds);
	}

	/// Latest produced block.
	pub async fn block_number(&self) -> u64 {
		self.state.lock().await.block_number
	}
}

#[async_trait]
impl LedgerInterface for MemoryLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryLedgerSchema)
	}

	async fn chain_id(&self) -> Result<u64, LedgerError> {
		Ok(self.chain_id)
	}

	async fn current_time(&self) -> Result<u64, LedgerError> {
		Ok(self.state.lock().await.now())
	}

	async fn token_address(&self) -> Result<Address, LedgerError> {
		Ok(self.token_address)
	}

	async fn token_name(&self) -> Result<String, LedgerError> {
		Ok(self.state.lock().await.token.name().to_string())
	}

	async fn nonce(&self, owner: &Address) -> Result<U256, LedgerError> {
		Ok(self.state.lock().await.token.nonce(owner))
	}

	async fn token_balance(&self, account: &Address) -> Result<U256, LedgerError> {
		Ok(self.state.lock().await.token.balance_of(account))
	}

	async fn allowance(&self, owner: &Address, spender: &Address) -> Result<U256, LedgerError> {
		Ok(self.state.lock().await.token.allowance(owner, spender))
	}

	async fn fee_balance(&self, account: &Address) -> Result<U256, LedgerError> {
		Ok(self.state.lock().await.fee_balance(account))
	}

	async fn submit(
		&self,
		operation: Operation,
		fee_payer: &Address,
	) -> Result<TransactionHash, LedgerError> {
		let mut state = self.state.lock().await;

		let balance = state.fee_balance(fee_payer);
		if balance < self.fee_per_transaction {
			return Err(LedgerError::InsufficientFee {
				account: *fee_payer,
				balance,
				fee: self.fee_per_transaction,
			});
		}

		// Fees are charged whether or not the operation succeeds.
		state
			.fee_balances
			.insert(*fee_payer, balance - self.fee_per_transaction);
		state.block_number += 1;
		let block_number = state.block_number;
		let hash = operation.transaction_hash(fee_payer, block_number);

		let now = state.now();
		let status = match state.token.apply(*fee_payer, &operation, now) {
			Ok(()) => ExecutionStatus::Success,
			Err(reason) => ExecutionStatus::Reverted(reason),
		};

		tracing::debug!(
			tx_hash = %hash,
			block = block_number,
			operation = operation.kind(),
			success = status == ExecutionStatus::Success,
			"Executed operation"
		);

		state.receipts.insert(
			hash,
			TransactionReceipt {
				hash,
				block_number,
				fee_payer: *fee_payer,
				fee_paid: self.fee_per_transaction,
				status,
			},
		);
		Ok(hash)
	}

	async fn get_receipt(&self, hash: &TransactionHash) -> Result<TransactionReceipt, LedgerError> {
		self.state
			.lock()
			.await
			.receipts
			.get(hash)
			.cloned()
			.ok_or(LedgerError::UnknownTransaction(*hash))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		_confirmations: u64,
	) -> Result<TransactionReceipt, LedgerError> {
		// Blocks are final on inclusion.
		self.get_receipt(hash).await
	}
}

/// Configuration schema for MemoryLedger.
pub struct MemoryLedgerSchema;

impl ConfigSchema for MemoryLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"chain_id",
				FieldType::Integer {
					min: Some(1),
					max: None,
				},
			)],
			vec![
				Field::new(
					"fee_per_transaction",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"genesis_timestamp",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new("token_balances", FieldType::Table).with_validator(validate_allocations),
				Field::new("fee_balances", FieldType::Table).with_validator(validate_allocations),
			],
		);
		schema.validate(config)
	}
}

fn validate_allocations(value: &toml::Value) -> Result<(), String> {
	parse_allocations(value).map(|_| ())
}

/// Parses a table of `"0xaddress" = "amount"` entries.
fn parse_allocations(value: &toml::Value) -> Result<Vec<(Address, U256)>, String> {
	let table = value
		.as_table()
		.ok_or_else(|| "allocations must be a table".to_string())?;

	table
		.iter()
		.map(|(key, amount)| {
			let account = Address::from_str(key)
				.map_err(|e| format!("Invalid address '{}': {}", key, e))?;
			let amount = match amount {
				toml::Value::String(s) => U256::from_str(s)
					.map_err(|e| format!("Invalid amount for {}: {}", key, e))?,
				toml::Value::Integer(i) if *i >= 0 => U256::from(*i as u64),
				other => {
					return Err(format!(
						"Amount for {} must be a string or non-negative integer, got {}",
						key,
						other.type_str()
					))
				},
			};
			Ok((account, amount))
		})
		.collect()
}

/// Factory function to create a memory ledger from configuration.
///
/// Configuration parameters:
/// - `chain_id`: chain identifier used in the permit domain
/// - `fee_per_transaction` (optional): flat fee charged per submission
/// - `genesis_timestamp` (optional): pins the clock to this time
/// - `token_balances` (optional): initial token balances by address
/// - `fee_balances` (optional): initial native fee balances by address
pub fn create_ledger(
	config: &toml::Value,
	token: &TokenConfig,
) -> Result<Box<dyn LedgerInterface>, LedgerError> {
	Ok(Box::new(MemoryLedger::from_config(config, token)?))
}

impl MemoryLedger {
	/// Builds a ledger and applies its genesis allocations.
	pub fn from_config(config: &toml::Value, token: &TokenConfig) -> Result<Self, LedgerError> {
		MemoryLedgerSchema
			.validate(config)
			.map_err(|e| LedgerError::Configuration(e.to_string()))?;

		let int = |name: &str| config.get(name).and_then(|v| v.as_integer());
		let chain_id = int("chain_id")
			.ok_or_else(|| LedgerError::Configuration("chain_id is required".to_string()))?
			as u64;
		let fee = int("fee_per_transaction")
			.map(|v| v as u64)
			.unwrap_or(DEFAULT_FEE_PER_TRANSACTION);

		let ledger = Self::new(chain_id, token, U256::from(fee));
		{
			let mut state = ledger
				.state
				.try_lock()
				.map_err(|e| LedgerError::Configuration(e.to_string()))?;
			state.pinned_time = int("genesis_timestamp").map(|v| v as u64);

			if let Some(allocations) = config.get("token_balances") {
				for (account, amount) in
					parse_allocations(allocations).map_err(LedgerError::Configuration)?
				{
					state.token.mint(account, amount).map_err(|e| {
						LedgerError::Configuration(format!("Cannot mint to {}: {}", account, e))
					})?;
				}
			}
			if let Some(allocations) = config.get("fee_balances") {
				for (account, amount) in
					parse_allocations(allocations).map_err(LedgerError::Configuration)?
				{
					*state.fee_balances.entry(account).or_default() += amount;
				}
			}
		}

		tracing::debug!(chain_id, fee = %ledger.fee_per_transaction, "Created memory ledger");
		Ok(ledger)
	}
}

/// Registry for the memory ledger implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = LedgerFactory;

	fn factory() -> Self::Factory {
		create_ledger
	}
}

impl LedgerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_signer::SignerSync;
	use alloy_signer_local::PrivateKeySigner;
	use permit_token::TokenError;
	use permit_types::{permit_digest, PermitRequest, PermitSignature};

	const OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const NOW: u64 = 1_700_000_000;
	const FEE: u64 = 1_000;

	fn token() -> TokenConfig {
		toml::from_str(
			r#"
name = "MyGaslessToken"
address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
"#,
		)
		.unwrap()
	}

	async fn ledger() -> (MemoryLedger, PrivateKeySigner, Address) {
		let ledger = MemoryLedger::new(1337, &token(), U256::from(FEE));
		let owner: PrivateKeySigner = OWNER_KEY.parse().unwrap();
		let relayer = Address::repeat_byte(0x22);
		ledger.mint(owner.address(), U256::from(100)).await.unwrap();
		ledger.fund(relayer, U256::from(10 * FEE)).await;
		ledger.set_time(NOW).await;
		(ledger, owner, relayer)
	}

	fn permit(chain_id: u64, owner: &PrivateKeySigner, spender: Address, value: u64) -> Operation {
		let request = PermitRequest {
			owner: owner.address(),
			spender,
			value: U256::from(value),
			nonce: U256::ZERO,
			deadline: U256::from(NOW + 3600),
		};
		let digest = permit_digest(&token().domain(chain_id), &request);
		let signature = PermitSignature::from_signature(&owner.sign_hash_sync(&digest).unwrap());
		Operation::permit(&request, signature)
	}

	#[tokio::test]
	async fn test_submit_charges_fee_payer() {
		let (ledger, owner, relayer) = ledger().await;

		let hash = ledger
			.submit(permit(1337, &owner, relayer, 100), &relayer)
			.await
			.unwrap();
		let receipt = ledger.wait_for_confirmation(&hash, 1).await.unwrap();

		assert!(receipt.success());
		assert_eq!(receipt.fee_paid, U256::from(FEE));
		assert_eq!(ledger.fee_balance(&relayer).await.unwrap(), U256::from(9 * FEE));
		assert_eq!(ledger.fee_balance(&owner.address()).await.unwrap(), U256::ZERO);
		assert_eq!(
			ledger.allowance(&owner.address(), &relayer).await.unwrap(),
			U256::from(100)
		);
	}

	#[tokio::test]
	async fn test_reverted_operation_still_pays_fee() {
		let (ledger, owner, relayer) = ledger().await;

		let hash = ledger
			.submit(permit(1, &owner, relayer, 100), &relayer)
			.await
			.unwrap();
		let receipt = ledger.get_receipt(&hash).await.unwrap();

		assert!(matches!(
			receipt.status,
			ExecutionStatus::Reverted(TokenError::BadSignature(_))
		));
		assert_eq!(ledger.fee_balance(&relayer).await.unwrap(), U256::from(9 * FEE));
		assert_eq!(ledger.nonce(&owner.address()).await.unwrap(), U256::ZERO);
	}

	#[tokio::test]
	async fn test_insufficient_fee_is_rejected_before_inclusion() {
		let (ledger, owner, _) = ledger().await;
		let broke = Address::repeat_byte(0x44);

		let result = ledger.submit(permit(1337, &owner, broke, 100), &broke).await;

		assert!(matches!(result, Err(LedgerError::InsufficientFee { .. })));
		assert_eq!(ledger.block_number().await, 0);
		assert_eq!(ledger.nonce(&owner.address()).await.unwrap(), U256::ZERO);
	}

	#[tokio::test]
	async fn test_unknown_receipt() {
		let (ledger, _, _) = ledger().await;
		let hash = TransactionHash(Default::default());
		assert!(matches!(
			ledger.get_receipt(&hash).await,
			Err(LedgerError::UnknownTransaction(_))
		));
	}

	#[tokio::test]
	async fn test_concurrent_permits_on_same_nonce() {
		let (ledger, owner, relayer) = ledger().await;
		let other_relayer = Address::repeat_byte(0x23);
		ledger.fund(other_relayer, U256::from(10 * FEE)).await;

		let first = permit(1337, &owner, relayer, 10);
		let second = permit(1337, &owner, other_relayer, 20);
		let (a, b) = tokio::join!(
			ledger.submit(first, &relayer),
			ledger.submit(second, &other_relayer)
		);

		let receipts = [
			ledger.get_receipt(&a.unwrap()).await.unwrap(),
			ledger.get_receipt(&b.unwrap()).await.unwrap(),
		];
		let successes = receipts.iter().filter(|r| r.success()).count();
		let mismatches = receipts
			.iter()
			.filter(|r| {
				matches!(
					r.status,
					ExecutionStatus::Reverted(TokenError::NonceMismatch { .. })
				)
			})
			.count();

		assert_eq!(successes, 1);
		assert_eq!(mismatches, 1);
		assert_eq!(ledger.nonce(&owner.address()).await.unwrap(), U256::from(1));
	}

	#[tokio::test]
	async fn test_advance_time_expires_permit() {
		let (ledger, owner, relayer) = ledger().await;
		ledger.advance_time(3601).await;
		assert_eq!(ledger.current_time().await.unwrap(), NOW + 3601);

		let hash = ledger
			.submit(permit(1337, &owner, relayer, 100), &relayer)
			.await
			.unwrap();
		assert!(matches!(
			ledger.get_receipt(&hash).await.unwrap().status,
			ExecutionStatus::Reverted(TokenError::ExpiredDeadline { .. })
		));
	}

	#[tokio::test]
	async fn test_create_from_config() {
		let config: toml::Value = toml::from_str(
			r#"
chain_id = 1337
fee_per_transaction = 500
genesis_timestamp = 1700000000

[token_balances]
"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266" = "100000000000000000000"

[fee_balances]
"0x70997970C51812dc3A010C7d01b50e0d17dc79C8" = 1000000
"#,
		)
		.unwrap();

		let ledger = create_ledger(&config, &token()).unwrap();
		let owner: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
		let relayer: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();

		assert_eq!(ledger.chain_id().await.unwrap(), 1337);
		assert_eq!(ledger.current_time().await.unwrap(), NOW);
		assert_eq!(ledger.token_name().await.unwrap(), "MyGaslessToken");
		assert_eq!(
			ledger.token_balance(&owner).await.unwrap(),
			U256::from(100u64) * U256::from(10u64).pow(U256::from(18))
		);
		assert_eq!(ledger.fee_balance(&relayer).await.unwrap(), U256::from(1_000_000));
	}

	#[test]
	fn test_schema_rejects_bad_allocations() {
		let config: toml::Value = toml::from_str(
			r#"
chain_id = 1337
[token_balances]
"not-an-address" = "1"
"#,
		)
		.unwrap();
		assert!(MemoryLedgerSchema.validate(&config).is_err());

		let config: toml::Value = toml::from_str("chain_id = 0").unwrap();
		assert!(MemoryLedgerSchema.validate(&config).is_err());
	}
}
