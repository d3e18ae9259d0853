//! Relay orchestration for gasless permit transfers.
//!
//! The orchestrator coordinates a token owner's signer and the relayer's
//! ledger access to move tokens without the owner paying any fee:
//!
//! - A: read the owner's nonce and the token domain from the ledger
//! - B: build the permit request and have the owner sign it
//! - C: submit the permit, paid for by the relayer
//! - D: submit the transfer against the new allowance, paid for by the relayer
//!
//! Step D is only attempted after C is confirmed. If D fails the allowance
//! remains in place and [`RelayOrchestrator::retry_transfer`] completes the flow.

use permit_account::{AccountError, AccountService};
use permit_ledger::{LedgerError, LedgerService, TransactionReceipt};
use permit_token::TokenError;
use permit_types::{
	deadline_expired, permit_typed_data, truncate_id, Address, DomainDescriptor, Operation,
	PermitRequest, PermitSignature, TokenConfig, TransactionHash, U256,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

pub mod builder;
pub mod recovery;

pub use builder::{BuilderError, Relay, RelayBuilder, RelayFactories};
pub use recovery::Recovery;

/// Steps of a gasless transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	/// Reading nonce, domain and balances from the ledger.
	Prepare,
	/// Obtaining the owner's signature.
	Sign,
	/// Submitting the signed permit.
	Permit,
	/// Submitting the transfer against the allowance.
	Transfer,
}

impl fmt::Display for Step {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Step::Prepare => "prepare",
			Step::Sign => "sign",
			Step::Permit => "permit",
			Step::Transfer => "transfer",
		};
		f.write_str(name)
	}
}

/// Errors that can occur while relaying a gasless transfer.
#[derive(Debug, Error)]
pub enum RelayError {
	/// A ledger read or submission failed during `step`.
	#[error("{step} step failed: {source}")]
	Ledger {
		step: Step,
		#[source]
		source: LedgerError,
	},
	/// The permit was delivered but its outcome could not be confirmed.
	///
	/// `consumed` is true when the owner's nonce was seen to move past the
	/// permit's nonce afterwards, meaning the allowance is in place.
	#[error("Permit {hash} unconfirmed (consumed: {consumed}): {source}")]
	PermitUnconfirmed {
		hash: TransactionHash,
		consumed: bool,
		#[source]
		source: LedgerError,
	},
	/// The owner's signer refused or failed to sign.
	#[error("Signing failed: {0}")]
	Signing(#[from] AccountError),
	/// An operation was discarded without being submitted.
	#[error("Discarded before submission: {0}")]
	Discarded(TokenError),
	/// The requested transfer cannot be relayed as given.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
}

impl RelayError {
	fn ledger(step: Step) -> impl FnOnce(LedgerError) -> Self {
		move |source| RelayError::Ledger { step, source }
	}

	/// Step during which the error occurred.
	pub fn step(&self) -> Step {
		match self {
			RelayError::Ledger { step, .. } => *step,
			RelayError::PermitUnconfirmed { .. } => Step::Permit,
			RelayError::Signing(_) => Step::Sign,
			RelayError::Discarded(TokenError::InsufficientAllowance { .. }) => Step::Transfer,
			RelayError::Discarded(_) => Step::Permit,
			RelayError::InvalidRequest(_) => Step::Prepare,
		}
	}

	/// Token-level reason, if the ledger rejected an operation.
	pub fn token_error(&self) -> Option<&TokenError> {
		match self {
			RelayError::Ledger {
				source: LedgerError::Reverted { reason, .. },
				..
			} => Some(reason),
			RelayError::Discarded(reason) => Some(reason),
			_ => None,
		}
	}
}

/// A permit request together with the domain it is signed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPermit {
	pub domain: DomainDescriptor,
	pub request: PermitRequest,
}

/// Outcome of a completed gasless transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaslessTransfer {
	pub owner: Address,
	pub spender: Address,
	pub recipient: Address,
	pub amount: U256,
	/// Nonce consumed by the permit.
	pub nonce: U256,
	pub permit_tx: TransactionHash,
	pub transfer_tx: TransactionHash,
	/// Total fee paid by the relayer for both transactions.
	pub fee_paid: U256,
}

/// Coordinates gasless transfers for one token on one ledger.
pub struct RelayOrchestrator {
	/// Ledger access paying fees from the relayer's account.
	ledger: Arc<LedgerService>,
	/// Token the relay operates on.
	token: TokenConfig,
	/// Signature validity window in seconds.
	deadline_seconds: u64,
}

impl RelayOrchestrator {
	/// Creates a new orchestrator.
	pub fn new(ledger: Arc<LedgerService>, token: TokenConfig, deadline_seconds: u64) -> Self {
		Self {
			ledger,
			token,
			deadline_seconds,
		}
	}

	/// Ledger service used for reads and submissions.
	pub fn ledger(&self) -> &Arc<LedgerService> {
		&self.ledger
	}

	/// Token this orchestrator relays for.
	pub fn token(&self) -> &TokenConfig {
		&self.token
	}

	/// Reads the signing domain from the ledger.
	///
	/// Name, chain id and verifying contract come from the ledger; the
	/// version comes from configuration.
	pub async fn domain(&self) -> Result<DomainDescriptor, RelayError> {
		let fail = RelayError::ledger;
		let name = self.ledger.token_name().await.map_err(fail(Step::Prepare))?;
		let chain_id = self.ledger.chain_id().await.map_err(fail(Step::Prepare))?;
		let verifying_contract = self
			.ledger
			.token_address()
			.await
			.map_err(fail(Step::Prepare))?;
		Ok(DomainDescriptor::new(
			name,
			self.token.version.clone(),
			chain_id,
			verifying_contract,
		))
	}

	/// Builds a permit for the relayer to spend `value` of `owner`'s tokens.
	///
	/// Uses the owner's current nonce and a deadline of the ledger time plus
	/// the configured validity window.
	pub async fn prepare_permit(
		&self,
		owner: Address,
		value: U256,
	) -> Result<PreparedPermit, RelayError> {
		let fail = RelayError::ledger;
		let spender = self
			.ledger
			.relayer_address()
			.await
			.map_err(fail(Step::Prepare))?;
		if spender == owner {
			return Err(RelayError::InvalidRequest(
				"owner cannot relay its own transfer".to_string(),
			));
		}

		let domain = self.domain().await?;
		let nonce = self.ledger.nonce(&owner).await.map_err(fail(Step::Prepare))?;
		let now = self
			.ledger
			.current_time()
			.await
			.map_err(fail(Step::Prepare))?;

		let request = PermitRequest {
			owner,
			spender,
			value,
			nonce,
			deadline: U256::from(now.saturating_add(self.deadline_seconds)),
		};
		tracing::debug!(
			owner = %owner,
			spender = %spender,
			value = %value,
			nonce = %nonce,
			deadline = %request.deadline,
			"Prepared permit"
		);
		Ok(PreparedPermit { domain, request })
	}

	/// Asks the owner's signer to sign a prepared permit.
	pub async fn request_signature(
		&self,
		signer: &AccountService,
		permit: &PreparedPermit,
	) -> Result<PermitSignature, RelayError> {
		tracing::debug!(
			typed_data = %permit_typed_data(&permit.domain, &permit.request),
			"Requesting owner signature"
		);
		Ok(signer.sign_permit(&permit.domain, &permit.request).await?)
	}

	/// Submits a signed permit and waits for it to be confirmed.
	///
	/// A permit whose deadline has already passed on the ledger is discarded
	/// without being submitted.
	#[instrument(skip_all, fields(owner = %request.owner, nonce = %request.nonce))]
	pub async fn submit_permit(
		&self,
		request: &PermitRequest,
		signature: PermitSignature,
	) -> Result<TransactionReceipt, RelayError> {
		let fail = RelayError::ledger;
		let now = self.ledger.current_time().await.map_err(fail(Step::Permit))?;
		if deadline_expired(request.deadline, now) {
			tracing::warn!(deadline = %request.deadline, now, "Discarding expired permit");
			return Err(RelayError::Discarded(TokenError::ExpiredDeadline {
				deadline: request.deadline,
				now,
			}));
		}

		let hash = self
			.ledger
			.deliver(Operation::permit(request, signature))
			.await
			.map_err(fail(Step::Permit))?;
		let receipt = match self.ledger.confirm(&hash).await {
			Ok(receipt) => receipt,
			Err(source @ LedgerError::Reverted { .. }) => {
				return Err(RelayError::Ledger {
					step: Step::Permit,
					source,
				});
			},
			Err(source) => {
				// Delivered but unconfirmed: the nonce shows whether it landed.
				let consumed = self
					.ledger
					.nonce(&request.owner)
					.await
					.is_ok_and(|nonce| nonce > request.nonce);
				tracing::warn!(
					tx_hash = %hash,
					consumed,
					error = %source,
					"Permit delivered but not confirmed"
				);
				return Err(RelayError::PermitUnconfirmed {
					hash,
					consumed,
					source,
				});
			},
		};
		tracing::info!(
			tx_hash = %truncate_id(&receipt.hash.to_string()),
			spender = %request.spender,
			value = %request.value,
			"Permit confirmed"
		);
		Ok(receipt)
	}

	/// Moves `amount` of `owner`'s tokens to `recipient` using the relayer's
	/// allowance, and waits for confirmation.
	#[instrument(skip_all, fields(owner = %owner, recipient = %recipient))]
	pub async fn submit_transfer(
		&self,
		owner: Address,
		recipient: Address,
		amount: U256,
	) -> Result<TransactionReceipt, RelayError> {
		let fail = RelayError::ledger;
		let spender = self
			.ledger
			.relayer_address()
			.await
			.map_err(fail(Step::Transfer))?;
		let receipt = self
			.ledger
			.submit_and_confirm(Operation::TransferFrom {
				spender,
				owner,
				recipient,
				amount,
			})
			.await
			.map_err(fail(Step::Transfer))?;
		tracing::info!(
			tx_hash = %truncate_id(&receipt.hash.to_string()),
			amount = %amount,
			"Transfer confirmed"
		);
		Ok(receipt)
	}

	/// Retries the transfer of a flow whose permit already succeeded.
	///
	/// No new signature is needed while the allowance covers `amount`. When
	/// it no longer does, nothing is submitted and the owner must sign a
	/// fresh permit.
	pub async fn retry_transfer(
		&self,
		owner: Address,
		recipient: Address,
		amount: U256,
	) -> Result<TransactionReceipt, RelayError> {
		let spender = self
			.ledger
			.relayer_address()
			.await
			.map_err(RelayError::ledger(Step::Transfer))?;
		let allowance = self
			.ledger
			.allowance(&owner, &spender)
			.await
			.map_err(RelayError::ledger(Step::Transfer))?;
		if allowance != U256::MAX && allowance < amount {
			tracing::warn!(
				owner = %owner,
				allowance = %allowance,
				amount = %amount,
				"Allowance no longer covers the transfer"
			);
			return Err(RelayError::Discarded(TokenError::InsufficientAllowance {
				allowance,
				needed: amount,
			}));
		}
		tracing::info!(owner = %owner, allowance = %allowance, "Retrying transfer");
		self.submit_transfer(owner, recipient, amount).await
	}

	/// Runs the whole gasless flow for `amount` tokens.
	///
	/// The owner only signs; every fee is paid by the relayer.
	pub async fn gasless_transfer(
		&self,
		owner_signer: &AccountService,
		recipient: Address,
		amount: U256,
	) -> Result<GaslessTransfer, RelayError> {
		let owner = owner_signer.get_address().await?;
		let permit = self.prepare_permit(owner, amount).await?;
		self.execute(owner_signer, permit, recipient, amount).await
	}

	/// Runs the gasless flow for the owner's entire token balance.
	pub async fn permit_full_balance(
		&self,
		owner_signer: &AccountService,
		recipient: Address,
	) -> Result<GaslessTransfer, RelayError> {
		let owner = owner_signer.get_address().await?;
		let balance = self
			.ledger
			.token_balance(&owner)
			.await
			.map_err(RelayError::ledger(Step::Prepare))?;
		if balance.is_zero() {
			return Err(RelayError::InvalidRequest(format!(
				"{} has no tokens to transfer",
				owner
			)));
		}
		let permit = self.prepare_permit(owner, balance).await?;
		self.execute(owner_signer, permit, recipient, balance).await
	}

	async fn execute(
		&self,
		owner_signer: &AccountService,
		permit: PreparedPermit,
		recipient: Address,
		amount: U256,
	) -> Result<GaslessTransfer, RelayError> {
		if recipient == Address::ZERO {
			return Err(RelayError::InvalidRequest(
				"recipient cannot be the zero address".to_string(),
			));
		}

		let signature = self.request_signature(owner_signer, &permit).await?;
		let request = permit.request;
		let permit_receipt = self.submit_permit(&request, signature).await?;

		let transfer_receipt = self
			.submit_transfer(request.owner, recipient, amount)
			.await
			.inspect_err(|e| {
				tracing::warn!(
					permit_tx = %permit_receipt.hash,
					error = %e,
					"Transfer failed after permit; allowance remains for a retry"
				);
			})?;

		Ok(GaslessTransfer {
			owner: request.owner,
			spender: request.spender,
			recipient,
			amount,
			nonce: request.nonce,
			permit_tx: permit_receipt.hash,
			transfer_tx: transfer_receipt.hash,
			fee_paid: permit_receipt.fee_paid + transfer_receipt.fee_paid,
		})
	}
}
