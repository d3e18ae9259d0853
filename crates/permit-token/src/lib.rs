//! Permit-capable token state machine.
//!
//! [`PermitToken`] owns the balances, allowances and per-owner nonces of a
//! single token deployment. It is the only place those maps are mutated,
//! and every mutation goes through [`PermitToken::authorize`] or
//! [`PermitToken::move_from`] (or [`PermitToken::apply`], which dispatches
//! a ledger [`Operation`] to one of them). Each call either applies all of
//! its effects or returns an error without touching state.

use permit_types::{
	deadline_expired,
	utils::{compute_domain_hash, compute_final_digest, compute_permit_hash},
	Address, DomainDescriptor, Operation, PermitRequest, PermitSignature, B256, U256,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors returned by token operations.
///
/// Every variant is terminal for the submission that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
	/// The permit deadline has passed (or is zero).
	#[error("Permit expired: deadline {deadline}, now {now}")]
	ExpiredDeadline { deadline: U256, now: u64 },
	/// The presented nonce is not the owner's current nonce.
	#[error("Nonce mismatch: expected {expected}, presented {presented}")]
	NonceMismatch { expected: U256, presented: U256 },
	/// The signature is malformed or was not produced by the owner over this domain.
	#[error("Bad signature: {0}")]
	BadSignature(String),
	/// The spender's allowance does not cover the amount.
	#[error("Insufficient allowance: {allowance} < {needed}")]
	InsufficientAllowance { allowance: U256, needed: U256 },
	/// The owner's balance does not cover the amount.
	#[error("Insufficient balance: {balance} < {needed}")]
	InsufficientBalance { balance: U256, needed: U256 },
	/// A transfer was submitted by someone other than the spender.
	#[error("Caller {caller} is not the spender {spender}")]
	CallerNotSpender { caller: Address, spender: Address },
	/// Tokens cannot be sent to the zero address.
	#[error("Invalid recipient: {0}")]
	InvalidRecipient(Address),
	/// Minting would overflow the total supply.
	#[error("Total supply overflow")]
	SupplyOverflow,
}

/// Balances, allowances and nonces of a single permit-capable token.
#[derive(Debug, Clone)]
pub struct PermitToken {
	domain: DomainDescriptor,
	domain_separator: B256,
	total_supply: U256,
	balances: HashMap<Address, U256>,
	allowances: HashMap<(Address, Address), U256>,
	nonces: HashMap<Address, U256>,
}

impl PermitToken {
	/// Creates an empty token verifying permits against `domain`.
	pub fn new(domain: DomainDescriptor) -> Self {
		let domain_separator = compute_domain_hash(&domain);
		Self {
			domain,
			domain_separator,
			total_supply: U256::ZERO,
			balances: HashMap::new(),
			allowances: HashMap::new(),
			nonces: HashMap::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.domain.name
	}

	pub fn domain(&self) -> &DomainDescriptor {
		&self.domain
	}

	/// The EIP-712 domain separator permits must be signed under.
	pub fn domain_separator(&self) -> B256 {
		self.domain_separator
	}

	pub fn total_supply(&self) -> U256 {
		self.total_supply
	}

	pub fn balance_of(&self, account: &Address) -> U256 {
		self.balances.get(account).copied().unwrap_or_default()
	}

	pub fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
		self.allowances
			.get(&(*owner, *spender))
			.copied()
			.unwrap_or_default()
	}

	/// The nonce the owner's next permit must be signed with.
	pub fn nonce(&self, owner: &Address) -> U256 {
		self.nonces.get(owner).copied().unwrap_or_default()
	}

	/// Creates `amount` new tokens in `account`'s balance.
	pub fn mint(&mut self, account: Address, amount: U256) -> Result<(), TokenError> {
		if account == Address::ZERO {
			return Err(TokenError::InvalidRecipient(account));
		}
		let total_supply = self
			.total_supply
			.checked_add(amount)
			.ok_or(TokenError::SupplyOverflow)?;

		self.total_supply = total_supply;
		*self.balances.entry(account).or_default() += amount;
		Ok(())
	}

	/// Consumes a signed permit, setting `allowance[owner][spender] = value`.
	///
	/// The signature is checked against a request rebuilt from the owner's
	/// current nonce, not the presented one, and the presented nonce must
	/// match it exactly. On success the nonce advances by one.
	#[allow(clippy::too_many_arguments)]
	pub fn authorize(
		&mut self,
		owner: Address,
		spender: Address,
		value: U256,
		presented_nonce: U256,
		deadline: U256,
		signature: &PermitSignature,
		now: u64,
	) -> Result<(), TokenError> {
		if deadline_expired(deadline, now) {
			return Err(TokenError::ExpiredDeadline { deadline, now });
		}

		let current_nonce = self.nonce(&owner);
		if presented_nonce != current_nonce {
			return Err(TokenError::NonceMismatch {
				expected: current_nonce,
				presented: presented_nonce,
			});
		}

		let request = PermitRequest {
			owner,
			spender,
			value,
			nonce: current_nonce,
			deadline,
		};
		let digest = compute_final_digest(&self.domain_separator, &compute_permit_hash(&request));
		let signer = signature
			.recover_signer(&digest)
			.map_err(|e| TokenError::BadSignature(e.to_string()))?;
		if signer != owner {
			return Err(TokenError::BadSignature(format!(
				"recovered {} but owner is {}",
				signer, owner
			)));
		}

		self.nonces.insert(owner, current_nonce + U256::from(1));
		self.allowances.insert((owner, spender), value);

		tracing::debug!(
			owner = %owner,
			spender = %spender,
			value = %value,
			nonce = %current_nonce,
			"Permit consumed"
		);
		Ok(())
	}

	/// Moves `amount` from `owner` to `recipient` using `spender`'s allowance.
	///
	/// An allowance of `U256::MAX` is treated as unlimited and is not decremented.
	pub fn move_from(
		&mut self,
		spender: Address,
		owner: Address,
		recipient: Address,
		amount: U256,
	) -> Result<(), TokenError> {
		if recipient == Address::ZERO {
			return Err(TokenError::InvalidRecipient(recipient));
		}

		let allowance = self.allowance(&owner, &spender);
		if allowance < amount {
			return Err(TokenError::InsufficientAllowance {
				allowance,
				needed: amount,
			});
		}

		let balance = self.balance_of(&owner);
		if balance < amount {
			return Err(TokenError::InsufficientBalance {
				balance,
				needed: amount,
			});
		}

		if allowance != U256::MAX {
			self.allowances.insert((owner, spender), allowance - amount);
		}
		self.balances.insert(owner, balance - amount);
		*self.balances.entry(recipient).or_default() += amount;

		tracing::debug!(
			spender = %spender,
			owner = %owner,
			recipient = %recipient,
			amount = %amount,
			"Transferred from owner"
		);
		Ok(())
	}

	/// Applies a ledger operation submitted by `caller` at time `now`.
	pub fn apply(
		&mut self,
		caller: Address,
		operation: &Operation,
		now: u64,
	) -> Result<(), TokenError> {
		match operation {
			Operation::Permit {
				owner,
				spender,
				value,
				nonce,
				deadline,
				signature,
			} => self.authorize(*owner, *spender, *value, *nonce, *deadline, signature, now),
			Operation::TransferFrom {
				spender,
				owner,
				recipient,
				amount,
			} => {
				if caller != *spender {
					return Err(TokenError::CallerNotSpender {
						caller,
						spender: *spender,
					});
				}
				self.move_from(*spender, *owner, *recipient, *amount)
			},
		}
	}
}
