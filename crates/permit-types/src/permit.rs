//! Permit value types.
//!
//! A permit is the owner's signed grant of allowance to a spender. The
//! [`DomainDescriptor`] binds the grant to one token deployment on one chain,
//! the [`PermitRequest`] carries the grant itself, and [`PermitSignature`]
//! holds the recoverable secp256k1 signature over the two.

use alloy_primitives::{uint, Address, Signature, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound (inclusive) for the `s` component of a canonical signature.
///
/// Signatures with `s` above half the secp256k1 group order are malleable
/// copies of a valid signature and are rejected.
pub const SECP256K1N_HALF: U256 =
	uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Errors raised while interpreting raw signature components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
	/// The recovery id is neither 27/28 nor 0/1.
	#[error("Invalid recovery id: {0}")]
	InvalidV(u8),
	/// `r` or `s` is zero.
	#[error("Signature component is zero")]
	ZeroComponent,
	/// `s` is in the upper half of the curve order.
	#[error("Signature s value is not canonical")]
	NonCanonicalS,
	/// Public key recovery failed.
	#[error("Recovery failed: {0}")]
	Recovery(String),
}

/// EIP-712 domain of a permit-capable token.
///
/// Every field takes part in the domain separator, so a signature produced
/// for one deployment or chain cannot be replayed against another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDescriptor {
	/// Token name as reported by the token contract.
	pub name: String,
	/// Signing domain version.
	pub version: String,
	/// Chain the token is deployed on.
	pub chain_id: u64,
	/// Address of the token contract that verifies permits.
	pub verifying_contract: Address,
}

impl DomainDescriptor {
	/// Creates a new domain descriptor.
	pub fn new(
		name: impl Into<String>,
		version: impl Into<String>,
		chain_id: u64,
		verifying_contract: Address,
	) -> Self {
		Self {
			name: name.into(),
			version: version.into(),
			chain_id,
			verifying_contract,
		}
	}
}

/// The message an owner signs to grant `value` allowance to `spender`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitRequest {
	/// Account whose tokens are being authorized.
	pub owner: Address,
	/// Account that may move the tokens.
	pub spender: Address,
	/// Allowance to set, in token base units.
	pub value: U256,
	/// Owner's nonce the signature is bound to.
	pub nonce: U256,
	/// Last timestamp (inclusive, in seconds) at which the permit is valid.
	pub deadline: U256,
}

impl PermitRequest {
	/// Returns true if this request can no longer be consumed at `now`.
	pub fn is_expired_at(&self, now: u64) -> bool {
		deadline_expired(self.deadline, now)
	}
}

/// Expiry rule shared by the verifier and the relay.
///
/// A deadline equal to `now` is still valid. A zero deadline is always
/// expired and never means "no expiry".
pub fn deadline_expired(deadline: U256, now: u64) -> bool {
	deadline.is_zero() || deadline < U256::from(now)
}

/// Recoverable signature over a permit digest, split into `(v, r, s)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitSignature {
	/// Recovery id, 27 or 28.
	pub v: u8,
	/// `r` component.
	pub r: B256,
	/// `s` component.
	pub s: B256,
}

impl PermitSignature {
	/// Creates a signature from raw components without validating them.
	pub fn new(v: u8, r: B256, s: B256) -> Self {
		Self { v, r, s }
	}

	/// Splits an alloy signature into the `(v, r, s)` form submitted on-chain.
	pub fn from_signature(signature: &Signature) -> Self {
		Self {
			v: 27 + u8::from(signature.v()),
			r: B256::from(signature.r().to_be_bytes::<32>()),
			s: B256::from(signature.s().to_be_bytes::<32>()),
		}
	}

	/// Rebuilds an alloy signature, rejecting malformed or malleable components.
	pub fn to_signature(&self) -> Result<Signature, SignatureError> {
		let parity = match self.v {
			27 | 0 => false,
			28 | 1 => true,
			other => return Err(SignatureError::InvalidV(other)),
		};
		let r = U256::from_be_bytes(self.r.0);
		let s = U256::from_be_bytes(self.s.0);
		if r.is_zero() || s.is_zero() {
			return Err(SignatureError::ZeroComponent);
		}
		if s > SECP256K1N_HALF {
			return Err(SignatureError::NonCanonicalS);
		}
		Ok(Signature::new(r, s, parity))
	}

	/// Recovers the address that produced this signature over `digest`.
	pub fn recover_signer(&self, digest: &B256) -> Result<Address, SignatureError> {
		self.to_signature()?
			.recover_address_from_prehash(digest)
			.map_err(|e| SignatureError::Recovery(e.to_string()))
	}
}
