//! Ledger operation types.
//!
//! This module defines what the relay submits to the ledger and how
//! submitted transactions are identified.

use crate::{utils::Eip712AbiEncoder, PermitRequest, PermitSignature};
use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash identifying a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A state transition submitted to the token on the ledger.
///
/// The account paying the fee for an operation is also its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
	/// Consume a signed permit and set the owner's allowance for the spender.
	Permit {
		owner: Address,
		spender: Address,
		value: U256,
		/// Nonce the caller believes is current for the owner.
		nonce: U256,
		deadline: U256,
		signature: PermitSignature,
	},
	/// Move tokens out of the owner's balance using the caller's allowance.
	TransferFrom {
		spender: Address,
		owner: Address,
		recipient: Address,
		amount: U256,
	},
}

impl Operation {
	/// Builds a permit operation from a signed request.
	pub fn permit(request: &PermitRequest, signature: PermitSignature) -> Self {
		Operation::Permit {
			owner: request.owner,
			spender: request.spender,
			value: request.value,
			nonce: request.nonce,
			deadline: request.deadline,
			signature,
		}
	}

	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Operation::Permit { .. } => "permit",
			Operation::TransferFrom { .. } => "transfer_from",
		}
	}

	/// The token owner whose state this operation touches.
	pub fn owner(&self) -> Address {
		match self {
			Operation::Permit { owner, .. } | Operation::TransferFrom { owner, .. } => *owner,
		}
	}

	/// Deterministic transaction hash for this operation sent by `sender` at `sequence`.
	pub fn transaction_hash(&self, sender: &Address, sequence: u64) -> TransactionHash {
		let mut enc = Eip712AbiEncoder::new();
		enc.push_b256(&keccak256(self.kind().as_bytes()));
		match self {
			Operation::Permit {
				owner,
				spender,
				value,
				nonce,
				deadline,
				signature,
			} => {
				enc.push_address(owner);
				enc.push_address(spender);
				enc.push_u256(*value);
				enc.push_u256(*nonce);
				enc.push_u256(*deadline);
				enc.push_u256(U256::from(signature.v));
				enc.push_b256(&signature.r);
				enc.push_b256(&signature.s);
			},
			Operation::TransferFrom {
				spender,
				owner,
				recipient,
				amount,
			} => {
				enc.push_address(spender);
				enc.push_address(owner);
				enc.push_address(recipient);
				enc.push_u256(*amount);
			},
		}
		enc.push_address(sender);
		enc.push_u256(U256::from(sequence));
		TransactionHash(keccak256(enc.finish()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn transfer() -> Operation {
		Operation::TransferFrom {
			spender: Address::repeat_byte(2),
			owner: Address::repeat_byte(1),
			recipient: Address::repeat_byte(3),
			amount: U256::from(30),
		}
	}

	#[test]
	fn test_transaction_hash_depends_on_sequence() {
		let op = transfer();
		let sender = Address::repeat_byte(2);
		assert_eq!(
			op.transaction_hash(&sender, 0),
			op.transaction_hash(&sender, 0)
		);
		assert_ne!(
			op.transaction_hash(&sender, 0),
			op.transaction_hash(&sender, 1)
		);
	}

	#[test]
	fn test_transaction_hash_covers_fields() {
		let sender = Address::repeat_byte(2);
		let other = Operation::TransferFrom {
			spender: Address::repeat_byte(2),
			owner: Address::repeat_byte(1),
			recipient: Address::repeat_byte(3),
			amount: U256::from(31),
		};
		assert_ne!(
			transfer().transaction_hash(&sender, 0),
			other.transaction_hash(&sender, 0)
		);
		assert_ne!(
			transfer().transaction_hash(&sender, 0),
			transfer().transaction_hash(&Address::repeat_byte(9), 0)
		);

		let permit = |v: u8| Operation::Permit {
			owner: Address::repeat_byte(1),
			spender: Address::repeat_byte(2),
			value: U256::from(30),
			nonce: U256::ZERO,
			deadline: U256::from(1),
			signature: PermitSignature::new(v, B256::repeat_byte(1), B256::repeat_byte(2)),
		};
		assert_ne!(
			permit(27).transaction_hash(&sender, 0),
			permit(28).transaction_hash(&sender, 0)
		);
	}

	#[test]
	fn test_operation_serialization() {
		let json = serde_json::to_value(transfer()).unwrap();
		assert_eq!(json["type"], "transfer_from");
		assert_eq!(transfer().kind(), "transfer_from");
		assert_eq!(transfer().owner(), Address::repeat_byte(1));
	}
}
