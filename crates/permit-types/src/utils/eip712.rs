//! EIP-712 encoding of permits.
//!
//! These helpers provide:
//! - Domain separator computation
//! - Permit struct hash computation
//! - Final digest computation (0x1901 || domainSeparator || structHash)
//! - A minimal ABI encoder for the static field types used by permits
//!
//! The type strings below are protocol version "1". Adding, removing or
//! reordering a field changes every digest and therefore requires a new
//! domain version.

use crate::{DomainDescriptor, PermitRequest};
use alloy_primitives::{keccak256, Address, B256, U256};
use serde_json::json;

pub const DOMAIN_TYPE: &str =
	"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const PERMIT_TYPE: &str =
	"Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";
pub const PERMIT_PRIMARY_TYPE: &str = "Permit";

/// Compute the EIP-712 domain separator
/// (keccak256(abi.encode(typeHash, nameHash, versionHash, chainId, verifyingContract))).
pub fn compute_domain_hash(domain: &DomainDescriptor) -> B256 {
	let mut enc = Eip712AbiEncoder::new();
	enc.push_b256(&keccak256(DOMAIN_TYPE.as_bytes()));
	enc.push_b256(&keccak256(domain.name.as_bytes()));
	enc.push_b256(&keccak256(domain.version.as_bytes()));
	enc.push_u256(U256::from(domain.chain_id));
	enc.push_address(&domain.verifying_contract);
	keccak256(enc.finish())
}

/// Compute the permit struct hash.
pub fn compute_permit_hash(request: &PermitRequest) -> B256 {
	let mut enc = Eip712AbiEncoder::new();
	enc.push_b256(&keccak256(PERMIT_TYPE.as_bytes()));
	enc.push_address(&request.owner);
	enc.push_address(&request.spender);
	enc.push_u256(request.value);
	enc.push_u256(request.nonce);
	enc.push_u256(request.deadline);
	keccak256(enc.finish())
}

/// Compute the final EIP-712 digest: keccak256(0x1901 || domainHash || structHash).
pub fn compute_final_digest(domain_hash: &B256, struct_hash: &B256) -> B256 {
	let mut out = Vec::with_capacity(2 + 32 + 32);
	out.push(0x19);
	out.push(0x01);
	out.extend_from_slice(domain_hash.as_slice());
	out.extend_from_slice(struct_hash.as_slice());
	keccak256(out)
}

/// The digest a permit signer signs and a permit verifier recovers from.
pub fn permit_digest(domain: &DomainDescriptor, request: &PermitRequest) -> B256 {
	compute_final_digest(&compute_domain_hash(domain), &compute_permit_hash(request))
}

/// Renders the permit as `eth_signTypedData_v4` JSON together with its digest.
pub fn permit_typed_data(domain: &DomainDescriptor, request: &PermitRequest) -> serde_json::Value {
	json!({
		"digest": permit_digest(domain, request),
		"types": {
			"EIP712Domain": [
				{ "name": "name", "type": "string" },
				{ "name": "version", "type": "string" },
				{ "name": "chainId", "type": "uint256" },
				{ "name": "verifyingContract", "type": "address" },
			],
			"Permit": [
				{ "name": "owner", "type": "address" },
				{ "name": "spender", "type": "address" },
				{ "name": "value", "type": "uint256" },
				{ "name": "nonce", "type": "uint256" },
				{ "name": "deadline", "type": "uint256" },
			],
		},
		"primaryType": PERMIT_PRIMARY_TYPE,
		"domain": {
			"name": domain.name,
			"version": domain.version,
			"chainId": domain.chain_id,
			"verifyingContract": format!("{:#x}", domain.verifying_contract),
		},
		"message": {
			"owner": format!("{:#x}", request.owner),
			"spender": format!("{:#x}", request.spender),
			"value": request.value.to_string(),
			"nonce": request.nonce.to_string(),
			"deadline": request.deadline.to_string(),
		},
	})
}

/// Minimal ABI encoder for static types used in EIP-712 struct hashing.
pub struct Eip712AbiEncoder {
	buf: Vec<u8>,
}

impl Default for Eip712AbiEncoder {
	fn default() -> Self {
		Self::new()
	}
}

impl Eip712AbiEncoder {
	pub fn new() -> Self {
		Self { buf: Vec::new() }
	}

	pub fn push_b256(&mut self, v: &B256) {
		self.buf.extend_from_slice(v.as_slice());
	}

	pub fn push_address(&mut self, addr: &Address) {
		let mut word = [0u8; 32];
		word[12..].copy_from_slice(addr.as_slice());
		self.buf.extend_from_slice(&word);
	}

	pub fn push_u256(&mut self, v: U256) {
		let word: [u8; 32] = v.to_be_bytes::<32>();
		self.buf.extend_from_slice(&word);
	}

	pub fn finish(self) -> Vec<u8> {
		self.buf
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;
	use alloy_sol_types::{sol, Eip712Domain, SolStruct};

	sol! {
		struct Permit {
			address owner;
			address spender;
			uint256 value;
			uint256 nonce;
			uint256 deadline;
		}
	}

	fn domain() -> DomainDescriptor {
		DomainDescriptor::new(
			"MyGaslessToken",
			"1",
			1337,
			address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
		)
	}

	fn request() -> PermitRequest {
		PermitRequest {
			owner: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
			spender: address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
			value: U256::from(10u64).pow(U256::from(19)),
			nonce: U256::ZERO,
			deadline: U256::from(1_700_003_600u64),
		}
	}

	#[test]
	fn test_digest_matches_sol_types() {
		let domain = domain();
		let request = request();

		let sol_domain = Eip712Domain::new(
			Some(domain.name.clone().into()),
			Some(domain.version.clone().into()),
			Some(U256::from(domain.chain_id)),
			Some(domain.verifying_contract),
			None,
		);
		let sol_permit = Permit {
			owner: request.owner,
			spender: request.spender,
			value: request.value,
			nonce: request.nonce,
			deadline: request.deadline,
		};

		assert_eq!(compute_domain_hash(&domain), sol_domain.separator());
		assert_eq!(compute_permit_hash(&request), sol_permit.eip712_hash_struct());
		assert_eq!(
			permit_digest(&domain, &request),
			sol_permit.eip712_signing_hash(&sol_domain)
		);
	}

	#[test]
	fn test_digest_is_deterministic() {
		assert_eq!(
			permit_digest(&domain(), &request()),
			permit_digest(&domain(), &request())
		);
	}

	#[test]
	fn test_every_domain_field_is_bound() {
		let base = permit_digest(&domain(), &request());

		let mut other = domain();
		other.chain_id = 1;
		assert_ne!(permit_digest(&other, &request()), base);

		let mut other = domain();
		other.verifying_contract = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
		assert_ne!(permit_digest(&other, &request()), base);

		let mut other = domain();
		other.version = "2".to_string();
		assert_ne!(permit_digest(&other, &request()), base);

		let mut other = domain();
		other.name = "OtherToken".to_string();
		assert_ne!(permit_digest(&other, &request()), base);
	}

	#[test]
	fn test_nonce_is_bound() {
		let mut next = request();
		next.nonce = U256::from(1);
		assert_ne!(
			permit_digest(&domain(), &request()),
			permit_digest(&domain(), &next)
		);
	}

	#[test]
	fn test_typed_data_json() {
		let json = permit_typed_data(&domain(), &request());
		assert_eq!(json["primaryType"], "Permit");
		assert_eq!(json["domain"]["chainId"], 1337);
		assert_eq!(json["message"]["value"], "10000000000000000000");
		assert_eq!(
			json["message"]["owner"],
			"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);
		assert_eq!(json["types"]["Permit"].as_array().unwrap().len(), 5);
	}
}
