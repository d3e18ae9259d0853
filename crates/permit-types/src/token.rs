//! Token deployment settings.

use crate::DomainDescriptor;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Describes the permit-capable token the relay operates on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenConfig {
	/// Token name, also the EIP-712 domain name.
	pub name: String,
	/// EIP-712 domain version.
	#[serde(default = "default_version")]
	pub version: String,
	/// Token contract address, the permit verifying contract.
	pub address: Address,
	/// Decimal places used when logging amounts.
	#[serde(default = "default_decimals")]
	pub decimals: u8,
}

fn default_version() -> String {
	"1".to_string()
}

fn default_decimals() -> u8 {
	18
}

impl TokenConfig {
	/// The signing domain of this token on `chain_id`.
	pub fn domain(&self, chain_id: u64) -> DomainDescriptor {
		DomainDescriptor::new(
			self.name.clone(),
			self.version.clone(),
			chain_id,
			self.address,
		)
	}
}
