//! Local private key account implementation.
//!
//! Holds a secp256k1 key in memory and signs permits with it. Suitable for
//! development networks and tests where the key comes from configuration.

use crate::{AccountError, AccountFactory, AccountInterface, AccountRegistry};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use permit_types::{
	permit_digest, Address, ConfigSchema, DomainDescriptor, Field, FieldType,
	ImplementationRegistry, PermitRequest, PermitSignature, Schema, SecretString,
	ValidationError,
};

/// Account backed by a private key held in process memory.
pub struct LocalAccount {
	signer: PrivateKeySigner,
}

impl LocalAccount {
	/// Creates a local account from a hex-encoded private key.
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key
			.with_exposed(|key| key.trim().parse::<PrivateKeySigner>())
			.map_err(|e| AccountError::InvalidKey(e.to_string()))?;
		Ok(Self { signer })
	}
}

#[async_trait]
impl AccountInterface for LocalAccount {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalAccountSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_permit(
		&self,
		domain: &DomainDescriptor,
		request: &PermitRequest,
	) -> Result<PermitSignature, AccountError> {
		let account = self.signer.address();
		if request.owner != account {
			return Err(AccountError::NotOwner {
				account,
				owner: request.owner,
			});
		}

		let digest = permit_digest(domain, request);
		let signature = self
			.signer
			.sign_hash(&digest)
			.await
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		Ok(PermitSignature::from_signature(&signature))
	}
}

/// Configuration schema for LocalAccount.
pub struct LocalAccountSchema;

impl ConfigSchema for LocalAccountSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("private_key", FieldType::String).with_validator(|value| {
					let key = value.as_str().unwrap_or_default().trim();
					let hex = key.strip_prefix("0x").unwrap_or(key);
					if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
						return Err("private_key must be 32 bytes of hex".to_string());
					}
					Ok(())
				}),
			],
			vec![],
		);
		schema.validate(config)
	}
}

/// Factory function to create a local account from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded secp256k1 private key
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalAccountSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalAccount::new(&private_key)?))
}

/// Registry for the local account implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::AccountService;
	use permit_types::{B256, U256};

	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn config(key: &str) -> toml::Value {
		toml::from_str(&format!("private_key = \"{}\"", key)).unwrap()
	}

	fn domain() -> DomainDescriptor {
		DomainDescriptor::new("MyGaslessToken", "1", 1337, Address::repeat_byte(0xaa))
	}

	#[tokio::test]
	async fn test_address_from_config() {
		let account = create_account(&config(KEY)).unwrap();
		assert_eq!(
			account.address().await.unwrap(),
			"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
				.parse::<Address>()
				.unwrap()
		);
	}

	#[tokio::test]
	async fn test_signature_recovers_to_owner() {
		let service = AccountService::new(create_account(&config(KEY)).unwrap());
		let owner = service.get_address().await.unwrap();
		let request = PermitRequest {
			owner,
			spender: Address::repeat_byte(0x22),
			value: U256::from(100),
			nonce: U256::ZERO,
			deadline: U256::from(1_700_003_600u64),
		};

		let signature = service.sign_permit(&domain(), &request).await.unwrap();
		let digest: B256 = permit_digest(&domain(), &request);
		assert_eq!(signature.recover_signer(&digest).unwrap(), owner);
	}

	#[tokio::test]
	async fn test_refuses_foreign_owner() {
		let account = create_account(&config(KEY)).unwrap();
		let request = PermitRequest {
			owner: Address::repeat_byte(0x11),
			spender: Address::repeat_byte(0x22),
			value: U256::from(1),
			nonce: U256::ZERO,
			deadline: U256::from(1u64),
		};

		assert!(matches!(
			account.sign_permit(&domain(), &request).await,
			Err(AccountError::NotOwner { .. })
		));
	}

	#[test]
	fn test_rejects_invalid_key() {
		assert!(matches!(
			create_account(&config("0x1234")),
			Err(AccountError::InvalidKey(_))
		));
		assert!(LocalAccountSchema.validate(&config(KEY)).is_ok());
	}

	#[test]
	fn test_registry_name() {
		let names: Vec<_> = crate::get_all_implementations()
			.into_iter()
			.map(|(name, _)| name)
			.collect();
		assert_eq!(names, vec!["local"]);
	}
}
