//! Common types module for the gasless permit relay.
//!
//! This module defines the value types shared by the token state machine,
//! the signer, the ledger and the relay orchestrator. Keeping them in one
//! crate guarantees that the signer and the verifier agree on the exact
//! shape of every field that ends up in a signed message.

/// Ledger operation and transaction identifier types.
pub mod ledger;
/// Permit domain, request and signature types.
pub mod permit;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Secret string wrapper for private key material.
pub mod secret_string;
/// Token deployment settings.
pub mod token;
/// Utility functions, including the EIP-712 encoder.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use alloy_primitives::{Address, B256, U256};
pub use ledger::*;
pub use permit::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use token::TokenConfig;
pub use utils::{
	current_timestamp, format_token_amount, permit_digest, permit_typed_data, truncate_id,
};
pub use validation::*;
