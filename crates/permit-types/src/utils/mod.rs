//! Utility functions for encoding, formatting and time.

pub mod eip712;
pub mod formatting;
pub mod helpers;

pub use eip712::{
	compute_domain_hash, compute_final_digest, compute_permit_hash, permit_digest,
	permit_typed_data, Eip712AbiEncoder, DOMAIN_TYPE, PERMIT_PRIMARY_TYPE, PERMIT_TYPE,
};
pub use formatting::{format_token_amount, truncate_id};
pub use helpers::current_timestamp;
