//! Recovery guidance for failed gasless transfers.
//!
//! A failed flow leaves the ledger in one of two places: the permit was never
//! consumed, or it was consumed and only the transfer is missing. Each
//! [`RelayError`] maps to the action that completes the flow from there.

use crate::{RelayError, Step};
use permit_ledger::LedgerError;
use permit_token::TokenError;

/// What a caller should do after a failed gasless transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
	/// The permit was not consumed. Read the current nonce, have the owner
	/// sign a fresh permit, and run the flow again.
	ResignWithFreshNonce,
	/// The permit was consumed. Submit the transfer again without a new
	/// signature.
	RetryTransfer,
	/// Retrying will not help without outside intervention.
	Abort,
}

impl RelayError {
	/// Classifies this error into a recovery action.
	pub fn recovery(&self) -> Recovery {
		match self {
			RelayError::Discarded(
				TokenError::ExpiredDeadline { .. } | TokenError::InsufficientAllowance { .. },
			) => Recovery::ResignWithFreshNonce,
			RelayError::Discarded(_) => Recovery::Abort,
			RelayError::PermitUnconfirmed { consumed: true, .. } => Recovery::RetryTransfer,
			RelayError::PermitUnconfirmed { consumed: false, .. } => Recovery::ResignWithFreshNonce,
			RelayError::Signing(_) | RelayError::InvalidRequest(_) => Recovery::Abort,
			RelayError::Ledger { step, source } => match (step, source) {
				(Step::Transfer, _) => transfer_recovery(source),
				// Relayer must be funded before anything else is submitted.
				(_, LedgerError::InsufficientFee { .. }) => Recovery::Abort,
				(Step::Prepare | Step::Sign, _) => Recovery::ResignWithFreshNonce,
				(Step::Permit, LedgerError::Reverted { reason, .. }) => match reason {
					TokenError::ExpiredDeadline { .. } | TokenError::NonceMismatch { .. } => {
						Recovery::ResignWithFreshNonce
					},
					_ => Recovery::Abort,
				},
				(Step::Permit, LedgerError::Configuration(_)) => Recovery::Abort,
				// Delivery failed; confirmation failures are `PermitUnconfirmed`.
				(Step::Permit, _) => Recovery::ResignWithFreshNonce,
			},
		}
	}
}

/// The permit went through, so anything transient only needs the transfer again.
fn transfer_recovery(source: &LedgerError) -> Recovery {
	match source {
		LedgerError::Reverted {
			reason: TokenError::InsufficientAllowance { .. },
			..
		} => Recovery::ResignWithFreshNonce,
		LedgerError::Reverted { .. } | LedgerError::Configuration(_) => Recovery::Abort,
		_ => Recovery::RetryTransfer,
	}
}
