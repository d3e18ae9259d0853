//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable module (account, ledger) provides a `Registry` struct
/// implementing this trait, declaring the name used to select it in
/// configuration and the factory that builds it.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// for example "local" for `[accounts.owner] primary = "local"`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
