//! Factory registry for relay implementations.
//!
//! Collects the factory of every account and ledger implementation so the
//! configuration can select them by name.

use permit_account::AccountFactory;
use permit_config::Config;
use permit_ledger::LedgerFactory;
use permit_relay::{Relay, RelayBuilder, RelayFactories};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Registry of all available implementation factories.
pub struct FactoryRegistry {
	pub account: HashMap<String, AccountFactory>,
	pub ledger: HashMap<String, LedgerFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			account: HashMap::new(),
			ledger: HashMap::new(),
		}
	}

	/// Register an account implementation
	pub fn register_account(&mut self, name: impl Into<String>, factory: AccountFactory) {
		self.account.insert(name.into(), factory);
	}

	/// Register a ledger implementation
	pub fn register_ledger(&mut self, name: impl Into<String>, factory: LedgerFactory) {
		self.ledger.insert(name.into(), factory);
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Get the global registry, registering all implementations on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in permit_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.register_account(name, factory);
		}

		for (name, factory) in permit_ledger::get_all_implementations() {
			tracing::debug!("Registering ledger implementation: {}", name);
			registry.register_ledger(name, factory);
		}

		registry
	})
}

/// Picks the registered factories for the configured implementation names.
fn select<F: Copy>(
	available: &HashMap<String, F>,
	names: impl IntoIterator<Item = String>,
	kind: &str,
) -> Result<HashMap<String, F>, String> {
	let mut factories = HashMap::new();
	for name in names {
		match available.get(&name) {
			Some(factory) => {
				factories.insert(name, *factory);
			},
			None => {
				let mut known: Vec<_> = available.keys().cloned().collect();
				known.sort();
				return Err(format!(
					"Unknown {} implementation '{}'. Available: [{}]",
					kind,
					name,
					known.join(", ")
				));
			},
		}
	}
	Ok(factories)
}

/// Build the relay using the registry and configuration.
pub async fn build_relay_from_config(config: Config) -> Result<Relay, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let account_names = config
		.accounts
		.owner
		.implementations
		.keys()
		.chain(config.accounts.relayer.implementations.keys())
		.cloned();
	let account_factories = select(&registry.account, account_names, "account")?;
	let ledger_factories = select(
		&registry.ledger,
		config.ledger.implementations.keys().cloned(),
		"ledger",
	)?;

	let factories = RelayFactories {
		account_factories,
		ledger_factories,
	};
	Ok(RelayBuilder::new(config).build(factories).await?)
}
