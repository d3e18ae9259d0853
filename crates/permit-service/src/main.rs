//! Main entry point for the gasless permit relayer.
//!
//! Loads a relay configuration, builds the owner's signer and the relayer's
//! ledger access, and moves tokens from the owner to a recipient. The owner
//! signs a permit; the relayer submits and pays for both transactions.

use clap::Parser;
use permit_config::Config;
use permit_relay::{GaslessTransfer, Relay};
use permit_types::{format_token_amount, Address, U256};
use std::path::PathBuf;
use std::str::FromStr;

mod factory_registry;

/// Command-line arguments for the relayer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/demo.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Amount to transfer, in base units
	#[arg(short, long)]
	amount: Option<String>,

	/// Address receiving the tokens
	#[arg(short, long)]
	recipient: Option<Address>,

	/// Transfer the owner's entire balance
	#[arg(long)]
	full_balance: bool,
}

/// What the relayer was asked to move.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransferRequest {
	Amount { recipient: Address, amount: U256 },
	FullBalance { recipient: Address },
}

/// Merges command-line overrides with the configured default transfer.
fn resolve_transfer(args: &Args, config: &Config) -> Result<TransferRequest, String> {
	let defaults = config.transfer.as_ref();
	let recipient = args
		.recipient
		.or_else(|| defaults.map(|t| t.recipient))
		.ok_or("No recipient given; pass --recipient or set [transfer].recipient")?;

	let full_balance = args.full_balance
		|| (args.amount.is_none() && defaults.is_some_and(|t| t.full_balance));
	if full_balance {
		return Ok(TransferRequest::FullBalance { recipient });
	}

	let amount = args
		.amount
		.as_deref()
		.or_else(|| defaults.and_then(|t| t.amount.as_deref()))
		.ok_or("No amount given; pass --amount, --full-balance or set [transfer].amount")?;
	let amount =
		U256::from_str(amount).map_err(|e| format!("Invalid amount '{}': {}", amount, e))?;
	Ok(TransferRequest::Amount { recipient, amount })
}

/// Logs token and fee balances of the accounts involved in a transfer.
async fn log_balances(
	relay: &Relay,
	label: &str,
	accounts: &[(&str, Address)],
) -> Result<(), Box<dyn std::error::Error>> {
	let ledger = relay.orchestrator.ledger();
	let decimals = relay.orchestrator.token().decimals;
	for (role, address) in accounts {
		let tokens = ledger.token_balance(address).await?;
		let fees = ledger.fee_balance(address).await?;
		tracing::info!(
			stage = label,
			role,
			address = %address,
			tokens = %format_token_amount(tokens, decimals),
			fee_balance = %format_token_amount(fees, 18),
			"Balance"
		);
	}
	Ok(())
}

async fn run(
	relay: &Relay,
	request: TransferRequest,
) -> Result<GaslessTransfer, Box<dyn std::error::Error>> {
	let owner = relay.owner.get_address().await?;
	let relayer = relay.relayer.get_address().await?;
	let recipient = match &request {
		TransferRequest::Amount { recipient, .. } | TransferRequest::FullBalance { recipient } => {
			*recipient
		},
	};
	let accounts = [("owner", owner), ("relayer", relayer), ("recipient", recipient)];

	log_balances(relay, "before", &accounts).await?;
	let ledger = relay.orchestrator.ledger();
	let owner_fees = ledger.fee_snapshot(&owner).await?;

	let result = match request {
		TransferRequest::Amount { recipient, amount } => {
			relay
				.orchestrator
				.gasless_transfer(&relay.owner, recipient, amount)
				.await
		},
		TransferRequest::FullBalance { recipient } => {
			relay
				.orchestrator
				.permit_full_balance(&relay.owner, recipient)
				.await
		},
	};
	let transfer = result.inspect_err(|e| {
		tracing::error!(
			step = %e.step(),
			recovery = ?e.recovery(),
			error = %e,
			"Gasless transfer failed"
		);
	})?;

	log_balances(relay, "after", &accounts).await?;
	if ledger.fee_snapshot(&owner).await? != owner_fees {
		return Err(format!("Owner {} was charged a fee", owner).into());
	}

	tracing::info!(
		permit_tx = %transfer.permit_tx,
		transfer_tx = %transfer.transfer_tx,
		amount = %format_token_amount(transfer.amount, relay.orchestrator.token().decimals),
		fee_paid = %format_token_amount(transfer.fee_paid, 18),
		"Gasless transfer complete"
	);
	Ok(transfer)
}

/// Main entry point for the relayer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started relayer");

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.relayer.id);

	let request = resolve_transfer(&args, &config)?;
	let relay = factory_registry::build_relay_from_config(config).await?;
	run(&relay, request).await?;

	tracing::info!("Stopped relayer");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const CONFIG: &str = r#"
[relayer]
id = "service-test"

[token]
name = "MyGaslessToken"
address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"

[ledger]
primary = "memory"
[ledger.implementations.memory]
chain_id = 1337
fee_per_transaction = 21000
[ledger.implementations.memory.token_balances]
"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266" = "100000000000000000000"
[ledger.implementations.memory.fee_balances]
"0x70997970C51812dc3A010C7d01b50e0d17dc79C8" = "1000000000000000000"

[accounts.owner]
primary = "local"
[accounts.owner.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[accounts.relayer]
primary = "local"
[accounts.relayer.implementations.local]
private_key = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"

[transfer]
recipient = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"
amount = "30000000000000000000"
"#;

	fn args(extra: &[&str]) -> Args {
		let mut argv = vec!["relayer"];
		argv.extend_from_slice(extra);
		Args::parse_from(argv)
	}

	#[test]
	fn test_resolve_transfer_from_config() {
		let config: Config = CONFIG.parse().unwrap();
		let request = resolve_transfer(&args(&[]), &config).unwrap();
		assert_eq!(
			request,
			TransferRequest::Amount {
				recipient: "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC".parse().unwrap(),
				amount: U256::from(30u64) * U256::from(10u64).pow(U256::from(18)),
			}
		);
	}

	#[test]
	fn test_cli_overrides_config() {
		let config: Config = CONFIG.parse().unwrap();
		let recipient = Address::repeat_byte(0x44);
		let request = resolve_transfer(
			&args(&["--recipient", &recipient.to_string(), "--amount", "5"]),
			&config,
		)
		.unwrap();
		assert_eq!(
			request,
			TransferRequest::Amount {
				recipient,
				amount: U256::from(5)
			}
		);

		let request = resolve_transfer(&args(&["--full-balance"]), &config).unwrap();
		assert!(matches!(request, TransferRequest::FullBalance { .. }));
	}

	#[test]
	fn test_missing_recipient() {
		let config: Config = CONFIG
			.split("[transfer]")
			.next()
			.unwrap()
			.parse()
			.unwrap();
		assert!(resolve_transfer(&args(&["--amount", "1"]), &config).is_err());
	}

	#[tokio::test]
	async fn test_run_from_config_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(CONFIG.as_bytes()).unwrap();

		let config = Config::from_file(file.path()).await.unwrap();
		let request = resolve_transfer(&args(&[]), &config).unwrap();
		let relay = factory_registry::build_relay_from_config(config).await.unwrap();

		let transfer = run(&relay, request).await.unwrap();
		assert_eq!(transfer.fee_paid, U256::from(42_000));
		assert_eq!(
			relay
				.orchestrator
				.ledger()
				.token_balance(&transfer.recipient)
				.await
				.unwrap(),
			transfer.amount
		);
	}
}
