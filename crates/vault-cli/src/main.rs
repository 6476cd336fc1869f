use anyhow::{anyhow, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vault_config::Config;
use vault_core::logging::init_logging;
use vault_core::simulation::Rounding;
use vault_core::{
    format_units, BundlingOptions, ChainAddresses, EthersChainClient, HistoryCache, LocalWalletSigner,
    OrchestratorConfig, OrchestratorMetrics, ProgressCallback, ProgressReporter, ProgressStep, ProviderConfig, RpcClientConfig,
    SimulationState, SimulationStateProvider, SimulationStatus, StateCache, TransactionOrchestrator,
    TransactionStatus, VaultAction, VaultHistoryService, VaultIntent, WalletSession, WalletSigner,
};

type Orchestrator = TransactionOrchestrator<EthersChainClient>;

/// Vault selected on the command line
struct VaultTarget {
    address: Address,
    name: String,
    symbol: String,
    asset_price_usd: Option<f64>,
}

fn cli() -> Command {
    let amount = Arg::new("amount").value_name("AMOUNT").required(true).help("Decimal amount in asset units");

    Command::new("vault-cli")
        .version(vault_core::version())
        .about("Deposit into and withdraw from Morpho vaults on Base")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Sets a custom config file"),
        )
        .arg(
            Arg::new("vault")
                .short('v')
                .long("vault")
                .value_name("VAULT")
                .global(true)
                .help("Vault name, symbol or address"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print Prometheus metrics on exit"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("deposit").about("Deposit assets into the vault").arg(amount.clone()))
        .subcommand(Command::new("withdraw").about("Withdraw an asset amount from the vault").arg(amount))
        .subcommand(Command::new("withdraw-all").about("Redeem every vault share held"))
        .subcommand(
            Command::new("plan")
                .about("Print the bundle an action would execute, without sending anything")
                .arg(Arg::new("action").value_name("ACTION").required(true).help("deposit, withdraw or withdraw-all"))
                .arg(Arg::new("amount").value_name("AMOUNT").help("Decimal amount in asset units"))
                .arg(Arg::new("from").long("from").value_name("ADDRESS").help("Account to plan for when no key is set")),
        )
        .subcommand(
            Command::new("history")
                .about("Show deposit and withdrawal totals for the vault position")
                .arg(Arg::new("price").long("price").value_name("USD").help("Asset price in USD"))
                .arg(Arg::new("from").long("from").value_name("ADDRESS").help("Account to inspect when no key is set")),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let matches = cli().get_matches();

    let config = if let Some(config_file) = matches.get_one::<String>("config") {
        Config::load_from_file(config_file)?
    } else {
        Config::load_from_env()?
    };

    init_logging(&config.monitoring.log_level, config.monitoring.json_logs)?;
    info!(version = vault_core::version(), rpc_url = %config.network.rpc_url, "Starting vault CLI");

    let vault_key = matches.get_one::<String>("vault").ok_or_else(|| anyhow!("--vault is required"))?;
    let vault = resolve_vault(&config, vault_key)?;

    let chain = Arc::new(EthersChainClient::new(&RpcClientConfig {
        url: config.network.rpc_url.clone(),
        chain_id: config.network.chain_id,
        poll_interval: Duration::from_millis(config.network.polling_interval_ms),
        confirmations: config.network.confirmations,
    })?);
    let signer = load_signer(&config, &chain)?;

    let metrics = Arc::new(OrchestratorMetrics::new()?);
    let orchestrator = build_orchestrator(&config, chain.clone())?.with_metrics(metrics.clone());

    match matches.subcommand() {
        Some(("deposit", sub)) => {
            let intent = VaultIntent::deposit(vault.address, required_amount(sub)?);
            execute(&orchestrator, signer, &vault, intent).await?;
        }
        Some(("withdraw", sub)) => {
            let intent = VaultIntent::withdraw(vault.address, required_amount(sub)?);
            execute(&orchestrator, signer, &vault, intent).await?;
        }
        Some(("withdraw-all", _)) => {
            execute(&orchestrator, signer, &vault, VaultIntent::withdraw_all(vault.address)).await?;
        }
        Some(("plan", sub)) => {
            let user = account(signer.as_deref(), sub)?;
            let action: VaultAction = sub
                .get_one::<String>("action")
                .ok_or_else(|| anyhow!("ACTION is required"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            let amount = sub.get_one::<String>("amount").cloned();
            let intent = VaultIntent { action, vault: vault.address, amount };
            plan(&orchestrator, &intent, user).await?;
        }
        Some(("history", sub)) => {
            let user = account(signer.as_deref(), sub)?;
            let price = match sub.get_one::<String>("price") {
                Some(price) => price.parse::<f64>().with_context(|| format!("invalid price: {}", price))?,
                None => vault.asset_price_usd.unwrap_or(1.0),
            };
            history(&config, &orchestrator, &vault, user, price).await?;
        }
        _ => anyhow::bail!("unknown command"),
    }

    if matches.get_flag("metrics") || config.monitoring.metrics_enabled {
        eprintln!("{}", metrics.render()?);
    }
    Ok(())
}

fn parse_address(value: &str) -> anyhow::Result<Address> {
    value.parse::<Address>().map_err(|e| anyhow!("invalid address {}: {}", value, e))
}

fn resolve_vault(config: &Config, key: &str) -> anyhow::Result<VaultTarget> {
    if let Some(entry) = config.find_vault(key) {
        return Ok(VaultTarget {
            address: parse_address(&entry.address)?,
            name: entry.name.clone(),
            symbol: entry.symbol.clone(),
            asset_price_usd: entry.asset_price_usd,
        });
    }
    let address = parse_address(key).with_context(|| format!("{} is neither a configured vault nor an address", key))?;
    Ok(VaultTarget { address, name: format!("{:?}", address), symbol: String::new(), asset_price_usd: None })
}

fn load_signer(config: &Config, chain: &EthersChainClient) -> anyhow::Result<Option<Arc<dyn WalletSigner>>> {
    if config.network.private_key.is_empty() {
        return Ok(None);
    }
    let signer = LocalWalletSigner::new(chain.provider(), &config.network.private_key, config.network.chain_id)?;
    Ok(Some(Arc::new(signer)))
}

fn build_orchestrator(config: &Config, chain: Arc<EthersChainClient>) -> anyhow::Result<Orchestrator> {
    let addresses = ChainAddresses {
        bundler: parse_address(&config.addresses.bundler)?,
        general_adapter: parse_address(&config.addresses.general_adapter)?,
        morpho: parse_address(&config.addresses.morpho)?,
        wrapped_native: parse_address(&config.addresses.wrapped_native)?,
    };
    let execution = &config.execution;
    let gas_reserve = U256::from_dec_str(&execution.gas_reserve_wei)
        .map_err(|e| anyhow!("invalid gas_reserve_wei {}: {:?}", execution.gas_reserve_wei, e))?;

    let cache = Arc::new(StateCache::new(Duration::from_secs(execution.state_ttl_secs)));
    let provider = Arc::new(SimulationStateProvider::new(
        chain,
        ProviderConfig { addresses, max_withdraw_queue_items: execution.max_withdraw_queue_items },
        cache,
    ));

    Ok(TransactionOrchestrator::new(
        provider,
        OrchestratorConfig {
            approval_settle_delay: Duration::from_millis(execution.approval_settle_delay_ms),
            retry_delay: Duration::from_millis(execution.retry_delay_ms),
            options: BundlingOptions { supports_signature: execution.supports_signature, gas_reserve },
        },
    ))
}

fn required_amount(matches: &ArgMatches) -> anyhow::Result<String> {
    matches.get_one::<String>("amount").cloned().ok_or_else(|| anyhow!("AMOUNT is required"))
}

/// The signer's address, or `--from` for read-only commands
fn account(signer: Option<&dyn WalletSigner>, matches: &ArgMatches) -> anyhow::Result<Address> {
    match (signer, matches.get_one::<String>("from")) {
        (_, Some(from)) => parse_address(from),
        (Some(signer), None) => Ok(signer.address()),
        (None, None) => Err(anyhow!("set PRIVATE_KEY or pass --from")),
    }
}

async fn load_state(orchestrator: &Orchestrator, vault: Address, user: Address) -> anyhow::Result<Arc<SimulationState>> {
    match orchestrator.build_state(vault, user).await? {
        SimulationStatus::Ready(state) => Ok(state),
        SimulationStatus::Pending => Err(anyhow!("simulation state for {:?} is still loading", vault)),
    }
}

async fn execute(
    orchestrator: &Orchestrator,
    signer: Option<Arc<dyn WalletSigner>>,
    vault: &VaultTarget,
    intent: VaultIntent,
) -> anyhow::Result<()> {
    let session = signer.map(WalletSession::connected).unwrap_or_default();
    if let Some(user) = session.account {
        load_state(orchestrator, vault.address, user).await?;
    }

    let reporter = ProgressReporter::new();
    reporter.open(intent.action, vault.address, &vault.name, &vault.symbol, intent.amount.as_deref());
    reporter.begin()?;

    let ui = reporter.callback();
    let on_progress: ProgressCallback = Arc::new(move |step: ProgressStep| {
        println!("[{}] {}", step.label(), step.status_message());
        ui(step);
    });

    let hash = match orchestrator.execute_vault_action(&session, &intent, Some(on_progress)).await {
        Ok(hash) => hash,
        Err(err) => {
            reporter.fail(&err);
            if reporter.snapshot().status == TransactionStatus::Cancelled {
                warn!("Cancelled");
                return Ok(());
            }
            return Err(err.into());
        }
    };
    println!("Submitted {:?}", hash);

    let user = session.account.ok_or_else(|| anyhow!("wallet disconnected"))?;
    match orchestrator.wait_for_confirmation(hash, vault.address, user).await {
        Ok(receipt) => {
            reporter.update_status(TransactionStatus::Success, None, Some(hash));
            println!(
                "{} confirmed in block {}",
                intent.action,
                receipt.block_number.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
            );
            Ok(())
        }
        Err(err) => {
            reporter.fail(&err);
            Err(err.into())
        }
    }
}

async fn plan(orchestrator: &Orchestrator, intent: &VaultIntent, user: Address) -> anyhow::Result<()> {
    let state = load_state(orchestrator, intent.vault, user).await?;
    let bundle = orchestrator.builder().plan(intent, &state, user).await?;
    println!("{}", serde_json::to_string_pretty(&bundle)?);

    if bundle.signatures.is_empty() {
        let tx = bundle.tx(&[])?;
        println!("to:    {:?}", tx.to);
        println!("value: {}", tx.value);
        println!("data:  0x{}", hex::encode(&tx.data));
    } else {
        println!("{} permit signature(s) required before calldata can be encoded", bundle.signatures.len());
    }
    Ok(())
}

async fn history(
    config: &Config,
    orchestrator: &Orchestrator,
    vault: &VaultTarget,
    user: Address,
    price_usd: f64,
) -> anyhow::Result<()> {
    let state = load_state(orchestrator, vault.address, user).await?;
    let vault_state = state.vault(vault.address)?;
    let decimals = vault_state.asset_decimals;
    let shares = state.holding(user, vault.address)?.balance;
    let assets = vault_state.to_assets(shares, Rounding::Down);
    let current_balance_usd = format_units(assets, decimals).parse::<f64>().unwrap_or(0.0) * price_usd;

    let chain: Arc<EthersChainClient> = orchestrator.provider().chain().clone();
    let cache = Arc::new(HistoryCache::new(
        Duration::from_secs(config.execution.history_ttl_secs),
        config.execution.history_max_entries,
    ));
    let service = VaultHistoryService::new(chain, cache);
    let history = service.history(vault.address, user, decimals, price_usd, current_balance_usd).await?;

    println!("Vault:           {} ({:?})", vault.name, vault.address);
    println!("Position:        {} (${:.2})", format_units(assets, decimals), current_balance_usd);
    println!("Deposited:       ${:.2}", history.total_deposited);
    println!("Withdrawn:       ${:.2}", history.total_withdrawn);
    println!("Net deposits:    ${:.2}", history.net_deposits);
    println!("Interest earned: ${:.2}", history.interest_earned);
    Ok(())
}
