use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, warn};

use polyredeem::batch::BatchRedemptionCoordinator;
use polyredeem::chain::rpc::{RpcChainReader, RpcChainWriter};
use polyredeem::chain::{ChainReader, ChainWriter};
use polyredeem::config::{Args, Config, WalletConfig};
use polyredeem::monitor::{AutoRedeemMonitor, MonitoredWallet};
use polyredeem::positions::{parse_condition_id, DataApiPositions, PositionSource};
use polyredeem::redeem::{live_amounts, RedemptionExecutor};
use polyredeem::shares::format_amounts;
use polyredeem::wallet::{resolve, ConfigurationError, SignatureKind, WalletDescriptor};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    eprintln!("----------------------------------------------------");
    eprintln!("polyredeem: Polymarket winning-position redemption");
    eprintln!("   Config: {}", args.config.display());
    eprintln!("----------------------------------------------------");

    let selected = config.select_wallets(&args.wallet);
    if selected.is_empty() {
        if config.wallets.is_empty() {
            anyhow::bail!("No wallets configured. Add at least one entry to \"wallets\" in {}", args.config.display());
        }
        anyhow::bail!("No configured wallet matches {:?}", args.wallet);
    }

    let reader = Arc::new(RpcChainReader::new(&config.polymarket.rpc_urls, config.contracts.clone()));
    let positions: Arc<dyn PositionSource> = Arc::new(DataApiPositions::new(config.polymarket.data_api_url.clone())?);

    if args.redeem {
        let dry_run = args.dry_run;
        let wallets = prepare_wallets(&config, &selected, &reader, dry_run).await;
        return run_redeem_only(&config, wallets, positions.as_ref(), args.condition_id.as_deref(), dry_run).await;
    }

    if args.monitor || config.auto_redeem.enabled {
        let mut settings = config.auto_redeem.clone();
        settings.dry_run |= args.dry_run;
        let wallets = prepare_wallets(&config, &selected, &reader, settings.dry_run).await;
        let monitor = Arc::new(AutoRedeemMonitor::new(settings, config.contracts.clone(), positions));
        return monitor.run(wallets).await;
    }

    eprintln!("Nothing to do. Pass --redeem for a one-off run or --monitor to keep redeeming.");
    Ok(())
}

/// Builds descriptors and signers for each wallet. Wallets that cannot be set
/// up are logged and left out so the others still run. Wallets with the same
/// signing address share one writer, and with it one nonce lock.
async fn prepare_wallets(
    config: &Config,
    selected: &[&WalletConfig],
    reader: &Arc<RpcChainReader>,
    dry_run: bool,
) -> Vec<MonitoredWallet> {
    let mut writers: HashMap<Address, Arc<RpcChainWriter>> = HashMap::new();
    let mut wallets = Vec::new();
    for wallet in selected {
        match prepare_wallet(config, wallet, reader, dry_run, &mut writers).await {
            Ok(prepared) => wallets.push(prepared),
            Err(e) => error!("Skipping wallet '{}': {:#}", wallet.name, e),
        }
    }
    wallets
}

async fn prepare_wallet(
    config: &Config,
    wallet: &WalletConfig,
    reader: &Arc<RpcChainReader>,
    dry_run: bool,
    writers: &mut HashMap<Address, Arc<RpcChainWriter>>,
) -> Result<MonitoredWallet> {
    let kind = wallet.signature_kind()?;
    let owner = wallet.signing_address()?;

    // Proxy-factory calls always land on the signer's derived proxy, so the
    // configured address has to be that proxy.
    let derived = if wallet.needs_proxy_lookup() || kind == SignatureKind::PolyProxy {
        reader
            .lookup_proxy_address(kind, owner)
            .await
            .with_context(|| format!("looking up {} address for {}", kind, owner))?
    } else {
        None
    };
    if wallet.needs_proxy_lookup() {
        if let Some(proxy) = derived {
            eprintln!("Wallet '{}': using on-chain {} address {}", wallet.name, kind, proxy);
        }
    }

    let descriptor = wallet.descriptor(derived)?;
    wallet.verify_derived_proxy(&descriptor, derived)?;
    let resolved = resolve(&descriptor)?;
    eprintln!(
        "Wallet '{}': holder {} ({:?}, signer {})",
        descriptor.name, resolved.address, resolved.call_strategy, descriptor.signing_address
    );

    let writer: Option<Arc<dyn ChainWriter>> = if dry_run {
        None
    } else if let Some(shared) = writers.get(&descriptor.signing_address) {
        eprintln!("Wallet '{}': sharing signer {} with another wallet", descriptor.name, descriptor.signing_address);
        Some(Arc::clone(shared) as Arc<dyn ChainWriter>)
    } else {
        let built = Arc::new(build_writer(config, wallet, &descriptor)?);
        writers.insert(descriptor.signing_address, Arc::clone(&built));
        Some(built as Arc<dyn ChainWriter>)
    };

    Ok(MonitoredWallet {
        descriptor,
        reader: Arc::clone(reader) as Arc<dyn ChainReader>,
        writer,
    })
}

fn build_writer(config: &Config, wallet: &WalletConfig, descriptor: &WalletDescriptor) -> Result<RpcChainWriter> {
    let key = wallet.private_key()?;
    let writer = RpcChainWriter::new(
        &key,
        config.polymarket.rpc_urls.clone(),
        &config.contracts,
        config.polymarket.receipt_timeout(),
    )
    .with_context(|| format!("wallet '{}': failed to create signer", wallet.name))?;

    if writer.signer_address() != descriptor.signing_address {
        return Err(ConfigurationError::SignerMismatch {
            wallet: wallet.name.clone(),
            signer: writer.signer_address(),
            configured: descriptor.signing_address,
        }
        .into());
    }
    Ok(writer)
}

async fn run_redeem_only(
    config: &Config,
    wallets: Vec<MonitoredWallet>,
    positions: &dyn PositionSource,
    condition_id: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let only = match condition_id {
        Some(raw) => Some(parse_condition_id(raw).with_context(|| format!("Invalid --condition-id: {}", raw))?),
        None => None,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current redemption and stopping");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let coordinator = BatchRedemptionCoordinator::new(RedemptionExecutor::new(config.contracts.clone()))
        .with_cancel_flag(Arc::clone(&cancel));
    let operator = config.contracts.operator();

    let mut ok_count = 0usize;
    let mut fail_count = 0usize;
    for wallet in &wallets {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let resolved = resolve(&wallet.descriptor)?;
        eprintln!("\n=== Wallet '{}' ({}) ===", wallet.descriptor.name, resolved.address);

        let mut items = match positions.redeemable_items(resolved.address).await {
            Ok(items) => items,
            Err(e) => {
                eprintln!("Failed to fetch redeemable positions: {:#} (skipping wallet)", e);
                fail_count += 1;
                continue;
            }
        };
        if let Some(cid) = only {
            items.retain(|item| item.condition_id == cid);
            if items.is_empty() {
                eprintln!("Condition {} is not redeemable for this wallet.", cid);
                continue;
            }
        }
        if items.is_empty() {
            eprintln!("No redeemable positions found.");
            continue;
        }
        eprintln!("Found {} condition(s) to redeem.", items.len());

        if dry_run {
            for item in &items {
                match live_amounts(&resolved, item, wallet.reader.as_ref()).await {
                    Ok(amounts) => eprintln!("[dry-run] {} amounts={}", item.label(), format_amounts(&amounts)),
                    Err(e) => eprintln!("[dry-run] {}: balance read failed: {}", item.label(), e),
                }
            }
            continue;
        }

        let Some(writer) = wallet.writer.as_ref() else {
            eprintln!("No signer for this wallet (skipping)");
            fail_count += items.len();
            continue;
        };

        let report = coordinator
            .redeem_all(&wallet.descriptor, &items, operator, wallet.reader.as_ref(), writer.as_ref())
            .await;
        for outcome in &report.outcomes {
            match (&outcome.tx_hash, &outcome.error_message) {
                (Some(tx), _) => eprintln!("Success: {} amounts={} tx={}", outcome.condition_id, format_amounts(&outcome.amounts), tx),
                (None, Some(msg)) => eprintln!("Failed to redeem {}: {} (skipping)", outcome.condition_id, msg),
                (None, None) => eprintln!("Failed to redeem {}", outcome.condition_id),
            }
        }
        if report.skipped > 0 {
            eprintln!("Skipped {} item(s) after interrupt.", report.skipped);
        }
        eprintln!("Wallet '{}': {}", wallet.descriptor.name, report.status);
        ok_count += report.successful_count;
        fail_count += report.failed_count;
    }

    eprintln!("\nRedeem complete. Succeeded: {}, Failed: {}", ok_count, fail_count);
    Ok(())
}
