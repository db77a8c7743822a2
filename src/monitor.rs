//! Background auto-redemption.
//!
//! One tokio task per signing key polls the position source for each wallet
//! that key signs for, skips conditions that were attempted recently and hands
//! the rest to the batch coordinator. Different signers run in parallel;
//! everything behind one signer is sequential.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256};
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::batch::BatchRedemptionCoordinator;
use crate::chain::{ChainReader, ChainWriter};
use crate::config::AutoRedeemConfig;
use crate::contracts::ContractAddresses;
use crate::positions::PositionSource;
use crate::redeem::{live_amounts, RedeemableItem, RedemptionExecutor};
use crate::shares::format_amounts;
use crate::wallet::{resolve, ResolvedAddress, WalletDescriptor};

/// Remembers when each (holder, condition) may be attempted again.
#[derive(Debug)]
pub struct Cooldowns {
    period: Duration,
    until: HashMap<(Address, B256), Instant>,
}

impl Cooldowns {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            until: HashMap::new(),
        }
    }

    pub fn is_cooling(&mut self, holder: Address, condition_id: B256, now: Instant) -> bool {
        match self.until.get(&(holder, condition_id)) {
            Some(expires) if *expires > now => true,
            Some(_) => {
                self.until.remove(&(holder, condition_id));
                false
            }
            None => false,
        }
    }

    pub fn mark(&mut self, holder: Address, condition_id: B256, now: Instant) {
        self.until.insert((holder, condition_id), now + self.period);
    }

    /// Drops entries that have expired, including conditions never seen again.
    pub fn prune(&mut self, now: Instant) {
        self.until.retain(|_, expires| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.until.len()
    }

    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}

/// A wallet the monitor may redeem for, with its chain collaborators.
/// `writer` may be absent in dry-run mode.
#[derive(Clone)]
pub struct MonitoredWallet {
    pub descriptor: WalletDescriptor,
    pub reader: Arc<dyn ChainReader>,
    pub writer: Option<Arc<dyn ChainWriter>>,
}

/// Groups wallets by signing address, keeping first-seen order.
pub fn group_by_signer(wallets: Vec<MonitoredWallet>) -> Vec<(Address, Vec<MonitoredWallet>)> {
    let mut groups: Vec<(Address, Vec<MonitoredWallet>)> = Vec::new();
    for wallet in wallets {
        let signer = wallet.descriptor.signing_address;
        match groups.iter_mut().find(|(s, _)| *s == signer) {
            Some((_, group)) => group.push(wallet),
            None => groups.push((signer, vec![wallet])),
        }
    }
    groups
}

/// Include list (empty = everyone) then exclude list, matched by name or address.
pub fn wallet_selected(wallet: &WalletDescriptor, include: &[String], exclude: &[String]) -> bool {
    if !include.is_empty() && !include.iter().any(|id| wallet.matches_identifier(id)) {
        return false;
    }
    !exclude.iter().any(|id| wallet.matches_identifier(id))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub found: usize,
    pub cooling: usize,
    pub redeemed: usize,
    pub failed: usize,
    pub dry_run: usize,
}

pub struct AutoRedeemMonitor {
    settings: AutoRedeemConfig,
    contracts: ContractAddresses,
    operator: Address,
    positions: Arc<dyn PositionSource>,
    stop_flag: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl AutoRedeemMonitor {
    pub fn new(settings: AutoRedeemConfig, contracts: ContractAddresses, positions: Arc<dyn PositionSource>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            operator: contracts.operator(),
            settings,
            contracts,
            positions,
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_tx,
        }
    }

    /// Ask every wallet loop to finish. A redemption in flight still waits for
    /// its receipt.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Runs until ctrl-c.
    pub async fn run(self: Arc<Self>, wallets: Vec<MonitoredWallet>) -> Result<()> {
        self.run_until(wallets, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await
    }

    pub async fn run_until<F>(self: Arc<Self>, wallets: Vec<MonitoredWallet>, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let selected: Vec<MonitoredWallet> = wallets
            .into_iter()
            .filter(|w| {
                let keep = wallet_selected(&w.descriptor, &self.settings.include_wallets, &self.settings.exclude_wallets);
                if !keep {
                    info!("Auto redeem: skipping wallet '{}' (filtered)", w.descriptor.name);
                }
                keep
            })
            .collect();

        if selected.is_empty() {
            warn!("Auto redeem: no wallets selected, nothing to monitor");
            return Ok(());
        }

        info!(
            "Auto redeem started for {} wallet(s) (interval={}s, cooldown={}s, dry_run={})",
            selected.len(),
            self.settings.poll_interval().as_secs(),
            self.settings.cool_down().as_secs(),
            self.settings.dry_run
        );

        let mut handles = Vec::new();
        for (signer, group) in group_by_signer(selected) {
            let monitor = Arc::clone(&self);
            handles.push((
                signer,
                tokio::spawn(async move { monitor.signer_loop(signer, group).await }),
            ));
        }

        stop.await;
        info!("Auto redeem stopping...");
        self.stop();

        for (signer, handle) in handles {
            if let Err(e) = handle.await {
                error!("Auto redeem loop for signer {} panicked: {}", signer, e);
            }
        }
        info!("Auto redeem stopped");
        Ok(())
    }

    /// Polls every wallet signed by `signer`, one after another, so their
    /// transactions never overlap on the signer's nonce.
    async fn signer_loop(&self, signer: Address, wallets: Vec<MonitoredWallet>) {
        let wallets: Vec<(MonitoredWallet, ResolvedAddress)> = wallets
            .into_iter()
            .filter_map(|wallet| match resolve(&wallet.descriptor) {
                Ok(resolved) => {
                    info!(
                        "Auto redeem loop started for '{}' (holder {}, {})",
                        wallet.descriptor.name, resolved.address, wallet.descriptor.signature_type
                    );
                    Some((wallet, resolved))
                }
                Err(e) => {
                    error!("Auto redeem: wallet '{}' is misconfigured: {}", wallet.descriptor.name, e);
                    None
                }
            })
            .collect();
        if wallets.is_empty() {
            return;
        }
        if wallets.len() > 1 {
            info!("Signer {} drives {} wallets, polling them in turn", signer, wallets.len());
        }

        let coordinator = BatchRedemptionCoordinator::new(RedemptionExecutor::new(self.contracts.clone()))
            .with_cancel_flag(Arc::clone(&self.stop_flag));
        let mut cooldowns = Cooldowns::new(self.settings.cool_down());
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = self.settings.poll_interval();

        while !self.stopped() {
            let started = Instant::now();
            cooldowns.prune(started);
            for (wallet, resolved) in &wallets {
                if self.stopped() {
                    break;
                }
                match self.tick(wallet, resolved, &coordinator, &mut cooldowns).await {
                    Ok(summary) if summary.found > 0 => info!("[{}] Tick: {:?}", wallet.descriptor.name, summary),
                    Ok(_) => debug!("[{}] Tick: nothing redeemable", wallet.descriptor.name),
                    Err(e) => error!("[{}] Auto redeem tick failed: {:#}", wallet.descriptor.name, e),
                }
            }

            let remaining = interval.saturating_sub(started.elapsed());
            if remaining.is_zero() || self.stopped() {
                continue;
            }
            debug!(
                "Signer {}: next poll at {}",
                signer,
                (Utc::now() + chrono::Duration::seconds(remaining.as_secs() as i64)).format("%H:%M:%S")
            );
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = stop_rx.changed() => {}
            }
        }
        info!("Auto redeem loop exited for signer {}", signer);
    }

    /// One poll for one wallet. Every attempted condition goes into cooldown,
    /// whether it succeeded, failed or was only logged in dry-run.
    pub(crate) async fn tick(
        &self,
        wallet: &MonitoredWallet,
        resolved: &ResolvedAddress,
        coordinator: &BatchRedemptionCoordinator,
        cooldowns: &mut Cooldowns,
    ) -> Result<TickSummary> {
        let name = &wallet.descriptor.name;
        let items = self.positions.redeemable_items(resolved.address).await?;
        let mut summary = TickSummary {
            found: items.len(),
            ..Default::default()
        };

        let now = Instant::now();
        let due: Vec<RedeemableItem> = items
            .into_iter()
            .filter(|item| {
                let cooling = cooldowns.is_cooling(resolved.address, item.condition_id, now);
                if cooling {
                    debug!("[{}] Skipping {} (cooldown)", name, item.condition_id);
                }
                !cooling
            })
            .collect();
        summary.cooling = summary.found - due.len();
        if due.is_empty() {
            return Ok(summary);
        }
        info!("[{}] {} redeemable condition(s) due", name, due.len());

        if self.settings.dry_run {
            for item in &due {
                if self.stopped() {
                    break;
                }
                match live_amounts(resolved, item, wallet.reader.as_ref()).await {
                    Ok(amounts) => info!(
                        "[{}] [dry-run] would redeem {} amounts={} via {:?}",
                        name,
                        item.label(),
                        format_amounts(&amounts),
                        resolved.call_strategy
                    ),
                    Err(e) => warn!("[{}] [dry-run] balance read failed for {}: {}", name, item.label(), e),
                }
                cooldowns.mark(resolved.address, item.condition_id, Instant::now());
                summary.dry_run += 1;
            }
            return Ok(summary);
        }

        let Some(writer) = wallet.writer.as_ref() else {
            anyhow::bail!("wallet '{}' has no signer configured; enable dry_run or set its key", name);
        };

        let report = coordinator
            .redeem_all(&wallet.descriptor, &due, self.operator, wallet.reader.as_ref(), writer.as_ref())
            .await;
        let finished = Instant::now();
        for outcome in &report.outcomes {
            cooldowns.mark(resolved.address, outcome.condition_id, finished);
        }
        summary.redeemed = report.successful_count;
        summary.failed = report.failed_count;
        Ok(summary)
    }
}
