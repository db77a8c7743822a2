use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::Address;
use log::{info, warn};

use crate::chain::{ChainReader, ChainWriter};
use crate::redeem::{RedeemableItem, RedemptionExecutor, RedemptionOutcome};
use crate::wallet::WalletDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Success,
    Failed,
    Partial,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Success => write!(f, "success"),
            BatchStatus::Failed => write!(f, "failed"),
            BatchStatus::Partial => write!(f, "partial"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    /// Items not attempted because the batch was cancelled.
    pub skipped: usize,
    pub outcomes: Vec<RedemptionOutcome>,
    pub status: BatchStatus,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<RedemptionOutcome>, skipped: usize) -> Self {
        let successful_count = outcomes.iter().filter(|o| o.is_success()).count();
        let failed_count = outcomes.len() - successful_count;
        let status = if failed_count == 0 {
            BatchStatus::Success
        } else if successful_count == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
        Self {
            total: outcomes.len() + skipped,
            successful_count,
            failed_count,
            skipped,
            outcomes,
            status,
        }
    }

    /// Outcomes that failed, for retrying just that subset.
    pub fn failures(&self) -> impl Iterator<Item = &RedemptionOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Redeems a wallet's items one at a time, each awaited to its receipt.
pub struct BatchRedemptionCoordinator {
    executor: RedemptionExecutor,
    cancel: Option<Arc<AtomicBool>>,
}

impl BatchRedemptionCoordinator {
    pub fn new(executor: RedemptionExecutor) -> Self {
        Self {
            executor,
            cancel: None,
        }
    }

    /// Checked before each item. A set flag stops the batch; the item in
    /// flight still runs to its receipt.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn executor(&self) -> &RedemptionExecutor {
        &self.executor
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub async fn redeem_all(
        &self,
        wallet: &WalletDescriptor,
        items: &[RedeemableItem],
        operator: Address,
        reader: &dyn ChainReader,
        writer: &dyn ChainWriter,
    ) -> BatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<&RedeemableItem> = items
            .iter()
            .filter(|item| seen.insert(item.condition_id))
            .collect();
        if unique.len() < items.len() {
            warn!(
                "[{}] Dropped {} duplicate condition(s) from batch",
                wallet.name,
                items.len() - unique.len()
            );
        }

        let mut outcomes = Vec::with_capacity(unique.len());
        for (i, item) in unique.iter().enumerate() {
            if self.cancelled() {
                let skipped = unique.len() - i;
                warn!("[{}] Batch cancelled, skipping {} remaining item(s)", wallet.name, skipped);
                return BatchReport::from_outcomes(outcomes, skipped);
            }
            info!("[{}] Batch item {}/{}: {}", wallet.name, i + 1, unique.len(), item.label());
            outcomes.push(self.executor.redeem(wallet, item, operator, reader, writer).await);
        }

        let report = BatchReport::from_outcomes(outcomes, 0);
        info!(
            "[{}] Batch done: {} ok, {} failed ({})",
            wallet.name, report.successful_count, report.failed_count, report.status
        );
        report
    }
}
