//! Single-item redemption.
//!
//! [`RedemptionExecutor::redeem`] is where typed errors end: every failure
//! from resolution, balance reads, approval or submission becomes a failed
//! [`RedemptionOutcome`] so batch callers never branch on `Err`.

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use log::{error, info, warn};

use crate::approval::{ApprovalError, ApprovalGuard, ApprovalStatus};
use crate::balance;
use crate::chain::{Amount, ChainReadError, ChainReader, ChainWriteError, ChainWriter, TokenId};
use crate::contracts::ContractAddresses;
use crate::shares::format_amounts;
use crate::wallet::{resolve, ConfigurationError, ResolvedAddress, WalletDescriptor};

/// A redeemable position, one entry per condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemableItem {
    pub condition_id: B256,
    /// Position ids by outcome index. `None` when the snapshot does not know
    /// the id for that side.
    pub token_ids: [Option<TokenId>; 2],
    /// Sizes reported by the snapshot. Diagnostics only; the call always uses
    /// live balances.
    pub hinted_amounts: [Amount; 2],
    pub neg_risk: bool,
    pub title: Option<String>,
}

impl RedeemableItem {
    pub fn new(condition_id: B256, token_ids: [Option<TokenId>; 2], neg_risk: bool) -> Self {
        Self {
            condition_id,
            token_ids,
            hinted_amounts: [U256::ZERO; 2],
            neg_risk,
            title: None,
        }
    }

    pub fn with_hints(mut self, hinted_amounts: [Amount; 2]) -> Self {
        self.hinted_amounts = hinted_amounts;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => format!("{} ({})", title, self.condition_id),
            None => self.condition_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Failure => write!(f, "failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionOutcome {
    pub condition_id: B256,
    pub status: OutcomeStatus,
    pub tx_hash: Option<B256>,
    pub error_message: Option<String>,
    /// Live amounts the redemption used, zero until balances were read.
    pub amounts: [Amount; 2],
}

impl RedemptionOutcome {
    pub fn success(condition_id: B256, tx_hash: B256, amounts: [Amount; 2]) -> Self {
        Self {
            condition_id,
            status: OutcomeStatus::Success,
            tx_hash: Some(tx_hash),
            error_message: None,
            amounts,
        }
    }

    pub fn failure(condition_id: B256, message: impl Into<String>, amounts: [Amount; 2]) -> Self {
        Self {
            condition_id,
            status: OutcomeStatus::Failure,
            tx_hash: None,
            error_message: Some(message.into()),
            amounts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("balance read failed: {0}")]
    Read(#[from] ChainReadError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("redeem submission failed: {0}")]
    Submit(#[from] ChainWriteError),
    #[error("nothing to redeem: live balances are zero (already claimed or moved)")]
    NothingToRedeem,
    #[error("redeem transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
}

/// Live balances for both outcome slots of `item` at the resolved holder.
/// Absent token ids count as zero without a read.
pub async fn live_amounts(
    resolved: &ResolvedAddress,
    item: &RedeemableItem,
    reader: &dyn ChainReader,
) -> Result<[Amount; 2], ChainReadError> {
    let mut amounts = [U256::ZERO; 2];
    for (slot, token_id) in item.token_ids.iter().enumerate() {
        if let Some(token_id) = token_id {
            amounts[slot] = balance::probe(resolved, *token_id, reader).await?;
        }
    }
    Ok(amounts)
}

pub struct RedemptionExecutor {
    contracts: ContractAddresses,
}

impl RedemptionExecutor {
    pub fn new(contracts: ContractAddresses) -> Self {
        Self { contracts }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    /// Redeem `item` for `wallet`. Always returns an outcome.
    pub async fn redeem(
        &self,
        wallet: &WalletDescriptor,
        item: &RedeemableItem,
        operator: Address,
        reader: &dyn ChainReader,
        writer: &dyn ChainWriter,
    ) -> RedemptionOutcome {
        let mut amounts = [U256::ZERO; 2];
        match self
            .try_redeem(wallet, item, operator, reader, writer, &mut amounts)
            .await
        {
            Ok(tx_hash) => {
                info!(
                    "[{}] Redeemed {} amounts={} tx={}",
                    wallet.name,
                    item.label(),
                    format_amounts(&amounts),
                    tx_hash
                );
                RedemptionOutcome::success(item.condition_id, tx_hash, amounts)
            }
            Err(e) => {
                error!("[{}] Redeem failed for {}: {}", wallet.name, item.label(), e);
                RedemptionOutcome::failure(item.condition_id, e.to_string(), amounts)
            }
        }
    }

    async fn try_redeem(
        &self,
        wallet: &WalletDescriptor,
        item: &RedeemableItem,
        operator: Address,
        reader: &dyn ChainReader,
        writer: &dyn ChainWriter,
        amounts: &mut [Amount; 2],
    ) -> Result<B256, RedeemError> {
        let resolved = resolve(wallet)?;
        info!(
            "[{}] Redeeming {} from {} ({:?})",
            wallet.name,
            item.label(),
            resolved.address,
            resolved.call_strategy
        );

        *amounts = live_amounts(&resolved, item, reader).await?;
        for slot in 0..2 {
            if item.hinted_amounts[slot] > amounts[slot] {
                warn!(
                    "[{}] Hinted amounts {} exceed on-chain balances {} for {}, using on-chain",
                    wallet.name,
                    format_amounts(&item.hinted_amounts),
                    format_amounts(amounts),
                    item.condition_id
                );
                break;
            }
        }
        if amounts.iter().all(|a| a.is_zero()) {
            return Err(RedeemError::NothingToRedeem);
        }

        let approval = ApprovalGuard::new(&self.contracts)
            .ensure_approved(&resolved, operator, reader, writer)
            .await?;
        if let ApprovalStatus::Granted { tx_hash } = approval {
            info!("[{}] Approved operator {} in {}", wallet.name, operator, tx_hash);
        }

        let call = self.contracts.redeem_call(item.condition_id, item.neg_risk, amounts);
        let receipt = writer.submit(call, &resolved).await?;
        if !receipt.success {
            return Err(RedeemError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        Ok(receipt.tx_hash)
    }
}
