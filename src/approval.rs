//! ERC1155 operator approval for the redemption contract.
//!
//! Approval is granted once per (holder, operator) pair and stays valid, so
//! the guard is a single read in the common case.

use alloy::primitives::{Address, B256};
use log::info;

use crate::chain::{ChainReadError, ChainReader, ChainWriteError, ChainWriter};
use crate::contracts::ContractAddresses;
use crate::wallet::ResolvedAddress;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval check failed: {0}")]
    Read(#[from] ChainReadError),
    #[error("approval submission failed: {0}")]
    Submit(#[from] ChainWriteError),
    #[error("approval transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    AlreadyApproved,
    Granted { tx_hash: B256 },
}

pub struct ApprovalGuard<'a> {
    contracts: &'a ContractAddresses,
}

impl<'a> ApprovalGuard<'a> {
    pub fn new(contracts: &'a ContractAddresses) -> Self {
        Self { contracts }
    }

    /// Make sure `resolved.address` has approved `operator` on the
    /// ConditionalTokens contract, sending `setApprovalForAll` with the
    /// resolved call strategy if it has not.
    pub async fn ensure_approved(
        &self,
        resolved: &ResolvedAddress,
        operator: Address,
        reader: &dyn ChainReader,
        writer: &dyn ChainWriter,
    ) -> Result<ApprovalStatus, ApprovalError> {
        if reader.is_approved_for_all(resolved.address, operator).await? {
            info!("{} already approved operator {}", resolved.address, operator);
            return Ok(ApprovalStatus::AlreadyApproved);
        }

        info!(
            "{} has not approved operator {}, sending setApprovalForAll ({:?})",
            resolved.address, operator, resolved.call_strategy
        );

        let call = self.contracts.approval_call(operator);
        let receipt = writer.submit(call, resolved).await?;
        if !receipt.success {
            return Err(ApprovalError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }

        info!("Approval confirmed: {}", receipt.tx_hash);
        Ok(ApprovalStatus::Granted {
            tx_hash: receipt.tx_hash,
        })
    }
}
