//! Chain collaborators the redemption core is written against.
//!
//! [`ChainReader`] answers balance and approval queries, [`ChainWriter`] signs,
//! submits and waits for transactions. Both are injected so the core never
//! touches RPC endpoints or keys directly.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::wallet::ResolvedAddress;

#[cfg(test)]
pub(crate) mod mock;
pub mod rpc;

/// Raw ERC1155 amount (6 decimals).
pub type Amount = U256;
/// ERC1155 position id.
pub type TokenId = U256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainReadError {
    #[error("{method} failed: {reason}")]
    Rpc { method: &'static str, reason: String },
    #[error("no RPC URLs configured")]
    NoEndpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainWriteError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("transaction {tx_hash} sent but receipt unavailable: {reason}")]
    Receipt { tx_hash: B256, reason: String },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("relay setup failed: {0}")]
    Relay(String),
    #[error("signer {actual} cannot sign for wallet signer {expected}")]
    WrongSigner { expected: Address, actual: Address },
    #[error("no RPC URLs configured")]
    NoEndpoints,
}

/// A contract call before signing and before any relay envelope is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedCall {
    pub to: Address,
    pub data: Bytes,
    /// Human-readable name for logs. Calldata itself is never logged.
    pub label: &'static str,
}

impl UnsignedCall {
    pub fn new(to: Address, data: impl Into<Bytes>, label: &'static str) -> Self {
        Self {
            to,
            data: data.into(),
            label,
        }
    }
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    /// False when the transaction, or the call a relay executed, reverted.
    pub success: bool,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn balance_of(&self, owner: Address, token_id: TokenId) -> Result<Amount, ChainReadError>;

    async fn is_approved_for_all(&self, owner: Address, operator: Address) -> Result<bool, ChainReadError>;
}

#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Sign and submit `call` as `route` dictates, then block until mined.
    ///
    /// `Direct` sends the call from the signer. `Relayed` wraps it in the
    /// envelope named by `route.relay` and sends that from the signer instead.
    async fn submit(&self, call: UnsignedCall, route: &ResolvedAddress) -> Result<TxReceipt, ChainWriteError>;
}
