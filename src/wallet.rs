//! Wallet descriptors and the single authority on which address holds a
//! wallet's outcome tokens.
//!
//! EOA wallets custody tokens at the signing address and call contracts
//! directly. Proxy and Safe wallets custody tokens at the proxy address and
//! every call has to be relayed through it, signed by the owning EOA.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("wallet '{wallet}': signature_type {kind} requires a proxy_wallet_address")]
    MissingProxyAddress { wallet: String, kind: SignatureKind },
    #[error("invalid signature_type: {0}. Must be 0 (EOA), 1 (Proxy), or 2 (GnosisSafe)")]
    UnknownSignatureType(u8),
    #[error("wallet '{wallet}': invalid {field}: {value}")]
    InvalidAddress {
        wallet: String,
        field: &'static str,
        value: String,
    },
    #[error("wallet '{wallet}': signer {signer} does not match configured address {configured}")]
    SignerMismatch {
        wallet: String,
        signer: Address,
        configured: Address,
    },
    #[error("wallet '{wallet}': proxy_wallet_address {configured} is not the signer's proxy {derived}")]
    ProxyMismatch {
        wallet: String,
        configured: Address,
        derived: Address,
    },
}

/// How the wallet signs and custodies. Numeric values follow the CLOB's
/// signature type numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignatureKind {
    Eoa,
    PolyProxy,
    GnosisSafe,
}

impl TryFrom<u8> for SignatureKind {
    type Error = ConfigurationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SignatureKind::Eoa),
            1 => Ok(SignatureKind::PolyProxy),
            2 => Ok(SignatureKind::GnosisSafe),
            n => Err(ConfigurationError::UnknownSignatureType(n)),
        }
    }
}

impl From<SignatureKind> for u8 {
    fn from(kind: SignatureKind) -> u8 {
        match kind {
            SignatureKind::Eoa => 0,
            SignatureKind::PolyProxy => 1,
            SignatureKind::GnosisSafe => 2,
        }
    }
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureKind::Eoa => write!(f, "EOA"),
            SignatureKind::PolyProxy => write!(f, "POLY_PROXY"),
            SignatureKind::GnosisSafe => write!(f, "GNOSIS_SAFE"),
        }
    }
}

/// One managed wallet. Built once from configuration and never mutated while
/// a redemption is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDescriptor {
    pub name: String,
    pub signing_address: Address,
    pub proxy_address: Option<Address>,
    pub signature_type: SignatureKind,
}

impl WalletDescriptor {
    pub fn eoa(name: impl Into<String>, signing_address: Address) -> Self {
        Self {
            name: name.into(),
            signing_address,
            proxy_address: None,
            signature_type: SignatureKind::Eoa,
        }
    }

    pub fn relayed(
        name: impl Into<String>,
        signing_address: Address,
        proxy_address: Address,
        signature_type: SignatureKind,
    ) -> Self {
        Self {
            name: name.into(),
            signing_address,
            proxy_address: Some(proxy_address),
            signature_type,
        }
    }

    /// Case-insensitive match on wallet name, signing address or proxy address.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let needle = identifier.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.name.to_lowercase() == needle
            || self.signing_address.to_string().to_lowercase() == needle
            || self
                .proxy_address
                .map(|p| p.to_string().to_lowercase() == needle)
                .unwrap_or(false)
    }
}

impl fmt::Display for WalletDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proxy_address {
            Some(proxy) => write!(
                f,
                "{} (signer {}, proxy {}, {})",
                self.name, self.signing_address, proxy, self.signature_type
            ),
            None => write!(
                f,
                "{} (signer {}, {})",
                self.name, self.signing_address, self.signature_type
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStrategy {
    /// Sent as-is from the signing address.
    Direct,
    /// Wrapped in a relay envelope and executed by the proxy contract.
    Relayed,
}

/// Envelope used for a relayed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    /// Polymarket proxy wallet, reached through `ProxyWalletFactory.proxy`.
    ProxyFactory,
    /// Gnosis Safe, reached through `execTransaction`.
    Safe,
}

/// Output of [`resolve`]: where the tokens live and how to move them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// The address whose balance is read, approved and debited.
    pub address: Address,
    pub call_strategy: CallStrategy,
    /// Set exactly when `call_strategy` is `Relayed`.
    pub relay: Option<Relay>,
    /// The EOA that signs, whichever strategy is used.
    pub signer: Address,
}

impl ResolvedAddress {
    pub fn is_relayed(&self) -> bool {
        self.call_strategy == CallStrategy::Relayed
    }
}

/// Map a wallet to its token-holding address and call strategy.
pub fn resolve(wallet: &WalletDescriptor) -> Result<ResolvedAddress, ConfigurationError> {
    let relay = match wallet.signature_type {
        SignatureKind::Eoa => {
            return Ok(ResolvedAddress {
                address: wallet.signing_address,
                call_strategy: CallStrategy::Direct,
                relay: None,
                signer: wallet.signing_address,
            });
        }
        SignatureKind::PolyProxy => Relay::ProxyFactory,
        SignatureKind::GnosisSafe => Relay::Safe,
    };

    let proxy = wallet
        .proxy_address
        .ok_or_else(|| ConfigurationError::MissingProxyAddress {
            wallet: wallet.name.clone(),
            kind: wallet.signature_type,
        })?;

    Ok(ResolvedAddress {
        address: proxy,
        call_strategy: CallStrategy::Relayed,
        relay: Some(relay),
        signer: wallet.signing_address,
    })
}
