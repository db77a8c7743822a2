//! alloy-backed chain collaborators for Polygon.
//!
//! Every configured RPC URL is tried in order. Reads fall through to the next
//! URL on any error; writes only fall through while nothing has been sent,
//! since a sent transaction may already be on chain.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, Log, TxKind, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::{LocalSigner, PrivateKeySigner};
use alloy::signers::Signer as _;
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use log::{info, warn};
use polymarket_client_sdk::POLYGON;
use tokio::sync::Mutex;

use super::{Amount, ChainReadError, ChainReader, ChainWriteError, ChainWriter, TokenId, TxReceipt, UnsignedCall};
use crate::contracts::{
    proxy_factory_calldata, safe_exec_calldata, safe_signature_bytes, safe_tx_hash_call, ContractAddresses,
    ICtfExchange, IConditionalTokens, IGnosisSafe,
};
use crate::wallet::{CallStrategy, Relay, ResolvedAddress, SignatureKind};

const DIRECT_GAS_LIMIT: u64 = 300_000;
const RELAYED_GAS_LIMIT: u64 = 400_000;

fn read_providers(rpc_urls: &[String]) -> Vec<(String, DynProvider)> {
    rpc_urls
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(url) => Some((raw.clone(), ProviderBuilder::new().connect_http(url).erased())),
            Err(e) => {
                warn!("Skipping invalid RPC URL {}: {}", raw, e);
                None
            }
        })
        .collect()
}

/// Reads balances and approvals from the ConditionalTokens contract.
pub struct RpcChainReader {
    providers: Vec<(String, DynProvider)>,
    contracts: ContractAddresses,
}

impl RpcChainReader {
    pub fn new(rpc_urls: &[String], contracts: ContractAddresses) -> Self {
        Self {
            providers: read_providers(rpc_urls),
            contracts,
        }
    }

    async fn read<T, F, Fut>(&self, method: &'static str, f: F) -> Result<T, ChainReadError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T, alloy::contract::Error>>,
    {
        if self.providers.is_empty() {
            return Err(ChainReadError::NoEndpoints);
        }

        let mut last_err = String::new();
        for (url, provider) in &self.providers {
            match f(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} via {} failed: {}", method, url, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(ChainReadError::Rpc {
            method,
            reason: last_err,
        })
    }

    /// Proxy or Safe address the exchange derives for `owner`. Used when a
    /// wallet's configuration leaves the proxy address out.
    pub async fn lookup_proxy_address(&self, kind: SignatureKind, owner: Address) -> Result<Option<Address>, ChainReadError> {
        let exchange = self.contracts.exchange;
        let address = match kind {
            SignatureKind::Eoa => return Ok(None),
            SignatureKind::PolyProxy => {
                self.read("getPolyProxyWalletAddress", |p| async move {
                    ICtfExchange::new(exchange, p).getPolyProxyWalletAddress(owner).call().await
                })
                .await?
            }
            SignatureKind::GnosisSafe => {
                self.read("getSafeAddress", |p| async move {
                    ICtfExchange::new(exchange, p).getSafeAddress(owner).call().await
                })
                .await?
            }
        };
        Ok((address != Address::ZERO).then_some(address))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn balance_of(&self, owner: Address, token_id: TokenId) -> Result<Amount, ChainReadError> {
        let ctf = self.contracts.conditional_tokens;
        self.read("balanceOf", |p| async move {
            IConditionalTokens::new(ctf, p).balanceOf(owner, token_id).call().await
        })
        .await
    }

    async fn is_approved_for_all(&self, owner: Address, operator: Address) -> Result<bool, ChainReadError> {
        let ctf = self.contracts.conditional_tokens;
        self.read("isApprovedForAll", |p| async move {
            IConditionalTokens::new(ctf, p).isApprovedForAll(owner, operator).call().await
        })
        .await
    }
}

/// Signs with one wallet's key and submits direct, proxy-factory or Safe
/// transactions. Submissions are serialised so the signer's nonces never
/// interleave.
pub struct RpcChainWriter {
    signer: PrivateKeySigner,
    rpc_urls: Vec<String>,
    read_providers: Vec<(String, DynProvider)>,
    proxy_factory: Address,
    receipt_timeout: Duration,
    submit_lock: Mutex<()>,
}

impl RpcChainWriter {
    pub fn new(
        private_key: &str,
        rpc_urls: Vec<String>,
        contracts: &ContractAddresses,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainWriteError> {
        // The key itself must never end up in an error message.
        let signer = LocalSigner::from_str(private_key.trim())
            .map_err(|_| ChainWriteError::Signing("private key is not a valid 32-byte hex string".into()))?
            .with_chain_id(Some(POLYGON));

        if rpc_urls.is_empty() {
            return Err(ChainWriteError::NoEndpoints);
        }

        Ok(Self {
            signer,
            read_providers: read_providers(&rpc_urls),
            rpc_urls,
            proxy_factory: contracts.proxy_factory,
            receipt_timeout,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn send(&self, to: Address, data: Bytes, gas: u64) -> Result<TransactionReceipt, ChainWriteError> {
        let mut last_err = ChainWriteError::NoEndpoints;

        for url in &self.rpc_urls {
            let provider = match ProviderBuilder::new()
                .wallet(self.signer.clone())
                .connect(url.as_str())
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!("Connect to {} failed: {}", url, e);
                    last_err = ChainWriteError::Connect {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    };
                    continue;
                }
            };

            let tx_request = TransactionRequest {
                to: Some(TxKind::Call(to)),
                input: data.clone().into(),
                value: Some(U256::ZERO),
                gas: Some(gas),
                ..Default::default()
            };

            let pending = match provider.send_transaction(tx_request).await {
                Ok(tx) => tx,
                Err(e) => {
                    warn!("Send via {} failed: {}", url, e);
                    last_err = ChainWriteError::Send(e.to_string());
                    continue;
                }
            };

            // Sent: from here on a retry could double-submit.
            let tx_hash = *pending.tx_hash();
            info!("Transaction {} sent via {}, waiting for receipt", tx_hash, url);

            return pending
                .with_timeout(Some(self.receipt_timeout))
                .get_receipt()
                .await
                .map_err(|e| ChainWriteError::Receipt {
                    tx_hash,
                    reason: e.to_string(),
                });
        }

        Err(last_err)
    }

    async fn safe_read<C: SolCall>(&self, safe: Address, call: C) -> Result<C::Return, ChainWriteError> {
        let mut last_err = ChainWriteError::NoEndpoints;
        let input = Bytes::from(call.abi_encode());

        for (url, provider) in &self.read_providers {
            let request = TransactionRequest::default().to(safe).input(input.clone().into());
            match provider.call(request).await {
                Ok(raw) => {
                    return C::abi_decode_returns(&raw)
                        .map_err(|e| ChainWriteError::Relay(format!("Safe {} returned malformed data: {}", C::SIGNATURE, e)));
                }
                Err(e) => {
                    warn!("Safe {} via {} failed: {}", C::SIGNATURE, url, e);
                    last_err = ChainWriteError::Relay(format!(
                        "Safe {} on {} failed: {}. MagicLink/email accounts use a Polymarket proxy, not a Safe",
                        C::SIGNATURE,
                        safe,
                        e
                    ));
                }
            }
        }

        Err(last_err)
    }

    /// Owner signature over the Safe transaction hash, in the packed
    /// `r || s || v+4` form Safe expects for eth_sign signatures.
    async fn sign_safe_tx(&self, safe: Address, inner: &UnsignedCall) -> Result<Bytes, ChainWriteError> {
        let threshold = self.safe_read(safe, IGnosisSafe::getThresholdCall {}).await?;
        if threshold > U256::from(1u64) {
            return Err(ChainWriteError::Relay(format!(
                "Safe {} needs {} signatures; only single-owner Safes are supported",
                safe, threshold
            )));
        }

        let nonce = self.safe_read(safe, IGnosisSafe::nonceCall {}).await?;
        let safe_tx_hash = self.safe_read(safe, safe_tx_hash_call(inner, nonce)).await?;

        const EIP191_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";
        let mut message = Vec::with_capacity(EIP191_PREFIX.len() + 32);
        message.extend_from_slice(EIP191_PREFIX);
        message.extend_from_slice(safe_tx_hash.as_slice());

        let sig = self
            .signer
            .sign_hash(&keccak256(&message))
            .await
            .map_err(|e| ChainWriteError::Signing(e.to_string()))?;

        Ok(safe_signature_bytes(sig.as_bytes()))
    }
}

/// Safe `execTransaction` does not revert when the inner call fails; it emits
/// `ExecutionFailure` instead.
fn safe_execution_succeeded<'a>(logs: impl IntoIterator<Item = &'a Log>, safe: Address) -> bool {
    let success = IGnosisSafe::ExecutionSuccess::SIGNATURE_HASH;
    let failure = IGnosisSafe::ExecutionFailure::SIGNATURE_HASH;
    let mut saw_success = false;

    for log in logs {
        if log.address != safe {
            continue;
        }
        match log.topics().first() {
            Some(topic) if *topic == failure => return false,
            Some(topic) if *topic == success => saw_success = true,
            _ => {}
        }
    }
    saw_success
}

#[async_trait]
impl ChainWriter for RpcChainWriter {
    async fn submit(&self, call: UnsignedCall, route: &ResolvedAddress) -> Result<TxReceipt, ChainWriteError> {
        if route.signer != self.signer.address() {
            return Err(ChainWriteError::WrongSigner {
                expected: route.signer,
                actual: self.signer.address(),
            });
        }

        let _guard = self.submit_lock.lock().await;

        let (receipt, success) = match (route.call_strategy, route.relay) {
            (CallStrategy::Direct, _) => {
                info!("Sending {} from {} to {}", call.label, route.signer, call.to);
                let receipt = self.send(call.to, call.data.clone(), DIRECT_GAS_LIMIT).await?;
                let success = receipt.status();
                (receipt, success)
            }
            (CallStrategy::Relayed, Some(Relay::ProxyFactory)) => {
                info!(
                    "Relaying {} through proxy wallet {} via factory {}",
                    call.label, route.address, self.proxy_factory
                );
                let data = proxy_factory_calldata(&call);
                let receipt = self.send(self.proxy_factory, data, RELAYED_GAS_LIMIT).await?;
                let success = receipt.status();
                (receipt, success)
            }
            (CallStrategy::Relayed, Some(Relay::Safe)) => {
                info!("Relaying {} through Safe {} (execTransaction)", call.label, route.address);
                let signatures = self.sign_safe_tx(route.address, &call).await?;
                let data = safe_exec_calldata(&call, signatures);
                let receipt = self.send(route.address, data, RELAYED_GAS_LIMIT).await?;
                let success = receipt.status() && safe_execution_succeeded(receipt.logs().iter().map(|l| &l.inner), route.address);
                (receipt, success)
            }
            (CallStrategy::Relayed, None) => {
                return Err(ChainWriteError::Relay(format!(
                    "relayed call for {} has no relay envelope",
                    route.address
                )));
            }
        };

        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            success,
            block_number: receipt.block_number,
        })
    }
}
