//! Contract ABIs, Polygon deployment addresses and call encoding.

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol;
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::chain::UnsignedCall;

sol! {
    #[sol(rpc)]
    interface IConditionalTokens {
        function balanceOf(address account, uint256 id) external view returns (uint256);
        function isApprovedForAll(address account, address operator) external view returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
        function redeemPositions(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] indexSets
        ) external;
    }

    #[sol(rpc)]
    interface INegRiskAdapter {
        function redeemPositions(bytes32 conditionId, uint256[] amounts) external;
    }

    #[sol(rpc)]
    interface IProxyWalletFactory {
        struct ProxyCall {
            uint8 typeCode;
            address to;
            uint256 value;
            bytes data;
        }

        function proxy(ProxyCall[] calls) external payable returns (bytes[] returnValues);
    }

    #[sol(rpc)]
    interface IGnosisSafe {
        function nonce() external view returns (uint256);
        function getThreshold() external view returns (uint256);
        function getTransactionHash(
            address to,
            uint256 value,
            bytes data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);
        function execTransaction(
            address to,
            uint256 value,
            bytes data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address payable refundReceiver,
            bytes signatures
        ) external payable returns (bool success);

        event ExecutionSuccess(bytes32 txHash, uint256 payment);
        event ExecutionFailure(bytes32 txHash, uint256 payment);
    }

    #[sol(rpc)]
    interface ICtfExchange {
        function getPolyProxyWalletAddress(address owner) external view returns (address);
        function getSafeAddress(address owner) external view returns (address);
    }
}

pub const CONDITIONAL_TOKENS: Address = address!("0x4D97DCd97eC945f40cF65F87097ACe5EA0476045");
pub const NEG_RISK_ADAPTER: Address = address!("0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296");
pub const CTF_EXCHANGE: Address = address!("0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E");
pub const PROXY_WALLET_FACTORY: Address = address!("0xaB45c5A4B0c941a2F231C04C3f49182e1A254052");
pub const USDC: Address = address!("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174");

/// `ProxyCall.typeCode` for a plain CALL.
const PROXY_CALL_TYPE: u8 = 1;

/// Gas the Safe forwards to the inner call.
pub const SAFE_TX_GAS: u64 = 300_000;

/// Binary markets redeem both outcome slots in one call.
const BINARY_INDEX_SETS: [u64; 2] = [1, 2];

/// Deployment addresses used to build calls. Defaults are Polygon mainnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractAddresses {
    #[serde(default = "default_conditional_tokens")]
    pub conditional_tokens: Address,
    #[serde(default = "default_neg_risk_adapter")]
    pub neg_risk_adapter: Address,
    #[serde(default = "default_exchange")]
    pub exchange: Address,
    #[serde(default = "default_proxy_factory")]
    pub proxy_factory: Address,
    #[serde(default = "default_collateral")]
    pub collateral: Address,
    /// ERC1155 operator to approve before redeeming. Defaults to the NegRiskAdapter.
    #[serde(default)]
    pub operator: Option<Address>,
}

fn default_conditional_tokens() -> Address {
    CONDITIONAL_TOKENS
}
fn default_neg_risk_adapter() -> Address {
    NEG_RISK_ADAPTER
}
fn default_exchange() -> Address {
    CTF_EXCHANGE
}
fn default_proxy_factory() -> Address {
    PROXY_WALLET_FACTORY
}
fn default_collateral() -> Address {
    USDC
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            conditional_tokens: CONDITIONAL_TOKENS,
            neg_risk_adapter: NEG_RISK_ADAPTER,
            exchange: CTF_EXCHANGE,
            proxy_factory: PROXY_WALLET_FACTORY,
            collateral: USDC,
            operator: None,
        }
    }
}

impl ContractAddresses {
    pub fn operator(&self) -> Address {
        self.operator.unwrap_or(self.neg_risk_adapter)
    }

    /// `ConditionalTokens.setApprovalForAll(operator, true)`.
    pub fn approval_call(&self, operator: Address) -> UnsignedCall {
        let call = IConditionalTokens::setApprovalForAllCall {
            operator,
            approved: true,
        };
        UnsignedCall::new(self.conditional_tokens, call.abi_encode(), "setApprovalForAll")
    }

    /// Redeem call for one condition. Neg-risk markets go through the adapter
    /// with explicit amounts; standard markets burn both index sets on the CTF.
    pub fn redeem_call(&self, condition_id: B256, neg_risk: bool, amounts: &[U256; 2]) -> UnsignedCall {
        if neg_risk {
            let call = INegRiskAdapter::redeemPositionsCall {
                conditionId: condition_id,
                amounts: amounts.to_vec(),
            };
            UnsignedCall::new(self.neg_risk_adapter, call.abi_encode(), "NegRiskAdapter.redeemPositions")
        } else {
            let call = IConditionalTokens::redeemPositionsCall {
                collateralToken: self.collateral,
                parentCollectionId: B256::ZERO,
                conditionId: condition_id,
                indexSets: BINARY_INDEX_SETS.iter().map(|i| U256::from(*i)).collect(),
            };
            UnsignedCall::new(self.conditional_tokens, call.abi_encode(), "ConditionalTokens.redeemPositions")
        }
    }
}

/// Wrap `inner` in `ProxyWalletFactory.proxy([...])`. The factory forwards the
/// call from the sender's proxy wallet.
pub fn proxy_factory_calldata(inner: &UnsignedCall) -> Bytes {
    let call = IProxyWalletFactory::proxyCall {
        calls: vec![IProxyWalletFactory::ProxyCall {
            typeCode: PROXY_CALL_TYPE,
            to: inner.to,
            value: U256::ZERO,
            data: inner.data.clone(),
        }],
    };
    Bytes::from(call.abi_encode())
}

/// `getTransactionHash` arguments for a zero-value CALL with no refund.
pub fn safe_tx_hash_call(inner: &UnsignedCall, nonce: U256) -> IGnosisSafe::getTransactionHashCall {
    IGnosisSafe::getTransactionHashCall {
        to: inner.to,
        value: U256::ZERO,
        data: inner.data.clone(),
        operation: 0,
        safeTxGas: U256::from(SAFE_TX_GAS),
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        _nonce: nonce,
    }
}

/// `execTransaction` calldata matching [`safe_tx_hash_call`].
pub fn safe_exec_calldata(inner: &UnsignedCall, signatures: Bytes) -> Bytes {
    let call = IGnosisSafe::execTransactionCall {
        to: inner.to,
        value: U256::ZERO,
        data: inner.data.clone(),
        operation: 0,
        safeTxGas: U256::from(SAFE_TX_GAS),
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        signatures,
    };
    Bytes::from(call.abi_encode())
}

/// Safe expects `v` of an eth_sign signature shifted by 4 (31/32).
pub fn safe_signature_bytes(mut sig: [u8; 65]) -> Bytes {
    let v = sig[64];
    if v == 27 || v == 28 {
        sig[64] = v + 4;
    }
    Bytes::from(sig.to_vec())
}

#[cfg(test)]
mod tests {
    use alloy::primitives::b256;

    use super::*;

    const CONDITION: B256 = b256!("0xccc0000000000000000000000000000000000000000000000000000000000000");

    #[test]
    fn approval_targets_conditional_tokens() {
        let contracts = ContractAddresses::default();
        let call = contracts.approval_call(NEG_RISK_ADAPTER);

        assert_eq!(call.to, CONDITIONAL_TOKENS);
        let decoded = IConditionalTokens::setApprovalForAllCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.operator, NEG_RISK_ADAPTER);
        assert!(decoded.approved);
    }

    #[test]
    fn neg_risk_redeem_carries_amounts() {
        let contracts = ContractAddresses::default();
        let amounts = [U256::from(10_500_000u64), U256::ZERO];
        let call = contracts.redeem_call(CONDITION, true, &amounts);

        assert_eq!(call.to, NEG_RISK_ADAPTER);
        let decoded = INegRiskAdapter::redeemPositionsCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.conditionId, CONDITION);
        assert_eq!(decoded.amounts, amounts.to_vec());
    }

    #[test]
    fn standard_redeem_uses_both_index_sets() {
        let contracts = ContractAddresses::default();
        let call = contracts.redeem_call(CONDITION, false, &[U256::from(1u64), U256::ZERO]);

        assert_eq!(call.to, CONDITIONAL_TOKENS);
        let decoded = IConditionalTokens::redeemPositionsCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.collateralToken, USDC);
        assert_eq!(decoded.parentCollectionId, B256::ZERO);
        assert_eq!(decoded.indexSets, vec![U256::from(1u64), U256::from(2u64)]);
    }

    #[test]
    fn proxy_envelope_wraps_inner_call() {
        let contracts = ContractAddresses::default();
        let inner = contracts.approval_call(NEG_RISK_ADAPTER);
        let data = proxy_factory_calldata(&inner);

        let decoded = IProxyWalletFactory::proxyCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.calls.len(), 1);
        assert_eq!(decoded.calls[0].typeCode, 1);
        assert_eq!(decoded.calls[0].to, CONDITIONAL_TOKENS);
        assert_eq!(decoded.calls[0].data, inner.data);
    }

    #[test]
    fn safe_exec_matches_hash_arguments() {
        let contracts = ContractAddresses::default();
        let inner = contracts.redeem_call(CONDITION, true, &[U256::from(5u64), U256::ZERO]);
        let hash_args = safe_tx_hash_call(&inner, U256::from(7u64));
        let exec = IGnosisSafe::execTransactionCall::abi_decode(&safe_exec_calldata(&inner, Bytes::from(vec![1u8; 65])))
            .unwrap();

        assert_eq!(exec.to, hash_args.to);
        assert_eq!(exec.data, hash_args.data);
        assert_eq!(exec.safeTxGas, hash_args.safeTxGas);
        assert_eq!(exec.signatures.len(), 65);
    }

    #[test]
    fn safe_signature_shifts_v() {
        let mut sig = [0u8; 65];
        sig[64] = 27;
        assert_eq!(safe_signature_bytes(sig)[64], 31);
        sig[64] = 1;
        assert_eq!(safe_signature_bytes(sig)[64], 1);
    }

    #[test]
    fn operator_defaults_to_adapter() {
        let mut contracts = ContractAddresses::default();
        assert_eq!(contracts.operator(), NEG_RISK_ADAPTER);
        contracts.operator = Some(CTF_EXCHANGE);
        assert_eq!(contracts.operator(), CTF_EXCHANGE);
    }
}
