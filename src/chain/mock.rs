//! In-memory chain collaborators for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use super::{Amount, ChainReadError, ChainReader, ChainWriteError, ChainWriter, TokenId, TxReceipt, UnsignedCall};
use crate::wallet::ResolvedAddress;

/// Reader backed by fixed balances and approvals.
pub(crate) struct MockReader {
    balances: Mutex<HashMap<(Address, TokenId), Amount>>,
    approvals: Mutex<HashSet<(Address, Address)>>,
    fail_balances: AtomicBool,
    fail_approvals: AtomicBool,
    balance_reads: AtomicUsize,
    approval_reads: AtomicUsize,
}

impl MockReader {
    pub(crate) fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            approvals: Mutex::new(HashSet::new()),
            fail_balances: AtomicBool::new(false),
            fail_approvals: AtomicBool::new(false),
            balance_reads: AtomicUsize::new(0),
            approval_reads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_balance(self, owner: Address, token_id: TokenId, amount: Amount) -> Self {
        self.balances.lock().unwrap().insert((owner, token_id), amount);
        self
    }

    pub(crate) fn with_approval(self, owner: Address, operator: Address) -> Self {
        self.set_approved(owner, operator);
        self
    }

    pub(crate) fn set_approved(&self, owner: Address, operator: Address) {
        self.approvals.lock().unwrap().insert((owner, operator));
    }

    pub(crate) fn fail_balances(&self) {
        self.fail_balances.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_approvals(&self) {
        self.fail_approvals.store(true, Ordering::SeqCst);
    }

    pub(crate) fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    pub(crate) fn approval_reads(&self) -> usize {
        self.approval_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockReader {
    async fn balance_of(&self, owner: Address, token_id: TokenId) -> Result<Amount, ChainReadError> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_balances.load(Ordering::SeqCst) {
            return Err(ChainReadError::Rpc {
                method: "balanceOf",
                reason: "connection refused".into(),
            });
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(owner, token_id))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn is_approved_for_all(&self, owner: Address, operator: Address) -> Result<bool, ChainReadError> {
        self.approval_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_approvals.load(Ordering::SeqCst) {
            return Err(ChainReadError::Rpc {
                method: "isApprovedForAll",
                reason: "connection refused".into(),
            });
        }
        Ok(self.approvals.lock().unwrap().contains(&(owner, operator)))
    }
}

/// Scripted result for one `submit` call.
#[derive(Debug, Clone)]
pub(crate) enum MockSubmit {
    Mined(B256),
    Reverted(B256),
    Fail(ChainWriteError),
}

/// One captured `submit` call.
#[derive(Debug, Clone)]
pub(crate) struct SubmittedCall {
    pub(crate) call: UnsignedCall,
    pub(crate) route: ResolvedAddress,
}

/// Writer that records every call and replays scripted results. Unscripted
/// calls are mined with a hash derived from the call index.
pub(crate) struct MockWriter {
    script: Mutex<VecDeque<MockSubmit>>,
    submitted: Mutex<Vec<SubmittedCall>>,
    call_count: AtomicUsize,
}

impl MockWriter {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn scripted(results: impl IntoIterator<Item = MockSubmit>) -> Self {
        let writer = Self::new();
        writer.script.lock().unwrap().extend(results);
        writer
    }

    pub(crate) fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<SubmittedCall> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn last_submitted(&self) -> Option<SubmittedCall> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

pub(crate) fn tx_hash(n: u8) -> B256 {
    B256::with_last_byte(n)
}

#[async_trait]
impl ChainWriter for MockWriter {
    async fn submit(&self, call: UnsignedCall, route: &ResolvedAddress) -> Result<TxReceipt, ChainWriteError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(SubmittedCall {
            call,
            route: *route,
        });

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| MockSubmit::Mined(tx_hash(index as u8 + 1))) {
            MockSubmit::Mined(tx_hash) => Ok(TxReceipt {
                tx_hash,
                success: true,
                block_number: Some(1),
            }),
            MockSubmit::Reverted(tx_hash) => Ok(TxReceipt {
                tx_hash,
                success: false,
                block_number: Some(1),
            }),
            MockSubmit::Fail(err) => Err(err),
        }
    }
}
