use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::types::{LoanId, TokenType};

const SERVICE: &str = "chain mirror";

/// call against the on-chain loan registry
///
/// `CreateLoan` is only ever decoded from an inbound transaction and is
/// compared literally against the stored loan, so it keeps the raw string
/// identifier; the remaining variants are outbound commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    CreateLoan {
        loan_id: String,
        amount: Money,
        interest_rate_bps: u32,
        ltv_bps: u32,
        duration_seconds: i64,
        collateral_token: TokenType,
        collateral_amount: Money,
    },
    FundLoan {
        loan_id: LoanId,
        amount: Money,
    },
    PayInstallment {
        loan_id: LoanId,
        amount: Money,
    },
    Liquidate {
        loan_id: LoanId,
    },
    ConfirmDefaultLiquidation {
        loan_id: LoanId,
        token_cost: Money,
        min_proceeds: Money,
    },
    ConfirmLtvLiquidation {
        loan_id: LoanId,
        token_cost: Money,
        min_proceeds: Money,
    },
    CancelLiquidation {
        loan_id: LoanId,
    },
    MarkLoanAsDefaulted {
        loan_id: LoanId,
    },
}

/// transaction as fetched from a node, with its decoded call if the
/// input data matched the registry abi
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub hash: String,
    pub to: String,
    pub call: Option<ContractCall>,
}

/// event log emitted by a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub event_signature: String,
}

/// mined-transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: String,
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

/// gateway to the chain that mirrors ledger state
pub trait ChainClient {
    /// submit a registry call; returns the transaction hash
    fn send_transaction(&self, call: ContractCall) -> Result<String>;

    /// fetch a transaction by hash, `None` if the node does not know it
    fn get_transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>>;

    /// fetch the mined receipt for a hash, `None` if not yet mined
    fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;
}

struct ChainState {
    submitted: Vec<ContractCall>,
    transactions: HashMap<String, ChainTransaction>,
    receipts: HashMap<String, TransactionReceipt>,
    counter: u64,
    fail_sends: bool,
    contract_address: String,
}

/// in-memory chain for tests and demos
///
/// submitted calls get deterministic hashes and successful receipts;
/// transactions for externally-submitted hashes are scripted with
/// [`MockChainClient::insert_transaction`] and
/// [`MockChainClient::insert_receipt`]. clones share state
#[derive(Clone)]
pub struct MockChainClient {
    state: Arc<Mutex<ChainState>>,
}

impl MockChainClient {
    pub fn new(contract_address: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                submitted: Vec::new(),
                transactions: HashMap::new(),
                receipts: HashMap::new(),
                counter: 0,
                fail_sends: false,
                contract_address: contract_address.into(),
            })),
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_sends = fail;
        }
    }

    pub fn submitted(&self) -> Vec<ContractCall> {
        self.state
            .lock()
            .map(|state| state.submitted.clone())
            .unwrap_or_default()
    }

    pub fn insert_transaction(&self, tx: ChainTransaction) {
        if let Ok(mut state) = self.state.lock() {
            state.transactions.insert(tx.hash.clone(), tx);
        }
    }

    pub fn insert_receipt(&self, receipt: TransactionReceipt) {
        if let Ok(mut state) = self.state.lock() {
            state.receipts.insert(receipt.tx_hash.clone(), receipt);
        }
    }

    /// script a mined `CreateLoan` transaction: tx plus a successful
    /// receipt carrying `event_signature` in its logs
    pub fn script_creation(&self, tx_hash: &str, call: ContractCall, event_signature: &str) {
        let to = self
            .state
            .lock()
            .map(|state| state.contract_address.clone())
            .unwrap_or_default();
        self.insert_transaction(ChainTransaction {
            hash: tx_hash.to_string(),
            to,
            call: Some(call),
        });
        self.insert_receipt(TransactionReceipt {
            tx_hash: tx_hash.to_string(),
            success: true,
            logs: vec![LogEntry {
                event_signature: event_signature.to_string(),
            }],
        });
    }
}

impl ChainClient for MockChainClient {
    fn send_transaction(&self, call: ContractCall) -> Result<String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        if state.fail_sends {
            return Err(LendingError::external(SERVICE, "transaction rejected"));
        }
        state.counter += 1;
        let hash = format!("0x{:064x}", state.counter);
        let to = state.contract_address.clone();
        state.submitted.push(call.clone());
        state.transactions.insert(
            hash.clone(),
            ChainTransaction {
                hash: hash.clone(),
                to,
                call: Some(call),
            },
        );
        state.receipts.insert(
            hash.clone(),
            TransactionReceipt {
                tx_hash: hash.clone(),
                success: true,
                logs: Vec::new(),
            },
        );
        Ok(hash)
    }

    fn get_transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>> {
        let state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        Ok(state.transactions.get(tx_hash).cloned())
    }

    fn get_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        Ok(state.receipts.get(tx_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sends_record_calls_with_deterministic_hashes() {
        let chain = MockChainClient::new("0xcontract");
        let loan_id = Uuid::new_v4();

        let hash = chain
            .send_transaction(ContractCall::Liquidate { loan_id })
            .unwrap();

        assert_eq!(hash.len(), 66);
        assert!(hash.ends_with('1'));
        assert_eq!(chain.submitted(), vec![ContractCall::Liquidate { loan_id }]);
        let receipt = chain.get_receipt(&hash).unwrap().unwrap();
        assert!(receipt.success);
    }

    #[test]
    fn failure_toggle_rejects_sends() {
        let chain = MockChainClient::new("0xcontract");
        chain.set_fail_sends(true);

        let err = chain
            .send_transaction(ContractCall::CancelLiquidation {
                loan_id: Uuid::new_v4(),
            })
            .unwrap_err();

        assert!(matches!(err, LendingError::ExternalService { .. }));
        assert!(chain.submitted().is_empty());
    }

    #[test]
    fn unknown_hashes_come_back_empty() {
        let chain = MockChainClient::new("0xcontract");

        assert!(chain.get_transaction("0xmissing").unwrap().is_none());
        assert!(chain.get_receipt("0xmissing").unwrap().is_none());
    }

    #[test]
    fn scripted_creation_is_fetchable() {
        let chain = MockChainClient::new("0xcontract");
        let call = ContractCall::CreateLoan {
            loan_id: "loan-1".to_string(),
            amount: Money::from_major(3_000),
            interest_rate_bps: 1_200,
            ltv_bps: 6_000,
            duration_seconds: 7_776_000,
            collateral_token: TokenType::Eth,
            collateral_amount: Money::from_major(1),
        };

        chain.script_creation("0xabc", call.clone(), "LoanCreated(...)");

        let tx = chain.get_transaction("0xabc").unwrap().unwrap();
        assert_eq!(tx.to, "0xcontract");
        assert_eq!(tx.call, Some(call));
        let receipt = chain.get_receipt("0xabc").unwrap().unwrap();
        assert_eq!(receipt.logs[0].event_signature, "LoanCreated(...)");
    }
}
