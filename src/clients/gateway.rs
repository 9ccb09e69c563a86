use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::webhook;

const SERVICE: &str = "settlement gateway";

/// collection order opened at the settlement gateway
///
/// the order reference is the correlation key: webhook deliveries quote
/// it back and the ledger resolves it to a loan or installment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub order_ref: String,
    pub amount: Money,
    pub receipt: String,
}

/// payout dispatched to a lender's verified destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub payout_ref: String,
    pub destination_ref: String,
    pub amount: Money,
    pub reference: String,
}

/// fiat money movement: collection orders in, payouts out
pub trait SettlementGateway {
    /// open a collection order for `amount`, tagged with a receipt label
    fn create_order(&self, amount: Money, receipt: &str) -> Result<PaymentOrder>;

    /// push funds to a lender destination
    fn create_payout(&self, destination_ref: &str, amount: Money, reference: &str)
        -> Result<Payout>;

    /// check a webhook signature against the shared secret
    fn verify_signature(&self, body: &[u8], signature: &str) -> bool;
}

struct GatewayState {
    orders: Vec<PaymentOrder>,
    payouts: Vec<Payout>,
    counter: u64,
    fail_orders: bool,
    fail_payouts: bool,
}

/// in-memory gateway for tests and demos
///
/// clones share state, so a test can keep a handle and inspect orders
/// after the engine has taken ownership of its copy
#[derive(Clone)]
pub struct MockSettlementGateway {
    secret: String,
    state: Arc<Mutex<GatewayState>>,
}

impl MockSettlementGateway {
    pub fn new() -> Self {
        Self::with_secret("gateway_test_secret")
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            state: Arc::new(Mutex::new(GatewayState {
                orders: Vec::new(),
                payouts: Vec::new(),
                counter: 0,
                fail_orders: false,
                fail_payouts: false,
            })),
        }
    }

    pub fn set_fail_orders(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_orders = fail;
        }
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_payouts = fail;
        }
    }

    pub fn orders(&self) -> Vec<PaymentOrder> {
        self.state
            .lock()
            .map(|state| state.orders.clone())
            .unwrap_or_default()
    }

    pub fn payouts(&self) -> Vec<Payout> {
        self.state
            .lock()
            .map(|state| state.payouts.clone())
            .unwrap_or_default()
    }

    /// produce a valid signature header for `body`, as the live gateway would
    pub fn sign(&self, body: &[u8]) -> String {
        webhook::compute_signature(&self.secret, body)
    }
}

impl Default for MockSettlementGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementGateway for MockSettlementGateway {
    fn create_order(&self, amount: Money, receipt: &str) -> Result<PaymentOrder> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        if state.fail_orders {
            return Err(LendingError::external(SERVICE, "order creation refused"));
        }
        state.counter += 1;
        let order = PaymentOrder {
            order_ref: format!("order_{:06}", state.counter),
            amount,
            receipt: receipt.to_string(),
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    fn create_payout(
        &self,
        destination_ref: &str,
        amount: Money,
        reference: &str,
    ) -> Result<Payout> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        if state.fail_payouts {
            return Err(LendingError::external(SERVICE, "payout refused"));
        }
        state.counter += 1;
        let payout = Payout {
            payout_ref: format!("pout_{:06}", state.counter),
            destination_ref: destination_ref.to_string(),
            amount,
            reference: reference.to_string(),
        };
        state.payouts.push(payout.clone());
        Ok(payout)
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> bool {
        webhook::verify_signature(&self.secret, body, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_get_sequential_refs() {
        let gateway = MockSettlementGateway::new();

        let first = gateway
            .create_order(Money::from_major(3_000), "loan_a")
            .unwrap();
        let second = gateway
            .create_order(Money::from_major(1_120), "installment_b")
            .unwrap();

        assert_eq!(first.order_ref, "order_000001");
        assert_eq!(second.order_ref, "order_000002");
        assert_eq!(gateway.orders().len(), 2);
    }

    #[test]
    fn failure_toggle_refuses_orders() {
        let gateway = MockSettlementGateway::new();
        gateway.set_fail_orders(true);

        let err = gateway
            .create_order(Money::from_major(3_000), "loan_a")
            .unwrap_err();
        assert!(matches!(err, LendingError::ExternalService { .. }));
        assert!(gateway.orders().is_empty());
    }

    #[test]
    fn signs_and_verifies_its_own_bodies() {
        let gateway = MockSettlementGateway::new();
        let body = br#"{"event":"payment.captured"}"#;

        let signature = gateway.sign(body);

        assert!(gateway.verify_signature(body, &signature));
        assert!(!gateway.verify_signature(b"tampered", &signature));
    }

    #[test]
    fn payouts_record_destination_and_reference() {
        let gateway = MockSettlementGateway::new();

        let payout = gateway
            .create_payout("fa_lender_1", Money::from_major(1_120), "loan_x_inst_1")
            .unwrap();

        assert_eq!(payout.destination_ref, "fa_lender_1");
        assert_eq!(gateway.payouts(), vec![payout]);
    }
}
