use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{CollateralId, InstallmentId, LoanId, TokenType, TriggerType, UserId};

/// audit log of everything the engine does; event names for on-chain actions
/// follow the contract's event vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // origination
    LoanCreated {
        loan_id: LoanId,
        borrower_id: UserId,
        principal: Money,
        collateral_token: TokenType,
        collateral_amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanActivated {
        loan_id: LoanId,
        creation_tx_hash: String,
        timestamp: DateTime<Utc>,
    },
    LoanCancelled {
        loan_id: LoanId,
        collateral_id: CollateralId,
        timestamp: DateTime<Utc>,
    },
    CollateralLocked {
        collateral_id: CollateralId,
        loan_id: LoanId,
        lock_tx_hash: String,
        timestamp: DateTime<Utc>,
    },

    // funding
    FundingInitiated {
        loan_id: LoanId,
        lender_id: UserId,
        order_ref: String,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanFunded {
        loan_id: LoanId,
        lender_id: UserId,
        amount: Money,
        funding_tx_hash: String,
        first_due_date: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    FundingReverted {
        loan_id: LoanId,
        order_ref: String,
        timestamp: DateTime<Utc>,
    },

    // repayment
    InstallmentScheduled {
        loan_id: LoanId,
        installment_id: InstallmentId,
        due_date: DateTime<Utc>,
        amount: Money,
    },
    PaymentMade {
        loan_id: LoanId,
        installment_id: InstallmentId,
        amount: Money,
        installments_paid: u32,
        timestamp: DateTime<Utc>,
    },
    PayoutDispatched {
        loan_id: LoanId,
        lender_id: UserId,
        payout_ref: String,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanCompleted {
        loan_id: LoanId,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },
    CollateralReleased {
        collateral_id: CollateralId,
        loan_id: LoanId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // default and liquidation
    LoanDefaulted {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    DefaultLiquidationInitiated {
        loan_id: LoanId,
        collateral_reserved: Money,
        timestamp: DateTime<Utc>,
    },
    LtvLiquidationInitiated {
        loan_id: LoanId,
        collateral_reserved: Money,
        timestamp: DateTime<Utc>,
    },
    DefaultLiquidationConfirmed {
        loan_id: LoanId,
        token_cost: Money,
        proceeds: Money,
        outstanding_after: Money,
        timestamp: DateTime<Utc>,
    },
    LtvLiquidationConfirmed {
        loan_id: LoanId,
        token_cost: Money,
        proceeds: Money,
        outstanding_after: Money,
        timestamp: DateTime<Utc>,
    },
    LiquidationCancelled {
        loan_id: LoanId,
        trigger: TriggerType,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_take_events_drains_store() {
        let mut store = EventStore::new();
        store.emit(Event::LoanDefaulted {
            loan_id: uuid::Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        assert_eq!(store.events().len(), 1);

        let taken = store.take_events();
        assert_eq!(taken.len(), 1);
        assert!(store.events().is_empty());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = Event::PaymentMade {
            loan_id: uuid::Uuid::new_v4(),
            installment_id: uuid::Uuid::new_v4(),
            amount: Money::from_major(1120),
            installments_paid: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
