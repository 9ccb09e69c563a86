use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info, warn};

use crate::clients::{ChainClient, ContractCall, PaymentOrder, SettlementGateway};
use crate::config::PlatformConfig;
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::model::Installment;
use crate::store::LedgerStore;
use crate::types::{LoanId, LoanStatus, UserId};
use crate::webhook::WebhookEvent;

/// funding: opening the lender's payment order and settling its outcome
///
/// the `FundingPending` status is the mutual-exclusion marker for the
/// whole round trip: it is set before the gateway order is handed out
/// and only leaves via a settlement outcome
pub struct FundingProcessor {
    config: PlatformConfig,
}

impl FundingProcessor {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// open a collection order for the full principal and park the loan
    /// in `FundingPending`
    pub fn initiate_funding(
        &self,
        loan_id: LoanId,
        lender_id: UserId,
        amount: Money,
        gateway: &dyn SettlementGateway,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentOrder> {
        let loan = store.loan_mut(loan_id)?;
        if loan.status != LoanStatus::Active {
            return Err(LendingError::state_conflict("Invalid loan status"));
        }
        if lender_id == loan.borrower_id {
            return Err(LendingError::authorization(
                "a borrower cannot fund their own loan",
            ));
        }
        if amount != loan.principal {
            return Err(LendingError::validation(
                "Funding amount must equal the loan principal",
            ));
        }

        let order = gateway.create_order(amount, &format!("loan_{loan_id}"))?;
        loan.status = LoanStatus::FundingPending;
        loan.funding_order_ref = Some(order.order_ref.clone());
        loan.lender_id = Some(lender_id);

        events.emit(Event::FundingInitiated {
            loan_id,
            lender_id,
            order_ref: order.order_ref.clone(),
            amount,
            timestamp: time_provider.now(),
        });

        info!(%loan_id, %lender_id, order_ref = %order.order_ref, "funding initiated");
        Ok(order)
    }

    /// apply a verified settlement outcome for a funding order
    pub fn apply_settlement(
        &self,
        event: WebhookEvent,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        match event {
            WebhookEvent::PaymentCaptured { order_ref } => {
                self.funding_captured(&order_ref, chain, store, events, time_provider)
            }
            WebhookEvent::PaymentFailed { order_ref } => {
                self.funding_failed(&order_ref, store, events, time_provider)
            }
        }
    }

    fn funding_captured(
        &self,
        order_ref: &str,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let Some(loan_id) = store.find_loan_by_funding_order(order_ref) else {
            debug!(order_ref, "captured funding order matches no loan");
            return Ok(());
        };

        let snapshot = store.loan(loan_id)?.clone();
        match snapshot.status {
            LoanStatus::FundingPending => {}
            // redelivery after the loan already advanced
            LoanStatus::Funded
            | LoanStatus::Repaying
            | LoanStatus::Completed
            | LoanStatus::Defaulted
            | LoanStatus::Liquidated => return Ok(()),
            // capture arriving after the order was reverted: the charge
            // exists but the loan moved on, so an operator has to step in
            LoanStatus::Active | LoanStatus::Draft => {
                warn!(%loan_id, order_ref, "captured payment for a reverted funding order");
                return Err(LendingError::state_conflict("Funding not in progress"));
            }
        }
        let Some(lender_id) = snapshot.lender_id else {
            return Err(LendingError::state_conflict("Funding not in progress"));
        };

        // mirror on chain before the loan advances; a failure here leaves
        // the captured charge unreconciled and the loan parked
        let funding_tx_hash = chain
            .send_transaction(ContractCall::FundLoan {
                loan_id,
                amount: snapshot.principal,
            })
            .map_err(|err| {
                warn!(%loan_id, order_ref, "chain funding failed after capture; manual reconciliation required");
                err
            })?;
        let mined = chain
            .get_receipt(&funding_tx_hash)?
            .map(|receipt| receipt.success)
            .unwrap_or(false);
        if !mined {
            warn!(%loan_id, order_ref, tx_hash = %funding_tx_hash, "funding transaction not mined successfully; manual reconciliation required");
            return Err(LendingError::external(
                "chain mirror",
                "funding transaction failed",
            ));
        }

        let now = time_provider.now();
        let first_due = now
            + self
                .config
                .first_due_offset(snapshot.duration_seconds, snapshot.total_installments);
        let loan = store.loan_mut(loan_id)?;
        loan.mark_funded(lender_id, funding_tx_hash.clone(), now, first_due);
        let installment = Installment::scheduled(loan_id, first_due, snapshot.installment_amount);

        events.emit(Event::LoanFunded {
            loan_id,
            lender_id,
            amount: snapshot.principal,
            funding_tx_hash,
            first_due_date: first_due,
            timestamp: now,
        });
        events.emit(Event::InstallmentScheduled {
            loan_id,
            installment_id: installment.id,
            due_date: first_due,
            amount: installment.amount,
        });
        store.add_installment(installment);

        info!(%loan_id, %lender_id, "loan funded");
        Ok(())
    }

    fn funding_failed(
        &self,
        order_ref: &str,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let Some(loan_id) = store.find_loan_by_funding_order(order_ref) else {
            debug!(order_ref, "failed funding order matches no loan");
            return Ok(());
        };

        let loan = store.loan_mut(loan_id)?;
        if loan.status != LoanStatus::FundingPending {
            // already reverted or already funded; nothing to undo
            return Ok(());
        }

        // the order reference stays behind so a redelivery still resolves
        // to this loan and lands in the no-op arm above
        loan.status = LoanStatus::Active;
        loan.lender_id = None;
        events.emit(Event::FundingReverted {
            loan_id,
            order_ref: order_ref.to_string(),
            timestamp: time_provider.now(),
        });

        info!(%loan_id, order_ref, "funding reverted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockChainClient, MockSettlementGateway};
    use crate::model::{Collateral, Loan};
    use crate::types::TokenType;
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        funding: FundingProcessor,
        gateway: MockSettlementGateway,
        chain: MockChainClient,
        store: LedgerStore,
        events: EventStore,
        time: SafeTimeProvider,
        loan_id: LoanId,
        borrower: UserId,
        lender: UserId,
    }

    fn fixture() -> Fixture {
        let config = PlatformConfig::default();
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let borrower = Uuid::new_v4();
        let collateral = Collateral::pledge(
            borrower,
            TokenType::Eth,
            Money::from_decimal(dec!(0.05)),
            Money::from_major(10_000),
        );
        let mut loan = Loan::draft(
            borrower,
            collateral.id,
            Money::from_major(3_000),
            1_200,
            3_000,
            7_776_000,
            3,
            Money::from_major(1_120),
            time.now(),
        );
        loan.status = LoanStatus::Active;
        let loan_id = loan.id;
        let mut store = LedgerStore::new();
        store.insert_loan_package(loan, collateral);
        Fixture {
            funding: FundingProcessor::new(&config),
            gateway: MockSettlementGateway::new(),
            chain: MockChainClient::new(config.contract_address.clone()),
            store,
            events: EventStore::new(),
            time,
            loan_id,
            borrower,
            lender: Uuid::new_v4(),
        }
    }

    fn initiate(fx: &mut Fixture) -> PaymentOrder {
        fx.funding
            .initiate_funding(
                fx.loan_id,
                fx.lender,
                Money::from_major(3_000),
                &fx.gateway,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap()
    }

    #[test]
    fn initiation_parks_the_loan_and_keeps_the_order_ref() {
        let mut fx = fixture();

        let order = initiate(&mut fx);

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::FundingPending);
        assert_eq!(loan.funding_order_ref.as_deref(), Some(order.order_ref.as_str()));
        assert_eq!(loan.lender_id, Some(fx.lender));
        assert_eq!(order.amount, Money::from_major(3_000));
    }

    #[test]
    fn second_initiation_is_blocked_while_one_is_pending() {
        let mut fx = fixture();
        initiate(&mut fx);

        let err = fx
            .funding
            .initiate_funding(
                fx.loan_id,
                Uuid::new_v4(),
                Money::from_major(3_000),
                &fx.gateway,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid loan status");
        assert_eq!(fx.gateway.orders().len(), 1);
    }

    #[test]
    fn borrowers_cannot_fund_their_own_loans() {
        let mut fx = fixture();

        let err = fx
            .funding
            .initiate_funding(
                fx.loan_id,
                fx.borrower,
                Money::from_major(3_000),
                &fx.gateway,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap_err();

        assert!(matches!(err, LendingError::Authorization { .. }));
    }

    #[test]
    fn partial_amounts_are_rejected() {
        let mut fx = fixture();

        let err = fx
            .funding
            .initiate_funding(
                fx.loan_id,
                fx.lender,
                Money::from_major(2_999),
                &fx.gateway,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap_err();

        assert!(matches!(err, LendingError::Validation { .. }));
        assert_eq!(fx.store.loan(fx.loan_id).unwrap().status, LoanStatus::Active);
    }

    #[test]
    fn capture_funds_the_loan_and_schedules_the_first_installment() {
        let mut fx = fixture();
        let order = initiate(&mut fx);
        let funded_at = fx.time.now();

        fx.funding
            .apply_settlement(
                WebhookEvent::PaymentCaptured {
                    order_ref: order.order_ref.clone(),
                },
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap();

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Funded);
        assert_eq!(loan.funded_at, Some(funded_at));
        assert_eq!(loan.next_due_date, Some(funded_at + Duration::days(30)));
        let installments = fx.store.installments(fx.loan_id);
        assert_eq!(installments.len(), 1);
        assert_eq!(installments[0].due_date, funded_at + Duration::days(30));
        assert_eq!(
            fx.chain.submitted(),
            vec![ContractCall::FundLoan {
                loan_id: fx.loan_id,
                amount: Money::from_major(3_000),
            }]
        );
    }

    #[test]
    fn redelivered_capture_is_a_no_op() {
        let mut fx = fixture();
        let order = initiate(&mut fx);
        let captured = WebhookEvent::PaymentCaptured {
            order_ref: order.order_ref.clone(),
        };
        fx.funding
            .apply_settlement(captured.clone(), &fx.chain, &mut fx.store, &mut fx.events, &fx.time)
            .unwrap();

        fx.funding
            .apply_settlement(captured, &fx.chain, &mut fx.store, &mut fx.events, &fx.time)
            .unwrap();

        assert_eq!(fx.store.installments(fx.loan_id).len(), 1);
        assert_eq!(fx.chain.submitted().len(), 1);
    }

    #[test]
    fn chain_failure_after_capture_parks_the_loan() {
        let mut fx = fixture();
        let order = initiate(&mut fx);
        fx.chain.set_fail_sends(true);

        let err = fx
            .funding
            .apply_settlement(
                WebhookEvent::PaymentCaptured {
                    order_ref: order.order_ref.clone(),
                },
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap_err();

        assert!(matches!(err, LendingError::ExternalService { .. }));
        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::FundingPending);
        assert!(fx.store.installments(fx.loan_id).is_empty());
    }

    #[test]
    fn failed_payment_reverts_to_active_and_tolerates_redelivery() {
        let mut fx = fixture();
        let order = initiate(&mut fx);
        let failed = WebhookEvent::PaymentFailed {
            order_ref: order.order_ref.clone(),
        };

        fx.funding
            .apply_settlement(failed.clone(), &fx.chain, &mut fx.store, &mut fx.events, &fx.time)
            .unwrap();

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.lender_id, None);
        assert_eq!(loan.funding_order_ref.as_deref(), Some(order.order_ref.as_str()));

        // same delivery again changes nothing
        fx.funding
            .apply_settlement(failed, &fx.chain, &mut fx.store, &mut fx.events, &fx.time)
            .unwrap();
        assert_eq!(fx.store.loan(fx.loan_id).unwrap().status, LoanStatus::Active);
    }

    #[test]
    fn capture_after_revert_needs_an_operator() {
        let mut fx = fixture();
        let order = initiate(&mut fx);
        fx.funding
            .apply_settlement(
                WebhookEvent::PaymentFailed {
                    order_ref: order.order_ref.clone(),
                },
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap();

        let err = fx
            .funding
            .apply_settlement(
                WebhookEvent::PaymentCaptured {
                    order_ref: order.order_ref,
                },
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "Funding not in progress");
        assert!(fx.chain.submitted().is_empty());
    }

    #[test]
    fn unknown_order_refs_are_ignored() {
        let mut fx = fixture();

        fx.funding
            .apply_settlement(
                WebhookEvent::PaymentCaptured {
                    order_ref: "order_unknown".to_string(),
                },
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap();

        assert_eq!(fx.store.loan(fx.loan_id).unwrap().status, LoanStatus::Active);
    }
}
