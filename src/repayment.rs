use chrono::{DateTime, Utc};
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

/// repayment: collecting installments from the borrower and paying the
/// lender out once each collection settles
pub struct RepaymentProcessor {
    config: PlatformConfig,
}

impl RepaymentProcessor {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// open a collection order for the earliest pending installment
    ///
    /// calling again before the first order settles replaces the stored
    /// reference and orphans the earlier order at the gateway; both
    /// deliveries still resolve to the same installment, so at most one
    /// can mark it paid
    pub fn pay_installment(
        &self,
        loan_id: LoanId,
        payer_id: UserId,
        gateway: &dyn SettlementGateway,
        store: &mut LedgerStore,
    ) -> Result<PaymentOrder> {
        let (installment_id, amount) = {
            let loan = store.loan(loan_id)?;
            if payer_id != loan.borrower_id {
                return Err(LendingError::authorization(
                    "only the borrower can repay this loan",
                ));
            }
            if !loan.is_repayable() {
                return Err(LendingError::state_conflict("Invalid loan status"));
            }
            let lender_id = loan
                .lender_id
                .ok_or_else(|| LendingError::state_conflict("Invalid loan status"))?;
            // the lender must be payable before the borrower is charged
            let payable = store
                .payout_account(lender_id)
                .map(|account| account.verified)
                .unwrap_or(false);
            if !payable {
                return Err(LendingError::validation(
                    "Lender payout account is not verified",
                ));
            }
            let installment = store
                .earliest_pending_installment(loan_id)
                .ok_or_else(|| LendingError::state_conflict("No pending installment"))?;
            (installment.id, installment.amount)
        };

        let order = gateway.create_order(amount, &format!("installment_{installment_id}"))?;
        store.installment_mut(loan_id, installment_id)?.external_order_ref =
            Some(order.order_ref.clone());

        debug!(%loan_id, %installment_id, order_ref = %order.order_ref, "installment order opened");
        Ok(order)
    }

    /// apply a verified settlement outcome for an installment order
    pub fn apply_settlement(
        &self,
        event: WebhookEvent,
        gateway: &dyn SettlementGateway,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        match event {
            WebhookEvent::PaymentCaptured { order_ref } => {
                self.installment_captured(&order_ref, gateway, chain, store, events, time_provider)
            }
            WebhookEvent::PaymentFailed { order_ref } => {
                // the installment stays pending; the borrower retries with
                // a fresh order
                debug!(order_ref, "installment payment failed; no state change");
                Ok(())
            }
        }
    }

    fn installment_captured(
        &self,
        order_ref: &str,
        gateway: &dyn SettlementGateway,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let Some((loan_id, installment_id)) = store.find_installment_by_order(order_ref) else {
            debug!(order_ref, "captured installment order matches no installment");
            return Ok(());
        };

        let now = time_provider.now();
        let status = store.loan(loan_id)?.status;
        let amount = {
            let installment = store.installment_mut(loan_id, installment_id)?;
            if !installment.is_pending() {
                // redelivery of an already-settled order
                return Ok(());
            }
            // capture arriving after the loan was closed: the charge exists
            // but repayment is over, so an operator has to step in
            if !status.is_repayable() {
                warn!(%loan_id, %installment_id, order_ref, "captured installment for a closed loan");
                return Err(LendingError::state_conflict("Repayment not in progress"));
            }
            installment.mark_paid(now);
            installment.amount
        };

        // the captured settlement is the source of truth: everything from
        // here on records or mirrors it, nothing rolls it back
        let (lender_id, installments_paid, completed, collateral_ref, total_paid) = {
            let loan = store.loan_mut(loan_id)?;
            loan.record_installment_payment(amount);
            let completed = loan.is_fully_paid();
            if completed {
                loan.status = LoanStatus::Completed;
                loan.completed_at = Some(now);
                loan.next_due_date = None;
            } else {
                loan.status = LoanStatus::Repaying;
                loan.next_due_date = Some(now + self.config.installment_period());
            }
            (
                loan.lender_id,
                loan.installments_paid,
                completed,
                loan.collateral_ref,
                loan.total_paid,
            )
        };

        events.emit(Event::PaymentMade {
            loan_id,
            installment_id,
            amount,
            installments_paid,
            timestamp: now,
        });

        if completed {
            let collateral = store.collateral_mut(collateral_ref)?;
            collateral.release();
            let returned = collateral.remaining_amount;
            events.emit(Event::CollateralReleased {
                collateral_id: collateral_ref,
                loan_id,
                amount: returned,
                timestamp: now,
            });
            events.emit(Event::LoanCompleted {
                loan_id,
                total_paid,
                timestamp: now,
            });
            info!(%loan_id, %total_paid, "loan completed, collateral released");
        } else {
            let due_date = now + self.config.installment_period();
            let next =
                Installment::scheduled(loan_id, due_date, store.loan(loan_id)?.installment_amount);
            events.emit(Event::InstallmentScheduled {
                loan_id,
                installment_id: next.id,
                due_date,
                amount: next.amount,
            });
            store.add_installment(next);
            info!(%loan_id, installments_paid, "installment settled");
        }

        let destination = lender_id.and_then(|lender| {
            store
                .payout_account(lender)
                .filter(|account| account.verified)
                .map(|account| account.destination_ref.clone())
        });
        self.dispatch_downstream(
            loan_id,
            lender_id,
            destination,
            amount,
            installments_paid,
            gateway,
            chain,
            events,
            now,
        )
    }

    /// payout and chain mirror run after the ledger is updated; failures
    /// are reported for reconciliation but never unwind the settlement
    #[allow(clippy::too_many_arguments)]
    fn dispatch_downstream(
        &self,
        loan_id: LoanId,
        lender_id: Option<UserId>,
        destination: Option<String>,
        amount: Money,
        installments_paid: u32,
        gateway: &dyn SettlementGateway,
        chain: &dyn ChainClient,
        events: &mut EventStore,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut outcome: Result<()> = Ok(());

        match (lender_id, destination) {
            (Some(lender_id), Some(destination)) => {
                let reference = format!("loan_{loan_id}_installment_{installments_paid}");
                match gateway.create_payout(&destination, amount, &reference) {
                    Ok(payout) => events.emit(Event::PayoutDispatched {
                        loan_id,
                        lender_id,
                        payout_ref: payout.payout_ref,
                        amount,
                        timestamp: now,
                    }),
                    Err(err) => {
                        warn!(%loan_id, %lender_id, "payout failed after capture; manual reconciliation required");
                        outcome = Err(err);
                    }
                }
            }
            _ => {
                warn!(%loan_id, "no payable lender on record after capture; manual reconciliation required");
                outcome = Err(LendingError::validation(
                    "Lender payout account is not verified",
                ));
            }
        }

        if let Err(err) = chain.send_transaction(ContractCall::PayInstallment { loan_id, amount }) {
            warn!(%loan_id, "chain mirror failed after capture; manual reconciliation required");
            if outcome.is_ok() {
                outcome = Err(err);
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockChainClient, MockSettlementGateway};
    use crate::model::{Collateral, Loan, PayoutAccount};
    use crate::types::{CollateralStatus, TokenType};
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        repayment: RepaymentProcessor,
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
        let lender = Uuid::new_v4();
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
        let first_due = time.now() + Duration::days(30);
        loan.mark_funded(lender, "0xfund".to_string(), time.now(), first_due);
        let loan_id = loan.id;
        let mut store = LedgerStore::new();
        store.insert_loan_package(loan, collateral);
        store.add_installment(Installment::scheduled(
            loan_id,
            first_due,
            Money::from_major(1_120),
        ));
        store.upsert_payout_account(PayoutAccount {
            owner_id: lender,
            destination_ref: "fa_lender".to_string(),
            verified: true,
        });
        Fixture {
            repayment: RepaymentProcessor::new(&config),
            gateway: MockSettlementGateway::new(),
            chain: MockChainClient::new(config.contract_address.clone()),
            store,
            events: EventStore::new(),
            time,
            loan_id,
            borrower,
            lender,
        }
    }

    fn pay(fx: &mut Fixture) -> PaymentOrder {
        fx.repayment
            .pay_installment(fx.loan_id, fx.borrower, &fx.gateway, &mut fx.store)
            .unwrap()
    }

    fn settle(fx: &mut Fixture, order_ref: &str) -> Result<()> {
        fx.repayment.apply_settlement(
            WebhookEvent::PaymentCaptured {
                order_ref: order_ref.to_string(),
            },
            &fx.gateway,
            &fx.chain,
            &mut fx.store,
            &mut fx.events,
            &fx.time,
        )
    }

    #[test]
    fn only_the_borrower_can_pay() {
        let mut fx = fixture();

        let err = fx
            .repayment
            .pay_installment(fx.loan_id, fx.lender, &fx.gateway, &mut fx.store)
            .unwrap_err();

        assert!(matches!(err, LendingError::Authorization { .. }));
    }

    #[test]
    fn payment_requires_a_verified_lender_account() {
        let mut fx = fixture();
        fx.store.upsert_payout_account(PayoutAccount {
            owner_id: fx.lender,
            destination_ref: "fa_lender".to_string(),
            verified: false,
        });

        let err = fx
            .repayment
            .pay_installment(fx.loan_id, fx.borrower, &fx.gateway, &mut fx.store)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "validation failed: Lender payout account is not verified"
        );
        assert!(fx.gateway.orders().is_empty());
    }

    #[test]
    fn repeat_invocation_replaces_the_order_reference() {
        let mut fx = fixture();

        let first = pay(&mut fx);
        let second = pay(&mut fx);

        assert_ne!(first.order_ref, second.order_ref);
        let installment = &fx.store.installments(fx.loan_id)[0];
        assert_eq!(
            installment.external_order_ref.as_deref(),
            Some(second.order_ref.as_str())
        );
        // the orphaned first order no longer resolves
        settle(&mut fx, &first.order_ref).unwrap();
        assert_eq!(fx.store.loan(fx.loan_id).unwrap().installments_paid, 0);
    }

    #[test]
    fn settlement_advances_the_loan_and_schedules_the_next_installment() {
        let mut fx = fixture();
        let order = pay(&mut fx);
        let settled_at = fx.time.now();

        settle(&mut fx, &order.order_ref).unwrap();

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Repaying);
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.total_paid, Money::from_major(1_120));
        assert_eq!(loan.next_due_date, Some(settled_at + Duration::days(30)));
        let installments = fx.store.installments(fx.loan_id);
        assert_eq!(installments.len(), 2);
        assert_eq!(installments[1].due_date, settled_at + Duration::days(30));
        // lender payout and chain mirror both went out
        assert_eq!(fx.gateway.payouts().len(), 1);
        assert_eq!(fx.gateway.payouts()[0].destination_ref, "fa_lender");
        assert!(fx
            .chain
            .submitted()
            .contains(&ContractCall::PayInstallment {
                loan_id: fx.loan_id,
                amount: Money::from_major(1_120),
            }));
    }

    #[test]
    fn redelivered_settlement_is_a_no_op() {
        let mut fx = fixture();
        let order = pay(&mut fx);
        settle(&mut fx, &order.order_ref).unwrap();

        settle(&mut fx, &order.order_ref).unwrap();

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(fx.store.installments(fx.loan_id).len(), 2);
        assert_eq!(fx.gateway.payouts().len(), 1);
        assert_eq!(fx.chain.submitted().len(), 1);
    }

    #[test]
    fn final_settlement_completes_the_loan_and_releases_collateral() {
        let mut fx = fixture();
        for _ in 0..3 {
            let order = pay(&mut fx);
            settle(&mut fx, &order.order_ref).unwrap();
        }

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.installments_paid, 3);
        assert_eq!(loan.total_paid, Money::from_major(3_360));
        assert!(loan.completed_at.is_some());
        assert_eq!(loan.next_due_date, None);
        let collateral = fx.store.collateral(loan.collateral_ref).unwrap();
        assert_eq!(collateral.status, CollateralStatus::Released);
        // three paid installments, no fourth scheduled
        assert_eq!(fx.store.installments(fx.loan_id).len(), 3);
        assert!(fx
            .events
            .events()
            .iter()
            .any(|event| matches!(event, Event::LoanCompleted { .. })));
    }

    #[test]
    fn payout_failure_surfaces_but_keeps_the_settlement() {
        let mut fx = fixture();
        let order = pay(&mut fx);
        fx.gateway.set_fail_payouts(true);

        let err = settle(&mut fx, &order.order_ref).unwrap_err();

        assert!(matches!(err, LendingError::ExternalService { .. }));
        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.status, LoanStatus::Repaying);
        // the chain mirror still went out
        assert_eq!(fx.chain.submitted().len(), 1);
    }

    #[test]
    fn failed_payment_leaves_everything_pending() {
        let mut fx = fixture();
        let order = pay(&mut fx);

        fx.repayment
            .apply_settlement(
                WebhookEvent::PaymentFailed {
                    order_ref: order.order_ref,
                },
                &fx.gateway,
                &fx.chain,
                &mut fx.store,
                &mut fx.events,
                &fx.time,
            )
            .unwrap();

        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Funded);
        assert_eq!(loan.installments_paid, 0);
        assert!(fx.store.installments(fx.loan_id)[0].is_pending());
    }

    #[test]
    fn draft_loans_cannot_be_repaid() {
        let mut fx = fixture();
        fx.store.loan_mut(fx.loan_id).unwrap().status = LoanStatus::Active;

        let err = fx
            .repayment
            .pay_installment(fx.loan_id, fx.borrower, &fx.gateway, &mut fx.store)
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid loan status");
    }

    #[test]
    fn late_capture_after_default_is_rejected() {
        let mut fx = fixture();
        let order = pay(&mut fx);
        // the loan was marked defaulted while the order was in flight
        fx.store.loan_mut(fx.loan_id).unwrap().status = LoanStatus::Defaulted;

        let err = settle(&mut fx, &order.order_ref).unwrap_err();

        assert_eq!(err.to_string(), "Repayment not in progress");
        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Defaulted);
        assert_eq!(loan.installments_paid, 0);
        assert_eq!(loan.total_paid, Money::ZERO);
        assert_eq!(fx.store.installments(fx.loan_id).len(), 1);
        assert!(fx.store.installments(fx.loan_id)[0].is_pending());
        assert!(fx.gateway.payouts().is_empty());
        assert!(fx.chain.submitted().is_empty());
    }

    #[test]
    fn late_capture_after_liquidation_is_rejected() {
        let mut fx = fixture();
        let order = pay(&mut fx);
        let collateral_ref = fx.store.loan(fx.loan_id).unwrap().collateral_ref;
        {
            let loan = fx.store.loan_mut(fx.loan_id).unwrap();
            loan.status = LoanStatus::Liquidated;
            // disposal proceeds already applied at confirm time
            loan.total_paid = Money::from_major(3_000);
        }
        fx.store.collateral_mut(collateral_ref).unwrap().status = CollateralStatus::Liquidated;

        let err = settle(&mut fx, &order.order_ref).unwrap_err();

        assert!(matches!(err, LendingError::StateConflict { .. }));
        let loan = fx.store.loan(fx.loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Liquidated);
        assert_eq!(loan.total_paid, Money::from_major(3_000));
        assert_eq!(
            fx.store.collateral(collateral_ref).unwrap().status,
            CollateralStatus::Liquidated
        );
        assert!(fx.gateway.payouts().is_empty());
    }
}
