use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::info;

use crate::clients::{ChainClient, ContractCall, PriceOracle};
use crate::config::PlatformConfig;
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::interest::InterestCalculator;
use crate::model::{Loan, PendingLiquidation};
use crate::store::LedgerStore;
use crate::types::{LiquidationAssessment, LoanId, LoanStatus, TriggerType};

/// eligibility reasons; callers and tests match on these literally
pub const REASON_DEFAULTED: &str = "Defaulted";
pub const REASON_LTV_BREACH: &str = "LTV breach";
pub const REASON_NOT_ELIGIBLE: &str = "Loan not eligible for liquidation";

pub const CONFLICT_ALREADY_INITIATED: &str = "Liquidation already initiated";
pub const CONFLICT_NO_PENDING: &str = "No pending liquidation";

/// two-phase collateral liquidation
///
/// phase one reserves: an eligible loan gets a `PendingLiquidation`
/// recording the trigger and the collateral reserved for disposal, with
/// the loan status untouched. phase two settles: a confirm whose
/// entry point matches the recorded trigger applies the sale proceeds
/// and finalizes the loan, or a cancel drops the reservation. the
/// reservation is honored as recorded; eligibility is not re-checked
/// at confirm time
pub struct LiquidationEngine {
    config: PlatformConfig,
    calculator: InterestCalculator,
}

impl LiquidationEngine {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            config: config.clone(),
            calculator: InterestCalculator::from_config(config),
        }
    }

    /// evaluate eligibility: default first, then collateral-value breach
    pub fn assess(
        &self,
        loan_id: LoanId,
        oracle: &dyn PriceOracle,
        store: &LedgerStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<LiquidationAssessment> {
        let loan = store.loan(loan_id)?;
        if !loan.is_repayable() {
            return Ok(LiquidationAssessment {
                eligible: false,
                reason: REASON_NOT_ELIGIBLE,
            });
        }
        if self.past_grace(loan, time_provider.now()) {
            return Ok(LiquidationAssessment {
                eligible: true,
                reason: REASON_DEFAULTED,
            });
        }

        let collateral = store.collateral(loan.collateral_ref)?;
        let owed = self
            .calculator
            .buffered_total_owed(loan.principal, loan.interest_rate_bps);
        let value = oracle.value_of(collateral.token_type, collateral.remaining_amount)?;
        if value < owed {
            return Ok(LiquidationAssessment {
                eligible: true,
                reason: REASON_LTV_BREACH,
            });
        }

        Ok(LiquidationAssessment {
            eligible: false,
            reason: REASON_NOT_ELIGIBLE,
        })
    }

    /// true once the next due date plus the grace period lies strictly in
    /// the past
    pub fn check_default(
        &self,
        loan_id: LoanId,
        store: &LedgerStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<bool> {
        Ok(self.past_grace(store.loan(loan_id)?, time_provider.now()))
    }

    fn past_grace(&self, loan: &Loan, now: DateTime<Utc>) -> bool {
        loan.is_repayable()
            && loan
                .next_due_date
                .map(|due| now > due + self.config.grace_period())
                .unwrap_or(false)
    }

    /// phase one: reserve the remaining collateral for disposal
    pub fn initiate(
        &self,
        loan_id: LoanId,
        oracle: &dyn PriceOracle,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<TriggerType> {
        if store.loan(loan_id)?.has_pending_liquidation() {
            return Err(LendingError::state_conflict(CONFLICT_ALREADY_INITIATED));
        }
        let assessment = self.assess(loan_id, oracle, store, time_provider)?;
        if !assessment.eligible {
            return Err(LendingError::state_conflict(REASON_NOT_ELIGIBLE));
        }
        let trigger = if assessment.reason == REASON_DEFAULTED {
            TriggerType::Defaulted
        } else {
            TriggerType::LtvBreach
        };
        let collateral_ref = store.loan(loan_id)?.collateral_ref;
        let reserved = store.collateral(collateral_ref)?.remaining_amount;

        chain.send_transaction(ContractCall::Liquidate { loan_id })?;

        let now = time_provider.now();
        store.loan_mut(loan_id)?.pending_liquidation = Some(PendingLiquidation {
            trigger,
            initiated_at: now,
            collateral_reserved: reserved,
        });
        events.emit(match trigger {
            TriggerType::Defaulted => Event::DefaultLiquidationInitiated {
                loan_id,
                collateral_reserved: reserved,
                timestamp: now,
            },
            TriggerType::LtvBreach => Event::LtvLiquidationInitiated {
                loan_id,
                collateral_reserved: reserved,
                timestamp: now,
            },
        });

        info!(%loan_id, ?trigger, %reserved, "liquidation initiated");
        Ok(trigger)
    }

    /// phase two for a default-triggered reservation; the loan ends
    /// `Defaulted`
    pub fn confirm_default(
        &self,
        loan_id: LoanId,
        actual_token_cost: Money,
        min_proceeds: Money,
        oracle: &dyn PriceOracle,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<Money> {
        self.confirm(
            loan_id,
            TriggerType::Defaulted,
            actual_token_cost,
            min_proceeds,
            oracle,
            chain,
            store,
            events,
            time_provider,
        )
    }

    /// phase two for an ltv-triggered reservation; the loan ends
    /// `Liquidated`
    pub fn confirm_ltv(
        &self,
        loan_id: LoanId,
        actual_token_cost: Money,
        min_proceeds: Money,
        oracle: &dyn PriceOracle,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<Money> {
        self.confirm(
            loan_id,
            TriggerType::LtvBreach,
            actual_token_cost,
            min_proceeds,
            oracle,
            chain,
            store,
            events,
            time_provider,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn confirm(
        &self,
        loan_id: LoanId,
        expected: TriggerType,
        actual_token_cost: Money,
        min_proceeds: Money,
        oracle: &dyn PriceOracle,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<Money> {
        let (pending, token_type, principal, rate_bps, collateral_ref) = {
            let loan = store.loan(loan_id)?;
            let pending = loan
                .pending_liquidation
                .filter(|pending| pending.trigger == expected)
                .ok_or_else(|| LendingError::state_conflict(CONFLICT_NO_PENDING))?;
            let collateral = store.collateral(loan.collateral_ref)?;
            (
                pending,
                collateral.token_type,
                loan.principal,
                loan.interest_rate_bps,
                loan.collateral_ref,
            )
        };
        if actual_token_cost > pending.collateral_reserved {
            return Err(LendingError::validation(
                "Token cost exceeds reserved collateral",
            ));
        }
        let proceeds = oracle.value_of(token_type, actual_token_cost)?;
        if proceeds < min_proceeds {
            return Err(LendingError::validation("Insufficient proceeds"));
        }

        chain.send_transaction(match expected {
            TriggerType::Defaulted => ContractCall::ConfirmDefaultLiquidation {
                loan_id,
                token_cost: actual_token_cost,
                min_proceeds,
            },
            TriggerType::LtvBreach => ContractCall::ConfirmLtvLiquidation {
                loan_id,
                token_cost: actual_token_cost,
                min_proceeds,
            },
        })?;

        let now = time_provider.now();
        let total_paid = {
            let loan = store.loan_mut(loan_id)?;
            loan.total_paid += proceeds;
            loan.status = match expected {
                TriggerType::Defaulted => LoanStatus::Defaulted,
                TriggerType::LtvBreach => LoanStatus::Liquidated,
            };
            loan.pending_liquidation = None;
            loan.total_paid
        };
        store.collateral_mut(collateral_ref)?.dispose(actual_token_cost);

        let owed = self.calculator.buffered_total_owed(principal, rate_bps);
        let outstanding_after = (owed - total_paid).max(Money::ZERO);
        events.emit(match expected {
            TriggerType::Defaulted => Event::DefaultLiquidationConfirmed {
                loan_id,
                token_cost: actual_token_cost,
                proceeds,
                outstanding_after,
                timestamp: now,
            },
            TriggerType::LtvBreach => Event::LtvLiquidationConfirmed {
                loan_id,
                token_cost: actual_token_cost,
                proceeds,
                outstanding_after,
                timestamp: now,
            },
        });

        info!(%loan_id, %proceeds, %outstanding_after, "liquidation confirmed");
        Ok(proceeds)
    }

    /// drop a reservation without disposal; the loan keeps its prior
    /// status
    pub fn cancel(
        &self,
        loan_id: LoanId,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let trigger = store
            .loan(loan_id)?
            .pending_liquidation
            .map(|pending| pending.trigger)
            .ok_or_else(|| LendingError::state_conflict(CONFLICT_NO_PENDING))?;

        chain.send_transaction(ContractCall::CancelLiquidation { loan_id })?;

        store.loan_mut(loan_id)?.pending_liquidation = None;
        events.emit(Event::LiquidationCancelled {
            loan_id,
            trigger,
            timestamp: time_provider.now(),
        });

        info!(%loan_id, ?trigger, "liquidation cancelled");
        Ok(())
    }

    /// mark an overdue loan `Defaulted` directly, without disposing of
    /// collateral
    pub fn mark_defaulted(
        &self,
        loan_id: LoanId,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        {
            let loan = store.loan(loan_id)?;
            if loan.has_pending_liquidation() {
                return Err(LendingError::state_conflict(CONFLICT_ALREADY_INITIATED));
            }
            if !self.past_grace(loan, time_provider.now()) {
                return Err(LendingError::state_conflict("Loan is not in default"));
            }
        }

        chain.send_transaction(ContractCall::MarkLoanAsDefaulted { loan_id })?;

        store.loan_mut(loan_id)?.status = LoanStatus::Defaulted;
        events.emit(Event::LoanDefaulted {
            loan_id,
            timestamp: time_provider.now(),
        });

        info!(%loan_id, "loan marked as defaulted");
        Ok(())
    }
}
