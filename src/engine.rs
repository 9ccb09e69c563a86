use hourglass_rs::{SafeTimeProvider, TimeSource};
use tracing::warn;

use crate::clients::{ChainClient, PaymentOrder, PriceOracle, SettlementGateway};
use crate::config::PlatformConfig;
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::funding::FundingProcessor;
use crate::liquidation::LiquidationEngine;
use crate::model::{Installment, Loan, PayoutAccount};
use crate::origination::{CreateLoanRequest, LoanOriginator};
use crate::repayment::RepaymentProcessor;
use crate::store::LedgerStore;
use crate::types::{LiquidationAssessment, LoanId, TriggerType, UserId};
use crate::webhook::{self, WebhookEvent};

/// the lending platform core
///
/// owns the ledger and the audit trail, and drives every loan through
/// its lifecycle. all mutations go through `&mut self`, which is the
/// single-writer guarantee: callers serialize access, and the
/// intermediate statuses carry the exclusion across suspended external
/// round trips
pub struct LendingEngine {
    pub config: PlatformConfig,
    pub store: LedgerStore,
    pub events: EventStore,
    oracle: Box<dyn PriceOracle>,
    gateway: Box<dyn SettlementGateway>,
    chain: Box<dyn ChainClient>,
    originator: LoanOriginator,
    funding: FundingProcessor,
    repayment: RepaymentProcessor,
    liquidation: LiquidationEngine,
}

impl LendingEngine {
    pub fn new(
        config: PlatformConfig,
        oracle: Box<dyn PriceOracle>,
        gateway: Box<dyn SettlementGateway>,
        chain: Box<dyn ChainClient>,
    ) -> Self {
        Self {
            originator: LoanOriginator::new(&config),
            funding: FundingProcessor::new(&config),
            repayment: RepaymentProcessor::new(&config),
            liquidation: LiquidationEngine::new(&config),
            config,
            store: LedgerStore::new(),
            events: EventStore::new(),
            oracle,
            gateway,
            chain,
        }
    }

    // --- origination ---

    /// draft a loan against a collateral pledge
    pub fn create_loan(
        &mut self,
        request: CreateLoanRequest,
        time_provider: &SafeTimeProvider,
    ) -> Result<LoanId> {
        self.originator.create_loan(
            request,
            self.oracle.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// cancel a draft loan; loan and collateral go together
    pub fn cancel_loan(
        &mut self,
        loan_id: LoanId,
        actor: UserId,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.originator
            .cancel_loan(loan_id, actor, &mut self.store, &mut self.events, time_provider)
    }

    /// verify the borrower's creation transaction and activate the loan
    pub fn confirm_onchain_creation(
        &mut self,
        loan_id: LoanId,
        tx_hash: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.originator.confirm_creation(
            loan_id,
            tx_hash,
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    // --- funding ---

    /// open a funding order for a lender over the full principal
    pub fn initiate_funding(
        &mut self,
        loan_id: LoanId,
        lender_id: UserId,
        amount: Money,
        time_provider: &SafeTimeProvider,
    ) -> Result<PaymentOrder> {
        self.funding.initiate_funding(
            loan_id,
            lender_id,
            amount,
            self.gateway.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// settle a funding order from a gateway webhook delivery
    pub fn on_funding_webhook(
        &mut self,
        body: &[u8],
        signature: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let event = self.verified_event(body, signature)?;
        self.funding.apply_settlement(
            event,
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// settle a funding order using system time
    pub fn on_funding_webhook_now(&mut self, body: &[u8], signature: &str) -> Result<()> {
        let time = SafeTimeProvider::new(TimeSource::System);
        self.on_funding_webhook(body, signature, &time)
    }

    // --- repayment ---

    /// open a collection order for the borrower's next installment
    pub fn pay_installment(&mut self, loan_id: LoanId, payer_id: UserId) -> Result<PaymentOrder> {
        self.repayment
            .pay_installment(loan_id, payer_id, self.gateway.as_ref(), &mut self.store)
    }

    /// settle an installment order from a gateway webhook delivery
    pub fn on_installment_webhook(
        &mut self,
        body: &[u8],
        signature: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let event = self.verified_event(body, signature)?;
        self.repayment.apply_settlement(
            event,
            self.gateway.as_ref(),
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// settle an installment order using system time
    pub fn on_installment_webhook_now(&mut self, body: &[u8], signature: &str) -> Result<()> {
        let time = SafeTimeProvider::new(TimeSource::System);
        self.on_installment_webhook(body, signature, &time)
    }

    // --- liquidation ---

    /// current liquidation eligibility with its reason string
    pub fn can_liquidate(
        &self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<LiquidationAssessment> {
        self.liquidation
            .assess(loan_id, self.oracle.as_ref(), &self.store, time_provider)
    }

    /// eligibility check against system time
    pub fn can_liquidate_now(&self, loan_id: LoanId) -> Result<LiquidationAssessment> {
        let time = SafeTimeProvider::new(TimeSource::System);
        self.can_liquidate(loan_id, &time)
    }

    /// reserve the loan's remaining collateral for disposal
    pub fn initiate_liquidation(
        &mut self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<TriggerType> {
        self.liquidation.initiate(
            loan_id,
            self.oracle.as_ref(),
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// settle a default-triggered reservation
    pub fn confirm_default_liquidation(
        &mut self,
        loan_id: LoanId,
        actual_token_cost: Money,
        min_proceeds: Money,
        time_provider: &SafeTimeProvider,
    ) -> Result<Money> {
        self.liquidation.confirm_default(
            loan_id,
            actual_token_cost,
            min_proceeds,
            self.oracle.as_ref(),
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// settle an ltv-triggered reservation
    pub fn confirm_ltv_liquidation(
        &mut self,
        loan_id: LoanId,
        actual_token_cost: Money,
        min_proceeds: Money,
        time_provider: &SafeTimeProvider,
    ) -> Result<Money> {
        self.liquidation.confirm_ltv(
            loan_id,
            actual_token_cost,
            min_proceeds,
            self.oracle.as_ref(),
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// drop a reservation without disposal
    pub fn cancel_liquidation(
        &mut self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.liquidation.cancel(
            loan_id,
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// mark an overdue loan as defaulted without disposing collateral
    pub fn mark_loan_as_defaulted(
        &mut self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        self.liquidation.mark_defaulted(
            loan_id,
            self.chain.as_ref(),
            &mut self.store,
            &mut self.events,
            time_provider,
        )
    }

    /// whether the grace period after the next due date has lapsed
    pub fn check_loan_default(
        &self,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<bool> {
        self.liquidation
            .check_default(loan_id, &self.store, time_provider)
    }

    // --- accounts and reads ---

    /// register a lender's payout destination
    pub fn register_payout_account(&mut self, owner_id: UserId, destination_ref: impl Into<String>) {
        self.store.upsert_payout_account(PayoutAccount {
            owner_id,
            destination_ref: destination_ref.into(),
            verified: true,
        });
    }

    pub fn loan(&self, loan_id: LoanId) -> Result<&Loan> {
        self.store.loan(loan_id)
    }

    pub fn loans_by_borrower(&self, borrower_id: UserId) -> Vec<&Loan> {
        self.store.loans_by_borrower(borrower_id)
    }

    /// active loans a lender could pick up
    pub fn open_for_funding(&self) -> Vec<&Loan> {
        self.store.open_for_funding()
    }

    pub fn installments(&self, loan_id: LoanId) -> &[Installment] {
        self.store.installments(loan_id)
    }

    pub fn loan_count(&self) -> usize {
        self.store.loan_count()
    }

    /// liquidation attempts recorded for a loan, from the audit trail
    pub fn liquidation_count(&self, loan_id: LoanId) -> usize {
        self.events
            .events()
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    Event::DefaultLiquidationInitiated { loan_id: id, .. }
                    | Event::LtvLiquidationInitiated { loan_id: id, .. }
                    if *id == loan_id
                )
            })
            .count()
    }

    fn verified_event(&self, body: &[u8], signature: &str) -> Result<WebhookEvent> {
        if !self.gateway.verify_signature(body, signature) {
            warn!("webhook delivery rejected: signature mismatch");
            return Err(LendingError::authorization("invalid webhook signature"));
        }
        webhook::decode_event(body)
    }
}
