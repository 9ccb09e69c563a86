use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{
    CollateralId, CollateralStatus, InstallmentId, InstallmentStatus, LoanId, LoanStatus,
    TokenType, TriggerType, UserId,
};

/// collateral pledged with a loan request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollateralSpec {
    pub token_type: TokenType,
    pub amount: Money,
}

/// authoritative loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub borrower_id: UserId,
    pub lender_id: Option<UserId>,

    // terms, fixed at creation
    pub principal: Money,
    pub interest_rate_bps: u32,
    pub ltv_bps: u32,
    pub duration_seconds: i64,
    pub collateral_ref: CollateralId,
    pub total_installments: u32,
    pub installment_amount: Money,

    // repayment tracking
    pub status: LoanStatus,
    pub total_paid: Money,
    pub installments_paid: u32,
    pub next_due_date: Option<DateTime<Utc>>,

    // external references
    pub funding_order_ref: Option<String>,
    pub funding_tx_hash: Option<String>,

    // dates
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // liquidation reservation; the mutual-exclusion lock lives on the loan
    // it protects so the two can never drift apart
    pub pending_liquidation: Option<PendingLiquidation>,
}

impl Loan {
    /// create a draft loan awaiting on-chain creation
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        borrower_id: UserId,
        collateral_ref: CollateralId,
        principal: Money,
        interest_rate_bps: u32,
        ltv_bps: u32,
        duration_seconds: i64,
        total_installments: u32,
        installment_amount: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            lender_id: None,
            principal,
            interest_rate_bps,
            ltv_bps,
            duration_seconds,
            collateral_ref,
            total_installments,
            installment_amount,
            status: LoanStatus::Draft,
            total_paid: Money::ZERO,
            installments_paid: 0,
            next_due_date: None,
            funding_order_ref: None,
            funding_tx_hash: None,
            created_at,
            funded_at: None,
            completed_at: None,
            pending_liquidation: None,
        }
    }

    /// loan carries live debt and accepts installment payments
    pub fn is_repayable(&self) -> bool {
        self.status.is_repayable()
    }

    pub fn is_fully_paid(&self) -> bool {
        self.installments_paid == self.total_installments
    }

    pub fn has_pending_liquidation(&self) -> bool {
        self.pending_liquidation.is_some()
    }

    /// record disbursement of the principal
    pub fn mark_funded(
        &mut self,
        lender_id: UserId,
        funding_tx_hash: String,
        funded_at: DateTime<Utc>,
        first_due_date: DateTime<Utc>,
    ) {
        self.status = LoanStatus::Funded;
        self.lender_id = Some(lender_id);
        self.funding_tx_hash = Some(funding_tx_hash);
        self.funded_at = Some(funded_at);
        self.next_due_date = Some(first_due_date);
    }

    /// record one settled installment; the caller decides whether the loan
    /// is now Repaying or Completed
    pub fn record_installment_payment(&mut self, amount: Money) {
        self.installments_paid += 1;
        self.total_paid += amount;
    }
}

/// pledged collateral position backing a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collateral {
    pub id: CollateralId,
    pub owner_id: UserId,
    pub token_type: TokenType,
    /// pledged token quantity
    pub amount: Money,
    /// quantity still held after any liquidation disposals
    pub remaining_amount: Money,
    /// local-currency valuation captured at creation
    pub locked_value_local: Money,
    pub lock_tx_hash: Option<String>,
    pub status: CollateralStatus,
}

impl Collateral {
    /// create a pending position from a pledge
    pub fn pledge(
        owner_id: UserId,
        token_type: TokenType,
        amount: Money,
        locked_value_local: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            token_type,
            amount,
            remaining_amount: amount,
            locked_value_local,
            lock_tx_hash: None,
            status: CollateralStatus::Pending,
        }
    }

    /// lock after the on-chain creation is verified
    pub fn lock(&mut self, tx_hash: String) {
        self.status = CollateralStatus::Locked;
        self.lock_tx_hash = Some(tx_hash);
    }

    /// return to the owner after full settlement
    pub fn release(&mut self) {
        self.status = CollateralStatus::Released;
    }

    /// record a liquidation disposal of `token_cost` tokens
    pub fn dispose(&mut self, token_cost: Money) {
        self.remaining_amount = (self.remaining_amount - token_cost).max(Money::ZERO);
        self.status = CollateralStatus::Liquidated;
    }
}

/// one scheduled repayment unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub due_date: DateTime<Utc>,
    pub amount: Money,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub external_order_ref: Option<String>,
}

impl Installment {
    pub fn scheduled(loan_id: LoanId, due_date: DateTime<Utc>, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            due_date,
            amount,
            status: InstallmentStatus::Pending,
            paid_at: None,
            external_order_ref: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InstallmentStatus::Pending
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.status = InstallmentStatus::Paid;
        self.paid_at = Some(at);
    }
}

/// reservation made when liquidation is initiated; at most one per loan,
/// stored on the Loan itself
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingLiquidation {
    pub trigger: TriggerType,
    pub initiated_at: DateTime<Utc>,
    /// remaining collateral amount reserved for disposal
    pub collateral_reserved: Money,
}

/// gateway payout destination registered for a lender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub owner_id: UserId,
    /// opaque token naming the destination at the gateway
    pub destination_ref: String,
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn draft_loan() -> Loan {
        Loan::draft(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::from_major(3000),
            1200,
            5000,
            3 * crate::config::INSTALLMENT_PERIOD_SECONDS,
            3,
            Money::from_major(1120),
            t0(),
        )
    }

    #[test]
    fn test_draft_loan_starts_clean() {
        let loan = draft_loan();
        assert_eq!(loan.status, LoanStatus::Draft);
        assert_eq!(loan.total_paid, Money::ZERO);
        assert_eq!(loan.installments_paid, 0);
        assert!(loan.lender_id.is_none());
        assert!(loan.next_due_date.is_none());
        assert!(!loan.has_pending_liquidation());
    }

    #[test]
    fn test_mark_funded_sets_disbursement_fields() {
        let mut loan = draft_loan();
        let lender = Uuid::new_v4();
        let first_due = t0() + chrono::Duration::days(30);

        loan.mark_funded(lender, "0xabc".to_string(), t0(), first_due);

        assert_eq!(loan.status, LoanStatus::Funded);
        assert_eq!(loan.lender_id, Some(lender));
        assert_eq!(loan.funded_at, Some(t0()));
        assert_eq!(loan.next_due_date, Some(first_due));
        assert!(loan.is_repayable());
    }

    #[test]
    fn test_installment_payment_accumulates() {
        let mut loan = draft_loan();
        loan.record_installment_payment(Money::from_major(1120));
        loan.record_installment_payment(Money::from_major(1120));

        assert_eq!(loan.installments_paid, 2);
        assert_eq!(loan.total_paid, Money::from_major(2240));
        assert!(!loan.is_fully_paid());

        loan.record_installment_payment(Money::from_major(1120));
        assert!(loan.is_fully_paid());
    }

    #[test]
    fn test_collateral_lock_and_release() {
        let mut collateral = Collateral::pledge(
            Uuid::new_v4(),
            TokenType::Eth,
            Money::from_str_exact("0.5").unwrap(),
            Money::from_major(100_000),
        );
        assert_eq!(collateral.status, CollateralStatus::Pending);
        assert_eq!(collateral.remaining_amount, collateral.amount);

        collateral.lock("0xdeadbeef".to_string());
        assert_eq!(collateral.status, CollateralStatus::Locked);
        assert_eq!(collateral.lock_tx_hash.as_deref(), Some("0xdeadbeef"));

        collateral.release();
        assert_eq!(collateral.status, CollateralStatus::Released);
    }

    #[test]
    fn test_collateral_dispose_floors_at_zero() {
        let mut collateral = Collateral::pledge(
            Uuid::new_v4(),
            TokenType::Btc,
            Money::from_str_exact("0.1").unwrap(),
            Money::from_major(500_000),
        );
        collateral.dispose(Money::from_str_exact("0.2").unwrap());
        assert_eq!(collateral.remaining_amount, Money::ZERO);
        assert_eq!(collateral.status, CollateralStatus::Liquidated);
    }

    #[test]
    fn test_loan_round_trips_through_json() {
        let loan = draft_loan();
        let json = serde_json::to_string(&loan).unwrap();
        let back: Loan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loan);
    }
}
