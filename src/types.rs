use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a collateral position
pub type CollateralId = Uuid;

/// unique identifier for an installment
pub type InstallmentId = Uuid;

/// unique identifier for a platform user (borrower or lender)
pub type UserId = Uuid;

/// loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// requested off-chain, on-chain creation not yet verified
    Draft,
    /// on-chain creation verified, listed for funding
    Active,
    /// funding order open at the gateway, settlement pending
    FundingPending,
    /// principal disbursed, no installment paid yet
    Funded,
    /// at least one installment paid
    Repaying,
    /// every installment paid
    Completed,
    /// missed payment past the grace period
    Defaulted,
    /// collateral disposed after an LTV breach
    Liquidated,
}

impl LoanStatus {
    /// loan carries live debt and accepts installment payments
    pub fn is_repayable(&self) -> bool {
        matches!(self, LoanStatus::Funded | LoanStatus::Repaying)
    }

    /// no further transitions leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::Defaulted | LoanStatus::Liquidated
        )
    }
}

/// collateral position status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralStatus {
    /// pledged with the draft loan, lock not yet verified
    Pending,
    /// held exclusively against an open loan
    Locked,
    /// returned to the owner after settlement
    Released,
    /// disposed through the liquidation protocol
    Liquidated,
}

/// installment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
}

/// supported collateral tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Eth,
    Btc,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Eth => "eth",
            TokenType::Btc => "btc",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// what made a loan eligible when liquidation was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Defaulted,
    LtvBreach,
}

/// result of a liquidation eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiquidationAssessment {
    pub eligible: bool,
    pub reason: &'static str,
}
