use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};

/// seconds in one 30-day installment period
pub const INSTALLMENT_PERIOD_SECONDS: i64 = 2_592_000;

/// platform parameters shared by validation, scheduling, and liquidation
///
/// amounts are local currency (rupees); durations are seconds to match the
/// on-chain representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub min_loan_amount: Money,
    pub max_loan_amount: Money,
    /// interest rate cap in basis points
    pub max_interest_rate_bps: u32,
    /// basis-point divisor used by all mirrored integer formulas
    pub rate_divisor: u32,
    /// entry loan-to-value ceiling
    pub ltv_ceiling: Rate,
    /// multiplier on total obligation when testing for an LTV breach
    pub safety_buffer: Rate,
    pub min_duration_seconds: i64,
    pub max_duration_seconds: i64,
    pub installment_period_seconds: i64,
    pub grace_period_seconds: i64,
    /// lending contract expected as the target of creation transactions
    pub contract_address: String,
    /// event signature that must appear in a creation receipt's logs
    pub creation_event_signature: String,
}

impl PlatformConfig {
    /// production parameter set; mirrors the deployed contract constants
    pub fn standard(contract_address: impl Into<String>) -> Self {
        Self {
            min_loan_amount: Money::from_major(500),
            max_loan_amount: Money::from_major(5000),
            max_interest_rate_bps: 5000,
            rate_divisor: 10_000,
            ltv_ceiling: Rate::from_percentage(60),
            safety_buffer: Rate::from_percentage(103),
            min_duration_seconds: INSTALLMENT_PERIOD_SECONDS,
            max_duration_seconds: 6 * INSTALLMENT_PERIOD_SECONDS,
            installment_period_seconds: INSTALLMENT_PERIOD_SECONDS,
            grace_period_seconds: 259_200, // 3 days
            contract_address: contract_address.into(),
            creation_event_signature:
                "LoanCreated(string,uint256,uint256,uint256,uint256,string,uint256)".to_string(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::seconds(self.grace_period_seconds)
    }

    pub fn installment_period(&self) -> Duration {
        Duration::seconds(self.installment_period_seconds)
    }

    /// number of installments for a loan term
    pub fn total_installments(&self, duration_seconds: i64) -> u32 {
        (duration_seconds / self.installment_period_seconds) as u32
    }

    /// offset from funding to the first due date
    pub fn first_due_offset(&self, duration_seconds: i64, total_installments: u32) -> Duration {
        Duration::seconds(duration_seconds / total_installments as i64)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::standard("0x0000000000000000000000000000000000000000")
    }
}
