use rust_decimal::Decimal;

use crate::config::PlatformConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};

/// flat-rate installment math mirroring the on-chain integer formulas
///
/// every division floors to whole currency units so the amounts written here
/// can never diverge from the amounts the contract computes
#[derive(Debug, Clone, Copy)]
pub struct InterestCalculator {
    rate_divisor: u32,
    safety_buffer: Rate,
}

impl InterestCalculator {
    pub fn new(rate_divisor: u32, safety_buffer: Rate) -> Self {
        Self {
            rate_divisor,
            safety_buffer,
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.rate_divisor, config.safety_buffer)
    }

    /// per-installment amount: principal * (divisor + rateBps) / (divisor * n)
    ///
    /// single source of truth for projection and settlement; a zero rate
    /// degenerates to principal / n
    pub fn installment_amount(
        &self,
        principal: Money,
        rate_bps: u32,
        total_installments: u32,
    ) -> Result<Money> {
        if total_installments == 0 {
            return Err(LendingError::validation(
                "total installments must be positive",
            ));
        }
        let numerator = principal * Decimal::from(self.rate_divisor + rate_bps);
        let denominator = Decimal::from(self.rate_divisor) * Decimal::from(total_installments);
        Ok((numerator / denominator).floor_units())
    }

    /// principal plus simple interest over the whole term
    pub fn total_obligation(&self, principal: Money, rate_bps: u32) -> Money {
        let interest =
            (principal * Decimal::from(rate_bps) / Decimal::from(self.rate_divisor)).floor_units();
        principal + interest
    }

    /// total obligation with the liquidation safety buffer applied; the
    /// threshold collateral value must stay above
    pub fn buffered_total_owed(&self, principal: Money, rate_bps: u32) -> Money {
        (self.total_obligation(principal, rate_bps) * self.safety_buffer.as_decimal()).floor_units()
    }
}
