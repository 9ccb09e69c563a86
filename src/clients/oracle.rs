use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::types::TokenType;

const SERVICE: &str = "price oracle";

/// market valuation of collateral tokens in the platform currency
///
/// an unavailable feed surfaces as an error, never as a zero quote:
/// eligibility decisions must fail closed when no price is known
pub trait PriceOracle {
    /// current platform-currency value of `amount` units of `token`
    fn value_of(&self, token: TokenType, amount: Money) -> Result<Money>;
}

struct OracleState {
    unit_prices: HashMap<TokenType, Money>,
    available: bool,
}

/// in-memory oracle for tests and demos
///
/// clones share state, so a test can keep a handle and move prices
/// after the engine has taken ownership of its copy
#[derive(Clone)]
pub struct MockPriceOracle {
    state: Arc<Mutex<OracleState>>,
}

impl MockPriceOracle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OracleState {
                unit_prices: HashMap::new(),
                available: true,
            })),
        }
    }

    pub fn with_price(self, token: TokenType, unit_price: Money) -> Self {
        self.set_price(token, unit_price);
        self
    }

    pub fn set_price(&self, token: TokenType, unit_price: Money) {
        if let Ok(mut state) = self.state.lock() {
            state.unit_prices.insert(token, unit_price);
        }
    }

    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.available = available;
        }
    }
}

impl Default for MockPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle for MockPriceOracle {
    fn value_of(&self, token: TokenType, amount: Money) -> Result<Money> {
        let state = self
            .state
            .lock()
            .map_err(|_| LendingError::external(SERVICE, "mock state poisoned"))?;
        if !state.available {
            return Err(LendingError::external(SERVICE, "price feed unavailable"));
        }
        let unit_price = state
            .unit_prices
            .get(&token)
            .ok_or_else(|| LendingError::external(SERVICE, format!("no quote for {token}")))?;
        Ok(Money::from_decimal(
            unit_price.as_decimal() * amount.as_decimal(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn values_tokens_at_unit_price() {
        let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));

        let value = oracle
            .value_of(TokenType::Eth, Money::from_decimal(dec!(0.05)))
            .unwrap();
        assert_eq!(value, Money::from_major(10_000));
    }

    #[test]
    fn missing_quote_is_an_error() {
        let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));

        let err = oracle
            .value_of(TokenType::Btc, Money::from_major(1))
            .unwrap_err();
        assert!(matches!(err, LendingError::ExternalService { .. }));
    }

    #[test]
    fn handle_updates_reach_the_boxed_copy() {
        let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));
        let handle = oracle.clone();
        let boxed: Box<dyn PriceOracle> = Box::new(oracle);

        handle.set_price(TokenType::Eth, Money::from_major(50_000));

        let value = boxed.value_of(TokenType::Eth, Money::from_major(1)).unwrap();
        assert_eq!(value, Money::from_major(50_000));
    }

    #[test]
    fn unavailable_feed_fails_closed() {
        let oracle = MockPriceOracle::new().with_price(TokenType::Eth, Money::from_major(200_000));
        oracle.set_available(false);

        assert!(oracle.value_of(TokenType::Eth, Money::from_major(1)).is_err());
    }
}
