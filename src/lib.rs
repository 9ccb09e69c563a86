pub mod clients;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod funding;
pub mod interest;
pub mod liquidation;
pub mod model;
pub mod origination;
pub mod repayment;
pub mod store;
pub mod types;
pub mod webhook;

// re-export key types
pub use clients::{
    ChainClient, ChainTransaction, ContractCall, LogEntry, MockChainClient, MockPriceOracle,
    MockSettlementGateway, PaymentOrder, Payout, PriceOracle, SettlementGateway,
    TransactionReceipt,
};
pub use config::{PlatformConfig, INSTALLMENT_PERIOD_SECONDS};
pub use decimal::{Money, Rate};
pub use engine::LendingEngine;
pub use errors::{LendingError, Result};
pub use events::{Event, EventStore};
pub use funding::FundingProcessor;
pub use interest::InterestCalculator;
pub use liquidation::{
    LiquidationEngine, REASON_DEFAULTED, REASON_LTV_BREACH, REASON_NOT_ELIGIBLE,
};
pub use model::{
    Collateral, CollateralSpec, Installment, Loan, PayoutAccount, PendingLiquidation,
};
pub use origination::{CreateLoanRequest, LoanOriginator};
pub use repayment::RepaymentProcessor;
pub use store::LedgerStore;
pub use types::{
    CollateralId, CollateralStatus, InstallmentId, InstallmentStatus, LiquidationAssessment,
    LoanId, LoanStatus, TokenType, TriggerType, UserId,
};
pub use webhook::WebhookEvent;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
