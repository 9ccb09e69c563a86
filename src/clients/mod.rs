pub mod chain;
pub mod gateway;
pub mod oracle;

pub use chain::{
    ChainClient, ChainTransaction, ContractCall, LogEntry, MockChainClient, TransactionReceipt,
};
pub use gateway::{MockSettlementGateway, PaymentOrder, Payout, SettlementGateway};
pub use oracle::{MockPriceOracle, PriceOracle};
