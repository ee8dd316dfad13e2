pub mod batch;
pub mod model;
pub mod sink;
pub mod workload;

pub use batch::{build_transaction_write, BalanceUpdate, TransactionWrite};
pub use model::{Account, AccountBalances, Transfer};
pub use sink::{DynamoDbSink, InMemorySink, LedgerSink, SinkError, SinkOutcome};
pub use workload::LedgerWorkload;
