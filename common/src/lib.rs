pub mod clock;
pub mod config;
pub mod histogram;

pub use clock::{Clock, TokioClock};
pub use config::{Config, DriverConfig, LedgerConfig, MonitoringConfig, SinkConfig};
pub use histogram::{HistogramStats, LatencyHistogram};
