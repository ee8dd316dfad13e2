use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration, loaded once at process start and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub driver: DriverConfig,
    pub ledger: LedgerConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Options recognized by the arrival scheduler and worker pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// Number of parallel worker tasks (>= 1).
    pub concurrency: usize,
    /// Intended steady-state rate, measured in items (not iterations) per second.
    /// `0` means "run only setup/teardown, no iterations".
    pub target_request_rate_per_second: u64,
    /// Overall test duration including warmup.
    pub duration_seconds: u64,
    /// Latency recorded for missed-in-queue iterations and the in-queue TTL.
    /// Defaults to the computed worker cycle time when absent.
    #[serde(default)]
    pub timeout_value_ms: Option<u64>,
    /// If set, no warmup phase.
    #[serde(default)]
    pub skip_warmup: bool,
}

/// Timing quantities derived from `DriverConfig` and the workload's `items_per_iteration`.
///
/// These are recomputed whenever a driver is constructed rather than cached on
/// `DriverConfig`, since `items_per_iteration` is only known once a `Workload` exists.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTiming {
    pub worker_cycle_time_ms: f64,
    pub arrival_interval_ms: f64,
    pub warmup_ms: u64,
    pub timeout_value_ms: u64,
}

impl DriverConfig {
    pub fn resolve(&self, items_per_iteration: u64) -> ResolvedTiming {
        let duration_ms = self.duration_seconds * 1000;
        let warmup_ms = if self.skip_warmup {
            0
        } else {
            (duration_ms / 10).min(10_000)
        };

        if self.target_request_rate_per_second == 0 {
            return ResolvedTiming {
                worker_cycle_time_ms: 0.0,
                arrival_interval_ms: 0.0,
                warmup_ms,
                timeout_value_ms: self.timeout_value_ms.unwrap_or(0),
            };
        }

        let items_rate = self.target_request_rate_per_second as f64 / items_per_iteration as f64;
        let worker_cycle_time_ms = 1000.0 * self.concurrency as f64 / items_rate;
        let arrival_interval_ms = 1000.0 / items_rate;
        let timeout_value_ms = self
            .timeout_value_ms
            .unwrap_or(worker_cycle_time_ms.round() as u64);

        ResolvedTiming {
            worker_cycle_time_ms,
            arrival_interval_ms,
            warmup_ms,
            timeout_value_ms,
        }
    }
}

/// Ledger workload generation parameters (account selection, transfer amounts).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    pub num_accounts: u64,
    pub zipfian_exponent: f64,
    pub min_transfer_amount: u64,
    pub max_transfer_amount: u64,
    /// Maximum number of transfers coalesced into a single transactional write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    33
}

/// The sink the ledger workload writes transfers to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub table_name: String,
    /// Override endpoint, e.g. for DynamoDB Local during development.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            otel_endpoint: default_otel_endpoint(),
        }
    }
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants that TOML deserialization cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.driver.concurrency == 0 {
            anyhow::bail!("driver.concurrency must be >= 1");
        }

        if self.driver.duration_seconds == 0 {
            anyhow::bail!("driver.duration_seconds must be >= 1");
        }

        if self.ledger.num_accounts < 2 {
            anyhow::bail!(
                "ledger.num_accounts must be >= 2 (transfers require different source and destination)"
            );
        }

        if self.ledger.min_transfer_amount > self.ledger.max_transfer_amount {
            anyhow::bail!(
                "ledger.min_transfer_amount ({}) must be <= ledger.max_transfer_amount ({})",
                self.ledger.min_transfer_amount,
                self.ledger.max_transfer_amount
            );
        }

        if self.ledger.zipfian_exponent < 0.0 || self.ledger.zipfian_exponent.is_nan() {
            anyhow::bail!(
                "ledger.zipfian_exponent must be a finite number >= 0.0, got {}",
                self.ledger.zipfian_exponent
            );
        }

        if self.ledger.batch_size == 0 || self.ledger.batch_size > 33 {
            anyhow::bail!(
                "ledger.batch_size must be in 1..=33 (DynamoDB TransactWriteItems boundary), got {}",
                self.ledger.batch_size
            );
        }

        if self.sink.table_name.is_empty() {
            anyhow::bail!("sink.table_name must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            driver: DriverConfig {
                concurrency: 10,
                target_request_rate_per_second: 100,
                duration_seconds: 30,
                timeout_value_ms: None,
                skip_warmup: false,
            },
            ledger: LedgerConfig {
                num_accounts: 100_000,
                zipfian_exponent: 1.0,
                min_transfer_amount: 1,
                max_transfer_amount: 1000,
                batch_size: 33,
            },
            sink: SinkConfig {
                table_name: "ledger".to_string(),
                endpoint_url: None,
                region: None,
            },
            monitoring: MonitoringConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = test_config();
        config.driver.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_duration() {
        let mut config = test_config();
        config.driver.duration_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_one_num_accounts() {
        let mut config = test_config();
        config.ledger.num_accounts = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_transfer_amounts() {
        let mut config = test_config();
        config.ledger.min_transfer_amount = 1000;
        config.ledger.max_transfer_amount = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_negative_zipfian_exponent() {
        let mut config = test_config();
        config.ledger.zipfian_exponent = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_batch_size_too_large() {
        let mut config = test_config();
        config.ledger.batch_size = 34;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_table_name() {
        let mut config = test_config();
        config.sink.table_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_timing_zero_rate() {
        let timing = test_config().driver.resolve(1);
        // zero rate is the special case below; override to exercise it
        let mut zero_rate = test_config().driver;
        zero_rate.target_request_rate_per_second = 0;
        let resolved = zero_rate.resolve(1);
        assert_eq!(resolved.arrival_interval_ms, 0.0);
        // the non-zero-rate call above should still produce a positive interval
        assert!(timing.arrival_interval_ms > 0.0);
    }

    #[test]
    fn test_resolve_timing_items_per_iteration() {
        let mut driver = test_config().driver;
        driver.concurrency = 4;
        driver.target_request_rate_per_second = 100;
        // a batched workload whose iterations each move 33 items
        let timing = driver.resolve(33);
        // rate in iterations/sec = 100/33, so arrival_interval_ms = 1000 / (100/33) = 330
        assert!((timing.arrival_interval_ms - 330.0).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_timeout_defaults_to_cycle_time() {
        let driver = test_config().driver;
        let timing = driver.resolve(1);
        assert_eq!(timing.timeout_value_ms, timing.worker_cycle_time_ms.round() as u64);
    }

    #[test]
    fn test_warmup_capped_at_ten_seconds() {
        let mut driver = test_config().driver;
        driver.duration_seconds = 1000;
        let timing = driver.resolve(1);
        assert_eq!(timing.warmup_ms, 10_000);
    }

    #[test]
    fn test_skip_warmup() {
        let mut driver = test_config().driver;
        driver.skip_warmup = true;
        let timing = driver.resolve(1);
        assert_eq!(timing.warmup_ms, 0);
    }
}
