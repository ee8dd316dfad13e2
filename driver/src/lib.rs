pub mod error;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod worker;
pub mod workload;

pub use error::DriverError;
pub use metrics::Report;
pub use workload::Workload;

use loadtest_common::{Clock, Config, LatencyHistogram, TokioClock};
use metrics::{build_report, Configuration, DriverTelemetry, ReportInputs};
use scheduler::{SchedulerConfig, WorkQueue};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use worker::{worker_loop, WorkerShared};

/// Drives a `Workload` at a configured arrival rate, producing a `Report`.
/// Data flows from the arrival scheduler through the shared work queue to
/// the worker pool, which calls into the workload and feeds outcomes back
/// to the metrics aggregator.
pub struct Driver<W: Workload> {
    config: Config,
    workload: Arc<W>,
    clock: Arc<dyn Clock>,
    telemetry: Option<DriverTelemetry>,
}

impl<W: Workload> Driver<W> {
    pub fn new(config: Config, workload: W) -> Self {
        Self {
            config,
            workload: Arc::new(workload),
            clock: Arc::new(TokioClock::new()),
            telemetry: None,
        }
    }

    /// Publish ambient OpenTelemetry counters alongside the in-process report.
    pub fn with_telemetry(mut self, telemetry: DriverTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn run(self) -> Result<Report, DriverError> {
        self.workload
            .setup()
            .await
            .map_err(DriverError::SetupFailed)?;

        let report = self.run_iterations().await;

        self.workload
            .teardown()
            .await
            .map_err(DriverError::TeardownFailed)?;

        if let Some(telemetry) = &self.telemetry {
            telemetry.shutdown();
        }

        Ok(report)
    }

    async fn run_iterations(&self) -> Report {
        let items_per_iteration = self.workload.items_per_iteration();
        let timing = self.config.driver.resolve(items_per_iteration);

        let configuration = Configuration {
            target_arrival_rate: self.config.driver.target_request_rate_per_second,
            concurrency: self.config.driver.concurrency,
            overall_duration_millis: self.config.driver.duration_seconds * 1000,
            warmup_millis: timing.warmup_ms,
            request_timeout_millis: timing.timeout_value_ms,
        };

        // Zero-rate short-circuit: no scheduler, no workers.
        if self.config.driver.target_request_rate_per_second == 0 {
            return build_report(ReportInputs {
                configuration,
                worker_cycle_time_millis: timing.worker_cycle_time_ms,
                test_run_data: self.workload.test_run_data(),
                completed_iterations: 0,
                missed_iterations: 0,
                error_iterations: 0,
                total_items: 0,
                measured_duration_secs: 0.0,
                worker_run_time_us: 0,
                worker_backoff_time_us: 0,
                worker_behind_schedule_us: 0,
                request_latency: loadtest_common::HistogramStats::empty(),
                service_time: loadtest_common::HistogramStats::empty(),
            });
        }

        let start_us = self.clock.now_micros();
        let duration_us = self.config.driver.duration_seconds as i64 * 1_000_000;
        let end_us = start_us + duration_us;
        let measurement_start_us = start_us + timing.warmup_ms as i64 * 1000;
        let arrival_interval_us = (timing.arrival_interval_ms * 1000.0).round() as i64;
        let timeout_value_us = timing.timeout_value_ms as i64 * 1000;

        let queue: WorkQueue = Arc::new(tokio::sync::Mutex::new(VecDeque::new()));
        let request_latency = Arc::new(tokio::sync::Mutex::new(LatencyHistogram::new()));
        let service_time = Arc::new(tokio::sync::Mutex::new(LatencyHistogram::new()));

        let completed_iterations = Arc::new(AtomicU64::new(0));
        let error_iterations = Arc::new(AtomicU64::new(0));
        let missed_iterations = Arc::new(AtomicU64::new(0));
        let total_items = Arc::new(AtomicU64::new(0));
        let worker_run_time_us = Arc::new(AtomicU64::new(0));
        let worker_backoff_time_us = Arc::new(AtomicU64::new(0));
        let worker_behind_schedule_us = Arc::new(AtomicU64::new(0));

        let scheduler_cfg = SchedulerConfig {
            concurrency: self.config.driver.concurrency,
            arrival_interval_us,
            start_us,
            end_us,
            measurement_start_us,
            timeout_value_us,
        };

        let scheduler_handle = tokio::spawn(scheduler::run(
            self.clock.clone(),
            queue.clone(),
            scheduler_cfg,
            missed_iterations.clone(),
            request_latency.clone(),
        ));

        let shared = Arc::new(WorkerShared {
            queue,
            clock: self.clock.clone(),
            end_us,
            measurement_start_us,
            timeout_value_us,
            items_per_iteration,
            request_latency: request_latency.clone(),
            service_time: service_time.clone(),
            completed_iterations: completed_iterations.clone(),
            error_iterations: error_iterations.clone(),
            missed_iterations: missed_iterations.clone(),
            total_items: total_items.clone(),
            worker_run_time_us: worker_run_time_us.clone(),
            worker_backoff_time_us: worker_backoff_time_us.clone(),
            worker_behind_schedule_us: worker_behind_schedule_us.clone(),
        });

        let mut worker_handles = Vec::with_capacity(self.config.driver.concurrency);
        for _ in 0..self.config.driver.concurrency {
            let shared = shared.clone();
            let workload = self.workload.clone();
            worker_handles.push(tokio::spawn(worker_loop(shared, workload)));
        }

        let _ = scheduler_handle.await;
        for handle in worker_handles {
            let _ = handle.await;
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry
                .completed
                .add(completed_iterations.load(Ordering::Relaxed), &[]);
            telemetry
                .missed
                .add(missed_iterations.load(Ordering::Relaxed), &[]);
            telemetry
                .errored
                .add(error_iterations.load(Ordering::Relaxed), &[]);
        }

        let measured_duration_secs = (end_us - measurement_start_us).max(0) as f64 / 1_000_000.0;

        build_report(ReportInputs {
            configuration,
            worker_cycle_time_millis: timing.worker_cycle_time_ms,
            test_run_data: self.workload.test_run_data(),
            completed_iterations: completed_iterations.load(Ordering::Relaxed),
            missed_iterations: missed_iterations.load(Ordering::Relaxed),
            error_iterations: error_iterations.load(Ordering::Relaxed),
            total_items: total_items.load(Ordering::Relaxed),
            measured_duration_secs,
            worker_run_time_us: worker_run_time_us.load(Ordering::Relaxed),
            worker_backoff_time_us: worker_backoff_time_us.load(Ordering::Relaxed),
            worker_behind_schedule_us: worker_behind_schedule_us.load(Ordering::Relaxed),
            request_latency: request_latency.lock().await.snapshot(),
            service_time: service_time.lock().await.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workload::test_support::SleepWorkload;

    fn small_config(rate: u64, concurrency: usize, duration_seconds: u64) -> Config {
        use loadtest_common::config::{DriverConfig, LedgerConfig, SinkConfig};
        Config {
            driver: DriverConfig {
                concurrency,
                target_request_rate_per_second: rate,
                duration_seconds,
                timeout_value_ms: None,
                skip_warmup: true,
            },
            ledger: LedgerConfig {
                num_accounts: 10,
                zipfian_exponent: 1.0,
                min_transfer_amount: 1,
                max_transfer_amount: 10,
                batch_size: 1,
            },
            sink: SinkConfig {
                table_name: "test".to_string(),
                endpoint_url: None,
                region: None,
            },
            monitoring: Default::default(),
        }
    }

    #[tokio::test]
    async fn zero_rate_short_circuits_with_no_iterations() {
        let config = small_config(0, 4, 5);
        let workload = SleepWorkload::new(std::time::Duration::from_millis(1));
        let driver = Driver::new(config, workload);

        let report = driver.run().await.unwrap();

        assert_eq!(report.completed_iterations, 0);
        assert_eq!(report.missed_iterations, 0);
        assert_eq!(report.error_iterations, 0);
    }

    #[tokio::test]
    async fn sleep_workload_at_low_rate_completes_without_errors() {
        let config = small_config(50, 2, 1);
        let workload = SleepWorkload::new(std::time::Duration::from_millis(1));
        let driver = Driver::new(config, workload);

        let report = driver.run().await.unwrap();

        assert!(report.completed_iterations > 0);
        assert_eq!(report.error_iterations, 0);
        assert!(report.failed_iterations_ratio < 0.5);
    }

    #[tokio::test]
    async fn setup_failure_aborts_before_any_iteration() {
        use workload::test_support::FailingSetupWorkload;
        let config = small_config(50, 2, 1);
        let driver = Driver::new(config, FailingSetupWorkload);

        let result = driver.run().await;
        assert!(matches!(result, Err(DriverError::SetupFailed(_))));
    }
}
