use loadtest_common::HistogramStats;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

/// Latency percentile breakdown in milliseconds, as published in the report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencyStatsMillis {
    pub avg: f64,
    pub p0: u64,
    pub p25: u64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
    pub p100: u64,
}

impl From<HistogramStats> for LatencyStatsMillis {
    fn from(s: HistogramStats) -> Self {
        let ms = s.to_millis();
        Self {
            avg: ms.mean,
            p0: ms.min,
            p25: ms.p25,
            p50: ms.p50,
            p75: ms.p75,
            p90: ms.p90,
            p95: ms.p95,
            p99: ms.p99,
            p99_9: ms.p99_9,
            p100: ms.p100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Configuration {
    pub target_arrival_rate: u64,
    pub concurrency: usize,
    pub overall_duration_millis: u64,
    pub warmup_millis: u64,
    pub request_timeout_millis: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerUtilization {
    pub run_time_millis: u64,
    pub backoff_time_millis: u64,
    pub behind_schedule_time_millis: u64,
    pub utilization: f64,
}

/// Final report produced by `Driver::run`. Field names are part of the
/// external contract, hence the explicit `rename_all`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub configuration: Configuration,
    pub test_run_data: serde_json::Value,
    pub completed_iterations: u64,
    pub missed_iterations: u64,
    pub error_iterations: u64,
    pub failed_iterations_ratio: f64,
    pub worker_cycle_time_millis: f64,
    pub total_requests_completed: u64,
    pub throughput_overall: f64,
    pub iterations_per_second_per_worker: f64,
    pub target_arrival_rate_ratio: f64,
    pub request_latency_stats_millis: LatencyStatsMillis,
    pub service_time_stats_millis: LatencyStatsMillis,
    pub worker_utilization: WorkerUtilization,
}

/// Raw counters gathered while building a `Report`; kept separate from the
/// serialized shape so callers that only need numbers don't pay for serde.
pub struct ReportInputs {
    pub configuration: Configuration,
    pub worker_cycle_time_millis: f64,
    pub test_run_data: serde_json::Value,
    pub completed_iterations: u64,
    pub missed_iterations: u64,
    pub error_iterations: u64,
    pub total_items: u64,
    pub measured_duration_secs: f64,
    pub worker_run_time_us: u64,
    pub worker_backoff_time_us: u64,
    pub worker_behind_schedule_us: u64,
    pub request_latency: HistogramStats,
    pub service_time: HistogramStats,
}

pub fn build_report(inputs: ReportInputs) -> Report {
    let denom = (inputs.completed_iterations + inputs.missed_iterations) as f64;
    let failed_iterations_ratio = if denom == 0.0 {
        0.0
    } else {
        (inputs.error_iterations + inputs.missed_iterations) as f64 / denom
    };

    let throughput_overall = if inputs.measured_duration_secs > 0.0 {
        inputs.total_items as f64 / inputs.measured_duration_secs
    } else {
        0.0
    };

    let iterations_per_second_per_worker = if inputs.measured_duration_secs > 0.0
        && inputs.configuration.concurrency > 0
    {
        inputs.completed_iterations as f64
            / inputs.measured_duration_secs
            / inputs.configuration.concurrency as f64
    } else {
        0.0
    };

    let target_arrival_rate_ratio = if inputs.configuration.target_arrival_rate > 0 {
        throughput_overall / inputs.configuration.target_arrival_rate as f64
    } else {
        0.0
    };

    let run_ms = inputs.worker_run_time_us / 1000;
    let backoff_ms = inputs.worker_backoff_time_us / 1000;
    let utilization = if run_ms + backoff_ms > 0 {
        run_ms as f64 / (run_ms + backoff_ms) as f64
    } else {
        0.0
    };

    Report {
        configuration: inputs.configuration,
        test_run_data: inputs.test_run_data,
        completed_iterations: inputs.completed_iterations,
        missed_iterations: inputs.missed_iterations,
        error_iterations: inputs.error_iterations,
        failed_iterations_ratio,
        worker_cycle_time_millis: inputs.worker_cycle_time_millis,
        total_requests_completed: inputs.completed_iterations,
        throughput_overall,
        iterations_per_second_per_worker,
        target_arrival_rate_ratio,
        request_latency_stats_millis: inputs.request_latency.into(),
        service_time_stats_millis: inputs.service_time.into(),
        worker_utilization: WorkerUtilization {
            run_time_millis: run_ms,
            backoff_time_millis: backoff_ms,
            behind_schedule_time_millis: inputs.worker_behind_schedule_us / 1000,
            utilization,
        },
    }
}

/// Ambient OpenTelemetry counters published alongside the in-process report,
/// so a live run can be watched on a dashboard while it is still in flight.
/// Not part of the driver's correctness surface, purely observability.
#[derive(Clone)]
pub struct DriverTelemetry {
    pub completed: Counter<u64>,
    pub missed: Counter<u64>,
    pub errored: Counter<u64>,
    _provider: Option<Arc<SdkMeterProvider>>,
}

impl DriverTelemetry {
    pub fn new(otel_endpoint: &str) -> Result<Self> {
        let resource = Resource::new(vec![KeyValue::new("service.name", "loadtest-driver")]);

        let exporter = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(otel_endpoint)
            .with_timeout(Duration::from_secs(10))
            .build()?;

        let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_interval(Duration::from_secs(5))
            .build();

        let provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(reader)
            .build();

        let meter = provider.meter("loadtest-driver");

        Ok(Self {
            completed: meter
                .u64_counter("iterations_completed")
                .with_description("Number of completed iterations")
                .build(),
            missed: meter
                .u64_counter("iterations_missed")
                .with_description("Number of iterations whose deadline expired in queue")
                .build(),
            errored: meter
                .u64_counter("iterations_errored")
                .with_description("Number of iterations that failed in measurement phase")
                .build(),
            _provider: Some(Arc::new(provider)),
        })
    }

    /// No-op telemetry for tests: no readers, no network.
    #[cfg(test)]
    pub fn new_noop() -> Self {
        let provider = SdkMeterProvider::builder().build();
        let meter = provider.meter("test");
        Self {
            completed: meter.u64_counter("test_completed").build(),
            missed: meter.u64_counter("test_missed").build(),
            errored: meter.u64_counter("test_errored").build(),
            _provider: None,
        }
    }

    pub fn shutdown(&self) {
        if let Some(ref provider) = self._provider
            && let Err(e) = provider.shutdown()
        {
            tracing::warn!("failed to shutdown OpenTelemetry provider: {:?}", e);
        }
    }
}
