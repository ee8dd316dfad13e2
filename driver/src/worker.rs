use crate::scheduler::{WorkQueue, prune_expired};
use crate::workload::Workload;
use loadtest_common::{Clock, LatencyHistogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Atomic counters and histograms shared by every worker in the pool, plus
/// the scheduler. Grouped into one struct so a worker task can be spawned
/// with a single `Arc` clone.
pub struct WorkerShared {
    pub queue: WorkQueue,
    pub clock: Arc<dyn Clock>,
    pub end_us: i64,
    pub measurement_start_us: i64,
    pub timeout_value_us: i64,
    pub items_per_iteration: u64,

    pub request_latency: Arc<Mutex<LatencyHistogram>>,
    pub service_time: Arc<Mutex<LatencyHistogram>>,

    pub completed_iterations: Arc<AtomicU64>,
    pub error_iterations: Arc<AtomicU64>,
    pub missed_iterations: Arc<AtomicU64>,
    pub total_items: Arc<AtomicU64>,

    pub worker_run_time_us: Arc<AtomicU64>,
    pub worker_backoff_time_us: Arc<AtomicU64>,
    pub worker_behind_schedule_us: Arc<AtomicU64>,
}

/// One cooperative worker task. Claims the next scheduled arrival, performs
/// the iteration, times it, and records outcomes.
///
/// Keeps draining the queue past `end_us` until it is empty of live entries,
/// rather than abandoning queued work the moment the clock passes the end
/// time.
pub async fn worker_loop<W: Workload>(shared: Arc<WorkerShared>, workload: Arc<W>) {
    loop {
        let now = shared.clock.now_micros();

        prune_expired(
            &shared.queue,
            now,
            shared.timeout_value_us,
            shared.measurement_start_us,
            &shared.missed_iterations,
            &shared.request_latency,
        )
        .await;

        let popped = {
            let mut q = shared.queue.lock().await;
            q.pop_front()
        };

        let Some(arrival) = popped else {
            if now > shared.end_us {
                return;
            }
            tokio::task::yield_now().await;
            continue;
        };

        let now = shared.clock.now_micros();
        let backoff_us = arrival - now;
        if backoff_us > 0 {
            let backoff_ms = (backoff_us / 1000) as u64;
            if backoff_ms > 0 {
                shared.clock.sleep(Duration::from_millis(backoff_ms)).await;
            }
            loop {
                if shared.clock.now_micros() >= arrival {
                    break;
                }
                tokio::task::yield_now().await;
            }
            shared
                .worker_backoff_time_us
                .fetch_add(backoff_us as u64, Ordering::Relaxed);
        } else if backoff_us < 0 {
            shared
                .worker_behind_schedule_us
                .fetch_add((-backoff_us) as u64, Ordering::Relaxed);
        }

        let request_start = shared.clock.now_micros();
        let is_measurement = arrival >= shared.measurement_start_us;

        let result = workload.perform_iteration().await;

        let completion = shared.clock.now_micros();

        if is_measurement {
            let latency_us = completion - arrival;
            let service_us = completion - request_start;

            shared
                .request_latency
                .lock()
                .await
                .record_micros(latency_us);
            shared.service_time.lock().await.record_micros(service_us);

            match result {
                Ok(()) => {
                    shared
                        .completed_iterations
                        .fetch_add(1, Ordering::Relaxed);
                    shared
                        .total_items
                        .fetch_add(shared.items_per_iteration, Ordering::Relaxed);
                    shared
                        .worker_run_time_us
                        .fetch_add(service_us.max(0) as u64, Ordering::Relaxed);
                }
                Err(_) => {
                    shared.error_iterations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        // During warmup, failures are silently swallowed and nothing is counted.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::test_support::{FailingWorkload, SleepWorkload};
    use loadtest_common::TokioClock;
    use std::collections::VecDeque;

    fn shared_with_queue(
        clock: Arc<dyn Clock>,
        queue: WorkQueue,
        end_us: i64,
        measurement_start_us: i64,
        timeout_value_us: i64,
    ) -> Arc<WorkerShared> {
        Arc::new(WorkerShared {
            queue,
            clock,
            end_us,
            measurement_start_us,
            timeout_value_us,
            items_per_iteration: 1,
            request_latency: Arc::new(Mutex::new(LatencyHistogram::new())),
            service_time: Arc::new(Mutex::new(LatencyHistogram::new())),
            completed_iterations: Arc::new(AtomicU64::new(0)),
            error_iterations: Arc::new(AtomicU64::new(0)),
            missed_iterations: Arc::new(AtomicU64::new(0)),
            total_items: Arc::new(AtomicU64::new(0)),
            worker_run_time_us: Arc::new(AtomicU64::new(0)),
            worker_backoff_time_us: Arc::new(AtomicU64::new(0)),
            worker_behind_schedule_us: Arc::new(AtomicU64::new(0)),
        })
    }

    #[tokio::test]
    async fn completed_iteration_is_counted_in_measurement_phase() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let now = clock.now_micros();
        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from([now])));
        let shared = shared_with_queue(clock, queue, now + 1_000_000, now, 1_000_000);
        let workload = Arc::new(SleepWorkload::new(Duration::from_millis(1)));

        worker_loop(shared.clone(), workload).await;

        assert_eq!(shared.completed_iterations.load(Ordering::Relaxed), 1);
        assert_eq!(shared.error_iterations.load(Ordering::Relaxed), 0);
        assert!(!shared.request_latency.lock().await.is_empty());
        assert!(!shared.service_time.lock().await.is_empty());
    }

    #[tokio::test]
    async fn request_latency_is_never_less_than_service_time() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let now = clock.now_micros();
        // schedule the arrival slightly in the past, so the worker is "behind schedule"
        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from([now - 5_000])));
        let shared = shared_with_queue(clock, queue, now + 1_000_000, now - 10_000, 1_000_000);
        let workload = Arc::new(SleepWorkload::new(Duration::from_millis(1)));

        worker_loop(shared.clone(), workload).await;

        let latency = shared.request_latency.lock().await.snapshot();
        let service = shared.service_time.lock().await.snapshot();
        assert!(latency.max >= service.max);
    }

    #[tokio::test]
    async fn failing_workload_counts_as_error_not_missed() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let now = clock.now_micros();
        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from([now])));
        let shared = shared_with_queue(clock, queue, now + 1_000_000, now, 1_000_000);
        let workload = Arc::new(FailingWorkload);

        worker_loop(shared.clone(), workload).await;

        assert_eq!(shared.completed_iterations.load(Ordering::Relaxed), 0);
        assert_eq!(shared.error_iterations.load(Ordering::Relaxed), 1);
        assert_eq!(shared.missed_iterations.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn warmup_phase_swallows_failures_without_counting() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let now = clock.now_micros();
        let queue: WorkQueue = Arc::new(Mutex::new(VecDeque::from([now])));
        // measurement_start far in the future: this arrival is still warmup
        let shared = shared_with_queue(clock, queue, now + 1_000_000, now + 500_000, 1_000_000);
        let workload = Arc::new(FailingWorkload);

        worker_loop(shared.clone(), workload).await;

        assert_eq!(shared.completed_iterations.load(Ordering::Relaxed), 0);
        assert_eq!(shared.error_iterations.load(Ordering::Relaxed), 0);
        assert!(shared.request_latency.lock().await.is_empty());
    }
}
