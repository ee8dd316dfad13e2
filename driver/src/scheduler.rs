use loadtest_common::{Clock, LatencyHistogram};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// The bounded queue of intended arrival timestamps (µs), shared between the
/// scheduler (sole producer) and the worker pool (competing consumers).
pub type WorkQueue = Arc<Mutex<VecDeque<i64>>>;

/// Pop every arrival at the head of the queue whose deadline has passed,
/// crediting `missed_iterations`/`request_latency` for the ones at or after
/// `measurement_start_us`. Shared by the scheduler and each worker.
///
/// Returns the number of arrivals pruned, for logging only.
pub async fn prune_expired(
    queue: &WorkQueue,
    now_us: i64,
    timeout_value_us: i64,
    measurement_start_us: i64,
    missed_iterations: &AtomicU64,
    request_latency: &Mutex<LatencyHistogram>,
) -> usize {
    let mut expired_in_measurement = 0u64;
    let mut total_pruned = 0usize;

    {
        let mut q = queue.lock().await;
        while let Some(&front) = q.front() {
            if front < now_us - timeout_value_us {
                q.pop_front();
                total_pruned += 1;
                if front >= measurement_start_us {
                    expired_in_measurement += 1;
                }
            } else {
                break;
            }
        }
    }

    if expired_in_measurement > 0 {
        missed_iterations.fetch_add(expired_in_measurement, Ordering::Relaxed);
        let mut hist = request_latency.lock().await;
        for _ in 0..expired_in_measurement {
            hist.record_micros(timeout_value_us);
        }
    }

    total_pruned
}

/// Parameters for a single scheduler run, grouped to keep `run` callable with
/// one argument instead of a dozen.
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub arrival_interval_us: i64,
    pub start_us: i64,
    pub end_us: i64,
    pub measurement_start_us: i64,
    pub timeout_value_us: i64,
}

/// Produces the bounded queue of intended request start timestamps at the
/// configured rate, pruning entries past their deadline.
pub async fn run(
    clock: Arc<dyn Clock>,
    queue: WorkQueue,
    cfg: SchedulerConfig,
    missed_iterations: Arc<AtomicU64>,
    request_latency: Arc<Mutex<LatencyHistogram>>,
) {
    let mut next_arrival = cfg.start_us;

    loop {
        let now = clock.now_micros();
        if now >= cfg.end_us {
            break;
        }

        prune_expired(
            &queue,
            now,
            cfg.timeout_value_us,
            cfg.measurement_start_us,
            &missed_iterations,
            &request_latency,
        )
        .await;

        {
            let mut q = queue.lock().await;
            while q.len() < 2 * cfg.concurrency && next_arrival < cfg.end_us {
                q.push_back(next_arrival);
                next_arrival += cfg.arrival_interval_us;
            }
        }

        let half_interval_us = (cfg.arrival_interval_us / 2).max(0) as u64;
        clock.sleep(Duration::from_micros(half_interval_us)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadtest_common::TokioClock;

    fn empty_queue() -> WorkQueue {
        Arc::new(Mutex::new(VecDeque::new()))
    }

    #[tokio::test]
    async fn prunes_only_entries_past_their_deadline() {
        let queue = empty_queue();
        {
            let mut q = queue.lock().await;
            q.push_back(0); // expired: now(1000) - timeout(100) = 900 > 0
            q.push_back(950); // not expired
        }
        let missed = AtomicU64::new(0);
        let hist = Mutex::new(LatencyHistogram::new());

        let pruned = prune_expired(&queue, 1000, 100, 0, &missed, &hist).await;

        assert_eq!(pruned, 1);
        assert_eq!(missed.load(Ordering::Relaxed), 1);
        assert_eq!(queue.lock().await.len(), 1);
        assert_eq!(*queue.lock().await.front().unwrap(), 950);
    }

    #[tokio::test]
    async fn pruned_entries_before_measurement_start_do_not_count_as_missed() {
        // Warmup-phase prunes are never counted against missed iterations.
        let queue = empty_queue();
        {
            let mut q = queue.lock().await;
            q.push_back(0);
        }
        let missed = AtomicU64::new(0);
        let hist = Mutex::new(LatencyHistogram::new());

        // measurement starts at 500, long after the pruned arrival at 0
        prune_expired(&queue, 1000, 100, 500, &missed, &hist).await;

        assert_eq!(missed.load(Ordering::Relaxed), 0);
        assert!(hist.lock().await.is_empty());
    }

    #[tokio::test]
    async fn scheduler_fills_queue_up_to_twice_concurrency() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
        let queue = empty_queue();
        let missed = Arc::new(AtomicU64::new(0));
        let hist = Arc::new(Mutex::new(LatencyHistogram::new()));

        let now = clock.now_micros();
        let cfg = SchedulerConfig {
            concurrency: 2,
            arrival_interval_us: 1000,
            start_us: now,
            end_us: now + 1, // end almost immediately after the first fill
            measurement_start_us: now,
            timeout_value_us: 10_000_000,
        };

        run(clock, queue.clone(), cfg, missed, hist).await;

        assert!(queue.lock().await.len() <= 4);
    }
}
