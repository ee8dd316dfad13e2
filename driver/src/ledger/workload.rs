use super::batch::build_transaction_write;
use super::model::Transfer;
use super::sink::LedgerSink;
use crate::retry::with_retry;
use crate::workload::Workload;
use async_trait::async_trait;
use loadtest_common::LedgerConfig;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Zipf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Selects debit/credit account pairs via a Zipfian distribution, so a small
/// set of "hot" accounts receives most of the traffic.
#[derive(Clone)]
struct AccountSelector {
    num_accounts: u64,
    zipf: Zipf<f64>,
}

impl AccountSelector {
    fn new(num_accounts: u64, zipfian_exponent: f64) -> Self {
        let zipf = Zipf::new(num_accounts as f64, zipfian_exponent)
            .expect("ledger.num_accounts/zipfian_exponent validated at config load");
        Self { num_accounts, zipf }
    }

    fn select_account<R: Rng>(&self, rng: &mut R) -> u64 {
        let account = self.zipf.sample(rng) as u64 - 1;
        account.min(self.num_accounts - 1)
    }

    fn select_transfer_accounts<R: Rng>(&self, rng: &mut R) -> (u64, u64) {
        let debit = self.select_account(rng);
        let mut credit = self.select_account(rng);
        while credit == debit {
            credit = self.select_account(rng);
        }
        (debit, credit)
    }
}

/// One ledger workload iteration builds and submits a single transactional
/// write of `ledger.batch_size` coalesced transfers, wired to the driver's
/// `Workload` contract.
pub struct LedgerWorkload<S: LedgerSink> {
    sink: Arc<S>,
    account_selector: AccountSelector,
    min_amount: u64,
    max_amount: u64,
    batch_size: usize,
    ledger_id: u64,
    rng: Mutex<SmallRng>,

    retry_attempts: AtomicU64,
    retry_delay_us: AtomicU64,
}

impl<S: LedgerSink> LedgerWorkload<S> {
    pub fn new(sink: Arc<S>, config: &LedgerConfig, ledger_id: u64) -> Self {
        Self {
            sink,
            account_selector: AccountSelector::new(config.num_accounts, config.zipfian_exponent),
            min_amount: config.min_transfer_amount,
            max_amount: config.max_transfer_amount,
            batch_size: config.batch_size,
            ledger_id,
            rng: Mutex::new(SmallRng::from_rng(&mut rand::rng())),
            retry_attempts: AtomicU64::new(0),
            retry_delay_us: AtomicU64::new(0),
        }
    }

    async fn generate_batch(&self) -> Vec<Transfer> {
        let mut rng = self.rng.lock().await;
        (0..self.batch_size)
            .map(|_| {
                let (debit, credit) = self.account_selector.select_transfer_accounts(&mut *rng);
                let amount = rng.random_range(self.min_amount..=self.max_amount);
                Transfer::new(self.ledger_id, debit, credit, amount)
            })
            .collect()
    }
}

#[async_trait]
impl<S: LedgerSink> Workload for LedgerWorkload<S> {
    async fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn perform_iteration(&self) -> anyhow::Result<()> {
        let transfers = self.generate_batch().await;
        let token = uuid_like_token();
        let write = build_transaction_write(&transfers, token);

        let sink = self.sink.clone();
        let outcome = with_retry(|| {
            let sink = sink.clone();
            let write = write.clone();
            async move { sink.submit(&write).await }
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        self.retry_attempts
            .fetch_add(outcome.attempts as u64, Ordering::Relaxed);
        self.retry_delay_us.fetch_add(
            outcome.total_delay.as_micros() as u64,
            Ordering::Relaxed,
        );

        Ok(())
    }

    fn items_per_iteration(&self) -> u64 {
        self.batch_size as u64
    }

    fn test_run_data(&self) -> serde_json::Value {
        serde_json::json!({
            "retryAttempts": self.retry_attempts.load(Ordering::Relaxed),
            "retryDelayMicros": self.retry_delay_us.load(Ordering::Relaxed),
        })
    }
}

/// Fresh idempotency token, distinct per iteration.
fn uuid_like_token() -> String {
    let hi: u64 = rand::random();
    let lo: u64 = rand::random();
    format!("{:016x}{:016x}", hi, lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sink::InMemorySink;

    fn config() -> LedgerConfig {
        LedgerConfig {
            num_accounts: 100,
            zipfian_exponent: 1.0,
            min_transfer_amount: 1,
            max_transfer_amount: 100,
            batch_size: 5,
        }
    }

    #[tokio::test]
    async fn perform_iteration_submits_a_batch_of_configured_size() {
        let sink = Arc::new(InMemorySink::new());
        let workload = LedgerWorkload::new(sink.clone(), &config(), 1);

        workload.perform_iteration().await.unwrap();

        let total: u64 = (0..config().num_accounts)
            .map(|id| {
                let (d, c) = sink.balance_of(id);
                d + c
            })
            .sum();
        assert!(total > 0);
    }

    #[tokio::test]
    async fn items_per_iteration_matches_batch_size() {
        let sink = Arc::new(InMemorySink::new());
        let workload = LedgerWorkload::new(sink, &config(), 1);
        assert_eq!(workload.items_per_iteration(), 5);
    }

    #[tokio::test]
    async fn retry_counters_surface_in_test_run_data() {
        let sink = Arc::new(InMemorySink::new());
        sink.fail_next_n_calls(1);
        let workload = LedgerWorkload::new(sink, &config(), 1);

        workload.perform_iteration().await.unwrap();

        let data = workload.test_run_data();
        assert_eq!(data["retryAttempts"], 2);
    }
}
