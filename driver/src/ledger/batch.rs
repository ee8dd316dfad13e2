use super::model::Transfer;
use std::collections::BTreeMap;

/// One coalesced balance update: adds `debit_amount` to `debits_posted` and
/// `credit_amount` to `credits_posted` on the named account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: u64,
    pub debit_amount: u64,
    pub credit_amount: u64,
}

/// A put-if-absent item keyed by transfer id, plus the transfer it protects.
#[derive(Debug, Clone)]
pub struct PutTransfer {
    pub transfer: Transfer,
}

/// The write a `TransactionBatch` compiles down to: one put per transfer,
/// one coalesced update per distinct account touched.
#[derive(Debug, Clone)]
pub struct TransactionWrite {
    pub puts: Vec<PutTransfer>,
    pub updates: Vec<BalanceUpdate>,
    pub client_request_token: String,
}

impl TransactionWrite {
    /// Total item count in the write.
    pub fn item_count(&self) -> usize {
        self.puts.len() + self.updates.len()
    }
}

/// Builds a single idempotent transactional write from a list of transfers,
/// coalescing per-account balance updates.
///
/// `transfers.len()` must not exceed the sink's transactional item budget
/// once puts and coalesced updates are summed; callers are expected to have
/// already chunked transfers to `ledger.batch_size` before calling this.
pub fn build_transaction_write(transfers: &[Transfer], client_request_token: String) -> TransactionWrite {
    let mut updates_by_account: BTreeMap<u64, BalanceUpdate> = BTreeMap::new();
    let mut account_order: Vec<u64> = Vec::new();

    for t in transfers {
        let debit = updates_by_account
            .entry(t.debit_account_id)
            .or_insert_with(|| {
                account_order.push(t.debit_account_id);
                BalanceUpdate {
                    account_id: t.debit_account_id,
                    debit_amount: 0,
                    credit_amount: 0,
                }
            });
        debit.debit_amount += t.amount;

        let credit = updates_by_account
            .entry(t.credit_account_id)
            .or_insert_with(|| {
                account_order.push(t.credit_account_id);
                BalanceUpdate {
                    account_id: t.credit_account_id,
                    debit_amount: 0,
                    credit_amount: 0,
                }
            });
        credit.credit_amount += t.amount;
    }

    let updates = account_order
        .into_iter()
        .map(|id| updates_by_account[&id])
        .collect();

    let puts = transfers
        .iter()
        .cloned()
        .map(|transfer| PutTransfer { transfer })
        .collect();

    TransactionWrite {
        puts,
        updates,
        client_request_token,
    }
}
