use super::batch::TransactionWrite;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of submitting a `TransactionWrite`.
#[derive(Debug, Clone, Copy)]
pub struct SinkOutcome {
    pub items_written: usize,
    pub consumed_capacity: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A transfer id in the batch already exists under a different client
    /// request token, so the put-if-absent condition failed.
    #[error("transaction conflict: {0} transfer id(s) already exist under a different token")]
    Conflict(usize),

    #[error("sink unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// The atomic multi-item write the ledger workload needs from its backing
/// store: put-if-absent keyed by transfer id, plus coalesced numeric
/// increments, all under one idempotency token.
#[async_trait]
pub trait LedgerSink: Send + Sync + 'static {
    async fn submit(&self, write: &TransactionWrite) -> Result<SinkOutcome, SinkError>;
}

/// DynamoDB-backed sink: one `TransactWriteItems` call per write, `Put` with
/// `attribute_not_exists(id)` condition for transfers, `Update` with an `ADD`
/// expression per coalesced balance update.
pub struct DynamoDbSink {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoDbSink {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl LedgerSink for DynamoDbSink {
    async fn submit(&self, write: &TransactionWrite) -> Result<SinkOutcome, SinkError> {
        use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem, Update};

        let mut items = Vec::with_capacity(write.item_count());

        for put in &write.puts {
            let t = &put.transfer;
            let mut item = HashMap::new();
            item.insert("id".to_string(), AttributeValue::S(t.id.clone()));
            item.insert(
                "ledger_id".to_string(),
                AttributeValue::N(t.ledger_id.to_string()),
            );
            item.insert(
                "debit_account_id".to_string(),
                AttributeValue::N(t.debit_account_id.to_string()),
            );
            item.insert(
                "credit_account_id".to_string(),
                AttributeValue::N(t.credit_account_id.to_string()),
            );
            item.insert("amount".to_string(), AttributeValue::N(t.amount.to_string()));

            let put_item = Put::builder()
                .table_name(&self.table_name)
                .set_item(Some(item))
                .condition_expression("attribute_not_exists(id)")
                .build()
                .map_err(|e| SinkError::Unavailable(e.into()))?;

            items.push(TransactWriteItem::builder().put(put_item).build());
        }

        for update in &write.updates {
            let mut key = HashMap::new();
            key.insert(
                "id".to_string(),
                AttributeValue::S(format!("account#{}", update.account_id)),
            );

            let update_item = Update::builder()
                .table_name(&self.table_name)
                .set_key(Some(key))
                .update_expression(
                    "ADD debits_posted :debit_amount, credits_posted :credit_amount",
                )
                .expression_attribute_values(
                    ":debit_amount",
                    AttributeValue::N(update.debit_amount.to_string()),
                )
                .expression_attribute_values(
                    ":credit_amount",
                    AttributeValue::N(update.credit_amount.to_string()),
                )
                .build()
                .map_err(|e| SinkError::Unavailable(e.into()))?;

            items.push(TransactWriteItem::builder().update(update_item).build());
        }

        let items_written = items.len();

        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .client_request_token(&write.client_request_token)
            .send()
            .await;

        match result {
            Ok(output) => {
                let consumed_capacity = output
                    .consumed_capacity
                    .as_ref()
                    .map(|units| units.iter().filter_map(|u| u.capacity_units).sum())
                    .unwrap_or(0.0);

                Ok(SinkOutcome {
                    items_written,
                    consumed_capacity,
                })
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_transaction_canceled_exception() {
                    Err(SinkError::Conflict(write.puts.len()))
                } else {
                    Err(SinkError::Unavailable(anyhow::anyhow!(service_err)))
                }
            }
        }
    }
}

/// In-memory fake sink used by tests: tracks transfer ids already written and
/// the client request token that wrote each one, so it can distinguish a
/// true idempotent replay from a conflicting resubmission.
pub struct InMemorySink {
    state: Mutex<InMemoryState>,
}

struct InMemoryState {
    /// transfer id -> client request token that created it
    written_ids: HashMap<String, String>,
    balances: HashMap<u64, (u64, u64)>, // account_id -> (debits_posted, credits_posted)
    /// Token already seen: re-submission with the same token is a no-op.
    applied_tokens: std::collections::HashSet<String>,
    fail_next: u32,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                written_ids: HashMap::new(),
                balances: HashMap::new(),
                applied_tokens: std::collections::HashSet::new(),
                fail_next: 0,
            }),
        }
    }

    /// Make the next `n` calls to `submit` fail with `SinkError::Unavailable`,
    /// for exercising the retry wrapper.
    pub fn fail_next_n_calls(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn balance_of(&self, account_id: u64) -> (u64, u64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&account_id)
            .copied()
            .unwrap_or((0, 0))
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerSink for InMemorySink {
    async fn submit(&self, write: &TransactionWrite) -> Result<SinkOutcome, SinkError> {
        let mut state = self.state.lock().unwrap();

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable(anyhow::anyhow!("injected failure")));
        }

        if state.applied_tokens.contains(&write.client_request_token) {
            return Ok(SinkOutcome {
                items_written: write.item_count(),
                consumed_capacity: 0.0,
            });
        }

        let conflicts = write
            .puts
            .iter()
            .filter(|p| state.written_ids.contains_key(&p.transfer.id))
            .count();
        if conflicts > 0 {
            return Err(SinkError::Conflict(conflicts));
        }

        for put in &write.puts {
            state.written_ids.insert(
                put.transfer.id.clone(),
                write.client_request_token.clone(),
            );
        }

        for update in &write.updates {
            let entry = state.balances.entry(update.account_id).or_insert((0, 0));
            entry.0 += update.debit_amount;
            entry.1 += update.credit_amount;
        }

        state.applied_tokens.insert(write.client_request_token.clone());

        Ok(SinkOutcome {
            items_written: write.item_count(),
            consumed_capacity: write.item_count() as f64,
        })
    }
}
