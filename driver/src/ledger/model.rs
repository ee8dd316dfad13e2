use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter used as the random-suffix tiebreaker within the same
/// millisecond, so ids generated in a tight loop stay lexicographically
/// sortable.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a 128-bit, lexicographically sortable, monotonic id: a 48-bit
/// millisecond timestamp prefix followed by an 80-bit suffix (64 bits of
/// randomness plus a 16-bit rolling sequence number), hex-encoded.
///
/// A ULID-like scheme; any 128-bit monotonic scheme satisfies the contract,
/// this is simply the one the driver settles on.
pub fn new_transfer_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_millis() as u64;

    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    let rand_bits: u64 = rand::random();

    format!("{:012x}{:04x}{:016x}", millis & 0xFFFF_FFFF_FFFF, seq, rand_bits)
}

/// An immutable transfer between two accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub ledger_id: u64,
    pub debit_account_id: u64,
    pub credit_account_id: u64,
    pub amount: u64,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub flags: Option<u16>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub pending_id: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl Transfer {
    pub fn new(ledger_id: u64, debit_account_id: u64, credit_account_id: u64, amount: u64) -> Self {
        Self {
            id: new_transfer_id(),
            ledger_id,
            debit_account_id,
            credit_account_id,
            amount,
            code: None,
            flags: None,
            user_data: None,
            pending_id: None,
            timeout: None,
            timestamp: None,
        }
    }
}

/// An account's balance counters. All four counters are non-negative and
/// only ever incremented by the sink's numeric-increment operation, the
/// driver never reads or recomputes them locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct AccountBalances {
    pub debits_pending: u64,
    pub debits_posted: u64,
    pub credits_pending: u64,
    pub credits_posted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub ledger_id: u64,
    #[serde(flatten)]
    pub balances: AccountBalances,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub flags: Option<u16>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}
