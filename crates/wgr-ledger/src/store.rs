//! In-memory ledger store with explicit optimistic versioning.
//!
//! The store is the data-layer boundary: every balance mutation is a
//! compare-and-set conditioned on the balance row's `version`, and the
//! matching external transaction record is appended in the same commit or
//! not at all. Callers (the processor) run the read-compute-commit loop;
//! the store only ever applies a commit whose expected version still holds.
//!
//! Nothing here relies on the process-wide lock for correctness of the
//! concurrency story — the version check is the contract, so a storage
//! engine with conditional writes can replace this implementation without
//! touching the processor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::fixedpoint::Micros;
use crate::types::{AccountBalance, Round, RoundKey, RequestType, TxRecord, TxStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownAccount { account_id: Uuid },
    AccountExists { account_id: Uuid },
    /// Expected version no longer current — caller re-reads and retries.
    VersionConflict { expected: u64, actual: u64 },
    /// An `Applied` record already exists for this idempotency key.
    DuplicateApplied {
        transaction_id: String,
        request_type: RequestType,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAccount { account_id } => write!(f, "unknown account {account_id}"),
            Self::AccountExists { account_id } => write!(f, "account {account_id} already exists"),
            Self::VersionConflict { expected, actual } => {
                write!(f, "version conflict: expected {expected}, actual {actual}")
            }
            Self::DuplicateApplied {
                transaction_id,
                request_type,
            } => write!(
                f,
                "applied record already exists for ({transaction_id}, {})",
                request_type.as_str()
            ),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Commit shape
// ---------------------------------------------------------------------------

/// Signed per-round adjustments applied together with a balance commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundDelta {
    pub wagered: Micros,
    pub returned: Micros,
    pub wager_rolled_back: Micros,
    pub result_rolled_back: Micros,
}

/// One atomic unit: conditional balance write + transaction record append +
/// round totals adjustment. Either all three land or none do.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub account_id: Uuid,
    /// Version the caller read before computing `new_amount`.
    pub expected_version: u64,
    pub new_amount: Micros,
    pub record: TxRecord,
    pub round_key: RoundKey,
    pub round_delta: RoundDelta,
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, AccountBalance>,
    /// Append-only log in commit order — the canonical event-sourced record.
    tx_log: Vec<TxRecord>,
    /// Index of `Applied` rows by idempotency key.
    applied: HashMap<(String, RequestType), usize>,
    rounds: HashMap<RoundKey, Round>,
}

/// Thread-safe in-memory ledger store.
#[derive(Default)]
pub struct LedgerStore {
    inner: Mutex<Inner>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with an opening balance at version 1.
    pub fn open_account(
        &self,
        account_id: Uuid,
        currency: impl Into<String>,
        opening: Micros,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("ledger store poisoned");
        if inner.accounts.contains_key(&account_id) {
            return Err(StoreError::AccountExists { account_id });
        }
        inner.accounts.insert(
            account_id,
            AccountBalance {
                account_id,
                currency: currency.into(),
                amount: opening,
                reserved: Micros::ZERO,
                version: 1,
                updated_at: now,
            },
        );
        Ok(())
    }

    /// Snapshot read of one balance row.
    pub fn balance(&self, account_id: Uuid) -> Result<AccountBalance, StoreError> {
        let inner = self.inner.lock().expect("ledger store poisoned");
        inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(StoreError::UnknownAccount { account_id })
    }

    /// The `Applied` record for an idempotency key, if any.
    pub fn applied_record(
        &self,
        transaction_id: &str,
        request_type: RequestType,
    ) -> Option<TxRecord> {
        let inner = self.inner.lock().expect("ledger store poisoned");
        inner
            .applied
            .get(&(transaction_id.to_string(), request_type))
            .map(|&idx| inner.tx_log[idx].clone())
    }

    /// Snapshot of one round's cumulative totals (zeroes if never touched).
    pub fn round(&self, key: &RoundKey) -> Round {
        let inner = self.inner.lock().expect("ledger store poisoned");
        inner.rounds.get(key).cloned().unwrap_or_default()
    }

    /// Full transaction log snapshot, in commit order.
    pub fn transactions(&self) -> Vec<TxRecord> {
        let inner = self.inner.lock().expect("ledger store poisoned");
        inner.tx_log.clone()
    }

    /// Apply one atomic commit. Fails without side effects on version
    /// conflict, unknown account, or an already-applied idempotency key.
    pub fn commit(&self, commit: LedgerCommit) -> Result<AccountBalance, StoreError> {
        let mut inner = self.inner.lock().expect("ledger store poisoned");

        let key = (
            commit.record.transaction_id.clone(),
            commit.record.request_type,
        );
        if commit.record.status == TxStatus::Applied && inner.applied.contains_key(&key) {
            return Err(StoreError::DuplicateApplied {
                transaction_id: key.0,
                request_type: key.1,
            });
        }

        {
            let account = inner
                .accounts
                .get(&commit.account_id)
                .ok_or(StoreError::UnknownAccount {
                    account_id: commit.account_id,
                })?;
            if account.version != commit.expected_version {
                return Err(StoreError::VersionConflict {
                    expected: commit.expected_version,
                    actual: account.version,
                });
            }
        }

        // Checks passed; now mutate everything together.
        let account = inner
            .accounts
            .get_mut(&commit.account_id)
            .expect("checked above");
        account.amount = commit.new_amount;
        account.version += 1;
        account.updated_at = commit.now;
        let updated = account.clone();

        let idx = inner.tx_log.len();
        let status = commit.record.status;
        inner.tx_log.push(commit.record);
        if status == TxStatus::Applied {
            inner.applied.insert(key, idx);
        }

        let round = inner.rounds.entry(commit.round_key).or_default();
        round.wagered += commit.round_delta.wagered;
        round.returned += commit.round_delta.returned;
        round.wager_rolled_back += commit.round_delta.wager_rolled_back;
        round.result_rolled_back += commit.round_delta.result_rolled_back;

        Ok(updated)
    }

    /// Conditional plain balance write (no transaction record) — the
    /// primitive behind reward claims and reconciliation repair. Subject to
    /// the same version discipline as `commit`.
    pub fn set_amount(
        &self,
        account_id: Uuid,
        expected_version: u64,
        new_amount: Micros,
        now: DateTime<Utc>,
    ) -> Result<AccountBalance, StoreError> {
        let mut inner = self.inner.lock().expect("ledger store poisoned");
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::UnknownAccount { account_id })?;
        if account.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: account.version,
            });
        }
        account.amount = new_amount;
        account.version += 1;
        account.updated_at = now;
        Ok(account.clone())
    }
}
