//! Transaction processor — applies provider wager/result/rollback requests
//! against the versioned ledger store, idempotently.
//!
//! # Contract
//! `Processor::apply` is the single entry point for provider-originated
//! mutations. Guarantees:
//!
//! - Exactly-once economic effect per `(transaction_id, request_type)`:
//!   replays return the recorded outcome verbatim with `AlreadyApplied` and
//!   never touch the balance.
//! - Balance mutation and transaction-record append commit as one unit
//!   (see [`LedgerStore::commit`]).
//! - Conflicting mutations to one account serialize through bounded
//!   compare-and-set retries; different accounts proceed in parallel.
//! - Rollbacks are bounded by what the round actually had applied.
//!
//! Anything slow (reward accrual, notification fan-out) happens behind
//! [`ProcessorHooks`] — the hook implementations must only enqueue.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use wgr_schemas::WagerPlacedEvent;

use crate::fixedpoint::Micros;
use crate::sessions::SessionStore;
use crate::store::{LedgerCommit, LedgerStore, RoundDelta, StoreError};
use crate::types::{ApplyOutcome, RequestType, RoundKey, TxRecord, TxRequest, TxStatus};

/// Bounded CAS retry count before surfacing `ConcurrentUpdateConflict`.
const MAX_CAS_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    UnknownAccount {
        account_id: Uuid,
    },
    /// Session is bound to a different account (or unknown where a binding
    /// is mandatory).
    SessionMismatch {
        session_id: String,
    },
    NegativeAmount {
        amount: Micros,
    },
    InsufficientBalance {
        requested: Micros,
        available: Micros,
    },
    /// Rollback / re-apply amount exceeds what the round has to undo.
    InvalidRollbackAmount {
        requested: Micros,
        outstanding: Micros,
    },
    /// Rollback references a transaction that was never applied.
    UnknownReference {
        transaction_id: String,
    },
    /// Rollback types require `reference_transaction_id`.
    MissingReference,
    /// CAS retries exhausted; transient, the provider may retry.
    ConcurrentUpdateConflict {
        attempts: u32,
    },
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAccount { account_id } => write!(f, "unknown account {account_id}"),
            Self::SessionMismatch { session_id } => {
                write!(f, "session {session_id} is not bound to this account")
            }
            Self::NegativeAmount { amount } => write!(f, "amount must be non-negative, got {amount}"),
            Self::InsufficientBalance {
                requested,
                available,
            } => write!(
                f,
                "insufficient balance: requested {requested}, available {available}"
            ),
            Self::InvalidRollbackAmount {
                requested,
                outstanding,
            } => write!(
                f,
                "rollback amount {requested} exceeds outstanding {outstanding}"
            ),
            Self::UnknownReference { transaction_id } => {
                write!(f, "referenced transaction {transaction_id} was never applied")
            }
            Self::MissingReference => write!(f, "rollback requires reference_transaction_id"),
            Self::ConcurrentUpdateConflict { attempts } => {
                write!(f, "concurrent update conflict after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for TxError {}

// ---------------------------------------------------------------------------
// Hooks — async side effects deferred out of the provider path
// ---------------------------------------------------------------------------

/// Seams for work that must not extend provider-facing latency. Hook
/// implementations enqueue and return; they run after the ledger commit has
/// already succeeded, so they must not fail the transaction.
pub trait ProcessorHooks: Send + Sync {
    /// A wager debit committed; feeds the reward pipeline (at-least-once).
    fn wager_placed(&self, _event: WagerPlacedEvent) {}

    /// Any balance-changing commit succeeded.
    fn balance_updated(&self, _account_id: Uuid, _balance: Micros, _currency: &str) {}

    /// A result credit left the round net-positive for the player.
    fn win_recorded(&self, _account_id: Uuid, _round_id: &str, _net: Micros, _currency: &str) {}
}

/// Hook sink for tests and standalone use.
pub struct NoopHooks;

impl ProcessorHooks for NoopHooks {}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct Processor {
    store: Arc<LedgerStore>,
    sessions: Arc<SessionStore>,
    hooks: Arc<dyn ProcessorHooks>,
}

impl Processor {
    pub fn new(
        store: Arc<LedgerStore>,
        sessions: Arc<SessionStore>,
        hooks: Arc<dyn ProcessorHooks>,
    ) -> Self {
        Self {
            store,
            sessions,
            hooks,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Current balance for the provider's balance query.
    pub fn balance_of(&self, account_id: Uuid) -> Result<Micros, TxError> {
        Ok(self.read_balance(account_id)?.amount)
    }

    /// Apply one provider request. See module docs for guarantees.
    pub fn apply(&self, req: &TxRequest, now: DateTime<Utc>) -> Result<ApplyOutcome, TxError> {
        if req.amount.is_negative() {
            return Err(TxError::NegativeAmount { amount: req.amount });
        }

        // Idempotent replay: the recorded outcome, verbatim, no mutation.
        if let Some(prior) = self
            .store
            .applied_record(&req.transaction_id, req.request_type)
        {
            info!(
                transaction_id = %req.transaction_id,
                request_type = req.request_type.as_str(),
                "duplicate request, returning recorded outcome"
            );
            return Ok(ApplyOutcome {
                status: TxStatus::AlreadyApplied,
                balance: prior.balance_after,
                transaction_id: prior.transaction_id,
            });
        }

        let outcome = self.check_session(req).and_then(|_| match req.request_type {
            RequestType::Wager => self.apply_wager(req, now),
            RequestType::Result => self.apply_result(req, now),
            RequestType::Rollback => self.apply_rollback(req, now),
            RequestType::RollbackOfRollback => self.apply_rollback_of_rollback(req, now),
        });

        if let Err(err) = &outcome {
            self.record_rejection(req, err, now);
        }
        outcome
    }

    /// Balance credit/debit by delta outside the provider protocol — the
    /// mutation primitive the reward engine's claim path uses. Same CAS
    /// discipline, no transaction record (claims carry their own audit).
    pub fn adjust_balance(
        &self,
        account_id: Uuid,
        delta: Micros,
        now: DateTime<Utc>,
    ) -> Result<Micros, TxError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.read_balance(account_id)?;
            match self
                .store
                .set_amount(account_id, current.version, current.amount + delta, now)
            {
                Ok(updated) => {
                    self.hooks
                        .balance_updated(account_id, updated.amount, &updated.currency);
                    return Ok(updated.amount);
                }
                Err(StoreError::VersionConflict { .. }) if attempts < MAX_CAS_ATTEMPTS => continue,
                Err(StoreError::VersionConflict { .. }) => {
                    return Err(TxError::ConcurrentUpdateConflict { attempts })
                }
                Err(e) => return Err(map_store_error(e, account_id)),
            }
        }
    }

    /// Overwrite the internal balance to a target value — reconciliation
    /// repair only (provider is the system of record for small drifts).
    pub fn set_balance_to(
        &self,
        account_id: Uuid,
        target: Micros,
        now: DateTime<Utc>,
    ) -> Result<Micros, TxError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.read_balance(account_id)?;
            match self
                .store
                .set_amount(account_id, current.version, target, now)
            {
                Ok(updated) => {
                    self.hooks
                        .balance_updated(account_id, updated.amount, &updated.currency);
                    return Ok(updated.amount);
                }
                Err(StoreError::VersionConflict { .. }) if attempts < MAX_CAS_ATTEMPTS => continue,
                Err(StoreError::VersionConflict { .. }) => {
                    return Err(TxError::ConcurrentUpdateConflict { attempts })
                }
                Err(e) => return Err(map_store_error(e, account_id)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Request types
    // -----------------------------------------------------------------------

    fn apply_wager(&self, req: &TxRequest, now: DateTime<Utc>) -> Result<ApplyOutcome, TxError> {
        let updated = self.commit_with_retry(req, now, |balance| {
            if req.amount > balance.available() {
                return Err(TxError::InsufficientBalance {
                    requested: req.amount,
                    available: balance.available(),
                });
            }
            Ok((
                balance.amount - req.amount,
                RoundDelta {
                    wagered: req.amount,
                    ..Default::default()
                },
            ))
        })?;

        info!(
            transaction_id = %req.transaction_id,
            account_id = %req.account_id,
            amount = %req.amount,
            balance = %updated.balance,
            "wager applied"
        );

        self.hooks.wager_placed(WagerPlacedEvent {
            user_id: req.account_id,
            game_id: req.game_id.clone(),
            round_id: req.round_id.clone(),
            amount_micros: req.amount.raw(),
            house_edge_bps: None,
            source_transaction_id: req.transaction_id.clone(),
            ts_utc: now,
        });
        self.hooks
            .balance_updated(req.account_id, updated.balance, &updated.currency);
        Ok(updated.into_outcome())
    }

    fn apply_result(&self, req: &TxRequest, now: DateTime<Utc>) -> Result<ApplyOutcome, TxError> {
        // Zero is legal: a loss still closes the round.
        let updated = self.commit_with_retry(req, now, |balance| {
            Ok((
                balance.amount + req.amount,
                RoundDelta {
                    returned: req.amount,
                    ..Default::default()
                },
            ))
        })?;

        info!(
            transaction_id = %req.transaction_id,
            account_id = %req.account_id,
            amount = %req.amount,
            balance = %updated.balance,
            "result applied"
        );

        let round = self.store.round(&round_key(req));
        let net = round.net();
        if net > Micros::ZERO {
            self.hooks
                .win_recorded(req.account_id, &req.round_id, net, &updated.currency);
        }
        self.hooks
            .balance_updated(req.account_id, updated.balance, &updated.currency);
        Ok(updated.into_outcome())
    }

    fn apply_rollback(&self, req: &TxRequest, now: DateTime<Utc>) -> Result<ApplyOutcome, TxError> {
        let reference = self.resolve_reference(req)?;

        // Zero amount means "the whole referenced transaction".
        let amount = if req.amount.is_zero() {
            reference.amount
        } else {
            req.amount
        };

        let reversing_wager = reference.request_type == RequestType::Wager;
        let updated = self.commit_with_retry(req, now, |balance| {
            let round = self.store.round(&round_key(req));
            let outstanding = if reversing_wager {
                round.wagered_outstanding()
            } else {
                round.returned_outstanding()
            };
            if amount > outstanding {
                return Err(TxError::InvalidRollbackAmount {
                    requested: amount,
                    outstanding,
                });
            }
            if reversing_wager {
                // Undo a debit: give the wager back.
                Ok((
                    balance.amount + amount,
                    RoundDelta {
                        wager_rolled_back: amount,
                        ..Default::default()
                    },
                ))
            } else {
                // Undo a credit. May overdraw a balance the player already
                // spent elsewhere; the round bound is the invariant here,
                // the floor is reconciliation's concern.
                Ok((
                    balance.amount - amount,
                    RoundDelta {
                        result_rolled_back: amount,
                        ..Default::default()
                    },
                ))
            }
        })?;

        info!(
            transaction_id = %req.transaction_id,
            reference = %reference.transaction_id,
            reversing = reference.request_type.as_str(),
            amount = %amount,
            balance = %updated.balance,
            "rollback applied"
        );
        self.hooks
            .balance_updated(req.account_id, updated.balance, &updated.currency);
        Ok(updated.into_outcome())
    }

    fn apply_rollback_of_rollback(
        &self,
        req: &TxRequest,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, TxError> {
        let reference = self.resolve_reference(req)?;

        let amount = if req.amount.is_zero() {
            reference.amount
        } else {
            req.amount
        };

        let reapplying_wager = reference.request_type == RequestType::Wager;
        let updated = self.commit_with_retry(req, now, |balance| {
            let round = self.store.round(&round_key(req));
            let rolled_back = if reapplying_wager {
                round.wager_rolled_back
            } else {
                round.result_rolled_back
            };
            if amount > rolled_back {
                return Err(TxError::InvalidRollbackAmount {
                    requested: amount,
                    outstanding: rolled_back,
                });
            }
            if reapplying_wager {
                // Re-apply the debit the rollback had returned.
                Ok((
                    balance.amount - amount,
                    RoundDelta {
                        wager_rolled_back: -amount,
                        ..Default::default()
                    },
                ))
            } else {
                Ok((
                    balance.amount + amount,
                    RoundDelta {
                        result_rolled_back: -amount,
                        ..Default::default()
                    },
                ))
            }
        })?;

        info!(
            transaction_id = %req.transaction_id,
            reference = %reference.transaction_id,
            amount = %amount,
            balance = %updated.balance,
            "rollback-of-rollback applied"
        );
        self.hooks
            .balance_updated(req.account_id, updated.balance, &updated.currency);
        Ok(updated.into_outcome())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn read_balance(&self, account_id: Uuid) -> Result<crate::types::AccountBalance, TxError> {
        self.store
            .balance(account_id)
            .map_err(|e| map_store_error(e, account_id))
    }

    /// Wager requests require a live binding; results and rollbacks are
    /// accepted after session expiry (the provider replays them past the
    /// session's lifetime) but a *conflicting* binding always rejects.
    fn check_session(&self, req: &TxRequest) -> Result<(), TxError> {
        match self.sessions.account_for(&req.session_id) {
            Some(bound) if bound == req.account_id => Ok(()),
            Some(_) => Err(TxError::SessionMismatch {
                session_id: req.session_id.clone(),
            }),
            None if req.request_type == RequestType::Wager => Err(TxError::SessionMismatch {
                session_id: req.session_id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// The transaction a rollback points at: the `Applied` wager, or failing
    /// that the `Applied` result, under the referenced id.
    fn resolve_reference(&self, req: &TxRequest) -> Result<TxRecord, TxError> {
        let reference_id = req
            .reference_transaction_id
            .as_deref()
            .ok_or(TxError::MissingReference)?;
        self.store
            .applied_record(reference_id, RequestType::Wager)
            .or_else(|| self.store.applied_record(reference_id, RequestType::Result))
            .ok_or_else(|| TxError::UnknownReference {
                transaction_id: reference_id.to_string(),
            })
    }

    /// Read-compute-commit loop. `compute` sees the current balance and
    /// returns the new amount plus round delta, or a business rejection.
    fn commit_with_retry<F>(
        &self,
        req: &TxRequest,
        now: DateTime<Utc>,
        compute: F,
    ) -> Result<Committed, TxError>
    where
        F: Fn(&crate::types::AccountBalance) -> Result<(Micros, RoundDelta), TxError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let balance = self.read_balance(req.account_id)?;
            let (new_amount, round_delta) = compute(&balance)?;

            let commit = LedgerCommit {
                account_id: req.account_id,
                expected_version: balance.version,
                new_amount,
                record: TxRecord {
                    transaction_id: req.transaction_id.clone(),
                    request_type: req.request_type,
                    round_id: req.round_id.clone(),
                    session_id: req.session_id.clone(),
                    account_id: req.account_id,
                    amount: req.amount,
                    status: TxStatus::Applied,
                    applied_at: now,
                    balance_after: new_amount,
                },
                round_key: round_key(req),
                round_delta,
                now,
            };

            match self.store.commit(commit) {
                Ok(updated) => {
                    return Ok(Committed {
                        balance: updated.amount,
                        currency: updated.currency,
                        transaction_id: req.transaction_id.clone(),
                    })
                }
                Err(StoreError::VersionConflict { .. }) if attempts < MAX_CAS_ATTEMPTS => {
                    debug!(
                        transaction_id = %req.transaction_id,
                        attempts, "CAS conflict, retrying"
                    );
                    continue;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(
                        transaction_id = %req.transaction_id,
                        attempts, "CAS retries exhausted"
                    );
                    return Err(TxError::ConcurrentUpdateConflict { attempts });
                }
                Err(StoreError::DuplicateApplied { .. }) => {
                    // A concurrent replay of this exact request won the
                    // race; its outcome is now the canonical one.
                    let prior = self
                        .store
                        .applied_record(&req.transaction_id, req.request_type)
                        .expect("duplicate-applied implies a record exists");
                    return Ok(Committed {
                        balance: prior.balance_after,
                        currency: balance.currency,
                        transaction_id: prior.transaction_id,
                    });
                }
                Err(e) => return Err(map_store_error(e, req.account_id)),
            }
        }
    }

    /// Best-effort append of a `Rejected` record (balance unchanged). The
    /// rejection itself is already decided; losing this record to a version
    /// race costs audit detail, not correctness, so we don't loop hard.
    fn record_rejection(&self, req: &TxRequest, err: &TxError, now: DateTime<Utc>) {
        let Ok(balance) = self.store.balance(req.account_id) else {
            return;
        };
        let commit = LedgerCommit {
            account_id: req.account_id,
            expected_version: balance.version,
            new_amount: balance.amount,
            record: TxRecord {
                transaction_id: req.transaction_id.clone(),
                request_type: req.request_type,
                round_id: req.round_id.clone(),
                session_id: req.session_id.clone(),
                account_id: req.account_id,
                amount: req.amount,
                status: TxStatus::Rejected,
                applied_at: now,
                balance_after: balance.amount,
            },
            round_key: round_key(req),
            round_delta: RoundDelta::default(),
            now,
        };
        if self.store.commit(commit).is_err() {
            warn!(
                transaction_id = %req.transaction_id,
                error = %err,
                "could not append rejection record"
            );
        }
    }
}

struct Committed {
    balance: Micros,
    currency: String,
    transaction_id: String,
}

impl Committed {
    fn into_outcome(self) -> ApplyOutcome {
        ApplyOutcome {
            status: TxStatus::Applied,
            balance: self.balance,
            transaction_id: self.transaction_id,
        }
    }
}

fn round_key(req: &TxRequest) -> RoundKey {
    RoundKey {
        round_id: req.round_id.clone(),
        session_id: req.session_id.clone(),
        account_id: req.account_id,
    }
}

fn map_store_error(e: StoreError, account_id: Uuid) -> TxError {
    match e {
        StoreError::UnknownAccount { .. } | StoreError::AccountExists { .. } => {
            TxError::UnknownAccount { account_id }
        }
        StoreError::VersionConflict { .. } => TxError::ConcurrentUpdateConflict { attempts: 0 },
        StoreError::DuplicateApplied { .. } => TxError::ConcurrentUpdateConflict { attempts: 0 },
    }
}
