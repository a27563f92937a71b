//! Wager ledger core: fixed-point money, the versioned balance store, the
//! append-only external transaction log, and the transaction processor.
//!
//! Everything here is deterministic and IO-free; time enters only as a
//! `DateTime<Utc>` argument so the same request sequence always produces
//! the same ledger state.

pub mod fixedpoint;
pub mod processor;
pub mod sessions;
pub mod store;
pub mod types;

pub use fixedpoint::{Micros, ParseMoneyError, BPS_SCALE, MICROS_SCALE};
pub use processor::{NoopHooks, Processor, ProcessorHooks, TxError};
pub use sessions::SessionStore;
pub use store::{LedgerCommit, LedgerStore, RoundDelta, StoreError};
pub use types::{
    AccountBalance, ApplyOutcome, RequestType, Round, RoundKey, TxRecord, TxRequest, TxStatus,
};
