//! Wire DTOs shared across crate boundaries.
//!
//! Monetary amounts on the wire are decimal strings ("25.00"); everything
//! internal is 1e-6 fixed point. Parsing/formatting lives in
//! `wgr-ledger::fixedpoint` — this crate is serde shapes only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider protocol status codes. The upstream wallet API uses flat numeric
/// codes rather than HTTP semantics; every response is HTTP 200 with one of
/// these in the body.
pub mod provider_code {
    /// Request applied (or replayed — see the status string).
    pub const SUCCESS: u16 = 200;
    /// Unexpected internal failure.
    pub const TECHNICAL_ERROR: u16 = 1;
    /// Referenced wager/result transaction does not exist.
    pub const WAGER_NOT_FOUND: u16 = 102;
    /// Account unknown, malformed, or not permitted to transact.
    pub const OPERATION_NOT_ALLOWED: u16 = 110;
    /// Session is not bound to the requested account.
    pub const NOT_LOGGED_ON: u16 = 1000;
    /// Wager exceeds the available balance.
    pub const INSUFFICIENT_FUNDS: u16 = 105;
    /// Rollback amount exceeds what the round actually applied.
    pub const INVALID_ROLLBACK: u16 = 106;
    /// Bounded CAS retries exhausted; provider should retry.
    pub const TRANSIENT_CONFLICT: u16 = 107;
}

/// Inbound provider transaction request (wager / result / rollback /
/// rollback-of-rollback all share this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTxRequest {
    pub transaction_id: String,
    pub account_id: String,
    pub session_id: String,
    pub round_id: String,
    pub game_id: String,
    /// Decimal string, non-negative. Zero is legal for results (a loss).
    pub amount: String,
    /// For rollback types: the transaction being reversed / re-applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_transaction_id: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

pub fn default_api_version() -> String {
    "1.2".to_string()
}

/// Provider transaction response. Echoes the resulting balance and a status
/// code that distinguishes applied / already-applied / rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTxResponse {
    pub code: u16,
    pub status: String,
    pub transaction_id: String,
    pub balance: String,
    pub api_version: String,
}

/// Provider balance query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBalanceResponse {
    pub code: u16,
    pub status: String,
    pub balance: String,
    pub currency: String,
    pub api_version: String,
}

/// Outbound "wager placed" event, consumed by the reward engine and by the
/// external analytics collaborator. Amounts here are micros — this envelope
/// never leaves the backend boundary unconverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerPlacedEvent {
    pub user_id: Uuid,
    pub game_id: String,
    pub round_id: String,
    /// Wager amount in micros.
    pub amount_micros: i64,
    /// House-edge context in basis points, if the processor knew it at
    /// publish time. The reward engine re-resolves from config when absent.
    pub house_edge_bps: Option<i64>,
    /// Provider transaction id of the wager — the reward engine's
    /// idempotency key.
    pub source_transaction_id: String,
    pub ts_utc: DateTime<Utc>,
}

/// Cashback claim API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub user_id: Uuid,
    /// Decimal string.
    pub amount: String,
}

/// Cashback claim API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub claim_id: Uuid,
    pub amount: String,
    pub net_amount: String,
    pub fee: String,
    pub status: String,
}

/// Balance-sync validation API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSyncResponse {
    pub internal_balance: String,
    pub provider_balance: String,
    pub in_sync: bool,
    pub discrepancy: String,
    pub last_sync_time: DateTime<Utc>,
}
