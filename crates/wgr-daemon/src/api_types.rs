//! Daemon-local request/response shapes. Provider wire DTOs live in
//! `wgr-schemas`; these are the operator/player-facing extras.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// GET /v1/status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub config_hash: String,
    pub queue_ready: usize,
    pub queue_in_flight: usize,
    pub queue_parked: usize,
}

/// Uniform JSON error body for the non-provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccountRequest {
    /// Omitted = server-assigned.
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Decimal string; defaults to zero.
    #[serde(default)]
    pub initial_balance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccountResponse {
    pub account_id: Uuid,
    pub balance: String,
    pub currency: String,
}

/// Game-launch callback: binds a provider session to an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub session_id: String,
    pub account_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: String,
}

/// Upstream poller reporting the provider's balance view for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBalanceReport {
    /// Decimal string.
    pub balance: String,
}
