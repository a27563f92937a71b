//! Axum router and all HTTP handlers for wgr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Provider endpoints follow the wallet protocol: always HTTP 200, with the
//! outcome carried as a numeric code in the body. Player/operator endpoints
//! use ordinary HTTP status semantics.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wgr_audit::AuditTopic;
use wgr_ledger::{Micros, RequestType, TxError, TxRequest, TxStatus};
use wgr_rewards::RewardError;
use wgr_schemas::{
    provider_code, ClaimRequest, ClaimResponse, ProviderBalanceResponse, ProviderTxRequest,
    ProviderTxResponse,
};

use crate::api_types::{
    CloseSessionRequest, ErrorResponse, HealthResponse, OpenAccountRequest, OpenAccountResponse,
    OpenSessionRequest, ProviderBalanceReport, StatusResponse,
};
use crate::state::{reconcile_one, uptime_secs, AppState};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/accounts", post(open_account))
        .route("/v1/sessions", post(open_session))
        .route("/v1/sessions/close", post(close_session))
        .route("/v1/provider/wager", post(provider_wager))
        .route("/v1/provider/result", post(provider_result))
        .route("/v1/provider/rollback", post(provider_rollback))
        .route(
            "/v1/provider/rollback-of-rollback",
            post(provider_rollback_of_rollback),
        )
        .route("/v1/provider/balance/:account_id", get(provider_balance))
        .route("/v1/cashback/claim", post(cashback_claim))
        .route("/v1/cashback/summary/:user_id", get(cashback_summary))
        .route("/v1/balance-sync/:user_id", get(balance_sync))
        .route(
            "/v1/balance-sync/:user_id/provider",
            post(balance_sync_report),
        )
        .route(
            "/v1/balance-sync/:user_id/reconcile",
            post(balance_sync_reconcile),
        )
        .route("/v1/ws", get(ws_upgrade))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health, GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "wgr-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
            queue_ready: st.queue.ready_len(),
            queue_in_flight: st.queue.in_flight_len(),
            queue_parked: st.queue.parked_len(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/accounts, POST /v1/sessions
// ---------------------------------------------------------------------------

pub(crate) async fn open_account(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OpenAccountRequest>,
) -> Response {
    let account_id = req.account_id.unwrap_or_else(Uuid::new_v4);
    let currency = req.currency.unwrap_or_else(|| st.config.currency.clone());
    let initial = match req.initial_balance.as_deref() {
        Some(raw) => match Micros::parse_decimal(raw) {
            Ok(amount) if !amount.is_negative() => amount,
            _ => return bad_request("initial_balance must be a non-negative decimal"),
        },
        None => Micros::ZERO,
    };

    if st
        .ledger
        .open_account(account_id, currency.clone(), initial, Utc::now())
        .is_err()
    {
        return bad_request("account already exists");
    }

    info!(%account_id, balance = %initial, "account opened");
    (
        StatusCode::OK,
        Json(OpenAccountResponse {
            account_id,
            balance: initial.to_decimal_string(),
            currency,
        }),
    )
        .into_response()
}

pub(crate) async fn open_session(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OpenSessionRequest>,
) -> Response {
    match st.sessions.bind(req.session_id.clone(), req.account_id) {
        Ok(()) => {
            debug!(session_id = %req.session_id, account_id = %req.account_id, "session bound");
            StatusCode::OK.into_response()
        }
        Err(existing) => {
            warn!(
                session_id = %req.session_id,
                bound_to = %existing,
                "session rebind to a different account refused"
            );
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "session is already bound to another account".to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub(crate) async fn close_session(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CloseSessionRequest>,
) -> impl IntoResponse {
    st.sessions.end(&req.session_id);
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// POST /v1/provider/{wager,result,rollback,rollback-of-rollback}
// ---------------------------------------------------------------------------

pub(crate) async fn provider_wager(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ProviderTxRequest>,
) -> Response {
    provider_tx(st, RequestType::Wager, req).await
}

pub(crate) async fn provider_result(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ProviderTxRequest>,
) -> Response {
    provider_tx(st, RequestType::Result, req).await
}

pub(crate) async fn provider_rollback(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ProviderTxRequest>,
) -> Response {
    provider_tx(st, RequestType::Rollback, req).await
}

pub(crate) async fn provider_rollback_of_rollback(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ProviderTxRequest>,
) -> Response {
    provider_tx(st, RequestType::RollbackOfRollback, req).await
}

/// Shared body of the four provider transaction endpoints.
async fn provider_tx(
    st: Arc<AppState>,
    request_type: RequestType,
    req: ProviderTxRequest,
) -> Response {
    let api_version = req.api_version.clone();

    let Ok(account_id) = Uuid::parse_str(&req.account_id) else {
        return provider_reply(
            provider_code::OPERATION_NOT_ALLOWED,
            "Operation not allowed",
            &req.transaction_id,
            Micros::ZERO,
            api_version,
        );
    };
    let Ok(amount) = Micros::parse_decimal(&req.amount) else {
        return provider_reply(
            provider_code::OPERATION_NOT_ALLOWED,
            "Operation not allowed",
            &req.transaction_id,
            current_balance(&st, account_id),
            api_version,
        );
    };

    let tx = TxRequest {
        transaction_id: req.transaction_id.clone(),
        request_type,
        account_id,
        session_id: req.session_id.clone(),
        round_id: req.round_id.clone(),
        game_id: req.game_id.clone(),
        amount,
        reference_transaction_id: req.reference_transaction_id.clone(),
    };

    let now = Utc::now();
    match st.processor.apply(&tx, now) {
        Ok(outcome) => {
            let status = match outcome.status {
                TxStatus::AlreadyApplied => "Success - duplicate request",
                _ => "Success",
            };
            st.audit(
                AuditTopic::Transaction,
                request_type.as_str(),
                json!({
                    "transaction_id": req.transaction_id,
                    "account_id": account_id,
                    "amount_micros": amount.raw(),
                    "status": status,
                    "balance_micros": outcome.balance.raw(),
                }),
            );
            // Every response teaches the provider our balance; remember what
            // it last saw so reconciliation has a baseline.
            st.provider_view
                .write()
                .await
                .insert(account_id, outcome.balance);
            provider_reply(
                provider_code::SUCCESS,
                status,
                &outcome.transaction_id,
                outcome.balance,
                api_version,
            )
        }
        Err(err) => {
            let (code, status) = map_tx_error(&err);
            st.audit(
                AuditTopic::Transaction,
                request_type.as_str(),
                json!({
                    "transaction_id": req.transaction_id,
                    "account_id": account_id,
                    "amount_micros": amount.raw(),
                    "status": status,
                    "error": err.to_string(),
                }),
            );
            provider_reply(
                code,
                status,
                &req.transaction_id,
                current_balance(&st, account_id),
                api_version,
            )
        }
    }
}

fn map_tx_error(err: &TxError) -> (u16, &'static str) {
    match err {
        TxError::UnknownAccount { .. } | TxError::NegativeAmount { .. } => {
            (provider_code::OPERATION_NOT_ALLOWED, "Operation not allowed")
        }
        TxError::SessionMismatch { .. } => (provider_code::NOT_LOGGED_ON, "Not logged on"),
        TxError::InsufficientBalance { .. } => {
            (provider_code::INSUFFICIENT_FUNDS, "Insufficient funds")
        }
        TxError::InvalidRollbackAmount { .. } => {
            (provider_code::INVALID_ROLLBACK, "Invalid rollback")
        }
        TxError::UnknownReference { .. } | TxError::MissingReference => {
            (provider_code::WAGER_NOT_FOUND, "Wager not found")
        }
        TxError::ConcurrentUpdateConflict { .. } => {
            (provider_code::TRANSIENT_CONFLICT, "Transient conflict, retry")
        }
    }
}

fn current_balance(st: &AppState, account_id: Uuid) -> Micros {
    st.processor.balance_of(account_id).unwrap_or(Micros::ZERO)
}

fn provider_reply(
    code: u16,
    status: &str,
    transaction_id: &str,
    balance: Micros,
    api_version: String,
) -> Response {
    (
        StatusCode::OK,
        Json(ProviderTxResponse {
            code,
            status: status.to_string(),
            transaction_id: transaction_id.to_string(),
            balance: balance.to_decimal_string(),
            api_version,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/provider/balance/:account_id
// ---------------------------------------------------------------------------

pub(crate) async fn provider_balance(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> Response {
    let parsed = Uuid::parse_str(&account_id)
        .ok()
        .and_then(|id| st.processor.balance_of(id).ok().map(|b| (id, b)));
    match parsed {
        Some((account_id, balance)) => {
            st.provider_view.write().await.insert(account_id, balance);
            (
                StatusCode::OK,
                Json(ProviderBalanceResponse {
                    code: provider_code::SUCCESS,
                    status: "Success".to_string(),
                    balance: balance.to_decimal_string(),
                    currency: st.config.currency.clone(),
                    api_version: wgr_schemas::default_api_version(),
                }),
            )
                .into_response()
        }
        None => (
            StatusCode::OK,
            Json(ProviderBalanceResponse {
                code: provider_code::OPERATION_NOT_ALLOWED,
                status: "Operation not allowed".to_string(),
                balance: Micros::ZERO.to_decimal_string(),
                currency: st.config.currency.clone(),
                api_version: wgr_schemas::default_api_version(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/cashback/claim, GET /v1/cashback/summary/:user_id
// ---------------------------------------------------------------------------

pub(crate) async fn cashback_claim(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    let Ok(amount) = Micros::parse_decimal(&req.amount) else {
        return bad_request("amount must be a decimal string");
    };

    let now = Utc::now();
    let processor = Arc::clone(&st.processor);
    let user_id = req.user_id;
    let result = st.rewards.claim(user_id, amount, now, |net| {
        processor.adjust_balance(user_id, net, now).map(|_| net)
    });

    match result {
        Ok(claim) => {
            st.audit(
                AuditTopic::Claim,
                "claim_completed",
                json!({
                    "claim_id": claim.claim_id,
                    "user_id": user_id,
                    "requested_micros": claim.requested_amount.raw(),
                    "net_micros": claim.net_amount.raw(),
                    "fee_micros": claim.fee.raw(),
                    "earnings_consumed": claim.earning_ids_consumed.len(),
                }),
            );
            (
                StatusCode::OK,
                Json(ClaimResponse {
                    claim_id: claim.claim_id,
                    amount: claim.requested_amount.to_decimal_string(),
                    net_amount: claim.net_amount.to_decimal_string(),
                    fee: claim.fee.to_decimal_string(),
                    status: "completed".to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            st.audit(
                AuditTopic::Claim,
                "claim_rejected",
                json!({
                    "user_id": user_id,
                    "requested_micros": amount.raw(),
                    "error": err.to_string(),
                }),
            );
            let status = match err {
                RewardError::ConcurrentUpdateConflict { .. } | RewardError::CreditFailed(_) => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub(crate) async fn cashback_summary(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(st.rewards.summary(user_id, Utc::now())))
}

// ---------------------------------------------------------------------------
// Balance sync: GET /v1/balance-sync/:user_id,
//               POST .../provider, POST .../reconcile
// ---------------------------------------------------------------------------

pub(crate) async fn balance_sync(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    let Some(provider_balance) = st.provider_view.read().await.get(&user_id).copied() else {
        return not_found("no provider balance reported for this user");
    };
    let Ok(internal) = st.processor.balance_of(user_id) else {
        return not_found("unknown account");
    };
    let status = wgr_reconcile::validate(user_id, internal, provider_balance, Utc::now());
    (
        StatusCode::OK,
        Json(wgr_schemas::BalanceSyncResponse {
            internal_balance: status.internal_balance.to_decimal_string(),
            provider_balance: status.provider_balance.to_decimal_string(),
            in_sync: status.in_sync,
            discrepancy: status.discrepancy.to_decimal_string(),
            last_sync_time: status.checked_at,
        }),
    )
        .into_response()
}

pub(crate) async fn balance_sync_report(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(report): Json<ProviderBalanceReport>,
) -> Response {
    let Ok(balance) = Micros::parse_decimal(&report.balance) else {
        return bad_request("balance must be a decimal string");
    };
    st.provider_view.write().await.insert(user_id, balance);
    StatusCode::OK.into_response()
}

pub(crate) async fn balance_sync_reconcile(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Response {
    let Some(provider_balance) = st.provider_view.read().await.get(&user_id).copied() else {
        return not_found("no provider balance reported for this user");
    };
    match reconcile_one(&st, user_id, provider_balance) {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(TxError::UnknownAccount { .. }) => not_found("unknown account"),
        Err(err) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/ws — realtime notifications
// ---------------------------------------------------------------------------

/// Upgrade and wait for the auth frame: the first text message must be
/// `{"access_token": "<bearer>"}` before any event is delivered. Everything
/// after that is server-push only.
pub(crate) async fn ws_upgrade(
    State(st): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| ws_session(st, socket))
}

/// Parse the first-frame handshake and resolve the credential to a user.
fn authenticate(frame: &str) -> Option<Uuid> {
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    bearer_subject(value["access_token"].as_str()?)
}

/// Resolve a bearer token to its subject. Token issuance and signature
/// verification live in the external auth service; the tokens it mints
/// carry the user id as the subject, so until that service is wired in the
/// token body is the subject itself.
fn bearer_subject(token: &str) -> Option<Uuid> {
    Uuid::parse_str(token).ok()
}

async fn ws_session(st: Arc<AppState>, mut socket: WebSocket) {
    let user_id = match socket.recv().await {
        Some(Ok(Message::Text(frame))) => match authenticate(&frame) {
            Some(id) => id,
            None => {
                let _ = socket
                    .send(Message::Text(
                        "{\"error\":\"authentication required\"}".to_string(),
                    ))
                    .await;
                return;
            }
        },
        _ => return,
    };

    let handle = st.notifier.register(user_id);
    let connection_id = handle.connection_id;
    let mut rx = handle.rx;
    debug!(%user_id, connection_id, "websocket session started");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                // Client frames are ignored; any close or error ends the
                // session.
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    st.notifier.unregister(user_id, connection_id);
    debug!(%user_id, connection_id, "websocket session ended");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bad_request(msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn not_found(msg: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_auth_frame_requires_a_credential() {
        let user = Uuid::new_v4();
        let frame = format!(r#"{{"access_token":"{user}"}}"#);
        assert_eq!(authenticate(&frame), Some(user));

        // A bare user id is not a credential.
        let bare = format!(r#"{{"user_id":"{user}"}}"#);
        assert_eq!(authenticate(&bare), None);
        assert_eq!(authenticate(r#"{"access_token":""}"#), None);
        assert_eq!(authenticate("not json"), None);
    }
}
