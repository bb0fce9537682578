//! # REST Gateway
//!
//! Builds the axum router that exposes the ledger over HTTP. All endpoints
//! share application state through axum's `State` extractor. JSON bodies
//! use camelCase field names.
//!
//! ## Endpoints
//!
//! | Method | Path            | Description                                |
//! |--------|-----------------|--------------------------------------------|
//! | GET    | `/health`       | Liveness probe                             |
//! | GET    | `/wallets`      | Balance of every wallet, keyed by id       |
//! | PUT    | `/wallets`      | Create a wallet (body: JSON string id)     |
//! | GET    | `/wallets/:id`  | One wallet                                 |
//! | GET    | `/transactions` | Whole ledger, newest first                 |
//! | PUT    | `/transactions` | Transfer between wallets                   |
//! | PUT    | `/gifts`        | Mint points (requires `x-mint-key`)        |
//! | PUT    | `/spends`       | Burn points                                |
//! | GET    | `/audit`        | Recompute balances from the ledger         |
//!
//! Ledger calls block (sled I/O, the memory store's mutex), so they run on
//! tokio's blocking pool rather than on the request task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tally_engine::config::MINT_KEY_HEADER;
use tally_engine::{
    AuditReport, ErrorKind, LedgerError, LedgerResult, PointDeduction, Store, Transaction,
    TransactionProcessor, Transfer, Wallet,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
pub struct AppState<S: Store> {
    pub processor: Arc<TransactionProcessor<S>>,
    pub metrics: SharedMetrics,
    /// Key required on `PUT /gifts`. `None` disables minting.
    pub mint_key: Option<Arc<str>>,
}

// Manual impl: deriving would demand `S: Clone`.
impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            metrics: Arc::clone(&self.metrics),
            mint_key: self.mint_key.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all routes, CORS, and tracing.
pub fn create_router<S: Store + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/wallets", get(list_wallets::<S>).put(create_wallet::<S>))
        .route("/wallets/:id", get(get_wallet::<S>))
        .route(
            "/transactions",
            get(list_transactions::<S>).put(submit_transfer::<S>),
        )
        .route("/gifts", put(submit_gift::<S>))
        .route("/spends", put(submit_spend::<S>))
        .route("/audit", get(audit_handler::<S>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `PUT /gifts`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRequest {
    #[serde(default)]
    pub recipient_wallet_id: Option<String>,
    pub amount: i64,
    /// Defaults to the time the request is processed.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of `PUT /spends`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendRequest {
    #[serde(default)]
    pub source_wallet_id: Option<String>,
    pub amount: i64,
}

/// Error body returned on every failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    /// The body is not valid JSON for the endpoint.
    InvalidRequest(String),
    NotFound(String),
    /// No mint key is configured.
    MintingDisabled,
    /// The mint key header is missing or wrong.
    Unauthorized,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e.kind() {
                ErrorKind::InvalidAmount
                | ErrorKind::MissingWallet
                | ErrorKind::SameWalletTransfer
                | ErrorKind::InsufficientFunds => StatusCode::BAD_REQUEST,
                ErrorKind::SourceNotFound | ErrorKind::RecipientNotFound => StatusCode::NOT_FOUND,
                ErrorKind::LedgerInconsistency | ErrorKind::Storage => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MintingDisabled => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) => e.kind().as_str(),
            ApiError::InvalidRequest(_) => "invalidRequest",
            ApiError::NotFound(_) => "notFound",
            ApiError::MintingDisabled => "mintingDisabled",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Ledger(e) => e.to_string(),
            ApiError::InvalidRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::MintingDisabled => "minting is disabled on this node".into(),
            ApiError::Unauthorized => format!("missing or invalid {MINT_KEY_HEADER} header"),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message(),
            kind: self.kind().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Runs a ledger call on the blocking pool, timing it and counting
/// failures by kind.
async fn blocking<S, R, F>(state: &AppState<S>, op: F) -> Result<R, ApiError>
where
    S: Store + 'static,
    R: Send + 'static,
    F: FnOnce(&TransactionProcessor<S>) -> LedgerResult<R> + Send + 'static,
{
    let processor = Arc::clone(&state.processor);
    let started = Instant::now();

    let result = tokio::task::spawn_blocking(move || op(&processor))
        .await
        .map_err(|e| ApiError::Internal(format!("ledger task failed: {e}")))?;

    state
        .metrics
        .operation_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    result.map_err(|e| {
        state.metrics.record_rejection(e.kind().as_str());
        ApiError::from(e)
    })
}

/// Unwraps a JSON body, counting a malformed one as a rejection.
fn json_body<S: Store, T>(
    state: &AppState<S>,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        let e = ApiError::from(rejection);
        tracing::warn!(kind = e.kind(), "malformed request body");
        state.metrics.record_rejection(e.kind());
        e
    })
}

/// Checks the trusted-mint header against the configured key.
fn authorize_mint<S: Store>(state: &AppState<S>, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.mint_key.as_deref().ok_or(ApiError::MintingDisabled)?;
    let presented = headers
        .get(MINT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /wallets`
async fn list_wallets<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<BTreeMap<String, i64>>, ApiError> {
    let balances = blocking(&state, |p| p.balances()).await?;
    Ok(Json(balances))
}

/// `PUT /wallets`: idempotent; an existing wallet is returned as is.
async fn create_wallet<S: Store + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<String>, JsonRejection>,
) -> Result<(StatusCode, Json<Wallet>), ApiError> {
    let wallet_id = json_body(&state, body)?;
    let (wallet, count) = blocking(&state, move |p| {
        let wallet = p.create_wallet(&wallet_id)?;
        Ok((wallet, p.wallet_count()?))
    })
    .await?;

    state.metrics.wallets.set(count as i64);
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// `GET /wallets/:id`
async fn get_wallet<S: Store + 'static>(
    Path(id): Path<String>,
    State(state): State<AppState<S>>,
) -> Result<Json<Wallet>, ApiError> {
    let lookup = id.clone();
    blocking(&state, move |p| p.wallet(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("wallet not found: {id}")))
}

/// `GET /transactions`
async fn list_transactions<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let ledger = blocking(&state, |p| p.ledger()).await?;
    Ok(Json(ledger))
}

/// `PUT /transactions`
async fn submit_transfer<S: Store + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<Transfer>, JsonRejection>,
) -> Result<Json<Vec<PointDeduction>>, ApiError> {
    let transfer = json_body(&state, body)?;
    let deductions = blocking(&state, move |p| p.process_transfer(&transfer)).await?;
    state.metrics.transfers_total.inc();
    Ok(Json(deductions))
}

/// `PUT /gifts`: trusted callers only.
async fn submit_gift<S: Store + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Result<Json<GiftRequest>, JsonRejection>,
) -> Result<Json<Wallet>, ApiError> {
    if let Err(e) = authorize_mint(&state, &headers) {
        tracing::warn!(kind = e.kind(), "gift refused");
        state.metrics.record_rejection(e.kind());
        return Err(e);
    }
    let gift = json_body(&state, body)?;

    let (wallet, count) = blocking(&state, move |p| {
        let recipient = gift.recipient_wallet_id.as_deref().unwrap_or_default();
        let wallet = p.mint_points(recipient, gift.amount, gift.timestamp)?;
        Ok((wallet, p.wallet_count()?))
    })
    .await?;

    state.metrics.mints_total.inc();
    state.metrics.wallets.set(count as i64);
    Ok(Json(wallet))
}

/// `PUT /spends`
async fn submit_spend<S: Store + 'static>(
    State(state): State<AppState<S>>,
    body: Result<Json<SpendRequest>, JsonRejection>,
) -> Result<Json<Vec<PointDeduction>>, ApiError> {
    let spend = json_body(&state, body)?;
    let deductions = blocking(&state, move |p| {
        let source = spend.source_wallet_id.as_deref().unwrap_or_default();
        p.burn_points(source, spend.amount)
    })
    .await?;

    state.metrics.burns_total.inc();
    Ok(Json(deductions))
}

/// `GET /audit`
async fn audit_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<AuditReport>, ApiError> {
    let report = blocking(&state, |p| p.audit()).await?;
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
