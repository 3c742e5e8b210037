//! HTTP endpoints of the relay.
//!
//! Submission endpoints (`/execute`, `/execute/batch`, `/deploy`, `/deploy/meta`)
//! run through the engine with this server as the relayer. Query endpoints expose
//! nonces, wallet addresses and digests so clients can build and sign requests.
//!
//! Failures are returned as `{ "error": "...", "kind": "..." }` with a status code
//! chosen by [`ErrorKind`].

use alloy_primitives::{Address, B256, Bytes, U256};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::error::{EngineError, ErrorKind};
use crate::request::{BatchMetaTransactionRequest, DeployWalletRequest, MetaTransactionRequest};
use crate::service::RelayService;
use crate::types::{ChecksummedAddress, DecimalU256, decimal_u256, decimal_u256_vec};

pub fn routes() -> Router<Arc<RelayService>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/domain", get(get_domain))
        .route("/status", get(get_status))
        .route("/nonce/{principal}", get(get_nonce))
        .route("/wallet/{principal}", get(get_wallet))
        .route("/execute", post(post_execute))
        .route("/execute/batch", post(post_execute_batch))
        .route("/deploy", post(post_deploy))
        .route("/deploy/meta", post(post_deploy_meta))
        .route("/digest/transaction", post(post_digest_transaction))
        .route("/digest/batch", post(post_digest_batch))
        .route("/digest/deploy", post(post_digest_deploy))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// Engine error rendered as an HTTP response.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        Self(value)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Signature => StatusCode::UNAUTHORIZED,
        ErrorKind::Replay
        | ErrorKind::Reentrancy
        | ErrorKind::AlreadyDeployed
        | ErrorKind::Registry
        | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Paused => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotDeployed => StatusCode::PRECONDITION_FAILED,
        ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::Execution | ErrorKind::FeeSettlement | ErrorKind::Ledger => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Deployment => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        tracing::warn!(error = %self.0, ?kind, "request rejected");
        (
            status_for(kind),
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub request: MetaTransactionRequest,
    /// Native units the relayer attaches. Defaults to `value + fee`.
    #[serde(default)]
    pub funding: Option<DecimalU256>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBatchBody {
    pub request: BatchMetaTransactionRequest,
    #[serde(default)]
    pub funding: Option<DecimalU256>,
}

#[derive(Debug, Deserialize)]
pub struct DeployBody {
    pub principal: ChecksummedAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDigestBody {
    pub principal: Address,
    pub target: Address,
    #[serde(default)]
    pub payload: Bytes,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    #[serde(with = "decimal_u256")]
    pub fee: U256,
    pub nonce: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDigestBody {
    pub principal: Address,
    pub targets: Vec<Address>,
    pub payloads: Vec<Bytes>,
    #[serde(with = "decimal_u256_vec")]
    pub values: Vec<U256>,
    #[serde(with = "decimal_u256")]
    pub fee: U256,
    pub nonce: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeployDigestBody {
    pub principal: Address,
    pub nonce: u64,
}

#[derive(Debug, Serialize)]
pub struct DigestResponse {
    pub digest: B256,
}

/// `GET /health`
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /domain`: signing domain and its separator.
#[instrument(skip_all)]
pub async fn get_domain(State(service): State<Arc<RelayService>>) -> impl IntoResponse {
    let engine = service.engine();
    let domain = engine.hasher().domain();
    Json(json!({
        "name": domain.name,
        "version": domain.version,
        "chainId": domain.chain_id.map(|id| id.to_string()),
        "verifyingAccount": domain.verifying_contract.map(ChecksummedAddress),
        "separator": engine.domain_separator(),
    }))
}

/// `GET /status`: administrative state visible to clients.
#[instrument(skip_all)]
pub async fn get_status(State(service): State<Arc<RelayService>>) -> impl IntoResponse {
    let engine = service.engine();
    let relayers: Vec<ChecksummedAddress> = engine.relayers().into_iter().map(Into::into).collect();
    Json(json!({
        "paused": engine.is_paused(),
        "relayer": ChecksummedAddress(service.relayer()),
        "relayers": relayers,
        "feeRecipient": engine.fee_recipient().map(ChecksummedAddress),
        "batchEnabled": engine.batch_enabled(),
        "tokenFeeFallback": engine.token_fee_fallback(),
    }))
}

/// `GET /nonce/{principal}`
#[instrument(skip_all)]
pub async fn get_nonce(
    State(service): State<Arc<RelayService>>,
    Path(principal): Path<ChecksummedAddress>,
) -> impl IntoResponse {
    let nonce = service.engine().current_nonce(principal.0);
    Json(json!({ "principal": principal, "nonce": nonce }))
}

/// `GET /wallet/{principal}`: derived address, available before deployment.
#[instrument(skip_all)]
pub async fn get_wallet(
    State(service): State<Arc<RelayService>>,
    Path(principal): Path<ChecksummedAddress>,
) -> impl IntoResponse {
    let wallet = service.engine().wallet(principal.0);
    Json(json!({
        "principal": principal,
        "wallet": ChecksummedAddress(wallet.derived_address),
        "deployed": wallet.deployed,
    }))
}

/// `POST /execute`
#[instrument(skip_all)]
pub async fn post_execute(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<ExecuteBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = &body.request;
    let output = service
        .execute(request, body.funding.map(|funding| funding.0))
        .await?;
    Ok(Json(json!({
        "principal": ChecksummedAddress(request.principal),
        "nonce": request.nonce,
        "result": output,
    })))
}

/// `POST /execute/batch`
#[instrument(skip_all)]
pub async fn post_execute_batch(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<ExecuteBatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = &body.request;
    service
        .execute_batch(request, body.funding.map(|funding| funding.0))
        .await?;
    Ok(Json(json!({
        "principal": ChecksummedAddress(request.principal),
        "nonce": request.nonce,
        "legs": request.legs(),
    })))
}

/// `POST /deploy`: deploys a wallet with this server as the calling relayer.
#[instrument(skip_all)]
pub async fn post_deploy(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<DeployBody>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = service.deploy(body.principal.0).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "principal": body.principal, "wallet": ChecksummedAddress(wallet) })),
    ))
}

/// `POST /deploy/meta`: deploys on the principal's signed authorization.
#[instrument(skip_all)]
pub async fn post_deploy_meta(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<DeployWalletRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = service.deploy_meta(&body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "principal": ChecksummedAddress(body.principal),
            "wallet": ChecksummedAddress(wallet),
        })),
    ))
}

/// `POST /digest/transaction`
#[instrument(skip_all)]
pub async fn post_digest_transaction(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<TransactionDigestBody>,
) -> impl IntoResponse {
    let digest = service.engine().transaction_digest(
        body.principal,
        body.target,
        &body.payload,
        body.value,
        body.fee,
        body.nonce,
    );
    Json(DigestResponse { digest })
}

/// `POST /digest/batch`
#[instrument(skip_all)]
pub async fn post_digest_batch(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<BatchDigestBody>,
) -> impl IntoResponse {
    let digest = service.engine().batch_digest(
        body.principal,
        &body.targets,
        &body.payloads,
        &body.values,
        body.fee,
        body.nonce,
    );
    Json(DigestResponse { digest })
}

/// `POST /digest/deploy`
#[instrument(skip_all)]
pub async fn post_digest_deploy(
    State(service): State<Arc<RelayService>>,
    Json(body): Json<DeployDigestBody>,
) -> impl IntoResponse {
    let digest = service.engine().deploy_digest(body.principal, body.nonce);
    Json(DigestResponse { digest })
}
