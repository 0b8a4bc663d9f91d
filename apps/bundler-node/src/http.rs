//! The RPC surface: one POST route per method, axum `Router`/`State`/`Json`
//! handlers. Every rejection is HTTP 422 with `{"detail": "..."}`.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, RequestExt, Router};
use bundler_pipeline::{PipelineDeps, PipelineError};
use serde::de::DeserializeOwned;

use crate::dto::{
    EstimateResponse, ErrorResponse, HashRequest, PooledUserOpDto, ReceiptResponse, SendRequest,
};
use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/eth_sendUserOperation", post(send_user_operation))
        .route("/api/eth_estimateUserOperationGas", post(estimate_user_operation_gas))
        .route("/api/eth_getUserOperationByHash", post(get_user_operation_by_hash))
        .route("/api/eth_getUserOperationReceipt", post(get_user_operation_receipt))
        .route("/api/eth_supportedEntryPoints", post(supported_entry_points))
        .route("/api/eth_lastUserOperations", post(last_user_operations))
        .with_state(state)
}

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Every rejection in the taxonomy is a 422, except `Fatal`: a
        // node/contract version mismatch (e.g. `simulateValidation` didn't
        // revert) or a transport/DB failure, neither of which the caller can
        // fix by resubmitting. Per spec.md §7 these surface as 5xx.
        let status = match &self.0 {
            PipelineError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(ErrorResponse { detail: self.0.to_string() })).into_response()
    }
}

/// `Json` extractor that maps a malformed request body to the same 422
/// `{detail: "..."}` shape as a pipeline rejection, instead of axum's
/// default 400: every encoding violation surfaces as a
/// `PipelineError::Encoding`-shaped 422.
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = req.extract_with_state::<Json<T>, _>(state).await.map_err(|e| {
            ApiError(PipelineError::Encoding(e.body_text()))
        })?;
        Ok(ApiJson(value))
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn deps(state: &SharedState) -> PipelineDeps<'_> {
    PipelineDeps { rpc: state.rpc(), mempool: &state.mempool, reputation: &state.reputation, entry_points: &state.entry_points }
}

async fn send_user_operation(State(state): State<SharedState>, ApiJson(req): ApiJson<SendRequest>) -> Result<Json<String>, ApiError> {
    let decision = bundler_pipeline::accept(&deps(&state), &state.settings, &req.user_op, req.entry_point, now()).await?;
    Ok(Json(format!("{:#x}", decision.hash)))
}

async fn estimate_user_operation_gas(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let decision = bundler_pipeline::validate(&deps(&state), &state.settings, &req.user_op, req.entry_point, now()).await?;
    let call_gas_limit = state
        .rpc()
        .estimate_gas(req.entry_point, req.user_op.sender, req.user_op.call_data.clone())
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(EstimateResponse {
        pre_verification_gas: alloy::primitives::U256::from(req.user_op.calldata_gas()),
        verification_gas: decision.simulation.pre_op_gas,
        call_gas_limit,
    }))
}

async fn get_user_operation_by_hash(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<HashRequest>,
) -> Result<Json<PooledUserOpDto>, ApiError> {
    let Some(mut pooled) = state.mempool.get_by_hash(req.hash).await.map_err(PipelineError::from)? else {
        return Err(ApiError(PipelineError::NotFound));
    };
    state.mempool.reconcile_receipt(state.rpc(), &mut pooled).await.map_err(PipelineError::from)?;
    Ok(Json(pooled.into()))
}

async fn get_user_operation_receipt(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<HashRequest>,
) -> Result<Json<Option<ReceiptResponse>>, ApiError> {
    if state.mempool.get_by_hash(req.hash).await.map_err(PipelineError::from)?.is_none() {
        return Err(ApiError(PipelineError::NotFound));
    }
    let receipt = state.mempool.get_receipt(state.rpc(), req.hash).await.map_err(PipelineError::from)?;
    Ok(Json(receipt.map(|(tx_hash, accepted)| ReceiptResponse { tx_hash, accepted })))
}

async fn supported_entry_points(State(state): State<SharedState>) -> Result<Json<Vec<String>>, ApiError> {
    let addrs = state.entry_points.list().await.map_err(PipelineError::from)?;
    Ok(Json(addrs.into_iter().map(|a| format!("{a:#x}")).collect()))
}

async fn last_user_operations(State(state): State<SharedState>) -> Result<Json<Vec<PooledUserOpDto>>, ApiError> {
    let pooled = state.mempool.list_last(state.rpc(), state.last_user_ops_count, now()).await.map_err(PipelineError::from)?;
    Ok(Json(pooled.into_iter().map(PooledUserOpDto::from).collect()))
}
