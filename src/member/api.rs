use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use alloy::primitives::B256;
use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::{MemberError, Sequence},
    primitives::{ErrorCode, ErrorResponse, OFFCHAIN_DATA_PATH, SIGN_SEQUENCE_PATH, STATUS_PATH},
    status::{Status, StatusEndpoints},
    store::{DataStore, StoreError},
};

use super::MemberSpec;

/// Configuration of the member HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on. `0` picks an ephemeral port.
    pub port: u16,
    /// Deadline for a single request. Expired requests are dropped and roll back.
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
}

/// Default request body limit, 256 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8444,
            request_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

struct ApiState<M, DS> {
    member: Arc<M>,
    status: StatusEndpoints<DS>,
    request_timeout: Duration,
}

/// Builds the member API router.
pub fn router<M: MemberSpec, DS: DataStore>(
    member: Arc<M>,
    status: StatusEndpoints<DS>,
    config: &ServerConfig,
) -> Router {
    let state = Arc::new(ApiState { member, status, request_timeout: config.request_timeout });

    Router::new()
        .route(&format!("{OFFCHAIN_DATA_PATH}/:hash"), get(get_offchain_data::<M, DS>))
        .route(SIGN_SEQUENCE_PATH, post(sign_sequence::<M, DS>))
        .route(STATUS_PATH, get(get_status::<M, DS>))
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .with_state(state)
}

/// Binds the member API and serves it on a background task until `cancel` fires.
/// Returns the bound address.
pub async fn serve<M: MemberSpec, DS: DataStore>(
    member: Arc<M>,
    status: StatusEndpoints<DS>,
    config: ServerConfig,
    cancel: CancellationToken,
) -> eyre::Result<(SocketAddr, JoinHandle<()>)> {
    let router = router(member, status, &config);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Member API server running on {addr}");

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            error!(?err, "Member API server error");
        }
        info!("Member API server stopped");
    });

    Ok((addr, handle))
}

/// An error response with its HTTP status.
#[derive(Debug)]
struct ApiError(StatusCode, ErrorResponse);

impl ApiError {
    fn bad_request(message: impl ToString) -> Self {
        Self(StatusCode::BAD_REQUEST, ErrorResponse::new(ErrorCode::BadRequest, message))
    }

    fn internal(message: impl ToString) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(ErrorCode::Internal, message))
    }
}

impl From<MemberError> for ApiError {
    fn from(err: MemberError) -> Self {
        let message = err.to_string();
        let (status, code) = match err {
            MemberError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadRequest),
            MemberError::InvalidData(_) | MemberError::Store(StoreError::InvalidKey { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::InvalidData)
            }
            MemberError::SequenceMismatch(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::SequenceMismatch)
            }
            MemberError::StaleView(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::StaleView),
            MemberError::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, ErrorCode::NotFound)
            }
            MemberError::Store(StoreError::Backend(_)) => {
                error!(%message, "Storage failure while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal)
            }
        };

        Self(status, ErrorResponse::new(code, message))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

/// Runs `fut` under the request deadline. On expiry the future is dropped.
async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        warn!(?timeout, "Request timed out");
        Err(ApiError(
            StatusCode::REQUEST_TIMEOUT,
            ErrorResponse::new(ErrorCode::Timeout, format!("request exceeded {timeout:?}")),
        ))
    })
}

#[tracing::instrument(skip(state))]
async fn get_offchain_data<M: MemberSpec, DS: DataStore>(
    State(state): State<Arc<ApiState<M, DS>>>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key: B256 = hash.parse().map_err(|e| ApiError::bad_request(format!("invalid hash: {e}")))?;

    let value = with_timeout(state.request_timeout, async {
        state.member.get_offchain_data(key).await.map_err(ApiError::from)
    })
    .await?;

    debug!(len = value.len(), "Serving off-chain data");
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], value.0))
}

#[tracing::instrument(skip_all)]
async fn sign_sequence<M: MemberSpec, DS: DataStore>(
    State(state): State<Arc<ApiState<M, DS>>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // an oversized body is a bad request like any other unreadable one
    let body = body.map_err(|rejection| {
        warn!(status = %rejection.status(), "Rejected sign request body");
        ApiError::bad_request(format!("unreadable body: {}", rejection.body_text()))
    })?;
    let sequence: Sequence = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid sequence: {e}")))?;

    let signature = with_timeout(state.request_timeout, async {
        state.member.sign_sequence(sequence).await.map_err(ApiError::from)
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], signature.to_bytes().to_vec()))
}

async fn get_status<M: MemberSpec, DS: DataStore>(
    State(state): State<Arc<ApiState<M, DS>>>,
) -> Result<Json<Status>, ApiError> {
    state.status.get_status().await.map(Json).map_err(ApiError::internal)
}
