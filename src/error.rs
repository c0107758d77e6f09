use axum::response::IntoResponse;
use axum::Json as AxumJson;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Bad Gateway: {0}")]
    BadGateway(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Size error: {0}")]
    Size(String),
    #[error("Witness build error: {0}")]
    WitnessBuild(String),
    #[error("Nullifier already present: {0}")]
    AlreadyPresent(String),
    #[error("Proving timeout: {0}")]
    ProvingTimeout(String),
    #[error("Chain timeout: {0}")]
    ChainTimeout(String),
}

impl AppError {
    /// Transient infrastructure faults that a bounded retry may clear.
    ///
    /// Everything else is either bad input (encoding/size/witness) or a
    /// terminal condition (`AlreadyPresent` short-circuits the withdrawal).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ProvingTimeout(_) | AppError::ChainTimeout(_) | AppError::BadGateway(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match self {
            AppError::BadRequest(m)
            | AppError::Encoding(m)
            | AppError::Size(m)
            | AppError::WitnessBuild(m) => (axum::http::StatusCode::BAD_REQUEST, m),
            AppError::Forbidden(m) => (axum::http::StatusCode::FORBIDDEN, m),
            AppError::AlreadyPresent(m) => (axum::http::StatusCode::CONFLICT, m),
            AppError::Unavailable(m) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, m),
            AppError::Internal(m) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, m),
            AppError::BadGateway(m) => (axum::http::StatusCode::BAD_GATEWAY, m),
            AppError::ProvingTimeout(m) | AppError::ChainTimeout(m) => {
                (axum::http::StatusCode::GATEWAY_TIMEOUT, m)
            }
        };
        let body = serde_json::json!({ "error": msg });
        (status, AxumJson(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
