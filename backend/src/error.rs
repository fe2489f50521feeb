use actix_web::{
    error::{BlockingError, JsonPayloadError, QueryPayloadError},
    http::StatusCode,
    HttpRequest, HttpResponse, ResponseError,
};
use common::req::ValidationError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),

    #[error("device '{0}' already exists")]
    DeviceExists(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<BlockingError> for ApiError {
    fn from(err: BlockingError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::DeviceNotFound(_) | ApiError::UnknownSensor(_) => StatusCode::NOT_FOUND,
            ApiError::DeviceExists(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{self}");
        }
        HttpResponse::build(status).json(serde_json::json!({ "error": self.to_string() }))
    }
}

/// Hooked into `JsonConfig` so malformed bodies get the same error shape.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Validation(format!("invalid payload: {err}")).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::Validation(format!("invalid query: {err}")).into()
}
