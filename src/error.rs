use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("stripe transport error: {0}")]
    Stripe(#[from] reqwest::Error),
    #[error("stripe api error ({status}): {message}")]
    StripeApi { status: u16, message: String },
    #[error("invalid webhook signature: {0}")]
    Signature(String),
    #[error("no local record for stripe object: {0}")]
    MissingLocal(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::Signature(_) => StatusCode::BAD_REQUEST,
            AppError::Stripe(_) | AppError::StripeApi { .. } => StatusCode::BAD_GATEWAY,
            AppError::Db(_) | AppError::MissingLocal(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
