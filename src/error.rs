use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, HttpResponseBuilder, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::lifecycle::LifecycleError;
use crate::rate_limit::RateLimitOutcome;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("verification code does not match")]
    VerificationFailed,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("order has already been processed")]
    AlreadyProcessed,
    #[error("the order link has expired")]
    TokenExpired,
    #[error("{}", rate_limit_message(.outcome))]
    RateLimited { outcome: RateLimitOutcome },
    #[error("internal error")]
    Internal,
}

fn rate_limit_message(outcome: &RateLimitOutcome) -> &'static str {
    if outcome.blocked {
        "temporarily blocked after too many attempts, try again later"
    } else {
        "too many requests, try again shortly"
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    /// Turns a refused limiter check into a 429.
    pub fn check_limit(outcome: RateLimitOutcome) -> Result<(), ApiError> {
        if outcome.success {
            Ok(())
        } else {
            Err(ApiError::RateLimited { outcome })
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotEditable
            | LifecycleError::InvalidTransition { .. }
            | LifecycleError::UnknownStatus(_) => ApiError::Validation(e.to_string()),
            LifecycleError::NotPublic => ApiError::NotFound,
            LifecycleError::TokenExpired => ApiError::TokenExpired,
            LifecycleError::CodeMismatch => ApiError::VerificationFailed,
            LifecycleError::AlreadyProcessed => ApiError::AlreadyProcessed,
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict(what) => ApiError::Conflict(what),
            RepoError::Rejected(l) => l.into(),
            RepoError::Internal(detail) => {
                error!(%detail, "storage failure");
                ApiError::Internal
            }
        }
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(e: crate::auth::AuthError) -> Self {
        error!(error = %e, "auth failure");
        ApiError::Internal
    }
}

/// Sets the rate limit headers used on 429 responses.
pub fn rate_limit_headers(builder: &mut HttpResponseBuilder, outcome: &RateLimitOutcome) {
    builder
        .insert_header((header::RETRY_AFTER, outcome.retry_after.unwrap_or(60).to_string()))
        .insert_header(("X-RateLimit-Remaining", outcome.remaining.to_string()))
        .insert_header(("X-RateLimit-Reset", outcome.reset_at.to_string()));
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials | ApiError::VerificationFailed => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) | ApiError::AlreadyProcessed => StatusCode::CONFLICT,
            ApiError::TokenExpired => StatusCode::GONE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let ApiError::RateLimited { outcome } = self {
            rate_limit_headers(&mut builder, outcome);
        }
        builder.json(ApiErrorBody { error: self.to_string() })
    }
}
