//! Maps [`engine::EngineError`] and request-parsing failures onto HTTP
//! responses, the way the teacher's `api/errors.rs` maps `tonic::Status`
//! onto `ApiError` — trimmed to this core's taxonomy (spec.md §7) since
//! there's no downstream RPC service to translate errors from.

use std::collections::HashMap;
use std::error::Error;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::EngineError;
use serde::Serialize;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::error;
use validator::{ValidationErrors, ValidationErrorsKind};

#[skip_serializing_none]
#[derive(Serialize, Debug)]
struct ApiErrorBody {
    message: String,
    params: Option<HashMap<String, Vec<String>>>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// 400: malformed request, or a business-rule validation failure
    /// spec.md §6 ascribes to 400 (bad schedule alignment, start >= end,
    /// future range without `allowFuture`).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// 400: field-level validation failure from a [`crate::extractors::ValidatedJson`].
    #[error("request has failed validation")]
    ValidationFailed { message: String, params: HashMap<String, Vec<String>> },

    /// 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// 409.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 415.
    #[error("expected request with `Content-Type: application/json`")]
    UnsupportedContentType,

    /// 500. The message shown to the caller is always the generic one —
    /// `source` is logged but never serialized, so storage/runner internals
    /// never leak into a response body.
    #[error("internal server error")]
    InternalServerError { detail: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            | ApiError::BadRequest(..) | ApiError::ValidationFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            | ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            | ApiError::Conflict(..) => StatusCode::CONFLICT,
            | ApiError::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            | ApiError::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    #[tracing::instrument]
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = match self {
            | Self::ValidationFailed { message, params } => {
                ApiErrorBody { message, params: if params.is_empty() { None } else { Some(params) } }
            }
            | Self::InternalServerError { detail } => {
                error!(%detail, "internal server error");
                ApiErrorBody { message: "internal server error".to_string(), params: None }
            }
            | e => ApiErrorBody { message: e.to_string(), params: None },
        };
        (status_code, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        match value {
            | EngineError::NotFound(message) => ApiError::NotFound(message),
            | EngineError::Conflict(message) => ApiError::Conflict(message),
            | EngineError::ValidationError(message) => ApiError::BadRequest(message),
            | err @ (EngineError::StorageUnavailable(_)
            | EngineError::IllegalTransition(_)
            | EngineError::OptimisticConflict
            | EngineError::RunnerError(_)
            | EngineError::IsClosed) => ApiError::InternalServerError { detail: err.to_string() },
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        let mut params = HashMap::new();
        for (key, err) in value.errors() {
            params.extend(format_validation_errors(key, err));
        }
        ApiError::ValidationFailed { message: "request body has failed validation".to_string(), params }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        match value {
            | JsonRejection::JsonDataError(e) => {
                ApiError::BadRequest(format!("JSON input doesn't conform to the API shape: {e}"))
            }
            | JsonRejection::JsonSyntaxError(e) => {
                let reason = find_error_source::<serde_json::Error>(&e)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| e.to_string());
                ApiError::BadRequest(format!("invalid JSON syntax: {reason}"))
            }
            | JsonRejection::MissingJsonContentType(..) => ApiError::UnsupportedContentType,
            | other => {
                error!(%other, "unexpected JSON rejection");
                ApiError::BadRequest(other.to_string())
            }
        }
    }
}

fn find_error_source<'a, T>(err: &'a (dyn Error + 'static)) -> Option<&'a T>
where T: Error + 'static {
    if let Some(err) = err.downcast_ref::<T>() {
        Some(err)
    } else {
        err.source().and_then(find_error_source::<T>)
    }
}

fn format_validation_errors(path: &str, errs: &ValidationErrorsKind) -> HashMap<String, Vec<String>> {
    let mut failures = HashMap::new();
    match errs {
        | ValidationErrorsKind::Field(errs) => {
            failures.insert(path.to_string(), errs.iter().map(ToString::to_string).collect());
        }
        | ValidationErrorsKind::Struct(errs) => failures.extend(format_struct(errs, path)),
        | ValidationErrorsKind::List(errs) => {
            for (idx, err) in errs.iter() {
                failures.extend(format_struct(err, &format!("{path}[{idx}]")));
            }
        }
    }
    failures
}

fn format_struct(errs: &ValidationErrors, path: &str) -> HashMap<String, Vec<String>> {
    let mut failures = HashMap::new();
    for (key, err) in errs.errors() {
        failures.extend(format_validation_errors(&format!("{path}.{key}"), err));
    }
    failures
}
