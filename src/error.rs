//! Errors surfaced over HTTP.
//!
//! Bodies follow the REST conventions clients of `/api/todoinfo/` expect:
//! validation failures are a map of field name to messages, everything else
//! is `{"detail": "..."}`.

use std::{collections::BTreeMap, fmt};

use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::database::DatabaseError;

/// Per-field validation messages for a request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn new(fields: BTreeMap<String, Vec<String>>) -> ValidationError {
        ValidationError { fields }
    }

    pub fn single(field: &str, message: impl Into<String>) -> ValidationError {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), vec![message.into()]);
        ValidationError { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("JSON parse error - {0}")]
    Parse(String),

    #[error("Unsupported media type \"{0}\" in request.")]
    UnsupportedMediaType(String),

    #[error("No Todo matches the given query.")]
    TodoNotFound,

    #[error("Not found.")]
    RouteNotFound,

    #[error("Method \"{method}\" not allowed.")]
    MethodNotAllowed { method: Method, allow: &'static str },

    #[error("A server error occurred.")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Parse(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::TodoNotFound | ApiError::RouteNotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(error: DatabaseError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Internal(reason) => error!(%reason, "request failed"),
            other => warn!(status = status.as_u16(), error = %other, "request rejected"),
        }

        let body = match &self {
            ApiError::Validation(errors) => json!(errors.fields()),
            other => json!({ "detail": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::MethodNotAllowed { allow, .. } = &self {
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static(*allow));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(ApiError::TodoNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::UnsupportedMediaType("text/plain".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::Internal("disk full".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_stay_out_of_the_message() {
        let err = ApiError::Internal("sqlite: disk I/O error".into());
        assert_eq!(err.to_string(), "A server error occurred.");
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let response = ApiError::MethodNotAllowed {
            method: Method::DELETE,
            allow: "GET, POST, HEAD",
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST, HEAD");
    }

    #[test]
    fn validation_display_joins_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), vec!["This field is required.".to_string()]);
        fields.insert("completed".to_string(), vec!["Must be a valid boolean.".to_string()]);
        assert_eq!(
            ValidationError::new(fields).to_string(),
            "completed: Must be a valid boolean.; title: This field is required."
        );
    }
}
