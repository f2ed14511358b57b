//! Result kinds handed to API-style callers.

use serde::Serialize;
use thiserror::Error;

use crate::{error::SyncError, store::StoreError};

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// The requested entity does not exist.
    NotFound,
    /// The request itself is invalid.
    BadRequest,
    /// Something failed on our side.
    ServerError,
}

/// Structured error payload.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ApiError {
    /// Classification.
    pub kind: ResultKind,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Missing entity.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::NotFound,
            message: message.into(),
        }
    }

    /// Invalid request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::BadRequest,
            message: message.into(),
        }
    }

    /// Internal failure.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            kind: ResultKind::ServerError,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingFilter { .. }
            | StoreError::UnknownColumn { .. }
            | StoreError::UnsupportedValue { .. } => Self::bad_request(e.to_string()),
            _ => Self::server_error(e.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Store(inner) => inner.into(),
            SyncError::Validation { .. } => Self::bad_request(e.to_string()),
            SyncError::Write(_) | SyncError::ExternalSource { .. } => {
                Self::server_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let err = ApiError::not_found("unknown ticker `XYZ`");
        insta::assert_json_snapshot!(err, @r###"
        {
          "kind": "not_found",
          "message": "unknown ticker `XYZ`"
        }
        "###);
    }

    #[test]
    fn connection_loss_is_a_server_error() {
        let err: ApiError = SyncError::Store(StoreError::Connection("db gone".into())).into();
        assert_eq!(err.kind, ResultKind::ServerError);
        let err: ApiError = StoreError::MissingFilter {
            op: "update",
            table: "symbols".into(),
        }
        .into();
        assert_eq!(err.kind, ResultKind::BadRequest);
    }
}
