// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use synckit_core::{Error, ExecutorError};
use tracing::error;

/// Error returned by handlers, rendered as `{"message": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request carried no tenant.
    #[error("missing tenant")]
    Unauthorized,

    #[error(transparent)]
    Core(#[from] Error),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Core(Error::Json(err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let Self::Core(err) = self else {
            return StatusCode::UNAUTHORIZED;
        };
        match err {
            Error::BadRequest(_) | Error::MissingKey { .. } | Error::BadScope { .. } | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotRegistered(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Executor(ExecutorError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Error::Executor(ExecutorError::ExecutorClosed | ExecutorError::DomainClosed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Executor(ExecutorError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Core(err) => err.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }
        let body = ErrorBody {
            message: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
