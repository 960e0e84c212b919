//! Application error types.
//!
//! All variants serialize to a structured JSON object so callers embedding
//! this crate (admin surfaces, job runners) can show meaningful messages.

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the sync engines, cache store, and CRM client.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SyncError {
    /// Required CRM credentials are absent; no network call was attempted.
    #[error("CRM client not configured: {message}")]
    Unconfigured { message: String },

    /// Network-level failure reaching the CRM API.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The CRM API rejected the request with a non-2xx status.
    #[error("CRM API error: {message}")]
    RemoteApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Local database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Cache tables are missing and could not be recreated.
    #[error("Schema missing: {message}")]
    SchemaMissing { message: String },

    /// A specifically requested resource does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input provided by the caller.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// A bulk sync run is already in progress.
    #[error("Sync already in progress: {message}")]
    SyncInProgress { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create an unconfigured-client error.
    pub fn unconfigured(message: impl Into<String>) -> Self {
        Self::Unconfigured {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a remote API error.
    pub fn remote_api(message: impl Into<String>) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a remote API error with status code and endpoint.
    pub fn remote_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a schema-missing error.
    pub fn schema_missing(message: impl Into<String>) -> Self {
        Self::SchemaMissing {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a sync-in-progress error.
    pub fn sync_in_progress(message: impl Into<String>) -> Self {
        Self::SyncInProgress {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check whether this error means the remote call never delivered a
    /// usable response (as opposed to a local failure).
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RemoteApi { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::remote_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for SyncError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::internal(format!("Token signing error: {}", err))
    }
}

impl From<crate::db::DbError> for SyncError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}
