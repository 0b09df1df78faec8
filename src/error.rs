//! Error taxonomy shared by every layer of the entity store.
//!
//! Adapters, the populator and the entity services all report through
//! [`EntityError`]. The transport maps each variant to an HTTP status with
//! [`EntityError::status_code`].

use axum::http::StatusCode;
use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias used across the crate.
pub type EntityResult<T> = Result<T, EntityError>;

/// Errors surfaced by entity operations.
#[derive(Debug, Error)]
pub enum EntityError {
    /// Malformed input (pagination, sort, ids, patch shape).
    #[error("Invalid parameter: {message}")]
    InvalidParam { message: String },

    /// The referenced entity does not exist.
    #[error("Entity not found: {id}")]
    NotFound { id: String },

    /// The entity was rejected by a validator or by the backend.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A populate rule failed to resolve its references.
    #[error("Population of '{field}' failed: {message}")]
    Population {
        field: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Opaque storage failure, passed through unchanged.
    #[error("Adapter error: {message}")]
    Adapter {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The backend could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The action name is not one of the standard entity actions.
    #[error("Unknown action: {action}")]
    UnknownAction { action: String },
}

impl EntityError {
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::InvalidParam { message: message.into() }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn population(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Population { field: field.into(), message: message.into(), source: None }
    }

    pub fn population_with_source(
        field: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Population {
            field: field.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter { message: message.into(), source: None }
    }

    pub fn adapter_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Adapter { message: message.into(), source: Some(source.into()) }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    pub fn connection_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Connection { message: message.into(), source: Some(source.into()) }
    }

    /// HTTP status used when the error is returned by the transport.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParam { .. } | Self::UnknownAction { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Population { .. } => StatusCode::BAD_GATEWAY,
            Self::Adapter { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<sqlx::Error> for EntityError {
    fn from(err: sqlx::Error) -> Self {
        // 23505 = unique_violation
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return Self::validation(format!("duplicate primary key: {}", db_err.message()));
            }
        }
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::connection_with_source("database unreachable", err)
            }
            other => Self::adapter_with_source(other.to_string(), other),
        }
    }
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::adapter_with_source(format!("malformed document: {}", err), err)
    }
}
