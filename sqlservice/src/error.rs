//! Error types for the service layer.
//!
//! Integrity violations raised by the database are classified into domain
//! errors carrying an HTTP-style status: a foreign key pointing at a missing
//! parent row becomes `NotFound` naming the referenced table, every other
//! integrity violation becomes `Conflict`. Everything else passes through.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use sqlservice_core::{ConfigError, Dialect};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{}", detail.as_deref().unwrap_or("not found"))]
    NotFound { detail: Option<String> },

    #[error("{}", detail.as_deref().unwrap_or("conflict"))]
    Conflict { detail: Option<String> },

    #[error("database driver for {dialect} is not available")]
    DriverNotFound { dialect: Dialect },

    #[error("database connection attempts exhausted after {attempts} tries")]
    Startup { attempts: u32 },

    #[error("unknown relation '{name}'")]
    UnknownRelation { name: String },

    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("column '{column}' has unsupported type {ty}")]
    UnsupportedColumn { column: String, ty: String },

    #[error("field '{field}' cannot be expressed as a SQL value")]
    UnsupportedField { field: String },

    #[error("invalid identifier '{name}'")]
    InvalidIdentifier { name: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// Create a not-found error with a human-readable detail.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: Some(detail.into()),
        }
    }

    /// Create a conflict error with a human-readable detail.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: Some(detail.into()),
        }
    }

    /// HTTP status equivalent for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify a write error, turning integrity violations into domain
    /// errors. The caller is responsible for rolling back the transaction.
    pub(crate) fn from_db(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            let integrity = db
                .code()
                .map(|code| code.starts_with("23"))
                .unwrap_or(false);
            if integrity {
                if let Some(table) = referenced_table(db.message()) {
                    return Self::not_found(format!("{table} not found"));
                }
                tracing::warn!(code = ?db.code(), "integrity violation: {}", db.message());
                return Self::Conflict { detail: None };
            }
        }
        Self::Database(error)
    }
}

/// Extract and humanize the table named by a foreign key violation message
/// of the form `... is not present in table "users"`.
fn referenced_table(message: &str) -> Option<String> {
    let rest = message.split("is not present in table").nth(1)?;
    let name: String = rest
        .trim()
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| !matches!(c, '"' | '\'' | '.'))
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(humanize(&name))
}

fn humanize(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("service error: {}", self);
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
