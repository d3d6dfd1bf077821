use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Evaluation error taxonomy
///
/// Every variant aborts the whole federated-query evaluation; there is no
/// automatic retry or transient-error classification at this layer. Driver
/// errors pass the engine's message through unchanged.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Panel {0} is not an array of objects")]
    NotAnArrayOfObjects(String),

    #[error("Invalid dependent panel: {0}")]
    InvalidDependentPanel(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("No result exists for panel {0}")]
    NoResult(String),

    #[error("Bad shape path: {0}")]
    BadShapePath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Stable error name matching the host tool's error envelope
    pub fn name(&self) -> &'static str {
        match self {
            EvalError::NotAnArrayOfObjects(_) => "NotAnArrayOfObjectsError",
            EvalError::InvalidDependentPanel(_) => "InvalidDependentPanelError",
            EvalError::Unsupported(_) => "UnsupportedError",
            EvalError::Database(_) => "DatabaseError",
            EvalError::NoResult(_) => "NoResultError",
            EvalError::BadShapePath(_) => "BadShapePathError",
            EvalError::Io(_) => "IoError",
            EvalError::Json(_) => "JsonError",
        }
    }

    /// The offending panel id or name, when the error is about one
    pub fn target_panel(&self) -> Option<&str> {
        match self {
            EvalError::NotAnArrayOfObjects(id)
            | EvalError::InvalidDependentPanel(id)
            | EvalError::NoResult(id) => Some(id),
            _ => None,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            name: self.name().to_string(),
            message: self.to_string(),
            target_panel_id: self.target_panel().map(str::to_string),
        }
    }
}

/// Structured error surfaced to the caller; rendering (UI, log, response) is
/// the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    #[serde(rename = "targetPanelId", skip_serializing_if = "Option::is_none")]
    pub target_panel_id: Option<String>,
}
