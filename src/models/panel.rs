// Per-query federation models
use serde::{Deserialize, Serialize};

/// One column of a materialized panel table.
///
/// `name` is the dot-escaped path into the row object (a literal `.` inside a
/// field name is written `\.`); `kind` is the generic SQL type name from the
/// fixed JSON-to-SQL map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: String,
}

/// A panel referenced from SQL text, resolved and ready to import.
///
/// Scoped to a single query execution, never persisted. The same panel id
/// referenced several times in one query resolves to exactly one
/// `PanelReference` and is imported at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelReference {
    pub id: String,
    /// Synthetic table name derived from the reference token, e.g. `t_0`
    pub table_name: String,
    pub columns: Vec<Column>,
    /// Optional dot-path into the referenced panel's rows
    pub path: Option<String>,
}

/// How referenced panels are materialized for this evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Session-scoped temporary tables, re-imported every evaluation
    #[default]
    Off,
    /// Durable tables, (re)imported before this evaluation runs
    Refresh,
    /// Durable tables already populated by an earlier evaluation; imports
    /// are skipped entirely
    Warm,
}

impl CacheMode {
    pub fn is_active(self) -> bool {
        !matches!(self, CacheMode::Off)
    }

    pub fn is_warm(self) -> bool {
        matches!(self, CacheMode::Warm)
    }
}
