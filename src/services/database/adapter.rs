// Connection abstraction for the import pipeline and orchestrator.
//
// Three verbs are all the pipeline needs, so one trait serves every
// supported vendor.
use crate::error::EvalError;
use async_trait::async_trait;
use serde_json::Value;

/// A dynamically-typed SQL parameter.
///
/// Row cells travel as JSON values; this is the bindable form a driver can
/// accept for a column of a known generic kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Number(f64),
    Bigint(i64),
    Text(String),
}

/// Column kinds whose cells are stored as text
pub fn is_text_kind(kind: &str) -> bool {
    matches!(
        kind,
        "TEXT" | "VARCHAR" | "CHAR" | "VARCHAR2" | "DATE" | "TIMESTAMP" | "DATETIME"
    )
}

impl SqlValue {
    /// Coerce a JSON cell into a parameter for a column of `kind`.
    ///
    /// Non-scalar values are JSON-re-encoded when the column is text-typed
    /// and otherwise become null: there is no lossless coercion into a
    /// numeric or boolean column.
    pub fn from_cell(value: Option<&Value>, kind: &str) -> SqlValue {
        let value = match value {
            None | Some(Value::Null) => return SqlValue::Null,
            Some(v) => v,
        };

        if is_text_kind(kind) {
            return match value {
                Value::String(s) => SqlValue::Text(s.clone()),
                other => SqlValue::Text(other.to_string()),
            };
        }

        match value {
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if kind == "BIGINT" {
                    if let Some(i) = n.as_i64() {
                        return SqlValue::Bigint(i);
                    }
                }
                SqlValue::Number(n.as_f64().unwrap_or(0.0))
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            _ => SqlValue::Null,
        }
    }
}

/// A server-side prepared insert, sized for a fixed number of rows.
#[async_trait]
pub trait PreparedStatement: Send {
    /// Bind `values` (row-major, column order matching the DML) and execute
    async fn execute(&mut self, values: Vec<SqlValue>) -> Result<(), EvalError>;

    /// Release the statement. Must be called on every path, including error
    /// paths, before an error propagates.
    async fn close(self: Box<Self>) -> Result<(), EvalError>;
}

/// One connection/session scoped to a single query evaluation.
///
/// DDL, every insert batch and the final query execute strictly
/// sequentially on it; the engine never issues concurrent statements.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    async fn execute_ddl(&self, ddl: &str) -> Result<(), EvalError>;

    async fn prepare(&self, dml: &str) -> Result<Box<dyn PreparedStatement>, EvalError>;

    async fn run_query(&self, sql: &str) -> Result<Vec<Value>, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_cells() {
        assert_eq!(SqlValue::from_cell(None, "REAL"), SqlValue::Null);
        assert_eq!(
            SqlValue::from_cell(Some(&json!(null)), "TEXT"),
            SqlValue::Null
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!(1.5)), "REAL"),
            SqlValue::Number(1.5)
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!(7)), "BIGINT"),
            SqlValue::Bigint(7)
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!(true)), "BOOLEAN"),
            SqlValue::Bool(true)
        );
    }

    #[test]
    fn test_text_column_stringifies_everything() {
        assert_eq!(
            SqlValue::from_cell(Some(&json!(1)), "TEXT"),
            SqlValue::Text("1".to_string())
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!({"a": 1})), "TEXT"),
            SqlValue::Text("{\"a\":1}".to_string())
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!([1, 2])), "TEXT"),
            SqlValue::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_non_scalar_into_non_text_column_is_null() {
        assert_eq!(
            SqlValue::from_cell(Some(&json!({"a": 1})), "REAL"),
            SqlValue::Null
        );
        assert_eq!(
            SqlValue::from_cell(Some(&json!([1])), "BOOLEAN"),
            SqlValue::Null
        );
    }
}
