// Federation orchestrator: turns a reference-bearing query into a concrete
// plan (rewrite, import, run) against a single target connection.
use crate::error::EvalError;
use crate::models::{CacheMode, Shape};
use crate::services::database::SqlConnection;
use crate::services::dialect::Dialect;
use crate::services::import::import_panel;
use crate::services::rewrite::rewrite_ref_calls;
use crate::storage::results::ResultStore;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct FederationEngine {
    store: ResultStore,
}

impl FederationEngine {
    pub fn new(store: ResultStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Evaluate `query` against `conn`, materializing every referenced
    /// panel's result into the target engine first.
    ///
    /// Imports run sequentially in discovery order on the one connection.
    /// With [`CacheMode::Warm`] the tables are assumed present from a prior
    /// evaluation and the import stage is skipped entirely.
    #[instrument(skip_all, fields(session = %Uuid::new_v4(), vendor = dialect.vendor.as_str()))]
    pub async fn run_federated_query(
        &self,
        conn: &dyn SqlConnection,
        query: &str,
        shapes_by_key: &HashMap<String, Shape>,
        ids_by_key: &HashMap<String, String>,
        references_allowed: bool,
        dialect: &Dialect,
        cache_mode: CacheMode,
    ) -> Result<Vec<Value>, EvalError> {
        let (references, rewritten) =
            rewrite_ref_calls(query, shapes_by_key, ids_by_key, references_allowed, dialect)?;

        let mut sql = rewritten.trim().to_string();
        if !sql.ends_with(';') {
            sql.push(';');
        }

        if cache_mode.is_warm() && !references.is_empty() {
            info!(
                references = references.len(),
                "reusing cached panel tables"
            );
        } else {
            let mut imported = 0usize;
            for reference in &references {
                imported +=
                    import_panel(conn, &self.store, reference, dialect, cache_mode).await?;
            }
            if !references.is_empty() {
                info!(
                    references = references.len(),
                    rows = imported,
                    "panel imports complete"
                );
            }
        }

        conn.run_query(&sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::{PreparedStatement, SqlValue};
    use crate::services::dialect::Vendor;
    use crate::services::shape_engine::shape_of_value;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct ScriptedConnection {
        queries: Arc<Mutex<Vec<String>>>,
        imports: Arc<Mutex<usize>>,
    }

    struct CountingStatement {
        imports: Arc<Mutex<usize>>,
        columns: usize,
    }

    #[async_trait]
    impl PreparedStatement for CountingStatement {
        async fn execute(&mut self, values: Vec<SqlValue>) -> Result<(), EvalError> {
            *self.imports.lock().unwrap() += values.len() / self.columns;
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<(), EvalError> {
            Ok(())
        }
    }

    #[async_trait]
    impl SqlConnection for ScriptedConnection {
        async fn execute_ddl(&self, _ddl: &str) -> Result<(), EvalError> {
            Ok(())
        }

        async fn prepare(&self, _dml: &str) -> Result<Box<dyn PreparedStatement>, EvalError> {
            Ok(Box::new(CountingStatement {
                imports: self.imports.clone(),
                columns: 1,
            }))
        }

        async fn run_query(&self, sql: &str) -> Result<Vec<Value>, EvalError> {
            self.queries.lock().unwrap().push(sql.to_string());
            Ok(vec![json!({"ok": true})])
        }
    }

    fn engine_with_panel(rows: Value) -> (tempfile::TempDir, FederationEngine) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path(), 16);
        store.write_result("panel-1", &rows).unwrap();
        (dir, FederationEngine::new(store))
    }

    fn maps(rows: &Value) -> (HashMap<String, Shape>, HashMap<String, String>) {
        let shapes = HashMap::from([("0".to_string(), shape_of_value(rows, 50))]);
        let ids = HashMap::from([("0".to_string(), "panel-1".to_string())]);
        (shapes, ids)
    }

    #[tokio::test]
    async fn test_query_without_references() {
        let (_dir, engine) = engine_with_panel(json!([]));
        let conn = ScriptedConnection::default();
        let rows = engine
            .run_federated_query(
                &conn,
                "  SELECT 1  ",
                &HashMap::new(),
                &HashMap::new(),
                false,
                &Dialect::for_vendor(Vendor::Sqlite),
                CacheMode::Off,
            )
            .await
            .unwrap();

        assert_eq!(rows, vec![json!({"ok": true})]);
        // Trimmed and terminated before it reaches the engine
        assert_eq!(conn.queries.lock().unwrap().as_slice(), ["SELECT 1;"]);
        assert_eq!(*conn.imports.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_references_are_imported_before_query() {
        let rows = json!([{"a": 1}, {"a": 2}, {"a": 3}]);
        let (_dir, engine) = engine_with_panel(rows.clone());
        let (shapes, ids) = maps(&rows);
        let conn = ScriptedConnection::default();

        engine
            .run_federated_query(
                &conn,
                "SELECT a FROM REF(0);",
                &shapes,
                &ids,
                true,
                &Dialect::for_vendor(Vendor::Sqlite),
                CacheMode::Off,
            )
            .await
            .unwrap();

        assert_eq!(*conn.imports.lock().unwrap(), 3);
        assert_eq!(
            conn.queries.lock().unwrap().as_slice(),
            [r#"SELECT a FROM "t_0";"#]
        );
    }

    #[tokio::test]
    async fn test_warm_cache_skips_imports() {
        let rows = json!([{"a": 1}]);
        let (_dir, engine) = engine_with_panel(rows.clone());
        let (shapes, ids) = maps(&rows);
        let conn = ScriptedConnection::default();

        engine
            .run_federated_query(
                &conn,
                "SELECT a FROM REF(0)",
                &shapes,
                &ids,
                true,
                &Dialect::for_vendor(Vendor::Sqlite),
                CacheMode::Warm,
            )
            .await
            .unwrap();

        assert_eq!(*conn.imports.lock().unwrap(), 0);
        assert_eq!(
            conn.queries.lock().unwrap().as_slice(),
            [r#"SELECT a FROM "t_0";"#]
        );
    }

    #[tokio::test]
    async fn test_rewrite_error_stops_before_any_import() {
        let (_dir, engine) = engine_with_panel(json!([]));
        let conn = ScriptedConnection::default();
        let err = engine
            .run_federated_query(
                &conn,
                "SELECT * FROM REF(7)",
                &HashMap::new(),
                &HashMap::new(),
                true,
                &Dialect::for_vendor(Vendor::Sqlite),
                CacheMode::Off,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::InvalidDependentPanel(_)));
        assert!(conn.queries.lock().unwrap().is_empty());
    }
}
