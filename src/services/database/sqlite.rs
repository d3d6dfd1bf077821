// SQLite-backed connection using rusqlite.
//
// Uses tokio::Mutex for async-friendly locking; prepared inserts go through
// rusqlite's statement cache keyed by DML text, so a prepare window maps to
// one cached handle.
use crate::error::EvalError;
use crate::services::database::adapter::{PreparedStatement, SqlConnection, SqlValue};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(*b as i64)),
            SqlValue::Number(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            SqlValue::Bigint(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConnection {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, EvalError> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database; temp tables and data vanish with the connection
    pub fn open_in_memory() -> Result<Self, EvalError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn db_err(e: rusqlite::Error) -> EvalError {
    EvalError::Database(e.to_string())
}

struct SqlitePrepared {
    conn: Arc<Mutex<Connection>>,
    dml: String,
}

#[async_trait]
impl PreparedStatement for SqlitePrepared {
    async fn execute(&mut self, values: Vec<SqlValue>) -> Result<(), EvalError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&self.dml).map_err(db_err)?;
        stmt.execute(rusqlite::params_from_iter(values.iter()))
            .map_err(db_err)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EvalError> {
        // The cached handle is released with the connection's statement cache
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for SqliteConnection {
    async fn execute_ddl(&self, ddl: &str) -> Result<(), EvalError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(ddl).map_err(db_err)
    }

    async fn prepare(&self, dml: &str) -> Result<Box<dyn PreparedStatement>, EvalError> {
        // Validate eagerly so a bad statement fails at prepare time
        {
            let conn = self.conn.lock().await;
            conn.prepare_cached(dml).map_err(db_err)?;
        }
        Ok(Box::new(SqlitePrepared {
            conn: self.conn.clone(),
            dml: dml.to_string(),
        }))
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Value>, EvalError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut obj = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let cell: SqliteValue = row.get(i).map_err(db_err)?;
                obj.insert(name.clone(), sqlite_value_to_json(cell));
            }
            out.push(Value::Object(obj));
        }
        Ok(out)
    }
}

fn sqlite_value_to_json(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => json!(i),
        SqliteValue::Real(f) => json!(f),
        SqliteValue::Text(s) => json!(s),
        SqliteValue::Blob(b) => json!(String::from_utf8_lossy(&b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_insert_query_roundtrip() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_ddl(r#"CREATE TEMPORARY TABLE "t" ("a" REAL, "b" TEXT);"#)
            .await
            .unwrap();

        let mut stmt = conn
            .prepare(r#"INSERT INTO "t" ("a", "b") VALUES (?,?);"#)
            .await
            .unwrap();
        stmt.execute(vec![
            SqlValue::Number(1.5),
            SqlValue::Text("x".to_string()),
        ])
        .await
        .unwrap();
        stmt.execute(vec![SqlValue::Null, SqlValue::Text("y".to_string())])
            .await
            .unwrap();
        stmt.close().await.unwrap();

        let rows = conn
            .run_query(r#"SELECT * FROM "t" ORDER BY "b";"#)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["a"], 1.5);
        assert_eq!(rows[0]["b"], "x");
        assert_eq!(rows[1]["a"], Value::Null);
    }

    #[tokio::test]
    async fn test_bad_sql_is_wrapped() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.run_query("SELECT * FROM missing;").await.unwrap_err();
        assert!(matches!(err, EvalError::Database(_)));
    }
}
