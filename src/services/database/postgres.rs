// PostgreSQL-backed connection using tokio-postgres.
use crate::error::EvalError;
use crate::services::database::adapter::{PreparedStatement, SqlConnection, SqlValue};
use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Statement};
use tracing::error;

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Number(f) => f.to_sql(ty, out),
            SqlValue::Bigint(i) => i.to_sql(ty, out),
            SqlValue::Text(s) => s.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Column types come from our own DDL; mismatches surface as
        // driver errors at execute time
        true
    }

    to_sql_checked!();
}

pub struct PostgresConnection {
    client: Arc<Client>,
}

impl PostgresConnection {
    /// Connect with a libpq-style connection string. The background
    /// connection task lives until the client drops.
    pub async fn connect(conn_str: &str) -> Result<Self, EvalError> {
        let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .map_err(db_err)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("postgres connection error: {}", e);
            }
        });
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

fn db_err(e: tokio_postgres::Error) -> EvalError {
    let details = if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.code().code(), db_error.message())
    } else {
        e.to_string()
    };
    EvalError::Database(details)
}

struct PostgresPrepared {
    client: Arc<Client>,
    statement: Statement,
}

#[async_trait]
impl PreparedStatement for PostgresPrepared {
    async fn execute(&mut self, values: Vec<SqlValue>) -> Result<(), EvalError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(&self.statement, &params)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), EvalError> {
        // Dropping the Statement deallocates it server-side
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    async fn execute_ddl(&self, ddl: &str) -> Result<(), EvalError> {
        self.client.batch_execute(ddl).await.map_err(db_err)
    }

    async fn prepare(&self, dml: &str) -> Result<Box<dyn PreparedStatement>, EvalError> {
        let statement = self.client.prepare(dml).await.map_err(db_err)?;
        Ok(Box::new(PostgresPrepared {
            client: self.client.clone(),
            statement,
        }))
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Value>, EvalError> {
        let rows = self.client.query(sql, &[]).await.map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let mut obj = serde_json::Map::new();
            for (idx, column) in row.columns().iter().enumerate() {
                let value: Value = match *column.type_() {
                    // FromSql is exact per width, so each integer type
                    // decodes as its own Rust type
                    Type::INT2 => row
                        .try_get::<_, Option<i16>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    Type::INT4 => row
                        .try_get::<_, Option<i32>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    Type::INT8 => row
                        .try_get::<_, Option<i64>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    Type::FLOAT4 => row
                        .try_get::<_, Option<f32>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    Type::FLOAT8 => row
                        .try_get::<_, Option<f64>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    Type::BOOL => row
                        .try_get::<_, Option<bool>>(idx)
                        .map_err(db_err)?
                        .map(|v| json!(v))
                        .unwrap_or(Value::Null),
                    _ => match row.try_get::<_, Option<String>>(idx) {
                        Ok(Some(v)) => json!(v),
                        Ok(None) => Value::Null,
                        // Types with no string conversion surface as a
                        // type-name placeholder
                        Err(_) => json!(format!("<{}>", column.type_().name())),
                    },
                };
                obj.insert(column.name().to_string(), value);
            }
            out.push(Value::Object(obj));
        }

        Ok(out)
    }
}
