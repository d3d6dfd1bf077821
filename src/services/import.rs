// Import pipeline: materializes one referenced panel into the target engine.
//
// Rows stream from the result store on a reader task while this stage
// batches and writes them, so storage I/O overlaps the network writes. All
// statements for one reference run on the same connection, strictly
// sequentially, so the table is never partially visible to the final query.
use crate::error::EvalError;
use crate::models::{CacheMode, Column, PanelReference};
use crate::services::database::{PreparedStatement, SqlConnection, SqlValue};
use crate::services::dialect::Dialect;
use crate::services::shape_engine::value_at_path;
use crate::storage::results::{ResultStore, RowReceiver};
use serde_json::Value;
use tracing::{debug, info};

/// Rows per insert batch
pub const BATCH_SIZE: usize = 10;

/// The full-batch statement is closed and rebuilt after this many written
/// rows to bound server-side resource growth
pub const ROWS_PER_PREPARE_WINDOW: usize = 100_000;

/// DDL for a reference's table. Temporary unless cache mode is active, in
/// which case the table is durable and reusable across evaluations.
pub fn create_table_ddl(
    reference: &PanelReference,
    dialect: &Dialect,
    cache_mode: CacheMode,
) -> String {
    let columns: Vec<String> = reference
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} {}",
                dialect.quote_identifier(&c.name),
                dialect.ddl_type(&c.kind)
            )
        })
        .collect();

    let temporary = if cache_mode.is_active() {
        ""
    } else {
        "TEMPORARY "
    };
    format!(
        "CREATE {}TABLE {} ({});",
        temporary,
        dialect.quote_identifier(&reference.table_name),
        columns.join(", ")
    )
}

/// Insert statement sized for exactly `row_count` rows, placeholder style
/// mangled for the dialect after construction.
pub fn insert_dml(reference: &PanelReference, dialect: &Dialect, row_count: usize) -> String {
    let quoted_columns: Vec<String> = reference
        .columns
        .iter()
        .map(|c| dialect.quote_identifier(&c.name))
        .collect();

    let row_placeholders = format!(
        "({})",
        vec!["?"; reference.columns.len()].join(",")
    );
    let all_placeholders = vec![row_placeholders; row_count].join(", ");

    let stmt = format!(
        "INSERT INTO {} ({}) VALUES {};",
        dialect.quote_identifier(&reference.table_name),
        quoted_columns.join(", "),
        all_placeholders
    );
    dialect.mangle_insert(&stmt)
}

// Row-major parameter list for one batch, columns in fixed (sorted) order.
fn batch_values(batch: &[Value], columns: &[Column]) -> Vec<SqlValue> {
    let mut values = Vec::with_capacity(batch.len() * columns.len());
    for row in batch {
        for column in columns {
            values.push(SqlValue::from_cell(
                value_at_path(row, &column.name),
                &column.kind,
            ));
        }
    }
    values
}

/// Create the reference's table and stream its panel's rows into it.
///
/// Returns the number of rows ingested. Any DDL/DML error aborts the whole
/// evaluation; the open prepared statement is released before the error
/// propagates.
pub async fn import_panel(
    conn: &dyn SqlConnection,
    store: &ResultStore,
    reference: &PanelReference,
    dialect: &Dialect,
    cache_mode: CacheMode,
) -> Result<usize, EvalError> {
    info!(
        table = %reference.table_name,
        panel = %reference.id,
        durable = cache_mode.is_active(),
        "creating panel table"
    );
    if cache_mode.is_active() {
        // A previous evaluation may have left a stale durable table behind
        conn.execute_ddl(&format!(
            "DROP TABLE IF EXISTS {};",
            dialect.quote_identifier(&reference.table_name)
        ))
        .await?;
    }
    conn.execute_ddl(&create_table_ddl(reference, dialect, cache_mode))
        .await?;

    let mut rows = store.open_row_sequence(&reference.id, reference.path.as_deref())?;

    let full_dml = insert_dml(reference, dialect, BATCH_SIZE);
    let mut statement: Option<Box<dyn PreparedStatement>> = None;
    let mut batch: Vec<Value> = Vec::with_capacity(BATCH_SIZE);
    let mut written = 0usize;

    let drained = drain_full_batches(
        conn,
        &mut rows,
        reference,
        &full_dml,
        &mut statement,
        &mut batch,
        &mut written,
    )
    .await;

    // Release the window statement before anything else; the original
    // error still wins
    if let Some(stmt) = statement.take() {
        let closed = stmt.close().await;
        drained?;
        closed?;
    } else {
        drained?;
    }

    // A shorter final group goes through its own, differently sized statement
    if !batch.is_empty() {
        let mut stmt = conn.prepare(&insert_dml(reference, dialect, batch.len())).await?;
        let executed = stmt.execute(batch_values(&batch, &reference.columns)).await;
        let closed = stmt.close().await;
        executed?;
        closed?;
        written += batch.len();
    }

    debug!(table = %reference.table_name, rows = written, "panel import complete");
    Ok(written)
}

async fn drain_full_batches(
    conn: &dyn SqlConnection,
    rows: &mut RowReceiver,
    reference: &PanelReference,
    full_dml: &str,
    statement: &mut Option<Box<dyn PreparedStatement>>,
    batch: &mut Vec<Value>,
    written: &mut usize,
) -> Result<(), EvalError> {
    let mut window_rows = 0usize;

    while let Some(item) = rows.recv().await {
        batch.push(item?);
        if batch.len() < BATCH_SIZE {
            continue;
        }

        let stmt = match statement {
            Some(stmt) => stmt,
            None => statement.insert(conn.prepare(full_dml).await?),
        };
        stmt.execute(batch_values(batch, &reference.columns)).await?;
        *written += batch.len();
        window_rows += batch.len();
        batch.clear();

        if window_rows >= ROWS_PER_PREPARE_WINDOW {
            if let Some(stmt) = statement.take() {
                stmt.close().await?;
            }
            window_rows = 0;
        }
    }

    Ok(())
}
