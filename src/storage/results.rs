// Result store: persisted JSON results of evaluated panels.
//
// A panel's materialized result opens as a lazy, finite, non-restartable
// sequence of row objects: a blocking reader task walks the JSON array
// element by element and feeds a bounded channel, so the file never has to
// fit in memory.
use crate::config::Config;
use crate::error::EvalError;
use crate::services::shape_engine::value_at_path;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;

/// Rows flow out of the store as results so a mid-stream failure reaches the
/// consumer in order.
pub type RowReceiver = mpsc::Receiver<Result<Value, EvalError>>;

#[derive(Debug, Clone)]
pub struct ResultStore {
    data_dir: PathBuf,
    channel_capacity: usize,
}

impl ResultStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P, channel_capacity: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            channel_capacity,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.results.data_dir.clone(),
            config.import.row_channel_capacity,
        )
    }

    pub fn result_path(&self, panel_id: &str) -> PathBuf {
        self.data_dir.join(format!("{panel_id}.json"))
    }

    pub fn exists(&self, panel_id: &str) -> bool {
        self.result_path(panel_id).is_file()
    }

    /// Timestamp of the last persisted result, if any
    pub fn last_written(&self, panel_id: &str) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(self.result_path(panel_id))
            .and_then(|m| m.modified())
            .ok()?;
        Some(modified.into())
    }

    /// Persist a panel's result wholesale, replacing any previous one
    pub fn write_result(&self, panel_id: &str, value: &Value) -> Result<(), EvalError> {
        fs::create_dir_all(&self.data_dir)?;
        let file = fs::File::create(self.result_path(panel_id))?;
        serde_json::to_writer(BufWriter::new(file), value)?;
        Ok(())
    }

    /// Open the panel's rows as a stream. `path` optionally selects a
    /// sub-document before iteration begins. Every element must be an
    /// object; anything else ends the stream with an error.
    ///
    /// The sequence is finite and cannot be restarted; dropping the receiver
    /// stops the reader.
    pub fn open_row_sequence(
        &self,
        panel_id: &str,
        path: Option<&str>,
    ) -> Result<RowReceiver, EvalError> {
        let file = self.result_path(panel_id);
        if !file.is_file() {
            return Err(EvalError::NoResult(panel_id.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let panel_id = panel_id.to_string();
        let path = path.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            debug!(panel = %panel_id, "streaming result rows");
            if let Err(e) = stream_rows(&file, &panel_id, path.as_deref(), &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(rx)
    }
}

fn stream_rows(
    file: &Path,
    panel_id: &str,
    path: Option<&str>,
    tx: &mpsc::Sender<Result<Value, EvalError>>,
) -> Result<(), EvalError> {
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        // Sub-document selection needs the document in memory; plain
        // (path-less) results stay streaming
        let document: Value = serde_json::from_reader(BufReader::new(fs::File::open(file)?))?;
        let rows = value_at_path(&document, path)
            .and_then(Value::as_array)
            .ok_or_else(|| EvalError::NotAnArrayOfObjects(panel_id.to_string()))?;
        for row in rows {
            if !row.is_object() {
                return Err(EvalError::NotAnArrayOfObjects(panel_id.to_string()));
            }
            if tx.blocking_send(Ok(row.clone())).is_err() {
                return Ok(());
            }
        }
        return Ok(());
    }

    let mut reader = BufReader::new(fs::File::open(file)?);
    let mut byte = [0u8; 1];

    // Skip to the opening of the array
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'[' {
            break;
        }
    }

    loop {
        // Skip whitespace; an immediate close means the array is done
        let first = loop {
            reader.read_exact(&mut byte)?;
            if !byte[0].is_ascii_whitespace() {
                break byte[0];
            }
        };
        if first == b']' {
            return Ok(());
        }

        // Put the consumed byte back in front of the reader and decode one
        // element. Elements must be objects: `}` self-terminates, so the
        // deserializer never buffers a lookahead byte that would be lost
        // when it drops (a bare scalar like `1` would need one to find its
        // own end).
        let mut chained = std::io::Cursor::new([first]).chain(&mut reader);
        let row = {
            let mut de = serde_json::Deserializer::from_reader(&mut chained);
            Value::deserialize(&mut de)?
        };
        if !row.is_object() {
            return Err(EvalError::NotAnArrayOfObjects(panel_id.to_string()));
        }

        if tx.blocking_send(Ok(row)).is_err() {
            // Consumer went away; stop reading
            return Ok(());
        }

        // Read up to the separator or the end of the array
        loop {
            reader.read_exact(&mut byte)?;
            match byte[0] {
                b',' => break,
                b']' => return Ok(()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(mut rx: RowReceiver) -> Result<Vec<Value>, EvalError> {
        let mut rows = Vec::new();
        while let Some(item) = rx.recv().await {
            rows.push(item?);
        }
        Ok(rows)
    }

    fn store() -> (tempfile::TempDir, ResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path(), 16);
        (dir, store)
    }

    #[tokio::test]
    async fn test_roundtrip_rows() {
        let (_dir, store) = store();
        store
            .write_result("p1", &json!([{"a": 1}, {"a": 2}, {"a": 3}]))
            .unwrap();
        assert!(store.exists("p1"));
        assert!(store.last_written("p1").is_some());

        let rows = collect(store.open_row_sequence("p1", None).unwrap())
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
    }

    #[tokio::test]
    async fn test_empty_array() {
        let (_dir, store) = store();
        store.write_result("p1", &json!([])).unwrap();
        let rows = collect(store.open_row_sequence("p1", None).unwrap())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_and_nested_structures() {
        let (_dir, store) = store();
        let file = store.result_path("p1");
        fs::create_dir_all(store.result_path("p1").parent().unwrap()).unwrap();
        fs::write(
            &file,
            "  [ {\"a\": [1, 2], \"b\": {\"c\": \"x,]\"}} ,\n {\"a\": []} ]",
        )
        .unwrap();

        let rows = collect(store.open_row_sequence("p1", None).unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["b"]["c"], "x,]");
    }

    #[tokio::test]
    async fn test_path_selection() {
        let (_dir, store) = store();
        store
            .write_result("p1", &json!({"data": {"rows": [{"a": 1}]}}))
            .unwrap();
        let rows = collect(store.open_row_sequence("p1", Some("data.rows")).unwrap())
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn test_scalar_elements_are_rejected() {
        let (_dir, store) = store();
        store.write_result("p1", &json!([1, 2, 3])).unwrap();
        let err = collect(store.open_row_sequence("p1", None).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::NotAnArrayOfObjects(id) if id == "p1"));

        // Same contract on the path-selected branch
        store.write_result("p2", &json!({"rows": [{"a": 1}, 7]})).unwrap();
        let err = collect(store.open_row_sequence("p2", Some("rows")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::NotAnArrayOfObjects(id) if id == "p2"));
    }

    #[tokio::test]
    async fn test_path_to_non_array_errors() {
        let (_dir, store) = store();
        store.write_result("p1", &json!({"data": 1})).unwrap();
        let err = collect(store.open_row_sequence("p1", Some("data")).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::NotAnArrayOfObjects(_)));
    }

    #[test]
    fn test_missing_result() {
        let (_dir, store) = store();
        let err = store.open_row_sequence("nope", None).unwrap_err();
        assert!(matches!(err, EvalError::NoResult(id) if id == "nope"));
    }
}
