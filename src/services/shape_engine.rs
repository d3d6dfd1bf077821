// Shape inference: structural typing of JSON panel results
//
// A panel's shape is inferred once, from a sample of its rows (or from a
// bounded prefix of its result file), and drives both SQL column derivation
// and reference validation.
use crate::error::EvalError;
use crate::models::{Column, ScalarName, Shape};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Fixed JSON-to-SQL type map shared by every dialect
fn sql_type(name: ScalarName) -> &'static str {
    match name {
        ScalarName::Number => "REAL",
        ScalarName::String => "TEXT",
        ScalarName::Boolean => "BOOLEAN",
        ScalarName::Bigint => "BIGINT",
        ScalarName::Null => "TEXT",
    }
}

/// Infer the shape of a single JSON value.
///
/// Array elements are sampled up to `sample_size` and merged; object fields
/// missing from some sampled elements become `Varied [X, null]`. A field
/// observed with two different non-null scalar types collapses to `string`
/// rather than widening.
pub fn shape_of_value(value: &Value, sample_size: usize) -> Shape {
    match value {
        Value::Null => Shape::null(),
        Value::Bool(_) => Shape::Scalar(ScalarName::Boolean),
        Value::Number(_) => Shape::Scalar(ScalarName::Number),
        Value::String(_) => Shape::Scalar(ScalarName::String),
        Value::Object(fields) => {
            let children = fields
                .iter()
                .map(|(k, v)| (k.clone(), shape_of_value(v, sample_size)))
                .collect();
            Shape::Object(children)
        }
        Value::Array(elements) => {
            let mut merged: Option<Shape> = None;
            for element in elements.iter().take(sample_size) {
                let shape = shape_of_value(element, sample_size);
                merged = Some(match merged {
                    None => shape,
                    Some(previous) => merge(previous, shape),
                });
            }
            Shape::Array(Box::new(merged.unwrap_or(Shape::Unknown)))
        }
    }
}

/// Infer the shape of a panel known to be a sequence of object rows.
///
/// A non-object element fails immediately; scanning stops after
/// `sample_size` rows.
pub fn infer_shape(panel_id: &str, rows: &[Value], sample_size: usize) -> Result<Shape, EvalError> {
    let mut merged: Option<Shape> = None;
    for row in rows.iter().take(sample_size) {
        if !row.is_object() {
            debug!(
                panel = panel_id,
                got = row_type_name(row),
                "non-object row during shape inference"
            );
            return Err(EvalError::NotAnArrayOfObjects(panel_id.to_string()));
        }
        let shape = shape_of_value(row, sample_size);
        merged = Some(match merged {
            None => shape,
            Some(previous) => merge(previous, shape),
        });
    }

    Ok(Shape::Array(Box::new(merged.unwrap_or(Shape::Unknown))))
}

fn row_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn merge(a: Shape, b: Shape) -> Shape {
    if a == b {
        return a;
    }

    match (a, b) {
        (Shape::Unknown, other) | (other, Shape::Unknown) => other,
        (Shape::Scalar(x), Shape::Scalar(y)) => {
            if x == ScalarName::Null {
                return nullable(Shape::Scalar(y));
            }
            if y == ScalarName::Null {
                return nullable(Shape::Scalar(x));
            }
            // Two different non-null scalars: lossy, safe unification
            Shape::Scalar(ScalarName::String)
        }
        (Shape::Array(x), Shape::Array(y)) => Shape::Array(Box::new(merge(*x, *y))),
        (Shape::Object(x), Shape::Object(y)) => merge_objects(x, y),
        (Shape::Varied(mut alts), other) | (other, Shape::Varied(mut alts)) => {
            alts.push(other);
            normalize_varied(alts)
        }
        (x, y) => normalize_varied(vec![x, y]),
    }
}

fn merge_objects(mut a: BTreeMap<String, Shape>, b: BTreeMap<String, Shape>) -> Shape {
    let mut out = BTreeMap::new();
    for (key, b_child) in b {
        match a.remove(&key) {
            Some(a_child) => {
                out.insert(key, merge(a_child, b_child));
            }
            // Field absent on one side: it is optional
            None => {
                out.insert(key, nullable(b_child));
            }
        }
    }
    for (key, a_child) in a {
        out.insert(key, nullable(a_child));
    }
    Shape::Object(out)
}

fn nullable(shape: Shape) -> Shape {
    if shape.is_null() {
        return shape;
    }
    match shape {
        Shape::Varied(mut alts) => {
            alts.push(Shape::null());
            normalize_varied(alts)
        }
        other => Shape::Varied(vec![other, Shape::null()]),
    }
}

// Flattens nested alternatives, collapses conflicting scalars to string and
// keeps at most one trailing null.
fn normalize_varied(alts: Vec<Shape>) -> Shape {
    let mut has_null = false;
    let mut scalar: Option<ScalarName> = None;
    let mut scalar_conflict = false;
    let mut rest: Vec<Shape> = Vec::new();

    let mut pending = alts;
    while let Some(alt) = pending.pop() {
        match alt {
            Shape::Varied(inner) => pending.extend(inner),
            Shape::Scalar(ScalarName::Null) => has_null = true,
            Shape::Scalar(name) => match scalar {
                None => scalar = Some(name),
                Some(seen) if seen != name => scalar_conflict = true,
                Some(_) => {}
            },
            Shape::Unknown => {}
            other => {
                if !rest.contains(&other) {
                    rest.push(other);
                }
            }
        }
    }

    if let Some(name) = scalar {
        let unified = if scalar_conflict {
            ScalarName::String
        } else {
            name
        };
        rest.insert(0, Shape::Scalar(unified));
    }

    match (rest.len(), has_null) {
        (0, true) => Shape::null(),
        (0, false) => Shape::Unknown,
        (1, false) => rest.pop().unwrap(),
        _ => {
            if has_null {
                rest.push(Shape::null());
            }
            Shape::Varied(rest)
        }
    }
}

/// Infer a shape from a result file without loading an unbounded document.
///
/// Reads at most `max_bytes_to_read` bytes, truncates mid-structure if needed
/// and appends matching closing brackets in LIFO order so the prefix still
/// parses as valid JSON.
pub fn shape_from_file(
    file: &Path,
    panel_id: &str,
    max_bytes_to_read: usize,
    sample_size: usize,
) -> Result<Shape, EvalError> {
    let prefix = read_json_prefix(file, panel_id, max_bytes_to_read)?;
    let value: Value = serde_json::from_str(&prefix)?;
    Ok(shape_of_value(&value, sample_size))
}

fn read_json_prefix(
    file: &Path,
    panel_id: &str,
    max_bytes_to_read: usize,
) -> Result<String, EvalError> {
    let meta =
        fs::metadata(file).map_err(|_| EvalError::NoResult(panel_id.to_string()))?;
    if (meta.len() as usize) < max_bytes_to_read {
        return Ok(fs::read_to_string(file)?);
    }

    let mut fd =
        fs::File::open(file).map_err(|_| EvalError::NoResult(panel_id.to_string()))?;

    const BUFFER_SIZE: usize = 1024;
    let mut out = String::new();
    let mut incomplete: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut done = false;

    while !done {
        let mut buf = [0u8; BUFFER_SIZE];
        let bytes_read = fd.read(&mut buf)?;
        let mut chars: Vec<char> = String::from_utf8_lossy(&buf[..bytes_read]).chars().collect();

        let mut cut_at = chars.len();
        for i in 0..chars.len() {
            let c = chars[i];
            if in_string && c != '"' {
                continue;
            }

            match c {
                '"' => {
                    let previous = if i > 0 {
                        chars[i - 1]
                    } else {
                        out.chars().last().unwrap_or(' ')
                    };
                    if previous != '\\' {
                        in_string = !in_string;
                    }
                }
                '{' | '[' => incomplete.push(c),
                '}' | ']' => {
                    if out.len() + BUFFER_SIZE >= max_bytes_to_read {
                        // Stop here so no openings after this point get counted
                        cut_at = i;
                        done = true;
                        break;
                    }
                    incomplete.pop();
                }
                _ => {}
            }
        }

        chars.truncate(cut_at);
        out.extend(chars);
        if bytes_read < BUFFER_SIZE {
            break;
        }
    }

    while let Some(open) = incomplete.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }

    Ok(out)
}

/// Split a dot-path into segments, honoring `\.` escapes for literal dots.
pub(crate) fn split_dot_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// Generic dot-path lookup over a JSON value, honoring `\.` escapes.
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in split_dot_path(path) {
        current = current.as_object()?.get(&segment)?;
    }
    Some(current)
}

/// Pure descent through array/object children by dot-path segment.
///
/// Arrays are transparent: a segment applies to the element shape. An empty
/// path resolves to the shape itself.
pub fn shape_at_path<'a>(shape: &'a Shape, path: &str) -> Result<&'a Shape, EvalError> {
    if path.is_empty() {
        return Ok(shape);
    }

    let mut current = shape;
    for segment in split_dot_path(path) {
        while let Shape::Array(child) = current {
            current = child;
        }
        match current {
            Shape::Object(children) => {
                current = children.get(&segment).ok_or_else(|| {
                    EvalError::BadShapePath(format!("Path does not exist: {segment}"))
                })?;
            }
            _ => {
                return Err(EvalError::BadShapePath(format!(
                    "Path enters non-object at: {segment}"
                )))
            }
        }
    }

    Ok(current)
}

fn escape_column_key(key: &str) -> String {
    key.replace('.', "\\.")
}

// Resolves a child shape to a generic SQL type when it is a plain scalar or
// a `null | X` pair; everything else falls back to TEXT.
fn scalar_column_kind(shape: &Shape) -> Option<&'static str> {
    match shape {
        Shape::Scalar(name) if *name != ScalarName::Null => Some(sql_type(*name)),
        Shape::Varied(children) if children.len() == 2 => {
            let (null_child, other) = if children[0].is_null() {
                (&children[0], &children[1])
            } else {
                (&children[1], &children[0])
            };
            match (null_child, other) {
                (Shape::Scalar(ScalarName::Null), Shape::Scalar(name))
                    if *name != ScalarName::Null =>
                {
                    Some(sql_type(*name))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Derive SQL columns from the shape of one row object.
///
/// Exactly one level of nested objects is flattened into `parent.child`
/// columns; deeper nesting and arrays fall back to a generic TEXT column
/// (re-serialized as JSON at import time). Columns come out sorted by name.
pub fn columns_from_object_shape(row_shape: &BTreeMap<String, Shape>) -> Vec<Column> {
    let mut columns = Vec::new();

    for (key, child) in row_shape {
        match child {
            Shape::Object(grandchildren) => {
                for (child_key, grandchild) in grandchildren {
                    columns.push(Column {
                        name: format!(
                            "{}.{}",
                            escape_column_key(key),
                            escape_column_key(child_key)
                        ),
                        kind: scalar_column_kind(grandchild).unwrap_or("TEXT").to_string(),
                    });
                }
            }
            other => {
                columns.push(Column {
                    name: escape_column_key(key),
                    kind: scalar_column_kind(other).unwrap_or("TEXT").to_string(),
                });
            }
        }
    }

    columns.sort_by(|a, b| a.name.cmp(&b.name));
    columns
}
