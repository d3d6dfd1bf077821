// Reference Rewriter: finds REF(...) tokens inside free-form SQL text and
// rewrites each to a dialect-quoted synthetic table name. The surrounding
// text is never parsed as SQL.
use crate::error::EvalError;
use crate::models::{PanelReference, Shape};
use crate::services::dialect::Dialect;
use crate::services::shape_engine::{columns_from_object_shape, shape_at_path};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

// REF "(" (INDEX | STRING) ("," STRING)? ")" with single- or double-quoted
// strings and backslash escaping. First reasonable match wins; nested quote
// pathologies are not validated further.
static REF_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"REF\((?:(?P<index>[0-9]+)|(?P<name>'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"))(?:,(?P<path>'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"))?\)"#,
    )
    .unwrap()
});

fn strip_quotes(s: &str) -> &str {
    &s[1..s.len() - 1]
}

/// Rewrite every panel reference in `query`, resolving each against the
/// caller's shape and id maps.
///
/// Returns the references to import (deduped by panel id, discovery order)
/// and the rewritten query. The same panel id referenced twice resolves to
/// one `PanelReference` and reuses the first occurrence's table name.
pub fn rewrite_ref_calls(
    query: &str,
    shapes_by_key: &HashMap<String, Shape>,
    ids_by_key: &HashMap<String, String>,
    references_allowed: bool,
    dialect: &Dialect,
) -> Result<(Vec<PanelReference>, String), EvalError> {
    let mut references: Vec<PanelReference> = Vec::new();
    let mut error: Option<EvalError> = None;

    let rewritten = REF_CALL_RE
        .replace_all(query, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }
            match resolve_reference(caps, shapes_by_key, ids_by_key, dialect, &mut references) {
                Ok(replacement) => replacement,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        })
        .into_owned();

    if let Some(e) = error {
        return Err(e);
    }

    if !references.is_empty() && !references_allowed {
        return Err(EvalError::Unsupported(
            "panel references are not supported by this connector".to_string(),
        ));
    }

    Ok((references, rewritten))
}

fn resolve_reference(
    caps: &Captures,
    shapes_by_key: &HashMap<String, Shape>,
    ids_by_key: &HashMap<String, String>,
    dialect: &Dialect,
    references: &mut Vec<PanelReference>,
) -> Result<String, EvalError> {
    let key = match (caps.name("index"), caps.name("name")) {
        (Some(index), _) => index.as_str(),
        (None, Some(name)) => strip_quotes(name.as_str()),
        (None, None) => unreachable!("regex guarantees one of index/name"),
    };
    let path = caps
        .name("path")
        .map(|p| strip_quotes(p.as_str()).to_string());

    let id = ids_by_key
        .get(key)
        .ok_or_else(|| EvalError::InvalidDependentPanel(key.to_string()))?;

    let shape = shapes_by_key
        .get(key)
        .ok_or_else(|| EvalError::NotAnArrayOfObjects(key.to_string()))?;
    let at_path = shape_at_path(shape, path.as_deref().unwrap_or(""))
        .map_err(|_| EvalError::NotAnArrayOfObjects(key.to_string()))?;

    let row_shape = match at_path {
        Shape::Array(child) => match child.as_ref() {
            Shape::Object(children) => children,
            _ => return Err(EvalError::NotAnArrayOfObjects(key.to_string())),
        },
        _ => return Err(EvalError::NotAnArrayOfObjects(key.to_string())),
    };

    // Don't import the same panel twice
    if let Some(existing) = references.iter().find(|r| &r.id == id) {
        return Ok(dialect.quote_identifier(&existing.table_name));
    }

    let table_name = format!("t_{key}");
    let columns = columns_from_object_shape(row_shape);
    references.push(PanelReference {
        id: id.clone(),
        table_name: table_name.clone(),
        columns,
        path,
    });

    Ok(dialect.quote_identifier(&table_name))
}
