// Structural type descriptors inferred from panel results
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar leaf types observed in JSON panel results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarName {
    Null,
    String,
    Number,
    Boolean,
    Bigint,
}

impl fmt::Display for ScalarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarName::Null => "null",
            ScalarName::String => "string",
            ScalarName::Number => "number",
            ScalarName::Boolean => "boolean",
            ScalarName::Bigint => "bigint",
        };
        f.write_str(s)
    }
}

/// Recursive structural type of a JSON value tree.
///
/// Computed once after a panel evaluates and read-only afterwards; a
/// re-evaluation replaces the whole shape. Object children are kept sorted
/// so serialization and column derivation are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar(ScalarName),
    Object(BTreeMap<String, Shape>),
    Array(Box<Shape>),
    /// Ordered alternatives, commonly `[X, null]` for an optional field
    Varied(Vec<Shape>),
    Unknown,
}

impl Shape {
    pub fn null() -> Shape {
        Shape::Scalar(ScalarName::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Shape::Scalar(ScalarName::Null))
    }

    /// True when the shape is an array whose elements are objects, i.e. a
    /// value that can be materialized as a SQL table.
    pub fn is_object_array(&self) -> bool {
        matches!(self, Shape::Array(child) if matches!(**child, Shape::Object(_)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Shape::Scalar(_) => "scalar",
            Shape::Object(_) => "object",
            Shape::Array(_) => "array",
            Shape::Varied(_) => "varied",
            Shape::Unknown => "unknown",
        }
    }

    /// Human-readable rendering used in diagnostics.
    pub fn pretty(&self, indent: &str) -> String {
        let next = format!("{indent}  ");
        match self {
            Shape::Scalar(name) => format!("{indent}{name}"),
            Shape::Unknown => format!("{indent}unknown"),
            Shape::Array(child) => format!("{indent}Array of\n{}", child.pretty(&next)),
            Shape::Varied(children) => {
                let rendered: Vec<String> = children.iter().map(|c| c.pretty(&next)).collect();
                format!("{indent}Varied of\n{}", rendered.join(" or\n"))
            }
            Shape::Object(children) => {
                let rendered: Vec<String> = children
                    .iter()
                    .map(|(key, child)| {
                        format!("{next}{key} of\n{}", child.pretty(&format!("{next}  ")))
                    })
                    .collect();
                format!("{indent}Object of\n{}", rendered.join("\n"))
            }
        }
    }
}

// The host tool persists shapes as {"kind": "...", "<kind>": <payload>}, so
// the payload key varies with the kind and derive(Serialize) can't express it.
impl Serialize for Shape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Shape::Unknown => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("kind", "unknown")?;
                map.end()
            }
            Shape::Scalar(name) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("kind", "scalar")?;
                map.serialize_entry("scalar", name)?;
                map.end()
            }
            Shape::Object(children) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("kind", "object")?;
                map.serialize_entry("object", children)?;
                map.end()
            }
            Shape::Array(child) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("kind", "array")?;
                map.serialize_entry("array", child)?;
                map.end()
            }
            Shape::Varied(children) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("kind", "varied")?;
                map.serialize_entry("varied", children)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
struct ShapeRepr {
    kind: String,
    #[serde(default)]
    scalar: Option<ScalarName>,
    #[serde(default)]
    object: Option<BTreeMap<String, Shape>>,
    #[serde(default)]
    array: Option<Box<Shape>>,
    #[serde(default)]
    varied: Option<Vec<Shape>>,
}

impl<'de> Deserialize<'de> for Shape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ShapeRepr::deserialize(deserializer)?;
        match repr.kind.as_str() {
            "unknown" => Ok(Shape::Unknown),
            "scalar" => repr
                .scalar
                .map(Shape::Scalar)
                .ok_or_else(|| D::Error::missing_field("scalar")),
            "object" => repr
                .object
                .map(Shape::Object)
                .ok_or_else(|| D::Error::missing_field("object")),
            "array" => repr
                .array
                .map(Shape::Array)
                .ok_or_else(|| D::Error::missing_field("array")),
            "varied" => repr
                .varied
                .map(Shape::Varied)
                .ok_or_else(|| D::Error::missing_field("varied")),
            other => Err(D::Error::unknown_variant(
                other,
                &["scalar", "object", "array", "varied", "unknown"],
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number() -> Shape {
        Shape::Scalar(ScalarName::Number)
    }

    #[test]
    fn test_shape_wire_format() {
        let shape = Shape::Array(Box::new(Shape::Varied(vec![
            number(),
            Shape::Scalar(ScalarName::String),
        ])));
        let encoded = serde_json::to_string(&shape).unwrap();
        assert_eq!(
            encoded,
            r#"{"kind":"array","array":{"kind":"varied","varied":[{"kind":"scalar","scalar":"number"},{"kind":"scalar","scalar":"string"}]}}"#
        );

        let decoded: Shape = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, shape);
    }

    #[test]
    fn test_shape_object_wire_format() {
        let mut children = BTreeMap::new();
        children.insert("a".to_string(), number());
        let shape = Shape::Array(Box::new(Shape::Object(children)));
        let encoded = serde_json::to_string(&shape).unwrap();
        assert_eq!(
            encoded,
            r#"{"kind":"array","array":{"kind":"object","object":{"a":{"kind":"scalar","scalar":"number"}}}}"#
        );
    }

    #[test]
    fn test_shape_deserialize_missing_kind() {
        let err = serde_json::from_str::<Shape>(r#"{"scalar":"number"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_is_object_array() {
        let ok = Shape::Array(Box::new(Shape::Object(BTreeMap::new())));
        assert!(ok.is_object_array());
        assert!(!Shape::Array(Box::new(number())).is_object_array());
        assert!(!number().is_object_array());
        assert!(!Shape::Unknown.is_object_array());
    }

    #[test]
    fn test_pretty_varied() {
        let shape = Shape::Array(Box::new(Shape::Varied(vec![
            number(),
            Shape::Scalar(ScalarName::String),
        ])));
        assert_eq!(
            shape.pretty(""),
            "Array of\n  Varied of\n    number or\n    string"
        );
    }

    #[test]
    fn test_pretty_nested_object() {
        let mut inner = BTreeMap::new();
        inner.insert("b".to_string(), number());
        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), Shape::Object(inner));
        let shape = Shape::Object(outer);
        assert_eq!(
            shape.pretty(""),
            "Object of\n  a of\n    Object of\n      b of\n        number"
        );
    }
}
