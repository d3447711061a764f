//! Schema validator capability and a concrete shape validator.
//!
//! The pipeline only depends on the [`Schema`] trait. [`Shape`] is the
//! built-in implementation: a declarative description of a JSON value that
//! validates into a (possibly normalized) value or a list of [`Issue`]s, and
//! can generate a mock value keyed on its declared [`ShapeKind`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One validation failure, located by its path inside the validated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Machine-readable issue code (e.g. `"invalid_type"`, `"too_small"`).
    pub code: String,
    /// Path segments from the root of the value to the offending element.
    pub path: Vec<String>,
    /// Human-readable description.
    pub message: String,
}

impl Issue {
    fn new(code: &str, path: &[String], message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            path: path.to_vec(),
            message: message.into(),
        }
    }
}

/// Result of validating a value: the validated value, or every issue found.
pub type Validated = Result<Value, Vec<Issue>>;

/// Capability consumed by the pipeline: validate a value against a declared
/// shape.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Validate `value`, returning the validated value (defaults applied,
    /// unknown object keys stripped) or the full list of issues.
    fn validate(&self, value: &Value) -> Validated;

    /// Produce a representative value that passes validation.
    fn mock(&self) -> Value;
}

/// Shared, immutable schema handle as stored in endpoint definitions.
pub type SchemaRef = Arc<dyn Schema>;

/// Declared kind of a [`Shape`], used to key mock value generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Any,
    Null,
    Bool,
    Number,
    Integer,
    String,
    Email,
    Literal,
    Array,
    Object,
    Optional,
    OneOf,
}

/// Constraints on string values.
#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<Regex>,
}

/// Declarative JSON shape.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Accepts any value unchanged.
    Any,
    Null,
    Bool,
    /// Any JSON number, optionally bounded.
    Number { min: Option<f64>, max: Option<f64> },
    /// Integral numbers only. String inputs holding an integer are coerced,
    /// which lets query-string and path-param shapes declare numbers.
    Integer { min: Option<i64>, max: Option<i64> },
    String(StringRules),
    Email,
    /// Exactly this value.
    Literal(Value),
    Array(Box<Shape>),
    /// Object with declared fields; undeclared keys are dropped.
    Object(BTreeMap<String, Shape>),
    /// Field may be absent or null. Absent optional fields stay absent.
    Optional(Box<Shape>),
    /// Field may be absent; when absent the default is inserted.
    Default(Box<Shape>, Value),
    /// First alternative that validates wins.
    OneOf(Vec<Shape>),
}

fn email_regex() -> &'static Regex {
    static EMAIL: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
    })
}

impl Shape {
    #[must_use]
    pub fn string() -> Self {
        Self::String(StringRules::default())
    }

    /// String with a minimum length.
    #[must_use]
    pub fn string_min(min_len: usize) -> Self {
        Self::String(StringRules {
            min_len: Some(min_len),
            ..StringRules::default()
        })
    }

    #[must_use]
    pub fn number() -> Self {
        Self::Number {
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub fn integer() -> Self {
        Self::Integer {
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub fn array(item: Shape) -> Self {
        Self::Array(Box::new(item))
    }

    /// Object shape from `(name, shape)` pairs.
    #[must_use]
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Shape)>,
        K: Into<String>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap this shape so the field may be absent.
    #[must_use]
    pub fn optional(self) -> Self {
        Self::Optional(Box::new(self))
    }

    /// Wrap this shape so an absent field becomes `default`.
    #[must_use]
    pub fn with_default(self, default: Value) -> Self {
        Self::Default(Box::new(self), default)
    }

    /// Convert into a shared [`SchemaRef`].
    #[must_use]
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }

    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Any => ShapeKind::Any,
            Self::Null => ShapeKind::Null,
            Self::Bool => ShapeKind::Bool,
            Self::Number { .. } => ShapeKind::Number,
            Self::Integer { .. } => ShapeKind::Integer,
            Self::String(_) => ShapeKind::String,
            Self::Email => ShapeKind::Email,
            Self::Literal(_) => ShapeKind::Literal,
            Self::Array(_) => ShapeKind::Array,
            Self::Object(_) => ShapeKind::Object,
            Self::Optional(_) | Self::Default(..) => ShapeKind::Optional,
            Self::OneOf(_) => ShapeKind::OneOf,
        }
    }

    fn accepts_absent(&self) -> bool {
        matches!(self, Self::Optional(_) | Self::Default(..) | Self::Any)
    }

    fn check(&self, value: &Value, path: &mut Vec<String>, issues: &mut Vec<Issue>) -> Option<Value> {
        match self {
            Self::Any => Some(value.clone()),
            Self::Null => expect(value.is_null(), "null", value, path, issues),
            Self::Bool => expect(value.is_boolean(), "boolean", value, path, issues),
            Self::Number { min, max } => {
                let Some(n) = value.as_f64() else {
                    return expect(false, "number", value, path, issues);
                };
                check_bounds(n, *min, *max, path, issues).then(|| value.clone())
            }
            Self::Integer { min, max } => check_integer(value, *min, *max, path, issues),
            Self::String(rules) => check_string(value, rules, path, issues),
            Self::Email => {
                let Some(s) = value.as_str() else {
                    return expect(false, "string", value, path, issues);
                };
                if email_regex().is_match(s) {
                    Some(value.clone())
                } else {
                    issues.push(Issue::new("invalid_string", path, "Invalid email"));
                    None
                }
            }
            Self::Literal(expected) => {
                if value == expected {
                    Some(value.clone())
                } else {
                    issues.push(Issue::new(
                        "invalid_literal",
                        path,
                        format!("Invalid literal value, expected {expected}"),
                    ));
                    None
                }
            }
            Self::Array(item) => {
                let Some(items) = value.as_array() else {
                    return expect(false, "array", value, path, issues);
                };
                let mut out = Vec::with_capacity(items.len());
                let before = issues.len();
                for (i, v) in items.iter().enumerate() {
                    path.push(i.to_string());
                    if let Some(v) = item.check(v, path, issues) {
                        out.push(v);
                    }
                    path.pop();
                }
                (issues.len() == before).then_some(Value::Array(out))
            }
            Self::Object(fields) => check_object(fields, value, path, issues),
            Self::Optional(inner) => {
                if value.is_null() {
                    Some(Value::Null)
                } else {
                    inner.check(value, path, issues)
                }
            }
            Self::Default(inner, default) => {
                if value.is_null() {
                    Some(default.clone())
                } else {
                    inner.check(value, path, issues)
                }
            }
            Self::OneOf(options) => {
                for option in options {
                    let mut scratch = Vec::new();
                    if let Some(v) = option.check(value, path, &mut scratch) {
                        return Some(v);
                    }
                }
                issues.push(Issue::new("invalid_union", path, "Invalid input"));
                None
            }
        }
    }

    fn mock_value(&self) -> Value {
        match self {
            Self::Any | Self::Null => Value::Null,
            Self::Bool => Value::Bool(true),
            Self::Number { min, .. } => Number::from_f64(min.unwrap_or(1.0))
                .map_or(Value::Null, Value::Number),
            Self::Integer { min, .. } => Value::from(min.unwrap_or(1)),
            Self::String(rules) => {
                let len = rules.min_len.unwrap_or(6).max(1);
                Value::String("x".repeat(len))
            }
            Self::Email => Value::String("user@example.com".to_string()),
            Self::Literal(v) | Self::Default(_, v) => v.clone(),
            Self::Array(item) => Value::Array(vec![item.mock_value()]),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, shape)| (k.clone(), shape.mock_value()))
                    .collect(),
            ),
            Self::Optional(inner) => inner.mock_value(),
            Self::OneOf(options) => options.first().map_or(Value::Null, Shape::mock_value),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect(
    ok: bool,
    expected: &str,
    value: &Value,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    if ok {
        return Some(value.clone());
    }
    let message = if value.is_null() {
        "Required".to_string()
    } else {
        format!("Expected {expected}, received {}", type_name(value))
    };
    issues.push(Issue::new("invalid_type", path, message));
    None
}

fn check_bounds(
    n: f64,
    min: Option<f64>,
    max: Option<f64>,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> bool {
    if let Some(min) = min.filter(|m| n < *m) {
        issues.push(Issue::new(
            "too_small",
            path,
            format!("Number must be greater than or equal to {min}"),
        ));
        return false;
    }
    if let Some(max) = max.filter(|m| n > *m) {
        issues.push(Issue::new(
            "too_big",
            path,
            format!("Number must be less than or equal to {max}"),
        ));
        return false;
    }
    true
}

fn check_integer(
    value: &Value,
    min: Option<i64>,
    max: Option<i64>,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    let Some(n) = parsed else {
        return expect(false, "integer", value, path, issues);
    };
    #[allow(clippy::cast_precision_loss)]
    let ok = check_bounds(
        n as f64,
        min.map(|m| m as f64),
        max.map(|m| m as f64),
        path,
        issues,
    );
    ok.then(|| Value::from(n))
}

fn check_string(
    value: &Value,
    rules: &StringRules,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    let Some(s) = value.as_str() else {
        return expect(false, "string", value, path, issues);
    };
    let len = s.chars().count();
    let before = issues.len();
    if let Some(min) = rules.min_len.filter(|m| len < *m) {
        issues.push(Issue::new(
            "too_small",
            path,
            format!("String must contain at least {min} character(s)"),
        ));
    }
    if let Some(max) = rules.max_len.filter(|m| len > *m) {
        issues.push(Issue::new(
            "too_big",
            path,
            format!("String must contain at most {max} character(s)"),
        ));
    }
    if let Some(pattern) = rules.pattern.as_ref().filter(|p| !p.is_match(s)) {
        issues.push(Issue::new(
            "invalid_string",
            path,
            format!("String must match pattern {}", pattern.as_str()),
        ));
    }
    (issues.len() == before).then(|| value.clone())
}

fn check_object(
    fields: &BTreeMap<String, Shape>,
    value: &Value,
    path: &mut Vec<String>,
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    let Some(obj) = value.as_object() else {
        return expect(false, "object", value, path, issues);
    };
    let mut out = Map::new();
    let before = issues.len();
    for (name, shape) in fields {
        path.push(name.clone());
        match obj.get(name) {
            None if shape.accepts_absent() => {
                if let Shape::Default(_, default) = shape {
                    out.insert(name.clone(), default.clone());
                }
            }
            None => {
                issues.push(Issue::new("invalid_type", path, "Required"));
            }
            Some(v) => {
                if let Some(v) = shape.check(v, path, issues) {
                    out.insert(name.clone(), v);
                }
            }
        }
        path.pop();
    }
    (issues.len() == before).then_some(Value::Object(out))
}

impl Schema for Shape {
    fn validate(&self, value: &Value) -> Validated {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        match self.check(value, &mut path, &mut issues) {
            Some(v) if issues.is_empty() => Ok(v),
            _ => Err(issues),
        }
    }

    fn mock(&self) -> Value {
        self.mock_value()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user_shape() -> Shape {
        Shape::object([
            ("name", Shape::string_min(1)),
            ("email", Shape::Email),
            ("age", Shape::integer().optional()),
            ("role", Shape::string().with_default(json!("member"))),
        ])
    }

    #[test]
    fn valid_object_strips_unknown_keys_and_applies_defaults() {
        let out = user_shape()
            .validate(&json!({"name": "T", "email": "t@example.com", "extra": 1}))
            .unwrap();
        assert_eq!(
            out,
            json!({"name": "T", "email": "t@example.com", "role": "member"})
        );
    }

    #[test]
    fn collects_every_issue_with_paths() {
        let issues = user_shape()
            .validate(&json!({"name": "", "email": "nope", "age": "old"}))
            .unwrap_err();
        let paths: Vec<_> = issues.iter().map(|i| i.path.join(".")).collect();
        assert_eq!(paths, vec!["age", "email", "name"]);
        assert_eq!(issues[0].code, "invalid_type");
        assert_eq!(issues[1].message, "Invalid email");
        assert_eq!(issues[2].code, "too_small");
    }

    #[test]
    fn missing_required_field_reports_required() {
        let issues = user_shape().validate(&json!({"name": "T"})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, vec!["email".to_string()]);
        assert_eq!(issues[0].message, "Required");
    }

    #[test]
    fn non_object_body_is_rejected() {
        let issues = user_shape().validate(&Value::Null).unwrap_err();
        assert_eq!(issues[0].message, "Required");
        let issues = user_shape().validate(&json!([1])).unwrap_err();
        assert_eq!(issues[0].message, "Expected object, received array");
    }

    #[test]
    fn integer_coerces_numeric_strings() {
        let shape = Shape::object([("id", Shape::integer())]);
        assert_eq!(shape.validate(&json!({"id": "42"})).unwrap(), json!({"id": 42}));
        assert!(shape.validate(&json!({"id": "4x"})).is_err());
    }

    #[test]
    fn bounds_are_enforced() {
        let shape = Shape::Integer {
            min: Some(1),
            max: Some(10),
        };
        assert!(shape.validate(&json!(0)).is_err());
        assert!(shape.validate(&json!(11)).is_err());
        assert_eq!(shape.validate(&json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn array_items_are_validated_with_index_paths() {
        let shape = Shape::array(Shape::string());
        let issues = shape.validate(&json!(["a", 2, "c"])).unwrap_err();
        assert_eq!(issues[0].path, vec!["1".to_string()]);
    }

    #[test]
    fn one_of_takes_first_match() {
        let shape = Shape::OneOf(vec![Shape::Literal(json!("a")), Shape::integer()]);
        assert_eq!(shape.validate(&json!("a")).unwrap(), json!("a"));
        assert_eq!(shape.validate(&json!(3)).unwrap(), json!(3));
        let issues = shape.validate(&json!(true)).unwrap_err();
        assert_eq!(issues[0].code, "invalid_union");
    }

    #[test]
    fn string_pattern_rule() {
        let shape = Shape::String(StringRules {
            pattern: Some(Regex::new("^[a-z]+$").unwrap()),
            ..StringRules::default()
        });
        assert!(shape.validate(&json!("abc")).is_ok());
        assert!(shape.validate(&json!("ABC")).is_err());
    }

    #[test]
    fn mock_values_pass_their_own_validation() {
        let shapes = [
            user_shape(),
            Shape::array(Shape::Email),
            Shape::Integer {
                min: Some(5),
                max: None,
            },
            Shape::string_min(12),
            Shape::OneOf(vec![Shape::Bool, Shape::Null]),
        ];
        for shape in shapes {
            let mock = shape.mock();
            assert!(shape.validate(&mock).is_ok(), "{:?} mock {mock}", shape.kind());
        }
    }

    #[test]
    fn kind_reflects_declaration() {
        assert_eq!(Shape::Email.kind(), ShapeKind::Email);
        assert_eq!(Shape::string().optional().kind(), ShapeKind::Optional);
        assert_eq!(user_shape().kind(), ShapeKind::Object);
    }
}
