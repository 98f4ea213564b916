use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Static type attached to every expression node and function signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Unknown until runtime (message fields, untyped function results).
    Any,
    /// No value (functions called only for their side effect).
    Void,
    /// `true` / `false`.
    Boolean,
    /// Signed 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    String,
    /// Ordered sequence of values.
    List,
    /// String-keyed map of values.
    Map,
}

impl ValueType {
    /// Whether a value of type `actual` may be used where `self` is expected.
    ///
    /// `Any` on either side defers the check to runtime.
    pub fn accepts(self, actual: ValueType) -> bool {
        self == ValueType::Any || actual == ValueType::Any || self == actual
    }

    /// Whether the type is known at parse time.
    pub fn is_known(self) -> bool {
        self != ValueType::Any
    }

    /// Whether the type is `Long` or `Double`.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Long | ValueType::Double)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Void => "void",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Map => "map",
        };
        f.write_str(name)
    }
}

/// Dynamically typed value flowing through rule evaluation and message fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value (missing field, void function result).
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed integer.
    Long(i64),
    /// Floating point number.
    Double(f64),
    /// Text.
    String(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Runtime type of the value; `Null` reports `Void`.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Void,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(num) => Some(*num),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(num) => Some(*num as f64),
            Value::Double(num) => Some(*num),
            _ => None,
        }
    }

    /// Render the value as rule-language literal source.
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(flag) => flag.to_string(),
            Value::Long(num) => num.to_string(),
            Value::Double(num) => format!("{:?}", num),
            Value::String(text) => quote_string(text),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::to_literal).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Map(entries) => {
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", quote_key(key), value.to_literal()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(flag) => write!(f, "{}", flag),
            Value::Long(num) => write!(f, "{}", num),
            Value::Double(num) => write!(f, "{}", num),
            Value::String(text) => f.write_str(text),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Boolean(flag)
    }
}

impl From<i64> for Value {
    fn from(num: i64) -> Self {
        Value::Long(num)
    }
}

impl From<f64> for Value {
    fn from(num: f64) -> Self {
        Value::Double(num)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Quote text as a rule-language string literal.
pub fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}

/// Render an identifier, wrapping it in backticks when it is not a plain
/// name. A backtick inside the name is doubled.
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Render a map key: bare when it is a plain name, a string literal
/// otherwise.
pub fn quote_key(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        quote_string(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_defers_type_checks() {
        assert!(ValueType::String.accepts(ValueType::Any));
        assert!(ValueType::Any.accepts(ValueType::Long));
        assert!(!ValueType::String.accepts(ValueType::Long));
    }

    #[test]
    fn literals_escape_strings() {
        let value = Value::from("say \"hi\"\n");
        assert_eq!(value.to_literal(), r#""say \"hi\"\n""#);
    }

    #[test]
    fn identifiers_with_symbols_are_backticked() {
        assert_eq!(quote_identifier("source"), "source");
        assert_eq!(quote_identifier("@timestamp"), "`@timestamp`");
        assert_eq!(quote_identifier("a`b"), "`a``b`");
        assert_eq!(quote_key("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn json_round_trip_keeps_integers_and_floats_apart() {
        let parsed: Value = serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": null}"#).unwrap();
        let Value::Map(entries) = parsed else {
            panic!("expected map");
        };
        assert_eq!(entries["a"], Value::Long(1));
        assert_eq!(entries["b"], Value::Double(1.5));
        assert_eq!(entries["c"], Value::Null);
    }
}
