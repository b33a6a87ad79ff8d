//! Dynamic values stored in tracked targets and passed as props.

use std::fmt;
use std::rc::Rc;

use super::target::Reactive;

/// Property key of a tracked target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// A named field of an object.
    Name(Rc<str>),
    /// A slot of an array.
    Index(usize),
    /// Array length.
    Length,
    /// Key enumeration (`own_keys`) of an object.
    Iterate,
    /// The single value held by a ref-like cell or computed.
    Value,
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl From<Rc<str>> for PropKey {
    fn from(name: Rc<str>) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Length => f.write_str("length"),
            Self::Iterate => f.write_str("<iterate>"),
            Self::Value => f.write_str("value"),
        }
    }
}

/// A callable value, typically an event handler passed as a prop.
///
/// Callbacks compare by identity.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&Value)>);

impl Callback {
    pub fn new(f: impl Fn(&Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, arg: &Value) {
        (self.0)(arg)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0))
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A nested tracked object or array.
    Target(Reactive),
    Callback(Callback),
}

impl Value {
    /// Same-value comparison used for change detection: `NaN` equals `NaN`,
    /// targets and callbacks compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Target(a), Value::Target(b)) => a.ptr_eq(b),
            (Value::Callback(a), Value::Callback(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&Reactive> {
        match self {
            Value::Target(target) => Some(target),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Value::Callback(callback) => Some(callback),
            _ => None,
        }
    }

    /// Convert from JSON. Objects and arrays become new tracked targets.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Rc::from(s)),
            json @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Target(Reactive::from_json(json))
            }
        }
    }

    /// Untracked JSON snapshot. Callbacks become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Callback(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Target(target) => target.to_json(),
        }
    }

    /// Text used when a value is rendered as content.
    pub fn display_text(&self) -> String {
        match self {
            Value::Null | Value::Callback(_) => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Target(target) => target.to_json().to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Reactive> for Value {
    fn from(target: Reactive) -> Self {
        Value::Target(target)
    }
}

impl From<Callback> for Value {
    fn from(callback: Callback) -> Self {
        Value::Callback(callback)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_same_value() {
        assert!(Value::Float(f64::NAN).same_value(&Value::Float(f64::NAN)));
        assert!(!Value::Int(1).same_value(&Value::Float(1.0)));
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let a = Callback::new(|_| {});
        let b = Callback::new(|_| {});
        assert_eq!(Value::from(a.clone()), Value::from(a));
        assert_ne!(Value::from(b.clone()), Value::from(Callback::new(|_| {})));
    }

    #[test]
    fn json_scalars_round_trip() {
        let value = Value::from_json(serde_json::json!(3));
        assert_eq!(value, Value::Int(3));
        assert_eq!(value.to_json(), serde_json::json!(3));
        assert_eq!(Value::from_json(serde_json::json!("hi")).display_text(), "hi");
    }
}
