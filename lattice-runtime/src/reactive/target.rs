//! Tracked Targets
//!
//! A `Reactive` is an observable object or array. All access goes through
//! accessor methods (`get`, `set`, `has`, `own_keys`, ...) that report reads to
//! the dependency registry and writes to their subscribers. There is no way to
//! reach the raw storage without going through the wrapper, which is what
//! makes every property access observable.
//!
//! # Identity
//!
//! The raw storage lives inside exactly one wrapper. Cloning a `Reactive`
//! clones the handle, not the data, so all clones share one `TargetId` and one
//! set of dependency buckets. When the last handle is dropped the target's
//! buckets are dropped with it.
//!
//! # Trigger Rules
//!
//! | write                         | keys triggered              |
//! |-------------------------------|-----------------------------|
//! | change existing object field  | the field                   |
//! | add/delete object field       | the field + `Iterate`       |
//! | change existing array slot    | the slot                    |
//! | push / extend / pop / truncate| affected slots + `Length`   |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::{PropKey, Value};

enum TargetData {
    Object(IndexMap<Rc<str>, Value>),
    Array(Vec<Value>),
}

struct TargetInner {
    id: TargetId,
    data: RefCell<TargetData>,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// An observable object or array.
#[derive(Clone)]
pub struct Reactive {
    inner: Rc<TargetInner>,
}

impl Reactive {
    fn with_data(data: TargetData) -> Self {
        Self {
            inner: Rc::new(TargetInner {
                id: TargetId::new(),
                data: RefCell::new(data),
            }),
        }
    }

    /// Create an empty tracked object.
    pub fn object() -> Self {
        Self::with_data(TargetData::Object(IndexMap::new()))
    }

    /// Create an empty tracked array.
    pub fn array() -> Self {
        Self::with_data(TargetData::Array(Vec::new()))
    }

    /// Create a tracked object from key/value pairs. Values are stored as
    /// given (nested targets keep their own identity).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Rc<str>>,
        V: Into<Value>,
    {
        let map = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::with_data(TargetData::Object(map))
    }

    /// Create a tracked array from values.
    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::with_data(TargetData::Array(values.into_iter().map(Into::into).collect()))
    }

    /// Build a target from JSON. Every nested object or array becomes its own
    /// target. Scalars are wrapped in a single-field object under `value`.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Self::with_data(TargetData::Object(
                map.into_iter()
                    .map(|(key, value)| (Rc::from(key), Value::from_json(value)))
                    .collect(),
            )),
            serde_json::Value::Array(items) => Self::with_data(TargetData::Array(
                items.into_iter().map(Value::from_json).collect(),
            )),
            scalar => Self::from_pairs([("value", Value::from_json(scalar))]),
        }
    }

    /// The identity of this target.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Whether two handles refer to the same target.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_array(&self) -> bool {
        matches!(&*self.inner.data.borrow(), TargetData::Array(_))
    }

    /// Map a key onto the storage's native key space: objects use names,
    /// arrays use indices (a numeric name is an index, `"length"` is
    /// `Length`).
    fn normalize(&self, key: PropKey) -> PropKey {
        match (&*self.inner.data.borrow(), key) {
            (TargetData::Object(_), PropKey::Index(index)) => PropKey::Name(Rc::from(index.to_string())),
            (TargetData::Array(_), PropKey::Name(name)) => {
                if &*name == "length" {
                    PropKey::Length
                } else {
                    match name.parse::<usize>() {
                        Ok(index) => PropKey::Index(index),
                        Err(_) => PropKey::Name(name),
                    }
                }
            }
            (_, key) => key,
        }
    }

    fn read(&self, key: &PropKey) -> Value {
        match (&*self.inner.data.borrow(), key) {
            (TargetData::Object(map), PropKey::Name(name)) => map.get(name).cloned().unwrap_or_default(),
            (TargetData::Array(items), PropKey::Index(index)) => items.get(*index).cloned().unwrap_or_default(),
            (TargetData::Array(items), PropKey::Length) => Value::from(items.len()),
            _ => Value::Null,
        }
    }

    /// Read a property, subscribing the running effect to it.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = self.normalize(key.into());
        Runtime::track(self.id(), key.clone());
        self.read(&key)
    }

    /// Read a property without tracking.
    pub fn get_untracked(&self, key: impl Into<PropKey>) -> Value {
        let key = self.normalize(key.into());
        self.read(&key)
    }

    /// Write a property and notify subscribers if anything changed.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) {
        let key = self.normalize(key.into());
        let value = value.into();

        let triggered: Vec<PropKey> = {
            let mut data = self.inner.data.borrow_mut();
            match (&mut *data, &key) {
                (TargetData::Object(map), PropKey::Name(name)) => match map.get_mut(name) {
                    Some(slot) if slot.same_value(&value) => Vec::new(),
                    Some(slot) => {
                        *slot = value;
                        vec![key.clone()]
                    }
                    None => {
                        map.insert(name.clone(), value);
                        vec![key.clone(), PropKey::Iterate]
                    }
                },
                (TargetData::Array(items), PropKey::Index(index)) => {
                    let index = *index;
                    if index < items.len() {
                        if items[index].same_value(&value) {
                            Vec::new()
                        } else {
                            items[index] = value;
                            vec![key.clone()]
                        }
                    } else {
                        let old_len = items.len();
                        items.resize(index, Value::Null);
                        items.push(value);
                        (old_len..=index).map(PropKey::Index).chain([PropKey::Length]).collect()
                    }
                }
                (TargetData::Array(items), PropKey::Length) => {
                    let new_len = value.as_int().and_then(|n| usize::try_from(n).ok());
                    match new_len {
                        Some(new_len) => resize_array(items, new_len),
                        None => {
                            tracing::warn!(target = self.id().raw(), "ignored non-numeric length write");
                            Vec::new()
                        }
                    }
                }
                _ => {
                    tracing::warn!(target = self.id().raw(), %key, "ignored write to unsupported key");
                    Vec::new()
                }
            }
        };

        if !triggered.is_empty() {
            Runtime::trigger_keys(self.id(), &triggered);
        }
    }

    /// Check for a property, subscribing to it.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = self.normalize(key.into());
        Runtime::track(self.id(), key.clone());
        match (&*self.inner.data.borrow(), &key) {
            (TargetData::Object(map), PropKey::Name(name)) => map.contains_key(name),
            (TargetData::Array(items), PropKey::Index(index)) => *index < items.len(),
            (TargetData::Array(_), PropKey::Length) => true,
            _ => false,
        }
    }

    /// Remove a property. On arrays the slot is reset to `Null`.
    pub fn delete(&self, key: impl Into<PropKey>) -> bool {
        let key = self.normalize(key.into());
        let triggered: Vec<PropKey> = {
            let mut data = self.inner.data.borrow_mut();
            match (&mut *data, &key) {
                (TargetData::Object(map), PropKey::Name(name)) => {
                    if map.shift_remove(name).is_some() {
                        vec![key.clone(), PropKey::Iterate]
                    } else {
                        Vec::new()
                    }
                }
                (TargetData::Array(items), PropKey::Index(index)) => match items.get_mut(*index) {
                    Some(slot) if !slot.is_null() => {
                        *slot = Value::Null;
                        vec![key.clone()]
                    }
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            }
        };

        let removed = !triggered.is_empty();
        if removed {
            Runtime::trigger_keys(self.id(), &triggered);
        }
        removed
    }

    /// Enumerate keys, subscribing to structural changes.
    pub fn own_keys(&self) -> Vec<PropKey> {
        let iterate_key = if self.is_array() { PropKey::Length } else { PropKey::Iterate };
        Runtime::track(self.id(), iterate_key);
        match &*self.inner.data.borrow() {
            TargetData::Object(map) => map.keys().cloned().map(PropKey::Name).collect(),
            TargetData::Array(items) => (0..items.len()).map(PropKey::Index).collect(),
        }
    }

    /// Number of fields or elements, subscribing to structural changes.
    pub fn len(&self) -> usize {
        let iterate_key = if self.is_array() { PropKey::Length } else { PropKey::Iterate };
        Runtime::track(self.id(), iterate_key);
        match &*self.inner.data.borrow() {
            TargetData::Object(map) => map.len(),
            TargetData::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All values in order, subscribing to each of them.
    pub fn values(&self) -> Vec<Value> {
        self.own_keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Append to an array.
    pub fn push(&self, value: impl Into<Value>) {
        let index = {
            let mut data = self.inner.data.borrow_mut();
            match &mut *data {
                TargetData::Array(items) => {
                    items.push(value.into());
                    items.len() - 1
                }
                TargetData::Object(_) => {
                    tracing::warn!(target = self.id().raw(), "push on an object target ignored");
                    return;
                }
            }
        };
        Runtime::trigger_keys(self.id(), &[PropKey::Index(index), PropKey::Length]);
    }

    /// Remove and return the last element of an array.
    pub fn pop(&self) -> Option<Value> {
        let (index, value) = {
            let mut data = self.inner.data.borrow_mut();
            match &mut *data {
                TargetData::Array(items) => {
                    let value = items.pop()?;
                    (items.len(), value)
                }
                TargetData::Object(_) => return None,
            }
        };
        Runtime::trigger_keys(self.id(), &[PropKey::Index(index), PropKey::Length]);
        Some(value)
    }

    /// Untracked JSON snapshot of the whole subtree. Cycles are cut with
    /// `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = Vec::new();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut Vec<TargetId>) -> serde_json::Value {
        if path.contains(&self.id()) {
            return serde_json::Value::Null;
        }
        path.push(self.id());

        let convert = |value: &Value, path: &mut Vec<TargetId>| match value {
            Value::Target(target) => target.to_json_inner(path),
            other => other.to_json(),
        };

        let json = match &*self.inner.data.borrow() {
            TargetData::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.to_string(), convert(value, path)))
                    .collect(),
            ),
            TargetData::Array(items) => {
                serde_json::Value::Array(items.iter().map(|value| convert(value, path)).collect())
            }
        };

        path.pop();
        json
    }

    /// A view that only exposes read accessors.
    pub fn readonly(&self) -> ReadonlyReactive {
        ReadonlyReactive(self.clone())
    }
}

fn resize_array(items: &mut Vec<Value>, new_len: usize) -> Vec<PropKey> {
    let old_len = items.len();
    if new_len == old_len {
        return Vec::new();
    }
    items.resize(new_len, Value::Null);
    let (lo, hi) = if new_len < old_len { (new_len, old_len) } else { (old_len, new_len) };
    (lo..hi).map(PropKey::Index).chain([PropKey::Length]).collect()
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_array() { "array" } else { "object" };
        f.debug_struct("Reactive")
            .field("id", &self.id().raw())
            .field("kind", &kind)
            .finish()
    }
}

/// Read-only view of a tracked target. Reads are tracked exactly like the
/// underlying target; there are no write accessors.
#[derive(Clone, PartialEq)]
pub struct ReadonlyReactive(Reactive);

impl ReadonlyReactive {
    pub fn id(&self) -> TargetId {
        self.0.id()
    }

    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        self.0.get(key)
    }

    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        self.0.has(key)
    }

    pub fn own_keys(&self) -> Vec<PropKey> {
        self.0.own_keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.values()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.0.to_json()
    }
}

impl fmt::Debug for ReadonlyReactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadonlyReactive").field(&self.0).finish()
    }
}
