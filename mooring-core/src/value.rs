//! The value model that crosses the wire.
//!
//! Two mirrored trees exist on purpose. [`Value`] is what user code and
//! invocation descriptors see: it can hold a live [`SharedObject`] instance.
//! [`WireValue`] is what the serializer sees: live objects have been replaced
//! by [`SharedRef`] entries naming a slot in one side's held-object table.
//! The endpoint translates between the two at encode/decode time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::shared::SharedObject;

/// A runtime value: arguments, return values, property and indexer payloads.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value; also the encoding of a void return.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed map with deterministic ordering.
    Map(BTreeMap<String, Value>),
    /// A live shareable instance: a local object or a proxy.
    Object(Arc<dyn SharedObject>),
}

impl Value {
    /// True if this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The integer payload, if this is an [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The float payload, if this is a [`Value::Float`].
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string payload, if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The elements, if this is a [`Value::List`].
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The live object, if this is a [`Value::Object`].
    pub fn as_object(&self) -> Option<&Arc<dyn SharedObject>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Object(obj) => write!(f, "Object({})", obj.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // Object identity, not structural equality.
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Arc<dyn SharedObject>> for Value {
    fn from(obj: Arc<dyn SharedObject>) -> Self {
        Value::Object(obj)
    }
}

/// Which end of the connection owns the referenced object.
///
/// A bare [`ObjectId`] is meaningless without this: both sides maintain a
/// held-object table and slot numbers collide freely. `Sender` references are
/// resolved into proxies by the receiver; `Receiver` references let a proxy
/// travel back to the object's owner and come out as the original instance,
/// which is what makes shared-reference round-trips identity-preserving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefOwner {
    /// The side that sent the message owns the object.
    Sender,
    /// The side receiving the message owns the object.
    Receiver,
}

/// A shared-object reference as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRef {
    /// Slot in the owner's held-object table.
    pub id: ObjectId,
    /// Declared shared-interface type, as a serializer-stable name.
    pub type_name: String,
    /// Which end of this connection is the owner.
    pub owner: RefOwner,
}

/// A [`Value`] after reference translation: pure data plus [`SharedRef`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered sequence.
    List(Vec<WireValue>),
    /// String-keyed map.
    Map(BTreeMap<String, WireValue>),
    /// Reference to a held object on one side of the connection.
    Shared(SharedRef),
}

impl Default for WireValue {
    fn default() -> Self {
        WireValue::Null
    }
}
