//! Python-shaped values reconstructed by the virtual machine.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::registry::{ProxyClass, ProxyObject};

/// A value read from a pickle stream.
///
/// Aggregates and byte buffers are reference counted: cloning a `Value`
/// clones the handle, not the contents.  The memo table holds such clones,
/// so an opcode that mutates a list or dict already stored in the memo is
/// visible through every alias of it.
#[derive(Clone, Debug)]
pub enum Value {
    /// None
    None,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Float
    F64(f64),
    /// Unicode string
    String(Rc<str>),
    /// Immutable bytestring
    Bytes(Rc<[u8]>),
    /// Mutable byte buffer (bytearray, or an out-of-band buffer)
    ByteArray(Rc<RefCell<Vec<u8>>>),
    /// Tuple
    Tuple(Rc<[Value]>),
    /// List
    List(Rc<RefCell<Vec<Value>>>),
    /// Dictionary
    Dict(Rc<RefCell<BTreeMap<HashableValue, Value>>>),
    /// Set
    Set(Rc<RefCell<BTreeSet<HashableValue>>>),
    /// Frozen (immutable) set
    FrozenSet(Rc<BTreeSet<HashableValue>>),
    /// Sentinel delimiting variable-length aggregates; never part of a
    /// finished result
    Mark,
    /// A registered type, as pushed by GLOBAL and friends
    Class(Rc<ProxyClass>),
    /// An instance produced by a registered factory
    Object(Rc<RefCell<Box<dyn ProxyObject>>>),
}

/// The subset of values usable as dict keys and set items.
///
/// There is no `None` variant: keys are required to be non-null.
#[derive(Clone, Debug)]
pub enum HashableValue {
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Float
    F64(f64),
    /// Bytestring
    Bytes(Rc<[u8]>),
    /// Unicode string
    String(Rc<str>),
    /// Tuple
    Tuple(Rc<[HashableValue]>),
    /// Frozen (immutable) set
    FrozenSet(Rc<BTreeSet<HashableValue>>),
}

impl Value {
    /// Converts into a key/item value, if the variant allows it.
    pub fn into_hashable(self) -> Option<HashableValue> {
        match self {
            Value::Bool(b)      => Some(HashableValue::Bool(b)),
            Value::I32(i)       => Some(HashableValue::I32(i)),
            Value::I64(i)       => Some(HashableValue::I64(i)),
            Value::F64(f)       => Some(HashableValue::F64(f)),
            Value::Bytes(b)     => Some(HashableValue::Bytes(b)),
            Value::String(s)    => Some(HashableValue::String(s)),
            Value::FrozenSet(v) => Some(HashableValue::FrozenSet(v)),
            Value::Tuple(v)     => values_to_hashable(&v).map(HashableValue::Tuple),
            _                   => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None         => "None",
            Value::Bool(_)      => "bool",
            Value::I32(_)       => "int",
            Value::I64(_)       => "long",
            Value::F64(_)       => "float",
            Value::String(_)    => "str",
            Value::Bytes(_)     => "bytes",
            Value::ByteArray(_) => "bytearray",
            Value::Tuple(_)     => "tuple",
            Value::List(_)      => "list",
            Value::Dict(_)      => "dict",
            Value::Set(_)       => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Mark         => "mark",
            Value::Class(_)     => "class",
            Value::Object(_)    => "object",
        }
    }
}

impl HashableValue {
    /// Converts back into a plain `Value`.
    pub fn into_value(self) -> Value {
        match self {
            HashableValue::Bool(b)      => Value::Bool(b),
            HashableValue::I32(i)       => Value::I32(i),
            HashableValue::I64(i)       => Value::I64(i),
            HashableValue::F64(f)       => Value::F64(f),
            HashableValue::Bytes(b)     => Value::Bytes(b),
            HashableValue::String(s)    => Value::String(s),
            HashableValue::FrozenSet(v) => Value::FrozenSet(v),
            HashableValue::Tuple(v)     => Value::Tuple(hashable_to_values(&v)),
        }
    }
}

fn values_to_hashable(values: &[Value]) -> Option<Rc<[HashableValue]>> {
    values.iter()
          .cloned()
          .map(Value::into_hashable)
          .collect::<Option<Vec<_>>>()
          .map(Rc::from)
}

fn hashable_to_values(values: &[HashableValue]) -> Rc<[Value]> {
    values.iter()
          .cloned()
          .map(HashableValue::into_value)
          .collect::<Vec<_>>()
          .into()
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use self::Value::*;
        match (self, other) {
            (None, None)                   => true,
            (Bool(a), Bool(b))             => a == b,
            (I32(a), I32(b))               => a == b,
            (I64(a), I64(b))               => a == b,
            (F64(a), F64(b))               => a == b,
            (String(a), String(b))         => a == b,
            (Bytes(a), Bytes(b))           => a == b,
            (ByteArray(a), ByteArray(b))   => a == b,
            (Tuple(a), Tuple(b))           => a == b,
            (List(a), List(b))             => a == b,
            (Dict(a), Dict(b))             => a == b,
            (Set(a), Set(b))               => a == b,
            (FrozenSet(a), FrozenSet(b))   => a == b,
            (Mark, Mark)                   => true,
            // Classes and objects compare by identity.
            (Class(a), Class(b))           => Rc::ptr_eq(a, b),
            (Object(a), Object(b))         => Rc::ptr_eq(a, b),
            _                              => false,
        }
    }
}

impl PartialEq for HashableValue {
    fn eq(&self, other: &HashableValue) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HashableValue {}

impl PartialOrd for HashableValue {
    fn partial_cmp(&self, other: &HashableValue) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Implement a (more or less) consistent ordering for HashableValues
/// so that they can be added to dictionaries and sets.
///
/// The numeric variants (bool included) form one band and compare by
/// numeric value, like Python; the remaining variants are ordered by kind.
impl Ord for HashableValue {
    fn cmp(&self, other: &HashableValue) -> Ordering {
        use self::HashableValue::*;
        match (self, other) {
            (Bytes(a), Bytes(b))         => a.cmp(b),
            (String(a), String(b))       => a.cmp(b),
            (FrozenSet(a), FrozenSet(b)) => a.cmp(b),
            (Tuple(a), Tuple(b))         => a.cmp(b),
            _ => match (numeric(self), numeric(other)) {
                (Some(a), Some(b)) => num_cmp(a, b),
                _ => kind_rank(self).cmp(&kind_rank(other)),
            },
        }
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn numeric(value: &HashableValue) -> Option<Num> {
    match *value {
        HashableValue::Bool(b) => Some(Num::Int(b as i64)),
        HashableValue::I32(i)  => Some(Num::Int(i64::from(i))),
        HashableValue::I64(i)  => Some(Num::Int(i)),
        HashableValue::F64(f)  => Some(Num::Float(f)),
        _                      => None,
    }
}

fn num_cmp(a: Num, b: Num) -> Ordering {
    match (a, b) {
        (Num::Int(a), Num::Int(b))     => a.cmp(&b),
        (Num::Int(a), Num::Float(b))   => float_ord(a as f64, b),
        (Num::Float(a), Num::Int(b))   => float_ord(a, b as f64),
        (Num::Float(a), Num::Float(b)) => float_ord(a, b),
    }
}

fn kind_rank(value: &HashableValue) -> u8 {
    match *value {
        HashableValue::Bool(_)
        | HashableValue::I32(_)
        | HashableValue::I64(_)
        | HashableValue::F64(_)     => 0,
        HashableValue::Bytes(_)     => 1,
        HashableValue::String(_)    => 2,
        HashableValue::FrozenSet(_) => 3,
        HashableValue::Tuple(_)     => 4,
    }
}

/// A reasonable total ordering for floats.
fn float_ord(f: f64, g: f64) -> Ordering {
    match f.partial_cmp(&g) {
        Some(o) => o,
        None    => Ordering::Less,
    }
}
