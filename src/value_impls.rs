// Copyright (c) 2024-2026 the unpickle developers.  Licensed under the
// Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Serde bridge for `value::Value`.
//!
//! Decoded values can be serialized into any serde format, and
//! [`from_value`] maps a decoded value onto a host type.  `Mark`, classes
//! and proxy objects have no counterpart in the serde data model and are
//! rejected.

use std::collections::btree_map;
use std::result::Result as StdResult;
use std::vec;

use serde::de::{self, IntoDeserializer};
use serde::ser::{self, SerializeMap, SerializeSeq};

use crate::error::{Error, ErrorCode, Result};
use crate::value::{HashableValue, Value};

impl ser::Serialize for Value {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::I32(i) => serializer.serialize_i32(*i),
            Value::I64(i) => serializer.serialize_i64(*i),
            Value::F64(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::ByteArray(b) => serializer.serialize_bytes(&b.borrow()),
            Value::Tuple(items) => serialize_seq(serializer, items.iter()),
            Value::List(items) => serialize_seq(serializer, items.borrow().iter()),
            Value::Set(items) => serialize_seq(serializer, items.borrow().iter()),
            Value::FrozenSet(items) => serialize_seq(serializer, items.iter()),
            Value::Dict(entries) => {
                let entries = entries.borrow();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Mark | Value::Class(_) | Value::Object(_) => Err(ser::Error::custom(
                format!("{} values cannot be serialized", self.type_name()),
            )),
        }
    }
}

fn serialize_seq<'a, S, I, T>(serializer: S, items: I) -> StdResult<S::Ok, S::Error>
where
    S: ser::Serializer,
    I: ExactSizeIterator<Item = &'a T>,
    T: ser::Serialize + 'a,
{
    let mut seq = serializer.serialize_seq(Some(items.len()))?;
    for item in items {
        seq.serialize_element(item)?;
    }
    seq.end()
}

impl ser::Serialize for HashableValue {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        match self {
            HashableValue::Bool(b) => serializer.serialize_bool(*b),
            HashableValue::I32(i) => serializer.serialize_i32(*i),
            HashableValue::I64(i) => serializer.serialize_i64(*i),
            HashableValue::F64(f) => serializer.serialize_f64(*f),
            HashableValue::String(s) => serializer.serialize_str(s),
            HashableValue::Bytes(b) => serializer.serialize_bytes(b),
            HashableValue::Tuple(items) => serialize_seq(serializer, items.iter()),
            HashableValue::FrozenSet(items) => serialize_seq(serializer, items.iter()),
        }
    }
}

/// Maps a decoded value onto any deserializable host type.
pub fn from_value<T: de::DeserializeOwned>(value: Value) -> Result<T> {
    T::deserialize(ValueDeserializer { value })
}

struct ValueDeserializer {
    value: Value,
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::None => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::I32(i) => visitor.visit_i32(i),
            Value::I64(i) => visitor.visit_i64(i),
            Value::F64(f) => visitor.visit_f64(f),
            Value::String(s) => visitor.visit_string(s.to_string()),
            Value::Bytes(b) => visitor.visit_byte_buf(b.to_vec()),
            Value::ByteArray(b) => visitor.visit_byte_buf(b.borrow().clone()),
            Value::Tuple(items) => visit_values(items.to_vec(), visitor),
            Value::List(items) => {
                let items = items.borrow().clone();
                visit_values(items, visitor)
            }
            Value::Set(items) => {
                let items: Vec<_> =
                    items.borrow().iter().cloned().map(HashableValue::into_value).collect();
                visit_values(items, visitor)
            }
            Value::FrozenSet(items) => {
                let items: Vec<_> =
                    items.iter().cloned().map(HashableValue::into_value).collect();
                visit_values(items, visitor)
            }
            Value::Dict(entries) => {
                let entries = entries.borrow().clone();
                visitor.visit_map(MapDeserializer { iter: entries.into_iter(), value: None })
            }
            other @ (Value::Mark | Value::Class(_) | Value::Object(_)) => {
                Err(Error::Syntax(ErrorCode::Structure(format!(
                    "{} values cannot be deserialized",
                    other.type_name()
                ))))
            }
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.value {
            Value::None => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple tuple_struct
        map struct enum identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de, Error> for ValueDeserializer {
    type Deserializer = ValueDeserializer;

    fn into_deserializer(self) -> ValueDeserializer {
        self
    }
}

fn visit_values<'de, V>(items: Vec<Value>, visitor: V) -> Result<V::Value>
where
    V: de::Visitor<'de>,
{
    visitor.visit_seq(SeqDeserializer { iter: items.into_iter() })
}

struct SeqDeserializer {
    iter: vec::IntoIter<Value>,
}

impl<'de> de::SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some(value) => seed.deserialize(ValueDeserializer { value }).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: btree_map::IntoIter<HashableValue, Value>,
    value: Option<Value>,
}

impl<'de> de::MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(ValueDeserializer { value: key.into_value() }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        match self.value.take() {
            Some(value) => seed.deserialize(ValueDeserializer { value }),
            None => Err(de::Error::custom("value is missing")),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}
