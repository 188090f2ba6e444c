// Copyright (c) 2024-2026 the unpickle developers.  Licensed under the
// Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Reading Python's pickle format
//!
//! # Pickle format
//!
//! Please see the [Python docs](http://docs.python.org/library/pickle) for
//! details on the Pickle format.
//!
//! This crate reads pickles written with protocols 1 through 5, including
//! protocol 4 framing and protocol 5 out-of-band buffers.  It is a reader
//! only; it does not write pickles.
//!
//! # Supported types
//!
//! Python's built-in types map onto the [`Value`] enum:
//!
//! * None
//! * Booleans
//! * Integers (`i32`/`i64`; precision beyond 64 bits is not kept)
//! * Floats (`f64`)
//! * Bytes objects and bytearrays
//! * (Unicode) strings
//! * Lists and tuples
//! * Sets and frozensets
//! * Dictionaries
//!
//! Aggregates are reference counted, so pickles that share one object in
//! several places decode to values that share it too.
//!
//! # Arbitrary objects
//!
//! The reference implementation imports and calls whatever the stream
//! names.  This crate never does: instances of foreign types are only
//! created for `(module, name)` pairs the host has registered a factory
//! for, via [`Unpickler::register_proxy`].  Streams referencing anything
//! else fail.  The `REDUCE`, `PERSID`/`BINPERSID` and `EXT1`/`EXT2`/`EXT4`
//! opcodes are recognized but rejected.
//!
//! # Exported API
//!
//! [`Unpickler`] drives the whole process; `values_from_slice`,
//! `values_from_reader` and `values_from_file` are shorthands for streams
//! that need no registrations.  Decoded [`Value`]s can be mapped onto
//! host types with [`from_value`] or serialized into any serde format.

pub use self::de::{
    values_from_file, values_from_reader, values_from_slice, DeOptions, StringEncoding, Unpickler,
};

pub use self::error::{Error, ErrorCode, Result};

pub use self::registry::{ProxyClass, ProxyObject, ProxyRegistry};

pub use self::value::{HashableValue, Value};

pub use self::value_impls::from_value;

mod consts;
pub mod de;
pub mod error;
pub mod read;
pub mod registry;
pub mod value;
mod value_impls;

#[cfg(test)]
#[path = "../test/mod.rs"]
mod test;
