//! # Pickle deserialization
//!
//! Pickles are not a declarative format, but a program for a stack-based
//! VM.  Each opcode pushes a value on the stack or pops items off and
//! builds new data from them; a memo table keeps values addressable so the
//! stream can re-push them later.  `Unpickler` interprets that program and
//! returns whatever is left on the stack when the STOP opcode is reached,
//! bottom first.
//!
//! Foreign types are never resolved from the stream alone: the GLOBAL
//! family of opcodes only materializes types the host has registered
//! through [`Unpickler::register_proxy`].  The REDUCE, PERSID and
//! extension-registry opcodes are recognized but rejected.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::mem;
use std::path::Path;
use std::rc::Rc;
use std::result::Result as StdResult;
use std::str;
use std::vec;

use tracing::{debug, trace};

use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};
use crate::read::FrameReader;
use crate::registry::{ProxyClass, ProxyObject, ProxyRegistry};
use crate::value::{HashableValue, Value};

/// How the legacy string opcodes (STRING, BINSTRING, SHORT_BINSTRING)
/// decode their payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringEncoding {
    /// Each byte maps to the code point of the same value.
    Latin1,
    /// Strict UTF-8.
    Utf8,
}

/// Options for deserializing.
#[derive(Clone, Debug)]
pub struct DeOptions {
    encoding: Option<StringEncoding>,
    buffers: Vec<Vec<u8>>,
}

impl DeOptions {
    /// Default options: legacy strings decode as Latin-1, no out-of-band
    /// buffers.
    pub fn new() -> DeOptions {
        DeOptions { encoding: Some(StringEncoding::Latin1), buffers: Vec::new() }
    }

    /// Selects the legacy string encoding.
    pub fn string_encoding(mut self, encoding: StringEncoding) -> DeOptions {
        self.encoding = Some(encoding);
        self
    }

    /// Leaves legacy strings undecoded; they are pushed as bytes.
    pub fn raw_strings(mut self) -> DeOptions {
        self.encoding = None;
        self
    }

    /// Supplies out-of-band buffers for the protocol 5 NEXT_BUFFER
    /// opcode, consumed in order.
    pub fn out_of_band<I>(mut self, buffers: I) -> DeOptions
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.buffers = buffers.into_iter().collect();
        self
    }
}

impl Default for DeOptions {
    fn default() -> DeOptions {
        DeOptions::new()
    }
}

/// Decodes pickle streams into stacks of [`Value`]s.
pub struct Unpickler<R: Read + Seek> {
    rdr: FrameReader<R>,
    stack: Vec<Value>,
    memo: HashMap<u32, Value>,
    registry: ProxyRegistry,
    encoding: Option<StringEncoding>,
    buffers: vec::IntoIter<Vec<u8>>,
    proto: u8,
}

impl<R: Read + Seek> Unpickler<R> {
    /// Creates an unpickler over a seekable byte source.
    pub fn new(rdr: R, options: DeOptions) -> Result<Unpickler<R>> {
        Ok(Unpickler {
            rdr: FrameReader::new(rdr)?,
            stack: Vec::with_capacity(128),
            memo: HashMap::new(),
            registry: ProxyRegistry::new(),
            encoding: options.encoding,
            buffers: options.buffers.into_iter(),
            proto: 0,
        })
    }

    /// Registers a factory for the type `(module, name)`.  Only
    /// registered types can be materialized by GLOBAL and its relatives.
    pub fn register_proxy<F>(&mut self, module: &str, name: &str, factory: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> StdResult<Box<dyn ProxyObject>, String> + 'static,
    {
        self.registry.register(module, name, factory)
    }

    /// Protocol version recorded from the PROTO opcode; 0 until one is
    /// seen.
    pub fn protocol(&self) -> u8 {
        self.proto
    }

    /// Consumes the unpickler, returning the byte source.
    pub fn into_inner(self) -> R {
        self.rdr.into_inner()
    }

    /// Runs the VM until STOP and returns the stack contents, bottom
    /// first.  Can be called again to read a further pickle from the same
    /// stream.
    ///
    /// On error the stack, memo and frame state are unspecified and the
    /// unpickler should be discarded.
    pub fn deserialize(&mut self) -> Result<Vec<Value>> {
        self.stack.clear();
        self.memo.clear();
        self.proto = 0;
        self.run()
    }

    fn run(&mut self) -> Result<Vec<Value>> {
        let mut first = true;
        loop {
            match self.rdr.read_byte()? {
                // Specials
                STOP => {
                    let stack = mem::take(&mut self.stack);
                    if stack.iter().any(|value| matches!(value, Value::Mark)) {
                        return self.error(ErrorCode::InvalidStackTop("value", "mark"));
                    }
                    debug!(values = stack.len(), "stop");
                    return Ok(stack);
                }
                POP => {
                    self.pop_any()?;
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }
                MARK => self.stack.push(Value::Mark),
                PROTO => {
                    if !first {
                        return self.error(ErrorCode::StrayProto);
                    }
                    let version = self.rdr.read_u8()?;
                    if version > HIGHEST_PROTOCOL {
                        return self.error(ErrorCode::ProtocolUnsupported(version));
                    }
                    debug!(version, "pickle protocol");
                    self.proto = version;
                }
                FRAME => {
                    let len = self.rdr.read_i64_le()?;
                    if len < 0 {
                        return self.error(ErrorCode::NegativeLength);
                    }
                    self.rdr.enter_frame(len as u64)?;
                }

                // Memo ops
                GET => {
                    let line = self.rdr.read_line()?;
                    let index = self.parse_memo_index(line)?;
                    self.push_memo(index)?;
                }
                BINGET => {
                    let index = u32::from(self.rdr.read_u8()?);
                    self.push_memo(index)?;
                }
                LONG_BINGET => {
                    let index = self.rdr.read_u32_le()?;
                    if index > i32::MAX as u32 {
                        return self.error(ErrorCode::InvalidMemoIndex(i64::from(index)));
                    }
                    self.push_memo(index)?;
                }
                PUT => {
                    let line = self.rdr.read_line()?;
                    let index = self.parse_memo_index(line)?;
                    self.memo_put(index)?;
                }
                BINPUT => {
                    let index = u32::from(self.rdr.read_u8()?);
                    self.memo_put(index)?;
                }
                LONG_BINPUT => {
                    let index = self.rdr.read_u32_le()?;
                    if index > i32::MAX as u32 {
                        return self.error(ErrorCode::InvalidMemoIndex(i64::from(index)));
                    }
                    self.memo_put(index)?;
                }
                MEMOIZE => {
                    let index = self.memo.len() as u32;
                    self.memo_put(index)?;
                }

                // Singletons
                NONE => self.stack.push(Value::None),
                NEWFALSE => self.stack.push(Value::Bool(false)),
                NEWTRUE => self.stack.push(Value::Bool(true)),

                // ASCII-formatted numbers
                INT => {
                    let line = self.rdr.read_line()?;
                    // Protocol 1 way of spelling true/false
                    if line == b"00" {
                        self.stack.push(Value::Bool(false))
                    } else if line == b"01" {
                        self.stack.push(Value::Bool(true))
                    } else {
                        match str::from_utf8(&line).unwrap_or("").parse::<i32>() {
                            Ok(i) => self.stack.push(Value::I32(i)),
                            Err(_) => return self.error(ErrorCode::InvalidLiteral(line)),
                        }
                    }
                }
                LONG => {
                    let mut line = self.rdr.read_line()?;
                    // Remove the "L" suffix.
                    if matches!(line.last(), Some(&b'L') | Some(&b'l')) {
                        line.pop();
                    }
                    match str::from_utf8(&line).unwrap_or("").parse::<i64>() {
                        Ok(i) => self.stack.push(Value::I64(i)),
                        Err(_) => return self.error(ErrorCode::InvalidLiteral(line)),
                    }
                }
                FLOAT => {
                    let line = self.rdr.read_line()?;
                    match str::from_utf8(&line).unwrap_or("").parse::<f64>() {
                        Ok(f) => self.stack.push(Value::F64(f)),
                        Err(_) => return self.error(ErrorCode::InvalidLiteral(line)),
                    }
                }

                // Binary-coded numbers
                BINFLOAT => {
                    let f = self.rdr.read_f64_be()?;
                    self.stack.push(Value::F64(f));
                }
                BININT => {
                    let i = self.rdr.read_i32_le()?;
                    self.stack.push(Value::I32(i));
                }
                BININT1 => {
                    let i = self.rdr.read_u8()?;
                    self.stack.push(Value::I32(i32::from(i)));
                }
                BININT2 => {
                    let i = self.rdr.read_u16_le()?;
                    self.stack.push(Value::I32(i32::from(i)));
                }

                // Length-prefixed longs
                LONG1 => {
                    let n = usize::from(self.rdr.read_u8()?);
                    if n > 8 {
                        return self.error(ErrorCode::LengthOverflow(n as u64));
                    }
                    let bytes = self.rdr.read_exact(n)?;
                    self.stack.push(Value::I64(decode_long_le(&bytes)));
                }
                LONG4 => {
                    let n = self.read_len_i32()?;
                    let digits = self.rdr.read_exact(n)?;
                    match str::from_utf8(&digits).unwrap_or("").parse::<i64>() {
                        Ok(i) => self.stack.push(Value::I64(i)),
                        Err(_) => return self.error(ErrorCode::InvalidLiteral(digits)),
                    }
                }

                // Strings of all flavors
                STRING => {
                    let line = self.rdr.read_line()?;
                    // Only the quotes are stripped; escape sequences in the
                    // body pass through undecoded.
                    if line.len() < 2 || line[0] != b'\'' || line[line.len() - 1] != b'\'' {
                        return self.error(ErrorCode::InvalidLiteral(line));
                    }
                    let body = line[1..line.len() - 1].to_vec();
                    let value = self.decode_text(body)?;
                    self.stack.push(value);
                }
                UNICODE => {
                    let line = self.rdr.read_line()?;
                    let mut text = String::with_capacity(line.len());
                    for &byte in &line {
                        if byte < 0x80 {
                            text.push(byte as char);
                        } else {
                            text.push_str(&format!("\\u{:04x}", byte));
                        }
                    }
                    self.stack.push(Value::String(text.into()));
                }
                BINSTRING => {
                    let n = self.read_len_i32()?;
                    let bytes = self.rdr.read_exact(n)?;
                    let value = self.decode_text(bytes)?;
                    self.stack.push(value);
                }
                SHORT_BINSTRING => {
                    let n = usize::from(self.rdr.read_u8()?);
                    let bytes = self.rdr.read_exact(n)?;
                    let value = self.decode_text(bytes)?;
                    self.stack.push(value);
                }
                BINUNICODE => {
                    let n = self.read_len_i32()?;
                    let bytes = self.rdr.read_exact(n)?;
                    let value = self.decode_utf8(bytes)?;
                    self.stack.push(value);
                }
                SHORT_BINUNICODE => {
                    let n = usize::from(self.rdr.read_u8()?);
                    let bytes = self.rdr.read_exact(n)?;
                    let value = self.decode_utf8(bytes)?;
                    self.stack.push(value);
                }
                BINUNICODE8 => {
                    let n = self.read_len_i64()?;
                    let bytes = self.rdr.read_exact(n)?;
                    let value = self.decode_utf8(bytes)?;
                    self.stack.push(value);
                }
                BINBYTES => {
                    let n = self.read_len_u32()?;
                    let bytes = self.rdr.read_exact(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }
                SHORT_BINBYTES => {
                    let n = usize::from(self.rdr.read_u8()?);
                    let bytes = self.rdr.read_exact(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }
                BINBYTES8 => {
                    let n = self.read_len_i64()?;
                    let bytes = self.rdr.read_exact(n)?;
                    self.stack.push(Value::Bytes(bytes.into()));
                }
                BYTEARRAY8 => {
                    let n = self.read_len_i64()?;
                    let bytes = self.rdr.read_exact(n)?;
                    self.stack.push(Value::ByteArray(Rc::new(RefCell::new(bytes))));
                }

                // Containers
                EMPTY_TUPLE => self.stack.push(Value::Tuple(Vec::new().into())),
                TUPLE1 => {
                    let item = self.pop()?;
                    self.stack.push(Value::Tuple(vec![item].into()));
                }
                TUPLE2 => {
                    let item2 = self.pop()?;
                    let item1 = self.pop()?;
                    self.stack.push(Value::Tuple(vec![item1, item2].into()));
                }
                TUPLE3 => {
                    let item3 = self.pop()?;
                    let item2 = self.pop()?;
                    let item1 = self.pop()?;
                    self.stack.push(Value::Tuple(vec![item1, item2, item3].into()));
                }
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items.into()));
                }
                EMPTY_LIST => self.stack.push(Value::List(Rc::new(RefCell::new(vec![])))),
                LIST => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(Rc::new(RefCell::new(items))));
                }
                APPEND => {
                    let value = self.pop()?;
                    let list = self.top_as_list()?;
                    list.borrow_mut().push(value);
                }
                APPENDS => {
                    let items = self.pop_mark()?;
                    let list = self.top_as_list()?;
                    list.borrow_mut().extend(items);
                }
                EMPTY_DICT => self.stack.push(Value::Dict(Rc::new(RefCell::new(BTreeMap::new())))),
                DICT => {
                    let items = self.pop_mark()?;
                    let mut dict = BTreeMap::new();
                    let mut iter = items.into_iter();
                    while let Some(key) = iter.next() {
                        match iter.next() {
                            Some(value) => {
                                let key = self.make_hashable(key)?;
                                dict.insert(key, value);
                            }
                            // A dangling key without a value is dropped.
                            None => break,
                        }
                    }
                    self.stack.push(Value::Dict(Rc::new(RefCell::new(dict))));
                }
                SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let dict = self.top_as_dict()?;
                    let key = self.make_hashable(key)?;
                    dict.borrow_mut().insert(key, value);
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let dict = self.top_as_dict()?;
                    let mut dict = dict.borrow_mut();
                    let mut iter = items.into_iter();
                    while let Some(key) = iter.next() {
                        match iter.next() {
                            Some(value) => {
                                let key = self.make_hashable(key)?;
                                dict.insert(key, value);
                            }
                            None => break,
                        }
                    }
                }
                EMPTY_SET => self.stack.push(Value::Set(Rc::new(RefCell::new(BTreeSet::new())))),
                ADDITEMS => {
                    let items = self.pop_mark()?;
                    let set = self.top_as_set()?;
                    let mut set = set.borrow_mut();
                    for item in items {
                        let item = self.make_hashable(item)?;
                        set.insert(item);
                    }
                }
                FROZENSET => {
                    let items = self.pop_mark()?;
                    let mut set = BTreeSet::new();
                    for item in items {
                        set.insert(self.make_hashable(item)?);
                    }
                    self.stack.push(Value::FrozenSet(Rc::new(set)));
                }

                // Registered types and their instances
                GLOBAL => {
                    let module = self.read_line_string()?;
                    let name = self.read_line_string()?;
                    let class = self.find_class(&module, &name)?;
                    self.stack.push(Value::Class(class));
                }
                STACK_GLOBAL => {
                    let name = self.pop_text()?;
                    let module = self.pop_text()?;
                    let class = self.find_class(&module, &name)?;
                    self.stack.push(Value::Class(class));
                }
                INST => {
                    let module = self.read_line_string()?;
                    let name = self.read_line_string()?;
                    let args = self.pop_mark()?;
                    let class = self.find_class(&module, &name)?;
                    let obj = self.construct(&class, args)?;
                    self.stack.push(obj);
                }
                OBJ => {
                    let mut items = self.pop_mark()?;
                    if items.is_empty() {
                        return self.error(ErrorCode::StackUnderflow);
                    }
                    let args = items.split_off(1);
                    let class = match items.remove(0) {
                        Value::Class(class) => class,
                        other => {
                            let found = other.type_name();
                            return self.error(ErrorCode::InvalidStackTop("class", found));
                        }
                    };
                    let obj = self.construct(&class, args)?;
                    self.stack.push(obj);
                }
                NEWOBJ => {
                    let args = self.pop_newobj_args()?;
                    let class = self.pop_class()?;
                    let obj = self.construct(&class, args)?;
                    self.stack.push(obj);
                }
                NEWOBJ_EX => {
                    // Keyword arguments cannot be mapped onto positional
                    // factories; the dict is discarded.
                    let kwargs = self.pop()?;
                    if !matches!(kwargs, Value::Dict(_)) {
                        let found = kwargs.type_name();
                        return self.error(ErrorCode::InvalidStackTop("dict", found));
                    }
                    let args = self.pop_newobj_args()?;
                    let class = self.pop_class()?;
                    let obj = self.construct(&class, args)?;
                    self.stack.push(obj);
                }
                BUILD => {
                    let state = self.pop()?;
                    let obj = self.top_as_object()?;
                    let result = obj.borrow_mut().set_state(state);
                    if let Err(msg) = result {
                        return self.error(ErrorCode::Proxy(msg));
                    }
                }

                // Out-of-band buffers
                NEXT_BUFFER => match self.buffers.next() {
                    Some(buf) => self.stack.push(Value::ByteArray(Rc::new(RefCell::new(buf)))),
                    None => return self.error(ErrorCode::BufferExhausted),
                },
                READONLY_BUFFER => {
                    let pos = self.rdr.position();
                    match self.pop()? {
                        frozen @ Value::Bytes(_) => self.stack.push(frozen),
                        Value::ByteArray(buf) => {
                            let bytes: Vec<u8> = buf.borrow().clone();
                            self.stack.push(Value::Bytes(bytes.into()));
                        }
                        other => {
                            let code = ErrorCode::InvalidStackTop("buffer", other.type_name());
                            return Err(Error::Eval(code, pos));
                        }
                    }
                }

                // Recognized but not implemented
                REDUCE => return self.error(ErrorCode::Unsupported("REDUCE")),
                PERSID => return self.error(ErrorCode::Unsupported("PERSID")),
                BINPERSID => return self.error(ErrorCode::Unsupported("BINPERSID")),
                EXT1 => return self.error(ErrorCode::Unsupported("EXT1")),
                EXT2 => return self.error(ErrorCode::Unsupported("EXT2")),
                EXT4 => return self.error(ErrorCode::Unsupported("EXT4")),

                code => return self.error(ErrorCode::UnknownOpcode(code)),
            }
            first = false;
        }
    }

    fn error<T>(&self, code: ErrorCode) -> Result<T> {
        Err(Error::Eval(code, self.rdr.position()))
    }

    fn pop(&mut self) -> Result<Value> {
        let pos = self.rdr.position();
        match self.stack.pop() {
            Some(Value::Mark) => Err(Error::Eval(ErrorCode::InvalidStackTop("value", "mark"), pos)),
            Some(value) => Ok(value),
            None => Err(Error::Eval(ErrorCode::StackUnderflow, pos)),
        }
    }

    /// Like `pop`, but a mark is acceptable (only POP discards blindly).
    fn pop_any(&mut self) -> Result<Value> {
        let pos = self.rdr.position();
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(Error::Eval(ErrorCode::StackUnderflow, pos)),
        }
    }

    fn top(&mut self) -> Result<&mut Value> {
        let pos = self.rdr.position();
        match self.stack.last_mut() {
            Some(value) => Ok(value),
            None => Err(Error::Eval(ErrorCode::StackUnderflow, pos)),
        }
    }

    /// Pops everything above the topmost mark, consuming the mark, and
    /// returns the items in stream order.
    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            match self.stack.pop() {
                Some(Value::Mark) => {
                    items.reverse();
                    return Ok(items);
                }
                Some(value) => items.push(value),
                None => return self.error(ErrorCode::StackUnderflow),
            }
        }
    }

    fn top_as_list(&mut self) -> Result<Rc<RefCell<Vec<Value>>>> {
        let pos = self.rdr.position();
        match self.top()? {
            Value::List(list) => Ok(Rc::clone(list)),
            other => {
                let code = ErrorCode::InvalidStackTop("list", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    fn top_as_dict(&mut self) -> Result<Rc<RefCell<BTreeMap<HashableValue, Value>>>> {
        let pos = self.rdr.position();
        match self.top()? {
            Value::Dict(dict) => Ok(Rc::clone(dict)),
            other => {
                let code = ErrorCode::InvalidStackTop("dict", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    fn top_as_set(&mut self) -> Result<Rc<RefCell<BTreeSet<HashableValue>>>> {
        let pos = self.rdr.position();
        match self.top()? {
            Value::Set(set) => Ok(Rc::clone(set)),
            other => {
                let code = ErrorCode::InvalidStackTop("set", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    fn top_as_object(&mut self) -> Result<Rc<RefCell<Box<dyn ProxyObject>>>> {
        let pos = self.rdr.position();
        match self.top()? {
            Value::Object(obj) => Ok(Rc::clone(obj)),
            other => {
                let code = ErrorCode::InvalidStackTop("object", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    /// Clones the stack top for the memo; marks are not memoizable.
    fn top_value(&self) -> Result<Value> {
        let pos = self.rdr.position();
        match self.stack.last() {
            Some(Value::Mark) => Err(Error::Eval(ErrorCode::InvalidStackTop("value", "mark"), pos)),
            Some(value) => Ok(value.clone()),
            None => Err(Error::Eval(ErrorCode::StackUnderflow, pos)),
        }
    }

    fn pop_text(&mut self) -> Result<Rc<str>> {
        let pos = self.rdr.position();
        match self.pop()? {
            Value::String(text) => Ok(text),
            other => {
                let code = ErrorCode::InvalidStackTop("str", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    fn pop_class(&mut self) -> Result<Rc<ProxyClass>> {
        let pos = self.rdr.position();
        match self.pop()? {
            Value::Class(class) => Ok(class),
            other => {
                let code = ErrorCode::InvalidStackTop("class", other.type_name());
                Err(Error::Eval(code, pos))
            }
        }
    }

    /// NEWOBJ arguments: normally a tuple, but a single non-tuple value
    /// is passed through as one argument.
    fn pop_newobj_args(&mut self) -> Result<Vec<Value>> {
        match self.pop()? {
            Value::Tuple(items) => Ok(items.to_vec()),
            single => Ok(vec![single]),
        }
    }

    fn parse_memo_index(&self, line: Vec<u8>) -> Result<u32> {
        match str::from_utf8(&line).unwrap_or("").parse::<i64>() {
            Ok(i) if (0..=i64::from(i32::MAX)).contains(&i) => Ok(i as u32),
            Ok(i) => self.error(ErrorCode::InvalidMemoIndex(i)),
            Err(_) => self.error(ErrorCode::InvalidLiteral(line)),
        }
    }

    fn push_memo(&mut self, index: u32) -> Result<()> {
        match self.memo.get(&index) {
            Some(value) => {
                let value = value.clone();
                self.stack.push(value);
                Ok(())
            }
            None => self.error(ErrorCode::MissingMemo(index)),
        }
    }

    fn memo_put(&mut self, index: u32) -> Result<()> {
        let value = self.top_value()?;
        self.memo.insert(index, value);
        Ok(())
    }

    fn make_hashable(&self, value: Value) -> Result<HashableValue> {
        let pos = self.rdr.position();
        value.into_hashable().ok_or(Error::Eval(ErrorCode::ValueNotHashable, pos))
    }

    fn read_len_i32(&mut self) -> Result<usize> {
        let n = self.rdr.read_i32_le()?;
        if n < 0 {
            return self.error(ErrorCode::NegativeLength);
        }
        Ok(n as usize)
    }

    fn read_len_u32(&mut self) -> Result<usize> {
        let n = self.rdr.read_u32_le()?;
        if n > i32::MAX as u32 {
            return self.error(ErrorCode::LengthOverflow(u64::from(n)));
        }
        Ok(n as usize)
    }

    fn read_len_i64(&mut self) -> Result<usize> {
        let n = self.rdr.read_i64_le()?;
        if n < 0 {
            return self.error(ErrorCode::NegativeLength);
        }
        if n > i64::from(i32::MAX) {
            return self.error(ErrorCode::LengthOverflow(n as u64));
        }
        Ok(n as usize)
    }

    fn read_line_string(&mut self) -> Result<String> {
        let line = self.rdr.read_line()?;
        match String::from_utf8(line) {
            Ok(text) => Ok(text),
            Err(_) => self.error(ErrorCode::StringNotUtf8),
        }
    }

    fn decode_text(&self, bytes: Vec<u8>) -> Result<Value> {
        match self.encoding {
            Some(StringEncoding::Latin1) => {
                let text: String = bytes.into_iter().map(char::from).collect();
                Ok(Value::String(text.into()))
            }
            Some(StringEncoding::Utf8) => self.decode_utf8(bytes),
            None => Ok(Value::Bytes(bytes.into())),
        }
    }

    fn decode_utf8(&self, bytes: Vec<u8>) -> Result<Value> {
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Value::String(text.into())),
            Err(_) => self.error(ErrorCode::StringNotUtf8),
        }
    }

    fn find_class(&self, module: &str, name: &str) -> Result<Rc<ProxyClass>> {
        trace!(module, name, "resolving type");
        match self.registry.lookup(module, name) {
            Some(class) => Ok(class),
            None => {
                self.error(ErrorCode::UnregisteredProxy(module.to_owned(), name.to_owned()))
            }
        }
    }

    fn construct(&self, class: &ProxyClass, args: Vec<Value>) -> Result<Value> {
        trace!(module = class.module(), name = class.name(), args = args.len(), "constructing");
        match class.construct(args) {
            Ok(obj) => Ok(Value::Object(Rc::new(RefCell::new(obj)))),
            Err(msg) => self.error(ErrorCode::Proxy(msg)),
        }
    }
}

/// Interprets up to eight bytes as a signed little-endian integer of that
/// width, sign extended into 64 bits.
fn decode_long_le(bytes: &[u8]) -> i64 {
    let mut val = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        val |= u64::from(byte) << (8 * i);
    }
    let width = bytes.len() * 8;
    if width == 0 {
        0
    } else if width == 64 {
        val as i64
    } else {
        let shift = 64 - width;
        ((val << shift) as i64) >> shift
    }
}

/// Decodes a pickle from a byte slice.
pub fn values_from_slice(data: &[u8], options: DeOptions) -> Result<Vec<Value>> {
    Unpickler::new(Cursor::new(data), options)?.deserialize()
}

/// Decodes a pickle from a seekable `std::io::Read`.
pub fn values_from_reader<R: Read + Seek>(rdr: R, options: DeOptions) -> Result<Vec<Value>> {
    Unpickler::new(rdr, options)?.deserialize()
}

/// Decodes a pickle from a file.
pub fn values_from_file<P: AsRef<Path>>(path: P, options: DeOptions) -> Result<Vec<Value>> {
    let file = File::open(path)?;
    Unpickler::new(BufReader::new(file), options)?.deserialize()
}
