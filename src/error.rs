// Copyright (c) 2024-2026 the unpickle developers.  Licensed under the
// Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Error objects and codes

use std::fmt;
use std::io;
use std::result;

use thiserror::Error;

/// Specific reason a pickle stream could not be interpreted.
#[derive(Clone, PartialEq, Debug, Error)]
pub enum ErrorCode {
    /// Opcode byte is not part of the pickle instruction set
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    /// Opcode is recognized but deliberately not implemented
    #[error("unsupported opcode {0}")]
    Unsupported(&'static str),
    /// EOF before STOP, or while reading an opcode argument
    #[error("EOF while parsing")]
    Eof,
    /// Stack popped while empty, or no mark below the popped items
    #[error("pickle stack underflow")]
    StackUnderflow,
    /// Length prefix found negative
    #[error("negative length prefix")]
    NegativeLength,
    /// Length prefix beyond what this reader will allocate
    #[error("length {0} exceeds the supported maximum")]
    LengthOverflow(u64),
    /// String decoding as UTF-8 failed
    #[error("string is not UTF-8 encoded")]
    StringNotUtf8,
    /// Wrong stack top type for opcode
    #[error("invalid stack top, expected {0}, got {1}")]
    InvalidStackTop(&'static str, &'static str),
    /// Value not hashable, but used as dict key or set item
    #[error("dict key or set item not hashable")]
    ValueNotHashable,
    /// Invalid literal found
    #[error("literal is invalid: {}", String::from_utf8_lossy(.0))]
    InvalidLiteral(Vec<u8>),
    /// A value was missing from the memo
    #[error("missing memo entry {0}")]
    MissingMemo(u32),
    /// Memo index negative or beyond the signed 32-bit range
    #[error("invalid memo index {0}")]
    InvalidMemoIndex(i64),
    /// FRAME issued while a frame is already active
    #[error("frame opened inside an active frame")]
    NestedFrame,
    /// Frame length beyond what this reader will buffer
    #[error("frame length {0} exceeds the supported maximum")]
    FrameTooLarge(u64),
    /// Read would cross the end of the active frame
    #[error("read past the end of the active frame")]
    ReadBeyondFrame,
    /// Seek target outside the active frame
    #[error("seek outside the active frame")]
    SeekOutsideFrame,
    /// A type was referenced that no factory was registered for
    #[error("no proxy registered for {0}.{1}")]
    UnregisteredProxy(String, String),
    /// The same (module, name) pair was registered twice
    #[error("proxy {0}.{1} registered twice")]
    DuplicateProxy(String, String),
    /// Protocol version byte exceeds the maximum
    #[error("unsupported pickle protocol {0}")]
    ProtocolUnsupported(u8),
    /// PROTO opcode seen after the start of the stream
    #[error("PROTO opcode not at the start of the stream")]
    StrayProto,
    /// NEXT_BUFFER with no out-of-band buffers configured or left
    #[error("out-of-band buffers missing or exhausted")]
    BufferExhausted,
    /// A registered factory or set_state call reported a failure
    #[error("proxy error: {0}")]
    Proxy(String),
    /// Structure conversion error (e.g., unknown variant)
    #[error("{0}")]
    Structure(String),
}

/// This type represents all possible errors that can occur when reading a
/// pickle stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Some IO error occurred while reading from the byte source.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The pickle had some error while interpreting.  Carries the stream
    /// offset the failing opcode was evaluated at.
    #[error("eval error at offset {1}: {0}")]
    Eval(ErrorCode, u64),
    /// Error outside of stream evaluation, e.g. in value conversion.
    #[error("decoding error: {0}")]
    Syntax(ErrorCode),
}

pub type Result<T> = result::Result<T, Error>;

impl serde::de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}
