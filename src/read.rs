//! Byte source with primitive readers and frame bounding.
//!
//! Protocol 4 batches I/O into frames.  `FrameReader` hides that from the
//! opcode handlers: entering a frame buffers its whole body, subsequent
//! reads drain the buffer, and the frame disappears once it is exhausted.
//! Handlers call the same primitive readers whether a frame is active or
//! not.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

use crate::error::{Error, ErrorCode, Result};

/// Largest frame body this reader will buffer.
pub const MAX_FRAME_LEN: u64 = i32::MAX as u64;

/// The body of an active frame, owned in full.
struct Frame {
    start: u64,
    buf: Vec<u8>,
    cursor: usize,
}

/// A seekable byte source of known length with an optional single-level
/// bounded frame.
pub struct FrameReader<R> {
    inner: R,
    /// Total length of the underlying stream.
    len: u64,
    /// Position in the underlying stream; while a frame is active this
    /// sits at the end of the buffered frame body.
    pos: u64,
    frame: Option<Frame>,
}

impl<R: Read + Seek> FrameReader<R> {
    /// Wraps a byte source, probing its length.
    pub fn new(mut inner: R) -> io::Result<FrameReader<R>> {
        let pos = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(pos))?;
        Ok(FrameReader { inner, len, pos, frame: None })
    }

    /// Consumes the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Total length of the underlying stream.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current read position.  Within a frame this is the position the
    /// next read will appear to happen at.
    pub fn position(&self) -> u64 {
        match self.frame {
            Some(ref frame) => frame.start + frame.cursor as u64,
            None => self.pos,
        }
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    fn error<T>(&self, code: ErrorCode) -> Result<T> {
        Err(Error::Eval(code, self.position()))
    }

    /// Begins a frame of `len` bytes at the current position.  The whole
    /// frame body is read into an owned buffer up front; the frame ends
    /// by itself once the buffer is drained.
    pub fn enter_frame(&mut self, len: u64) -> Result<()> {
        if self.frame.is_some() {
            return self.error(ErrorCode::NestedFrame);
        }
        if len > MAX_FRAME_LEN {
            return self.error(ErrorCode::FrameTooLarge(len));
        }
        if len > self.remaining() {
            return self.error(ErrorCode::Eof);
        }
        trace!(len, start = self.pos, "entering frame");
        if len == 0 {
            // A zero-length frame is entered and exited on the spot.
            return Ok(());
        }
        let start = self.pos;
        let mut buf = vec![0; len as usize];
        self.inner.read_exact(&mut buf)?;
        self.pos += len;
        self.frame = Some(Frame { start, buf, cursor: 0 });
        Ok(())
    }

    /// Reads a single byte, or `None` at the end of the stream.
    pub fn try_read_byte(&mut self) -> Result<Option<u8>> {
        if let Some(frame) = self.frame.as_mut() {
            let byte = frame.buf[frame.cursor];
            frame.cursor += 1;
            if frame.cursor == frame.buf.len() {
                self.frame = None;
            }
            return Ok(Some(byte));
        }
        if self.pos >= self.len {
            return Ok(None);
        }
        let mut byte = [0];
        self.inner.read_exact(&mut byte)?;
        self.pos += 1;
        Ok(Some(byte[0]))
    }

    /// Reads a single byte, failing at the end of the stream.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.try_read_byte()? {
            Some(byte) => Ok(byte),
            None => self.error(ErrorCode::Eof),
        }
    }

    /// Reads exactly `n` bytes.  Within a frame, a read that would cross
    /// the frame end fails without consuming anything.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        if let Some(frame) = self.frame.as_mut() {
            if n > frame.buf.len() - frame.cursor {
                return self.error(ErrorCode::ReadBeyondFrame);
            }
            let bytes = frame.buf[frame.cursor..frame.cursor + n].to_vec();
            frame.cursor += n;
            if frame.cursor == frame.buf.len() {
                self.frame = None;
            }
            return Ok(bytes);
        }
        if n as u64 > self.remaining() {
            return self.error(ErrorCode::Eof);
        }
        let mut bytes = vec![0; n];
        self.inner.read_exact(&mut bytes)?;
        self.pos += n as u64;
        Ok(bytes)
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_exact(N)?;
        let mut fixed = [0; N];
        fixed.copy_from_slice(&bytes);
        Ok(fixed)
    }

    /// Reads bytes up to a LF.  The LF is consumed but not included; at
    /// the end of the stream whatever was read so far is returned.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::with_capacity(16);
        loop {
            match self.try_read_byte()? {
                Some(b'\n') | None => return Ok(line),
                Some(byte) => line.push(byte),
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.read_fixed::<2>()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(&self.read_fixed::<4>()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.read_fixed::<4>()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(&self.read_fixed::<8>()?))
    }

    pub fn read_f64_be(&mut self) -> Result<f64> {
        Ok(BigEndian::read_f64(&self.read_fixed::<8>()?))
    }

    /// Moves the read position.  While a frame is active, targets outside
    /// of it are rejected.
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        let len = self.len;
        if let Some(frame) = self.frame.as_mut() {
            let here = frame.start + frame.cursor as u64;
            let start = frame.start;
            let frame_end = start + frame.buf.len() as u64;
            let absolute = match target {
                SeekFrom::Start(n) => Some(n),
                SeekFrom::Current(d) => here.checked_add_signed(d),
                SeekFrom::End(d) => len.checked_add_signed(d),
            };
            let absolute = match absolute {
                Some(n) if n >= start && n <= frame_end => n,
                _ => return self.error(ErrorCode::SeekOutsideFrame),
            };
            frame.cursor = (absolute - start) as usize;
            if frame.cursor == frame.buf.len() {
                self.frame = None;
            }
            return Ok(absolute);
        }
        self.pos = self.inner.seek(target)?;
        Ok(self.pos)
    }
}
