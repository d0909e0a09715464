// wire.rs - Length-Prefixed Binary Codec

//! Big-endian binary layout shared by every record this crate puts on the
//! wire: certificates, credential messages, storage addresses and the person
//! roster.
//!
//! Strings are a `u16` byte length followed by UTF-8. Integers and longs are
//! big-endian `i32`/`i64`. Byte blocks are an `i32` length followed by the
//! bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PkiError, Result};

/// Accumulates a record in wire order.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            PkiError::MalformedRecord(format!("string of {} bytes exceeds u16 prefix", value.len()))
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Append an `i32` length followed by the raw bytes.
    pub fn put_block(&mut self, value: &[u8]) -> Result<()> {
        let len = i32::try_from(value.len()).map_err(|_| {
            PkiError::MalformedRecord(format!("block of {} bytes exceeds i32 prefix", value.len()))
        })?;
        self.buf.put_i32(len);
        self.buf.put_slice(value);
        Ok(())
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Reads a record back in wire order, failing with `MalformedRecord` on
/// truncation rather than panicking.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(PkiError::MalformedRecord(format!(
                "truncated {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_str(&mut self, what: &str) -> Result<String> {
        self.need(2, what)?;
        let len = self.buf.get_u16() as usize;
        self.need(len, what)?;
        let raw = &self.buf[..len];
        let value = std::str::from_utf8(raw)
            .map_err(|e| PkiError::MalformedRecord(format!("{what} is not UTF-8: {e}")))?
            .to_string();
        self.buf.advance(len);
        Ok(value)
    }

    pub fn get_i32(&mut self, what: &str) -> Result<i32> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    pub fn get_i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub fn get_block(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.get_i32(what)?;
        let len = usize::try_from(len)
            .map_err(|_| PkiError::MalformedRecord(format!("negative length for {what}")))?;
        self.need(len, what)?;
        let value = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(value)
    }

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    /// Fail if trailing bytes are left after a complete record.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(PkiError::MalformedRecord(format!(
                "{} trailing bytes after {what}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
