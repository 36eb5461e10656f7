//! Field-level encoding shared by every `*.bin` table.
//!
//! Integers are fixed-width little-endian. Strings are UTF-8 prefixed with
//! their byte length as a 7-bit variable-length integer (low groups first,
//! high bit set on every byte but the last). Booleans are one byte.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, StoreError};

/// Longest accepted string field; a corrupt length prefix should fail fast
/// rather than attempt a huge allocation.
const MAX_STRING_BYTES: usize = 64 * 1024 * 1024;

pub struct TableWriter<W: Write> {
    inner: W,
}

impl<W: Write> TableWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| StoreError::format(format!("count {count} exceeds i32")))?;
        self.write_i32(count)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        Ok(self.inner.write_i32::<LittleEndian>(value)?)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        Ok(self.inner.write_i64::<LittleEndian>(value)?)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        Ok(self.inner.write_u8(value as u8)?)
    }

    pub fn write_str(&mut self, value: &str) -> Result<()> {
        let mut len = value.len();
        while len >= 0x80 {
            self.inner.write_u8((len as u8 & 0x7f) | 0x80)?;
            len >>= 7;
        }
        self.inner.write_u8(len as u8)?;
        Ok(self.inner.write_all(value.as_bytes())?)
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct TableReader<R: Read> {
    inner: R,
}

impl<R: Read> TableReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| StoreError::format(format!("negative count {count}")))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.inner.read_i32::<LittleEndian>().map_err(truncated)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.inner.read_i64::<LittleEndian>().map_err(truncated)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.inner.read_u8().map_err(truncated)? != 0)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            if shift > 28 {
                return Err(StoreError::format("string length prefix too long"));
            }
            let byte = self.inner.read_u8().map_err(truncated)?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        if len > MAX_STRING_BYTES {
            return Err(StoreError::format(format!("string of {len} bytes")));
        }
        let mut bytes = vec![0u8; len];
        self.inner.read_exact(&mut bytes).map_err(truncated)?;
        String::from_utf8(bytes).map_err(|e| StoreError::format(e.to_string()))
    }

    /// Fail unless the stream is fully consumed.
    pub fn expect_end(mut self) -> Result<()> {
        let mut probe = [0u8; 1];
        match self.inner.read(&mut probe)? {
            0 => Ok(()),
            _ => Err(StoreError::format("trailing bytes after table")),
        }
    }
}

fn truncated(e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::format("table truncated")
    } else {
        StoreError::Io(e)
    }
}
