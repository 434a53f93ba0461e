//! Big-endian primitive encoding shared by all stream formats.
//!
//! ## Compact longs
//!
//! Identifiers are dominated by small numbers, so 64-bit values are written
//! as a header nibble holding the count of significant bytes followed by
//! those bytes, big-endian:
//!
//! ```text
//! | header (1) | significant bytes (0..=8) |
//! ```
//!
//! A single value uses the high nibble. A pair shares one header byte, the
//! first value in the high nibble and the second in the low nibble.

use crate::error::{CodecError, CodecResult};
use std::io::{Read, Write};

/// Reads in slices of at most this many bytes when a length prefix cannot be
/// trusted, so a corrupt length fails on EOF instead of on allocation.
const UNTRUSTED_READ_STEP: u64 = 64 * 1024;

/// Big-endian writes over any [`Write`].
pub trait DataOutput: Write {
    /// Writes one byte.
    fn write_u8(&mut self, value: u8) -> CodecResult<()> {
        self.write_all(&[value])?;
        Ok(())
    }

    /// Writes a boolean as one byte.
    fn write_bool(&mut self, value: bool) -> CodecResult<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes a big-endian u16.
    fn write_u16(&mut self, value: u16) -> CodecResult<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Writes a big-endian i32.
    fn write_i32(&mut self, value: i32) -> CodecResult<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Writes a big-endian i64.
    fn write_i64(&mut self, value: i64) -> CodecResult<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Writes a big-endian u64.
    fn write_u64(&mut self, value: u64) -> CodecResult<()> {
        self.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    /// Writes a length as a non-negative i32.
    ///
    /// # Panics
    ///
    /// Panics if `len` does not fit an i32; in-memory values this large
    /// cannot be represented in the format.
    fn write_len(&mut self, len: usize) -> CodecResult<()> {
        let len = i32::try_from(len).expect("length exceeds format limit");
        self.write_i32(len)
    }

    /// Writes length-prefixed bytes.
    fn write_byte_array(&mut self, bytes: &[u8]) -> CodecResult<()> {
        self.write_len(bytes.len())?;
        self.write_all(bytes)?;
        Ok(())
    }

    /// Writes a length-prefixed UTF-8 string.
    fn write_str(&mut self, value: &str) -> CodecResult<()> {
        self.write_byte_array(value.as_bytes())
    }

    /// Writes a compact u64.
    fn write_long(&mut self, value: u64) -> CodecResult<()> {
        let n = significant_bytes(value);
        self.write_u8(n << 4)?;
        write_long_body(self, n, value)
    }

    /// Writes two compact u64 values sharing one header byte.
    fn write_longs(&mut self, first: u64, second: u64) -> CodecResult<()> {
        let n0 = significant_bytes(first);
        let n1 = significant_bytes(second);
        self.write_u8((n0 << 4) | n1)?;
        write_long_body(self, n0, first)?;
        write_long_body(self, n1, second)
    }
}

impl<W: Write + ?Sized> DataOutput for W {}

/// Big-endian reads over any [`Read`].
pub trait DataInput: Read {
    /// Reads one byte.
    fn read_u8(&mut self) -> CodecResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a boolean; any value other than 0 or 1 is corrupt.
    fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::corrupt_stream(format!(
                "invalid boolean byte {other}"
            ))),
        }
    }

    /// Reads a big-endian u16.
    fn read_u16(&mut self) -> CodecResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a big-endian i32.
    fn read_i32(&mut self) -> CodecResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    /// Reads a big-endian i64.
    fn read_i64(&mut self) -> CodecResult<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads a big-endian u64.
    fn read_u64(&mut self) -> CodecResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads an i32 length; negative values are corrupt.
    fn read_len(&mut self) -> CodecResult<usize> {
        let len = self.read_i32()?;
        usize::try_from(len)
            .map_err(|_| CodecError::corrupt_stream(format!("negative length {len}")))
    }

    /// Reads length-prefixed bytes.
    fn read_byte_array(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_len()?;
        read_untrusted(self, len)
    }

    /// Reads a length-prefixed UTF-8 string.
    fn read_str(&mut self) -> CodecResult<String> {
        let bytes = self.read_byte_array()?;
        String::from_utf8(bytes).map_err(|_| CodecError::corrupt_stream("invalid UTF-8 string"))
    }

    /// Reads a compact u64.
    fn read_long(&mut self) -> CodecResult<u64> {
        let header = self.read_u8()?;
        if header & 0x0F != 0 {
            return Err(CodecError::corrupt_stream(format!(
                "invalid long header {header:#04x}"
            )));
        }
        read_long_body(self, header >> 4)
    }

    /// Reads two compact u64 values sharing one header byte.
    fn read_longs(&mut self) -> CodecResult<(u64, u64)> {
        let header = self.read_u8()?;
        let first = read_long_body(self, header >> 4)?;
        let second = read_long_body(self, header & 0x0F)?;
        Ok((first, second))
    }
}

impl<R: Read + ?Sized> DataInput for R {}

/// Reads exactly `len` bytes without trusting `len` for preallocation.
pub fn read_untrusted<R: Read + ?Sized>(input: &mut R, len: usize) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut left = len as u64;
    while left > 0 {
        let step = left.min(UNTRUSTED_READ_STEP);
        let read = Read::take(&mut *input, step).read_to_end(&mut out)?;
        if read as u64 != step {
            return Err(CodecError::UnexpectedEof);
        }
        left -= step;
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn significant_bytes(value: u64) -> u8 {
    (8 - value.leading_zeros() / 8) as u8
}

#[allow(clippy::cast_possible_truncation)]
fn write_long_body<W: Write + ?Sized>(out: &mut W, n: u8, value: u64) -> CodecResult<()> {
    let bytes = value.to_be_bytes();
    out.write_all(&bytes[8 - n as usize..])?;
    Ok(())
}

fn read_long_body<R: Read + ?Sized>(input: &mut R, n: u8) -> CodecResult<u64> {
    if n > 8 {
        return Err(CodecError::corrupt_stream(format!(
            "invalid long width {n}"
        )));
    }
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes[8 - n as usize..])?;
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_long_widths() {
        let mut buf = Vec::new();
        buf.write_long(0).unwrap();
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        buf.write_long(0x1234).unwrap();
        assert_eq!(buf, vec![0x20, 0x12, 0x34]);

        buf.clear();
        buf.write_long(u64::MAX).unwrap();
        assert_eq!(buf.len(), 9);
        assert_eq!(buf[0], 0x80);
    }

    #[test]
    fn compact_long_pair_shares_header() {
        let mut buf = Vec::new();
        buf.write_longs(1, 0x0102).unwrap();
        assert_eq!(buf, vec![0x12, 0x01, 0x01, 0x02]);

        let (a, b) = buf.as_slice().read_longs().unwrap();
        assert_eq!((a, b), (1, 0x0102));
    }

    #[test]
    fn compact_long_roundtrip() {
        for value in [0, 1, 255, 256, u64::from(u32::MAX), u64::MAX - 1] {
            let mut buf = Vec::new();
            buf.write_long(value).unwrap();
            assert_eq!(buf.as_slice().read_long().unwrap(), value);
        }
    }

    #[test]
    fn invalid_long_width_is_corrupt() {
        let result = [0x90u8].as_slice().read_long();
        assert!(matches!(result, Err(CodecError::CorruptStream { .. })));
    }

    #[test]
    fn negative_length_is_corrupt() {
        let bytes = (-1i32).to_be_bytes();
        let result = bytes.as_slice().read_byte_array();
        assert!(matches!(result, Err(CodecError::CorruptStream { .. })));
    }

    #[test]
    fn oversized_length_is_eof_not_allocation() {
        let mut buf = Vec::new();
        buf.write_i32(i32::MAX).unwrap();
        buf.extend_from_slice(b"abc");
        let result = buf.as_slice().read_byte_array();
        assert!(matches!(result, Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn strings_roundtrip() {
        let mut buf = Vec::new();
        buf.write_str("héllo").unwrap();
        assert_eq!(buf.as_slice().read_str().unwrap(), "héllo");
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut buf = Vec::new();
        buf.write_byte_array(&[0xff, 0xfe]).unwrap();
        assert!(matches!(
            buf.as_slice().read_str(),
            Err(CodecError::CorruptStream { .. })
        ));
    }

    #[test]
    fn invalid_bool_rejected() {
        assert!([2u8].as_slice().read_bool().is_err());
        assert!([1u8].as_slice().read_bool().unwrap());
    }
}
