use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// Read-only little-endian cursor over an in-memory byte slice.
///
/// Every read consumes a prefix of the remaining bytes and advances the
/// position; nothing is ever read twice except through [`ByteCursor::peek_u32`].
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(Error::TruncatedInput {
                offset: self.position,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read_exact<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Looks at the next `u32` without consuming it.
    pub fn peek_u32(&self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        Some(LittleEndian::read_u32(
            &self.bytes[self.position..self.position + 4],
        ))
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a NUL-terminated UTF-8 string and consumes the terminator.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.position;
        let rest = &self.bytes[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::TruncatedInput {
                offset: start,
                needed: rest.len() + 1,
                remaining: rest.len(),
            })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| Error::InvalidString { offset: start })?
            .to_string();
        self.position += len + 1;
        Ok(text)
    }

    /// Reads an `i32` length field, rejecting negative values.
    pub fn read_len(&mut self) -> Result<usize> {
        let offset = self.position;
        let count = self.read_i32()?;
        if count < 0 {
            return Err(Error::InvalidCount { offset, count });
        }
        Ok(count as usize)
    }

    /// Fails unless `count` records of `record_size` bytes fit in the
    /// remaining input.
    pub fn require(&self, count: usize, record_size: usize) -> Result<()> {
        self.ensure(count.saturating_mul(record_size))
    }

    /// Reads an `i32` element count and checks that `count` records of
    /// `record_size` bytes fit in the remaining input.
    pub fn read_count(&mut self, record_size: usize) -> Result<usize> {
        let count = self.read_len()?;
        self.require(count, record_size)?;
        Ok(count)
    }

    pub fn read_array<T>(
        &mut self,
        count: usize,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }
}

/// Little-endian writer used for the binary glTF container.
pub struct BinaryWriter<W: Write> {
    inner: W,
    written: usize,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: writer,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.inner.write_u32::<LittleEndian>(value)?;
        self.written += 4;
        Ok(())
    }

    pub fn write_vec(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)?;
        self.written += data.len();
        Ok(())
    }

    pub fn write_padding(&mut self, count: usize, byte: u8) -> io::Result<()> {
        for _ in 0..count {
            self.inner.write_u8(byte)?;
        }
        self.written += count;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Rounds `offset` up to the next multiple of four.
pub fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_the_cursor() {
        let bytes = [1u8, 0, 0, 0, 0, 0, 128, 63, b'h', b'i', 0, 7];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.read_u32().unwrap(), 1);
        assert_eq!(cursor.read_f32().unwrap(), 1.0);
        assert_eq!(cursor.read_cstring().unwrap(), "hi");
        assert_eq!(cursor.position(), 11);
        assert_eq!(cursor.read_u8().unwrap(), 7);
        assert!(cursor.is_empty());
    }

    #[test]
    fn reading_past_the_end_fails() {
        let mut cursor = ByteCursor::new(&[1, 2, 3]);
        match cursor.read_u32() {
            Err(Error::TruncatedInput {
                offset,
                needed,
                remaining,
            }) => {
                assert_eq!((offset, needed, remaining), (0, 4, 3));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn count_larger_than_input_is_truncation() {
        let mut bytes = 5i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut cursor = ByteCursor::new(&bytes);
        assert!(matches!(
            cursor.read_count(4),
            Err(Error::TruncatedInput { needed: 20, .. })
        ));
    }

    #[test]
    fn negative_count_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        let mut cursor = ByteCursor::new(&bytes);
        assert!(matches!(
            cursor.read_count(4),
            Err(Error::InvalidCount { count: -1, .. })
        ));
    }

    #[test]
    fn unterminated_string_is_truncation() {
        let mut cursor = ByteCursor::new(b"abc");
        assert!(matches!(
            cursor.read_cstring(),
            Err(Error::TruncatedInput { .. })
        ));
    }

    #[test]
    fn writer_tracks_length() {
        let mut writer = BinaryWriter::new(Vec::new());
        writer.write_u32(0x46546C67).unwrap();
        writer.write_vec(b"abc").unwrap();
        writer.write_padding(1, 0x20).unwrap();
        assert_eq!(writer.written(), 8);
        assert_eq!(writer.into_inner(), b"glTFabc ".to_vec());
    }

    #[test]
    fn align4_rounds_up() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(13), 16);
    }
}
