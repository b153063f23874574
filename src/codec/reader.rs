//! Forward-only cursor over a decoded payload.

use super::LittleEndian;

/// Reads little-endian fields from a payload in order.
///
/// Every read returns `None` once the payload is exhausted and leaves the
/// cursor where it was, so a consumer can stop at the first missing field.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, index: 0 }
    }

    /// Bytes not read yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.index
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let v = LittleEndian::read_u8(self.bytes, self.index)?;
        self.index += 1;
        Some(v)
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        let v = LittleEndian::read_u16(self.bytes, self.index)?;
        self.index += 2;
        Some(v)
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        let v = LittleEndian::read_i16(self.bytes, self.index)?;
        self.index += 2;
        Some(v)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        let v = LittleEndian::read_u32(self.bytes, self.index)?;
        self.index += 4;
        Some(v)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        let v = LittleEndian::read_i32(self.bytes, self.index)?;
        self.index += 4;
        Some(v)
    }

    /// Take `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.index.checked_add(len)?;
        let slice = self.bytes.get(self.index..end)?;
        self.index = end;
        Some(slice)
    }

    /// Take everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.index..];
        self.index = self.bytes.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads() {
        let payload = [0x00, 0x01, 0x10, 0xE8, 0x03, 0x18, 0xFC, 0xFF, 0xFF];
        let mut reader = PayloadReader::new(&payload);

        assert_eq!(reader.read_u8(), Some(0));
        assert_eq!(reader.read_u8(), Some(1));
        assert_eq!(reader.read_u8(), Some(16));
        assert_eq!(reader.read_u16(), Some(1000));
        assert_eq!(reader.read_i32(), Some(-1000));
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.read_u8(), None);
    }

    #[test]
    fn test_failed_read_does_not_advance() {
        let payload = [0x01, 0x02, 0x03];
        let mut reader = PayloadReader::new(&payload);

        assert_eq!(reader.read_u32(), None);
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_u16(), Some(0x0201));
        assert_eq!(reader.read_bytes(2), None);
        assert_eq!(reader.rest(), &[0x03]);
    }
}
