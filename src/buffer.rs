//! Append-only growable byte buffer with typed little-endian push and
//! random-access overwrite, used by the assembler for both the program
//! stream and the static-data segment.

/// A growable byte sink. Mirrors the teacher's free-function byte writers
/// (`write_u8`/`write_u16`/... in the old `exewriter.rs`) but as methods on
/// an owned buffer, since the assembler needs the same operations on two
/// independent buffers (program bytes and static data).
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn push_u8(&mut self, value: u8) -> usize {
        let index = self.data.len();
        self.data.push(value);
        index
    }

    pub fn push_u16(&mut self, value: u16) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(&value.to_le_bytes());
        index
    }

    pub fn push_u32(&mut self, value: u32) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(&value.to_le_bytes());
        index
    }

    pub fn push_u64(&mut self, value: u64) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(&value.to_le_bytes());
        index
    }

    pub fn push_i64(&mut self, value: i64) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(&value.to_le_bytes());
        index
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(bytes);
        index
    }

    /// Pushes a single byte, then the string's bytes, then a null terminator.
    pub fn push_null_terminated_string(&mut self, value: &str) -> usize {
        let index = self.data.len();
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        index
    }

    /// Overwrites 8 bytes at `offset` with a little-endian signed 64-bit
    /// displacement. Used by the assembler's label fix-up pass.
    pub fn write_i64_at(&mut self, offset: usize, value: i64) {
        let bytes = value.to_le_bytes();
        self.data[offset..offset + 8].copy_from_slice(&bytes);
    }

    pub fn write_u64_at(&mut self, offset: usize, value: u64) {
        let bytes = value.to_le_bytes();
        self.data[offset..offset + 8].copy_from_slice(&bytes);
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_read_back_little_endian() {
        let mut buf = ByteBuffer::new();
        buf.push_u16(0x1234);
        buf.push_u64(0xdeadbeef);
        let bytes = buf.build();
        assert_eq!(&bytes[0..2], &[0x34, 0x12]);
        assert_eq!(
            &bytes[2..10],
            &0xdeadbeefu64.to_le_bytes()[..]
        );
    }

    #[test]
    fn write_at_overwrites_placeholder() {
        let mut buf = ByteBuffer::new();
        let at = buf.push_i64(0);
        buf.push_u8(0xff);
        buf.write_i64_at(at, -42);
        let bytes = buf.build();
        assert_eq!(i64::from_le_bytes(bytes[0..8].try_into().unwrap()), -42);
        assert_eq!(bytes[8], 0xff);
    }

    #[test]
    fn null_terminated_string_round_trip() {
        let mut buf = ByteBuffer::new();
        buf.push_null_terminated_string("hi");
        let bytes = buf.build();
        assert_eq!(bytes, vec![b'h', b'i', 0]);
    }
}
