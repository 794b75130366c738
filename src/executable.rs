//! Reads and writes the compiled executable image: two little-endian
//! `u64` headers (`static_data_size`, `program_size`) followed by the
//! two byte regions. Grounded on the header-then-body `Vec<u8>`
//! assembly idiom in `exewriter.rs::write_headers`, stripped down from
//! that file's PE/COFF header layout to the flat format this VM needs.

use crate::buffer::ByteBuffer;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum ExecutableError {
    TooShort { len: usize },
    TruncatedBody { expected: usize, found: usize },
    Io(io::Error),
}

impl fmt::Display for ExecutableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableError::TooShort { len } => {
                write!(f, "executable is only {len} bytes, need at least 16 for the headers")
            }
            ExecutableError::TruncatedBody { expected, found } => write!(
                f,
                "executable body is truncated: header declares {expected} bytes, found {found}"
            ),
            ExecutableError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for ExecutableError {
    fn from(err: io::Error) -> Self {
        ExecutableError::Io(err)
    }
}

pub struct Executable {
    pub static_data: Vec<u8>,
    pub program: Vec<u8>,
}

impl Executable {
    pub fn new(static_data: Vec<u8>, program: Vec<u8>) -> Self {
        Executable { static_data, program }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = ByteBuffer::with_capacity(16 + self.static_data.len() + self.program.len());
        buffer.push_u64(self.static_data.len() as u64);
        buffer.push_u64(self.program.len() as u64);
        buffer.push_bytes(&self.static_data);
        buffer.push_bytes(&self.program);
        buffer.build()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Executable, ExecutableError> {
        if bytes.len() < 16 {
            return Err(ExecutableError::TooShort { len: bytes.len() });
        }
        let static_data_size = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let program_size = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let body = &bytes[16..];
        if body.len() < static_data_size + program_size {
            return Err(ExecutableError::TruncatedBody {
                expected: static_data_size + program_size,
                found: body.len(),
            });
        }
        let static_data = body[..static_data_size].to_vec();
        let program = body[static_data_size..static_data_size + program_size].to_vec();
        Ok(Executable::new(static_data, program))
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), ExecutableError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Executable, ExecutableError> {
        let bytes = fs::read(path)?;
        Executable::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let exe = Executable::new(vec![1, 2, 3], vec![4, 5, 6, 7]);
        let bytes = exe.to_bytes();
        let parsed = Executable::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.static_data, vec![1, 2, 3]);
        assert_eq!(parsed.program, vec![4, 5, 6, 7]);
    }

    #[test]
    fn rejects_truncated_header() {
        let err = Executable::from_bytes(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, ExecutableError::TooShort { .. }));
    }

    #[test]
    fn rejects_truncated_body() {
        let mut buffer = ByteBuffer::new();
        buffer.push_u64(100);
        buffer.push_u64(0);
        let bytes = buffer.build();
        let err = Executable::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, ExecutableError::TruncatedBody { .. }));
    }
}
