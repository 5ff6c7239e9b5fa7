//! MD5 digests used to verify deposited assets against their manifest

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::HashError;

/// An MD5 digest (16 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Md5Digest([u8; 16]);

impl Md5Digest {
    /// Create a digest from raw bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the digest as a byte slice
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(32);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Compare against a declared hex checksum, ignoring letter case.
    ///
    /// The declared value is taken verbatim; anything that is not the
    /// 32-character hex form of this digest is a mismatch.
    pub fn matches_hex(&self, declared: &str) -> bool {
        self.to_hex().eq_ignore_ascii_case(declared)
    }
}

impl std::fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}

impl std::fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash bytes using MD5
pub fn hash_bytes(data: &[u8]) -> Md5Digest {
    Md5Digest::from_bytes(md5::compute(data).0)
}

/// Hash a file using MD5 (streaming, constant memory)
pub fn hash_file(path: &Path) -> Result<Md5Digest, HashError> {
    let io_err = |source| HashError {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    let mut context = md5::Context::new();

    let mut buffer = [0u8; 8192]; // 8KB buffer
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(io_err)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(Md5Digest::from_bytes(context.compute().0))
}
