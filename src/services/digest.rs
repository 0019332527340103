//! Payload digests.

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare a caller supplied hex digest with a computed one.
pub fn digest_matches(declared: &str, computed: &str) -> bool {
    declared.trim().eq_ignore_ascii_case(computed)
}

/// All digests recorded for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digests {
    pub size: i64,
    pub md5: String,
    pub sha224: String,
    pub sha256: String,
    pub sha384: String,
    pub sha512: String,
}

/// Feeds every byte to each artifact digest in one pass.
pub struct MultiHasher {
    size: i64,
    md5: md5::Context,
    sha224: Sha224,
    sha256: Sha256,
    sha384: Sha384,
    sha512: Sha512,
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiHasher {
    pub fn new() -> Self {
        Self {
            size: 0,
            md5: md5::Context::new(),
            sha224: Sha224::new(),
            sha256: Sha256::new(),
            sha384: Sha384::new(),
            sha512: Sha512::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as i64;
        self.md5.consume(data);
        self.sha224.update(data);
        self.sha256.update(data);
        self.sha384.update(data);
        self.sha512.update(data);
    }

    pub fn finish(self) -> Digests {
        Digests {
            size: self.size,
            md5: format!("{:x}", self.md5.compute()),
            sha224: hex::encode(self.sha224.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            sha384: hex::encode(self.sha384.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}
