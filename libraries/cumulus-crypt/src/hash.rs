use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{Bytes, IfIsHumanReadable, serde_as};
use sha3::{Digest, Sha3_256};

/// The canonical chunk size for hashing content off disk: 1 MiB.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// SHA3-256 hash output.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] [u8; 32]);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashParseError;

impl Hash {
    /// Hash a message with SHA3-256.
    pub fn digest(msg: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(msg);
        Self(hasher.finalize().into())
    }

    /// Build a hash from its 32-byte form.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Serialize the hash as 32 bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| HashParseError)?;
        if bytes.len() != 32 {
            return Err(HashParseError);
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&bytes);
        Ok(Self::from_bytes(buf))
    }
}

impl fmt::Display for HashParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid hash")
    }
}

impl std::error::Error for HashParseError {}

/// Incremental SHA3-256 hasher, for folding large content in chunks.
#[derive(Default)]
pub struct Hasher(Sha3_256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha3_256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::{Hash, Hasher};

    #[test]
    fn digest_known_vectors() {
        assert_eq!(
            Hash::digest(b"").to_string(),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
        assert_eq!(
            Hash::digest(b"abc").to_string(),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
    }

    #[test]
    fn incremental_matches_oneshot() {
        let data = vec![0xABu8; 3 * 1024 * 1024 + 17];
        let mut hasher = Hasher::new();
        for chunk in data.chunks(super::CHUNK_SIZE) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), Hash::digest(&data));
    }

    #[test]
    fn hex_roundtrip() {
        let hash = Hash::digest(b"roundtrip");
        let parsed: Hash = hash.to_string().parse().expect("valid hex hash");
        assert_eq!(parsed, hash);
    }

    #[test]
    fn serde_human_readable_is_hex() {
        let hash = Hash::digest(b"wire");
        let json = serde_json::to_string(&hash).expect("serialize hash");
        assert_eq!(json, format!("\"{hash}\""));
        let back: Hash = serde_json::from_str(&json).expect("deserialize hash");
        assert_eq!(back, hash);
    }
}
