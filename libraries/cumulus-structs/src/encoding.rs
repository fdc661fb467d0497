use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// An erasure-code selection: algorithm name plus the (k, m) shard counts.
/// A file stored with this encoding carries exactly `k + m` fragments, any
/// `k` of which suffice to reconstruct it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Encoding {
    pub name: SmolStr,
    pub k: u16,
    pub m: u16,
}

impl Encoding {
    pub fn new(name: impl AsRef<str>, k: u16, m: u16) -> Self {
        Self {
            name: SmolStr::new(name),
            k,
            m,
        }
    }

    /// Total number of fragments a fully-stored file carries.
    pub fn total_shards(&self) -> usize {
        usize::from(self.k) + usize::from(self.m)
    }
}

#[cfg(test)]
mod tests {
    use super::Encoding;

    #[test]
    fn total_shards() {
        assert_eq!(Encoding::new("rs_vand", 2, 3).total_shards(), 5);
        assert_eq!(Encoding::new("rs_vand", 4, 0).total_shards(), 4);
    }
}
