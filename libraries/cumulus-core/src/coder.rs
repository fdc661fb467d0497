//! Shard arithmetic behind the file pipeline. Plaintext is zero-padded to
//! `k` equal shards of `ceil(len / k)` bytes, parity shards are derived
//! with Reed-Solomon over GF(2^8), and any `k` of the `k + m` shards
//! recover the data shards. Shard position is the fragment index.

use cumulus_structs::encoding::Encoding;
use reed_solomon_erasure::ReedSolomon;
use reed_solomon_erasure::galois_8;

use crate::error::CoreError;

pub(crate) struct ShardCoder {
    rs: Option<ReedSolomon<galois_8::Field>>,
    k: usize,
    m: usize,
}

impl ShardCoder {
    pub fn new(encoding: &Encoding) -> Result<Self, CoreError> {
        match encoding.name.as_str() {
            "rs_vand" | "liberasurecode_rs_vand" => {}
            other => return Err(CoreError::UnsupportedEncoding(other.to_owned())),
        }
        let k = usize::from(encoding.k);
        let m = usize::from(encoding.m);
        if k == 0 {
            return Err(CoreError::UnsupportedEncoding(format!(
                "{} with k=0",
                encoding.name
            )));
        }
        // m = 0 degenerates to plain striping, which the RS library
        // refuses to model; handled by hand below.
        let rs = if m > 0 {
            Some(
                ReedSolomon::new(k, m)
                    .map_err(|err| CoreError::InvalidShards(err.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self { rs, k, m })
    }

    pub fn total_shards(&self) -> usize {
        self.k + self.m
    }

    fn shard_len(&self, size: usize) -> usize {
        size.div_ceil(self.k).max(1)
    }

    /// Split plaintext into `k` padded data shards plus `m` parity shards.
    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<Vec<u8>>, CoreError> {
        let shard_len = self.shard_len(plaintext.len());
        let mut shards = vec![vec![0u8; shard_len]; self.total_shards()];
        for (shard, chunk) in shards.iter_mut().zip(plaintext.chunks(shard_len)) {
            shard[..chunk.len()].copy_from_slice(chunk);
        }
        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)
                .map_err(|err| CoreError::InvalidShards(err.to_string()))?;
        }
        Ok(shards)
    }

    /// Recover the plaintext from at least `k` surviving shards, truncated
    /// to the stored size.
    pub fn decode(
        &self,
        mut shards: Vec<Option<Vec<u8>>>,
        size: u64,
    ) -> Result<Vec<u8>, CoreError> {
        self.check_shard_set(&shards)?;
        match &self.rs {
            Some(rs) => rs
                .reconstruct_data(&mut shards)
                .map_err(|err| CoreError::Reconstruction(err.to_string()))?,
            None => {
                if shards.iter().take(self.k).any(Option::is_none) {
                    return Err(CoreError::Reconstruction(
                        "striped encoding lost a data shard".to_owned(),
                    ));
                }
            }
        }
        let mut plaintext = Vec::with_capacity(shards.iter().flatten().map(Vec::len).sum());
        for shard in shards.into_iter().take(self.k).flatten() {
            plaintext.extend_from_slice(&shard);
        }
        plaintext.truncate(size as usize);
        Ok(plaintext)
    }

    /// Recover the complete shard set, filling every missing position.
    pub fn reconstruct(
        &self,
        mut shards: Vec<Option<Vec<u8>>>,
    ) -> Result<Vec<Vec<u8>>, CoreError> {
        self.check_shard_set(&shards)?;
        match &self.rs {
            Some(rs) => rs
                .reconstruct(&mut shards)
                .map_err(|err| CoreError::Reconstruction(err.to_string()))?,
            None => {
                if shards.iter().any(Option::is_none) {
                    return Err(CoreError::Reconstruction(
                        "striped encoding lost a data shard".to_owned(),
                    ));
                }
            }
        }
        shards
            .into_iter()
            .map(|shard| {
                shard.ok_or_else(|| {
                    CoreError::InvalidShards("reconstruction left a hole".to_owned())
                })
            })
            .collect()
    }

    fn check_shard_set(&self, shards: &[Option<Vec<u8>>]) -> Result<(), CoreError> {
        if shards.len() != self.total_shards() {
            return Err(CoreError::InvalidShards(format!(
                "expected {} shard slots, got {}",
                self.total_shards(),
                shards.len()
            )));
        }
        let present = shards.iter().flatten().count();
        if present < self.k {
            return Err(CoreError::Reconstruction(format!(
                "{present} of {} shards survive, {} needed",
                self.total_shards(),
                self.k
            )));
        }
        let lens: Vec<usize> = shards.iter().flatten().map(Vec::len).collect();
        if lens.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(CoreError::InvalidShards("uneven shard lengths".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cumulus_structs::encoding::Encoding;

    use super::ShardCoder;
    use crate::error::CoreError;

    fn coder(k: u16, m: u16) -> ShardCoder {
        ShardCoder::new(&Encoding::new("rs_vand", k, m)).expect("valid encoding")
    }

    fn slots(shards: &[Vec<u8>]) -> Vec<Option<Vec<u8>>> {
        shards.iter().cloned().map(Some).collect()
    }

    #[test]
    fn roundtrip_various_sizes() {
        let coder = coder(2, 3);
        for size in [0usize, 1, 2, 3, 1023, 4096, 16 * 1024 + 5] {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let shards = coder.encode(&data).expect("encode");
            assert_eq!(shards.len(), 5);
            let decoded = coder
                .decode(slots(&shards), size as u64)
                .expect("decode full set");
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn any_k_shards_decode() {
        let coder = coder(2, 3);
        let data = vec![0xAAu8; 16 * 1024];
        let shards = coder.encode(&data).expect("encode");
        for keep_a in 0..5 {
            for keep_b in (keep_a + 1)..5 {
                let mut subset: Vec<Option<Vec<u8>>> = vec![None; 5];
                subset[keep_a] = Some(shards[keep_a].clone());
                subset[keep_b] = Some(shards[keep_b].clone());
                let decoded = coder
                    .decode(subset, data.len() as u64)
                    .expect("decode from any 2");
                assert_eq!(decoded, data);
            }
        }
    }

    #[test]
    fn reconstruct_restores_lost_shards() {
        let coder = coder(3, 2);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let shards = coder.encode(&data).expect("encode");
        let mut holed = slots(&shards);
        holed[1] = None;
        holed[4] = None;
        let restored = coder.reconstruct(holed).expect("reconstruct");
        assert_eq!(restored, shards);
    }

    #[test]
    fn too_few_shards_is_reconstruction_error() {
        let coder = coder(2, 1);
        let shards = coder.encode(b"some plaintext").expect("encode");
        let mut holed = slots(&shards);
        holed[0] = None;
        holed[2] = None;
        match coder.decode(holed, 14) {
            Err(CoreError::Reconstruction(_)) => {}
            other => panic!("expected reconstruction error, got {other:?}"),
        }
    }

    #[test]
    fn striping_without_parity() {
        let coder = coder(4, 0);
        let data = vec![0x5Au8; 4097];
        let shards = coder.encode(&data).expect("encode");
        assert_eq!(shards.len(), 4);
        let decoded = coder.decode(slots(&shards), 4097).expect("decode");
        assert_eq!(decoded, data);
        let mut holed = slots(&shards);
        holed[2] = None;
        assert!(matches!(
            coder.decode(holed, 4097),
            Err(CoreError::Reconstruction(_))
        ));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(matches!(
            ShardCoder::new(&Encoding::new("flat_xor_hd", 2, 1)),
            Err(CoreError::UnsupportedEncoding(_))
        ));
    }
}
