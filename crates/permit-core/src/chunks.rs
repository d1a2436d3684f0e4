//! Chunk planning for proofs larger than one ledger instruction.
//!
//! Chunk i covers [i*size, min((i+1)*size, len)); total = ceil(len/size).
//! Ranges are contiguous, disjoint, ascending and cover exactly [0, len).

use core::ops::Range;

use serde::Serialize;

use crate::error::{CoreError, Result};

/// Per-chunk payload cap accepted by the ledger's write path.
pub const DEFAULT_CHUNK_SIZE: usize = 900;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    total_len: usize,
    chunk_size: usize,
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn new(total_len: usize, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CoreError::InvalidChunkSize);
        }
        let chunks = (0..total_len.div_ceil(chunk_size))
            .map(|index| {
                let offset = index * chunk_size;
                Chunk { index, offset, len: chunk_size.min(total_len - offset) }
            })
            .collect();
        Ok(Self { total_len, chunk_size, chunks })
    }

    pub fn for_bytes(bytes: &[u8], chunk_size: usize) -> Result<Self> {
        Self::new(bytes.len(), chunk_size)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Payload bytes of `chunk`. Panics if `bytes` is not the planned artifact.
    pub fn payload<'a>(&self, bytes: &'a [u8], chunk: &Chunk) -> &'a [u8] {
        debug_assert_eq!(bytes.len(), self.total_len);
        &bytes[chunk.range()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_of_944_bytes_in_two_chunks() {
        let plan = ChunkPlan::new(944, 900).unwrap();
        let ranges: Vec<_> = plan.chunks().iter().map(Chunk::range).collect();
        assert_eq!(ranges, vec![0..900, 900..944]);
        assert_eq!(plan.total_chunks(), 2);
    }

    /// Checks gap-free, overlap-free, ascending coverage over a spread of sizes.
    #[test]
    fn chunks_partition_the_artifact() {
        for len in [0usize, 1, 63, 64, 899, 900, 901, 1800, 2500, 10_068] {
            for size in [1usize, 7, 64, 900, 4096] {
                let plan = ChunkPlan::new(len, size).unwrap();
                let mut cursor = 0;
                for (i, c) in plan.chunks().iter().enumerate() {
                    assert_eq!(c.index, i);
                    assert_eq!(c.offset, cursor, "len={len} size={size}");
                    assert!(c.len > 0 && c.len <= size);
                    cursor = c.end();
                }
                assert_eq!(cursor, len);
                assert_eq!(plan.total_chunks(), len.div_ceil(size));
            }
        }
    }

    #[test]
    fn payload_slices_match_ranges() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(2000).collect();
        let plan = ChunkPlan::for_bytes(&bytes, 900).unwrap();
        let joined: Vec<u8> = plan
            .chunks()
            .iter()
            .flat_map(|c| plan.payload(&bytes, c).to_vec())
            .collect();
        assert_eq!(joined, bytes);
        assert_eq!(plan.payload(&bytes, &plan.chunks()[2]).len(), 200);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(ChunkPlan::new(10, 0), Err(CoreError::InvalidChunkSize)));
        assert!(ChunkPlan::new(0, 900).unwrap().is_empty());
    }
}
