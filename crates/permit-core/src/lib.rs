//! Offline core of the permit mint.
//!
//! merkle:    fixed-depth sparse accumulator (root, paths, verification).
//! permits:   permit table built from the secret list, persisted as JSON.
//! nullifier: deterministic replay key, secret- or proof-prefix-keyed.
//! chunks:    byte-range plan for proofs that exceed one ledger instruction.

pub mod chunks;
pub mod error;
pub mod merkle;
pub mod nullifier;
pub mod permits;

pub use chunks::{Chunk, ChunkPlan, DEFAULT_CHUNK_SIZE};
pub use error::{CoreError, Result};
pub use merkle::{
    capacity, fold_path, verify_path, MerkleHasher, MerkleTree, Node, Sha256Hasher, DEFAULT_DEPTH,
    MAX_DEPTH, NODE_LEN,
};
pub use nullifier::{Nullifier, NullifierDeriver, NullifierScheme, PROOF_PREFIX_LEN};
pub use permits::{node_from_hex, node_to_hex, AuditReport, Permit, PermitTable, Secret};
