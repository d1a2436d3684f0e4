//! Proving-engine seam and the public witness wire format.
//!
//! The engine itself is external. The client hands it the permit's membership
//! evidence and gets back opaque proof bytes plus ordered public inputs, the
//! first of which must be the tree root the ledger has published.
//!
//! Public witness (as read by the verifier program):
//!   u32 BE nb_public | u32 BE nb_secret (0) | u32 BE len | len × 32-byte elements
//! so the root occupies bytes [12, 44).

use async_trait::async_trait;
use thiserror::Error;

use permit_core::{Node, Permit, Secret};

const WITNESS_HEADER_LEN: usize = 12;
const ELEMENT_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ProverError {
    #[error("proving failed: {0}")]
    Failed(String),
    #[error("malformed public witness: {0}")]
    MalformedWitness(String),
}

/// Everything the circuit needs for one membership proof.
#[derive(Clone, Debug)]
pub struct ProofRequest {
    pub secret: Secret,
    pub index: u64,
    pub hash_path: Vec<Node>,
    pub root: Node,
}

impl From<&Permit> for ProofRequest {
    fn from(p: &Permit) -> Self {
        Self {
            secret: p.secret.clone(),
            index: p.index,
            hash_path: p.hash_path.clone(),
            root: p.root,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofArtifact {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<Node>,
}

impl ProofArtifact {
    /// Root the proof is bound to (first public input).
    pub fn bound_root(&self) -> Option<&Node> {
        self.public_inputs.first()
    }

    pub fn witness(&self) -> Vec<u8> {
        encode_public_witness(&self.public_inputs)
    }

    /// Rebuilds an artifact from a proof and an encoded public witness.
    pub fn from_parts(proof: Vec<u8>, witness: &[u8]) -> Result<Self, ProverError> {
        Ok(Self { proof, public_inputs: decode_public_witness(witness)? })
    }
}

pub fn encode_public_witness(inputs: &[Node]) -> Vec<u8> {
    let n = inputs.len() as u32;
    let mut out = Vec::with_capacity(WITNESS_HEADER_LEN + inputs.len() * ELEMENT_LEN);
    out.extend_from_slice(&n.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&n.to_be_bytes());
    for x in inputs {
        out.extend_from_slice(x);
    }
    out
}

pub fn decode_public_witness(bytes: &[u8]) -> Result<Vec<Node>, ProverError> {
    let header = bytes
        .get(..WITNESS_HEADER_LEN)
        .ok_or_else(|| ProverError::MalformedWitness(format!("{} bytes, header needs 12", bytes.len())))?;
    let word = |i: usize| u32::from_be_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]) as usize;
    let (nb_public, nb_secret, len) = (word(0), word(4), word(8));
    if nb_secret != 0 || nb_public != len {
        return Err(ProverError::MalformedWitness(format!(
            "header counts public={nb_public} secret={nb_secret} len={len}"
        )));
    }
    let body = &bytes[WITNESS_HEADER_LEN..];
    if body.len() != len * ELEMENT_LEN {
        return Err(ProverError::MalformedWitness(format!(
            "{len} elements need {} bytes, got {}",
            len * ELEMENT_LEN,
            body.len()
        )));
    }
    Ok(body
        .chunks_exact(ELEMENT_LEN)
        .map(|c| {
            let mut node = [0u8; ELEMENT_LEN];
            node.copy_from_slice(c);
            node
        })
        .collect())
}

/// External proving engine.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(&self, request: &ProofRequest) -> Result<ProofArtifact, ProverError>;
}
