//! Nullifier derivation (replay key for the ledger's per-nullifier record).
//!
//! Two schemes exist and they are NOT interchangeable:
//! - Secret:      SHA-256(tag || secret)
//! - ProofPrefix: SHA-256(tag || proof[0..64])
//! The ledger recomputes one of them independently; a deployment picks exactly one.

use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Bytes of the generated proof consumed by the prefix scheme.
pub const PROOF_PREFIX_LEN: usize = 64;

/// 32-byte anti-replay token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nullifier([u8; 32]);

impl Nullifier {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullifierScheme {
    /// Keyed by the permit secret; known before the proof exists.
    #[default]
    Secret,
    /// Keyed by the first 64 bytes of the generated proof.
    ProofPrefix,
}

/// Applies one configured scheme (plus optional domain tag) consistently.
#[derive(Clone, Debug, Default)]
pub struct NullifierDeriver {
    scheme: NullifierScheme,
    domain_tag: Vec<u8>,
}

impl NullifierDeriver {
    pub fn new(scheme: NullifierScheme) -> Self {
        Self { scheme, domain_tag: Vec::new() }
    }

    /// Prepends `tag` to every preimage. Must match the ledger's derivation byte for byte.
    pub fn with_domain_tag(mut self, tag: impl Into<Vec<u8>>) -> Self {
        self.domain_tag = tag.into();
        self
    }

    pub fn scheme(&self) -> NullifierScheme {
        self.scheme
    }

    fn digest(&self, body: &[u8]) -> Nullifier {
        Nullifier(
            Sha256::new()
                .chain_update(&self.domain_tag)
                .chain_update(body)
                .finalize()
                .into(),
        )
    }

    /// Secret-keyed value, regardless of the configured scheme.
    pub fn for_secret(&self, secret: &[u8]) -> Nullifier {
        self.digest(secret)
    }

    /// Proof-prefix value, regardless of the configured scheme.
    pub fn for_proof(&self, proof: &[u8]) -> Result<Nullifier> {
        let prefix = proof.get(..PROOF_PREFIX_LEN).ok_or(CoreError::ProofTooShort {
            len: proof.len(),
            need: PROOF_PREFIX_LEN,
        })?;
        Ok(self.digest(prefix))
    }

    /// Derives with the configured scheme.
    pub fn derive(&self, secret: &[u8], proof: &[u8]) -> Result<Nullifier> {
        match self.scheme {
            NullifierScheme::Secret => Ok(self.for_secret(secret)),
            NullifierScheme::ProofPrefix => self.for_proof(proof),
        }
    }

    /// Value computable before proving; `None` under the prefix scheme.
    pub fn preflight(&self, secret: &[u8]) -> Option<Nullifier> {
        match self.scheme {
            NullifierScheme::Secret => Some(self.for_secret(secret)),
            NullifierScheme::ProofPrefix => None,
        }
    }
}
