//! Permit table: secret → (index, authentication path) under one published root.
//!
//! Built once offline, when every secret is available; loaded read-only at claim time.
//! Loading trusts stored paths verbatim and only validates shape (lengths, duplicates).
//!
//! JSON record:
//! { "root": "0x..", "permits": [ { "secret": "..", "index": 0, "hash_path": ["0x..", ..] } ] }

use core::{borrow::Borrow, fmt};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CoreError, Result},
    merkle::{capacity, check_depth, verify_path, MerkleHasher, MerkleTree, Node, Sha256Hasher, NODE_LEN},
    nullifier::{NullifierDeriver, NullifierScheme},
};

/// Private permit value. Hashed as its UTF-8 bytes; never printed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Borrow<str> for Secret {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Membership evidence for one secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permit {
    pub secret: Secret,
    pub index: u64,
    pub hash_path: Vec<Node>,
    pub root: Node,
}

impl Permit {
    /// Recomputes the root from Hash1(secret) along the stored path.
    pub fn verify<H: MerkleHasher + ?Sized>(&self, hasher: &H) -> bool {
        let leaf = hasher.hash_leaf(self.secret.as_bytes());
        verify_path(hasher, &leaf, self.index, &self.hash_path, &self.root)
    }
}

/// Formats a node as 0x-prefixed lowercase hex.
pub fn node_to_hex(node: &Node) -> String {
    format!("0x{}", hex::encode(node))
}

/// Parses a 32-byte node from hex, with or without a 0x prefix.
pub fn node_from_hex(s: &str) -> Result<Node> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| CoreError::MalformedTable(format!("bad hex {s:?}: {e}")))?;
    if bytes.len() != NODE_LEN {
        return Err(CoreError::MalformedTable(format!(
            "expected {NODE_LEN} bytes, got {} in {s:?}",
            bytes.len()
        )));
    }
    let mut out = [0u8; NODE_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[derive(Serialize, Deserialize)]
struct TableRecord {
    root: String,
    #[serde(alias = "permitlist")]
    permits: Vec<PermitRecord>,
}

#[derive(Serialize, Deserialize)]
struct PermitRecord {
    secret: Secret,
    index: u64,
    hash_path: Vec<String>,
}

/// Outcome of an offline consistency audit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub checked: usize,
    /// Indices whose path does not reproduce the root.
    pub bad_paths: Vec<u64>,
    /// Index pairs sharing a secret-keyed nullifier.
    pub duplicate_nullifiers: Vec<(u64, u64)>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.bad_paths.is_empty() && self.duplicate_nullifiers.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct PermitTable {
    root: Node,
    depth: u32,
    permits: Vec<Permit>,
    by_secret: HashMap<Secret, usize>,
}

impl PermitTable {
    /// One tree build plus one path extraction per secret (SHA-256 hasher).
    pub fn build<S: AsRef<str>>(secrets: &[S], depth: u32) -> Result<Self> {
        Self::build_with(&Sha256Hasher, secrets, depth)
    }

    pub fn build_with<H, S>(hasher: &H, secrets: &[S], depth: u32) -> Result<Self>
    where
        H: MerkleHasher + ?Sized,
        S: AsRef<str>,
    {
        let secrets: Vec<Secret> = secrets.iter().map(|s| Secret::new(s.as_ref())).collect();
        let tree = MerkleTree::build_with(hasher, &secrets, depth)?;
        let root = tree.root();
        let permits = secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| -> Result<Permit> {
                let index = i as u64;
                Ok(Permit { secret, index, hash_path: tree.path(index)?, root })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(depth, permits = permits.len(), root = %node_to_hex(&root), "permit table built");
        Self::from_permits(root, depth, permits)
    }

    fn from_permits(root: Node, depth: u32, permits: Vec<Permit>) -> Result<Self> {
        check_depth(depth)?;
        let cap = capacity(depth);
        let mut by_secret = HashMap::with_capacity(permits.len());
        let mut indices = HashSet::with_capacity(permits.len());
        for (pos, p) in permits.iter().enumerate() {
            if p.hash_path.len() != depth as usize {
                return Err(CoreError::MalformedTable(format!(
                    "permit #{pos}: path has {} entries, expected {depth}",
                    p.hash_path.len()
                )));
            }
            if p.index >= cap {
                return Err(CoreError::IndexOutOfRange { index: p.index, depth });
            }
            if !indices.insert(p.index) {
                return Err(CoreError::MalformedTable(format!("duplicate index {}", p.index)));
            }
            if by_secret.insert(p.secret.clone(), pos).is_some() {
                return Err(CoreError::MalformedTable(format!("permit #{pos}: duplicate secret")));
            }
        }
        Ok(Self { root, depth, permits, by_secret })
    }

    pub fn root(&self) -> Node {
        self.root
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn permits(&self) -> &[Permit] {
        &self.permits
    }

    pub fn len(&self) -> usize {
        self.permits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permits.is_empty()
    }

    /// Finds the permit for `secret`. `None` is the ordinary "unknown secret" outcome.
    pub fn lookup(&self, secret: &str) -> Option<&Permit> {
        self.by_secret.get(secret).map(|&pos| &self.permits[pos])
    }

    /// Re-verifies every path and checks nullifier uniqueness (secret scheme only).
    pub fn audit<H: MerkleHasher + ?Sized>(&self, hasher: &H, deriver: &NullifierDeriver) -> AuditReport {
        let mut report = AuditReport { checked: self.permits.len(), ..Default::default() };
        let mut seen = HashMap::with_capacity(self.permits.len());
        for p in &self.permits {
            if p.root != self.root || !p.verify(hasher) {
                report.bad_paths.push(p.index);
            }
            if deriver.scheme() == NullifierScheme::Secret {
                let n = deriver.for_secret(p.secret.as_bytes());
                if let Some(first) = seen.insert(n, p.index) {
                    report.duplicate_nullifiers.push((first, p.index));
                }
            }
        }
        if !report.is_clean() {
            tracing::warn!(
                bad_paths = report.bad_paths.len(),
                duplicate_nullifiers = report.duplicate_nullifiers.len(),
                "permit table audit failed"
            );
        }
        report
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let record: TableRecord = serde_json::from_str(json)?;
        let root = node_from_hex(&record.root)?;
        let depth = record
            .permits
            .first()
            .map(|p| p.hash_path.len() as u32)
            .unwrap_or(crate::merkle::DEFAULT_DEPTH);
        let permits = record
            .permits
            .into_iter()
            .map(|p| -> Result<Permit> {
                let hash_path = p.hash_path.iter().map(|h| node_from_hex(h)).collect::<Result<Vec<_>>>()?;
                Ok(Permit { secret: p.secret, index: p.index, hash_path, root })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_permits(root, depth, permits)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        let record = TableRecord {
            root: node_to_hex(&self.root),
            permits: self
                .permits
                .iter()
                .map(|p| PermitRecord {
                    secret: p.secret.clone(),
                    index: p.index,
                    hash_path: p.hash_path.iter().map(node_to_hex).collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&record)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let table = Self::from_json(&fs::read_to_string(path.as_ref())?)?;
        tracing::debug!(path = %path.as_ref().display(), permits = table.len(), "permit table loaded");
        Ok(table)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
