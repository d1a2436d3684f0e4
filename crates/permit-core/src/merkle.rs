//! Fixed-depth sparse Merkle accumulator over permit secrets.
//!
//! Leaf i = Hash1(secrets[i]); every position past the last secret holds zeros[0].
//! Parent = Hash2(layer[l-1][2i], layer[l-1][2i+1]); left/right is fixed by index parity.
//! Only the populated prefix of each level is stored, the rest reads from the zeros arena,
//! so build is O(k·D) and path extraction is O(D) for a tree of capacity 2^D.

use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// A 32-byte tree node (leaf, internal node or root).
pub type Node = [u8; 32];

pub const NODE_LEN: usize = 32;
pub const MAX_DEPTH: u32 = 32;
/// Depth of the reference deployment (2^20 permits).
pub const DEFAULT_DEPTH: u32 = 20;

// Domain prefixes keep a leaf from ever colliding with an internal node
// or with a secret-keyed nullifier (plain SHA-256 of the secret).
const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Hash1 / Hash2 of the accumulator.
pub trait MerkleHasher {
    fn hash_leaf(&self, secret: &[u8]) -> Node;
    fn hash_nodes(&self, left: &Node, right: &Node) -> Node;
}

/// SHA-256 with leaf/node domain prefixes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl MerkleHasher for Sha256Hasher {
    fn hash_leaf(&self, secret: &[u8]) -> Node {
        Sha256::new()
            .chain_update([LEAF_TAG])
            .chain_update(secret)
            .finalize()
            .into()
    }

    fn hash_nodes(&self, left: &Node, right: &Node) -> Node {
        Sha256::new()
            .chain_update([NODE_TAG])
            .chain_update(left)
            .chain_update(right)
            .finalize()
            .into()
    }
}

/// Number of leaves a tree of `depth` can hold.
pub fn capacity(depth: u32) -> u64 {
    1u64 << depth
}

pub(crate) fn check_depth(depth: u32) -> Result<()> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(CoreError::InvalidDepth(depth));
    }
    Ok(())
}

/// Empty-subtree constants: zeros[0] = 0^32, zeros[l+1] = Hash2(zeros[l], zeros[l]).
pub fn zeros<H: MerkleHasher + ?Sized>(hasher: &H, depth: u32) -> Vec<Node> {
    let mut out = Vec::with_capacity(depth as usize + 1);
    out.push([0u8; NODE_LEN]);
    for level in 0..depth as usize {
        let below = out[level];
        out.push(hasher.hash_nodes(&below, &below));
    }
    out
}

/// Populated levels of the tree plus the zeros arena for everything else.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    depth: u32,
    // layers[0] = leaves, layers[depth] = [root]
    layers: Vec<Vec<Node>>,
    zeros: Vec<Node>,
}

impl MerkleTree {
    /// Builds a tree over `secrets` with the default SHA-256 hasher.
    pub fn build<S: AsRef<[u8]>>(secrets: &[S], depth: u32) -> Result<Self> {
        Self::build_with(&Sha256Hasher, secrets, depth)
    }

    /// Builds a tree over `secrets`; fails with `CapacityExceeded` past 2^depth secrets.
    pub fn build_with<H, S>(hasher: &H, secrets: &[S], depth: u32) -> Result<Self>
    where
        H: MerkleHasher + ?Sized,
        S: AsRef<[u8]>,
    {
        check_depth(depth)?;
        let cap = capacity(depth);
        if secrets.len() as u64 > cap {
            return Err(CoreError::CapacityExceeded {
                count: secrets.len(),
                depth,
                capacity: cap,
            });
        }
        let leaves = secrets
            .iter()
            .map(|s| hasher.hash_leaf(s.as_ref()))
            .collect();
        Ok(Self::from_leaves(hasher, leaves, depth))
    }

    fn from_leaves<H: MerkleHasher + ?Sized>(hasher: &H, leaves: Vec<Node>, depth: u32) -> Self {
        let zeros = zeros(hasher, depth);
        let mut layers = Vec::with_capacity(depth as usize + 1);
        let mut current = leaves;
        for level in 0..depth as usize {
            let next: Vec<Node> = current
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&zeros[level]);
                    hasher.hash_nodes(&pair[0], right)
                })
                .collect();
            layers.push(current);
            current = next;
        }
        if current.is_empty() {
            current.push(zeros[depth as usize]);
        }
        layers.push(current);
        tracing::debug!(depth, leaves = layers[0].len(), "merkle tree built");
        Self { depth, layers, zeros }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn root(&self) -> Node {
        self.layers[self.depth as usize][0]
    }

    pub fn zeros(&self) -> &[Node] {
        &self.zeros
    }

    /// Node at (`level`, `index`); unmaterialized positions read zeros[level].
    pub fn node(&self, level: usize, index: u64) -> Node {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.layers[level].get(i))
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Authentication path for `index`: one sibling per level, leaf to root.
    pub fn path(&self, index: u64) -> Result<Vec<Node>> {
        if index >= capacity(self.depth) {
            return Err(CoreError::IndexOutOfRange { index, depth: self.depth });
        }
        let mut idx = index;
        let path = (0..self.depth as usize)
            .map(|level| {
                let sibling = self.node(level, idx ^ 1);
                idx >>= 1;
                sibling
            })
            .collect();
        Ok(path)
    }
}

/// Folds `path` upward from `leaf`, taking left/right from successive bits of `index`.
pub fn fold_path<H: MerkleHasher + ?Sized>(hasher: &H, leaf: &Node, index: u64, path: &[Node]) -> Node {
    let mut acc = *leaf;
    let mut idx = index;
    for sibling in path {
        acc = if idx & 1 == 0 {
            hasher.hash_nodes(&acc, sibling)
        } else {
            hasher.hash_nodes(sibling, &acc)
        };
        idx >>= 1;
    }
    acc
}

/// Byte-exact check that (`leaf`, `index`, `path`) reproduces `root`.
pub fn verify_path<H: MerkleHasher + ?Sized>(
    hasher: &H,
    leaf: &Node,
    index: u64,
    path: &[Node],
    root: &Node,
) -> bool {
    // index bits above the path length would be silently ignored by the fold
    if path.len() < 64 && (index >> path.len()) != 0 {
        return false;
    }
    fold_path(hasher, leaf, index, path) == *root
}
