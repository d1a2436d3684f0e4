//! WASM bindings for the permit mint
//! Exposes permit lookup, nullifier derivation, chunk planning and path checks for JavaScript

use serde::Serialize;
use wasm_bindgen::prelude::*;

use permit_core::{
    node_from_hex, node_to_hex, verify_path, ChunkPlan, MerkleHasher, Node, NullifierDeriver, NullifierScheme,
    PermitTable, Sha256Hasher, NODE_LEN,
};

#[derive(Serialize)]
struct PermitView {
    index: u64,
    root: String,
    hash_path: Vec<String>,
}

fn find_permit(table_json: &str, secret: &str) -> Result<Option<PermitView>, String> {
    let table = PermitTable::from_json(table_json).map_err(|e| e.to_string())?;
    Ok(table.lookup(secret).map(|p| PermitView {
        index: p.index,
        root: node_to_hex(&p.root),
        hash_path: p.hash_path.iter().map(node_to_hex).collect(),
    }))
}

fn parse_scheme(scheme: &str) -> Result<NullifierScheme, String> {
    match scheme {
        "secret" | "" => Ok(NullifierScheme::Secret),
        "proof_prefix" => Ok(NullifierScheme::ProofPrefix),
        other => Err(format!("unknown nullifier scheme {other:?}")),
    }
}

fn nullifier_bytes(secret: &[u8], proof: &[u8], scheme: &str, domain_tag: &[u8]) -> Result<Vec<u8>, String> {
    let deriver = NullifierDeriver::new(parse_scheme(scheme)?).with_domain_tag(domain_tag.to_vec());
    let n = deriver.derive(secret, proof).map_err(|e| e.to_string())?;
    Ok(n.as_bytes().to_vec())
}

/// Path given as concatenated 32-byte siblings, leaf first.
fn check_path(secret: &str, index: u64, path: &[u8], root_hex: &str) -> bool {
    if path.len() % NODE_LEN != 0 {
        return false;
    }
    let root = match node_from_hex(root_hex) { Ok(r) => r, Err(_) => return false };
    let siblings: Vec<Node> = path
        .chunks_exact(NODE_LEN)
        .map(|c| {
            let mut n = [0u8; NODE_LEN];
            n.copy_from_slice(c);
            n
        })
        .collect();
    let leaf = Sha256Hasher.hash_leaf(secret.as_bytes());
    verify_path(&Sha256Hasher, &leaf, index, &siblings, &root)
}

/// Looks up a secret in a permit table JSON; returns null when it is not listed
#[wasm_bindgen]
pub fn lookup_permit(table_json: &str, secret: &str) -> Result<JsValue, JsValue> {
    match find_permit(table_json, secret).map_err(|e| JsValue::from_str(&e))? {
        Some(view) => serde_wasm_bindgen::to_value(&view).map_err(|e| JsValue::from_str(&e.to_string())),
        None => Ok(JsValue::NULL),
    }
}

/// Derives the 32-byte nullifier ("secret" or "proof_prefix" scheme)
#[wasm_bindgen]
pub fn derive_nullifier(secret: &[u8], proof: &[u8], scheme: &str, domain_tag: &[u8]) -> Result<Vec<u8>, JsValue> {
    nullifier_bytes(secret, proof, scheme, domain_tag).map_err(|e| JsValue::from_str(&e))
}

/// Returns the chunk plan for a proof of `len` bytes
#[wasm_bindgen]
pub fn plan_chunks(len: usize, chunk_size: usize) -> Result<JsValue, JsValue> {
    let plan = ChunkPlan::new(len, chunk_size).map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_wasm_bindgen::to_value(&plan).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Checks that the path folds the secret's leaf up to the given root
#[wasm_bindgen]
pub fn verify_permit(secret: &str, index: u64, path: &[u8], root_hex: &str) -> bool {
    check_path(secret, index, path, root_hex)
}
