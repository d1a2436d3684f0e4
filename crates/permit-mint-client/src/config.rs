//! Deployment configuration.
//!
//! MintConfig is the serde view (JSON file, every field defaulted).
//! MintParams is the validated, immutable form injected into the orchestrator:
//! program ids parsed, config record address derived, nullifier deriver built.

use std::{fs, path::Path, str::FromStr};

use anchor_lang::solana_program::pubkey::Pubkey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use permit_core::{NullifierDeriver, NullifierScheme, DEFAULT_CHUNK_SIZE};

use crate::accounts;

/// Upper bound the runtime accepts for SetComputeUnitLimit.
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;
/// Largest payload the ledger's write_chunk accepts.
pub const MAX_CHUNK_SIZE: usize = 900;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: invalid address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MintConfig {
    pub program_id: String,
    pub verifier_program_id: String,
    pub token_program_id: String,
    pub associated_token_program_id: String,
    pub compute_budget_program_id: String,

    /// Seed of the shared config record.
    pub config_seed: String,
    /// Prefix seed of the per-nullifier record.
    pub nullifier_seed: String,
    pub nullifier_scheme: NullifierScheme,
    /// Prepended to the nullifier preimage; empty for the deployed program.
    pub nullifier_domain_tag: String,

    pub compute_unit_limit: u32,
    /// Micro-lamports per compute unit; no price instruction when unset.
    pub compute_unit_price: Option<u64>,

    /// Proofs longer than this go through the chunked upload.
    pub inline_proof_limit: usize,
    pub chunk_size: usize,
    /// Total submissions per chunk, first try included.
    pub max_chunk_attempts: u32,
    /// Reads the nullifier record before spending fees on upload/claim.
    pub preflight_nullifier_check: bool,

    /// Program error code meaning "nullifier already used", matched as a number.
    pub already_claimed_code: u32,
    /// Names in a ledger rejection that mean the same thing.
    pub already_claimed_patterns: Vec<String>,
    /// Characters of a rejection message kept for display.
    pub display_truncate: usize,
}

impl Default for MintConfig {
    fn default() -> Self {
        Self {
            program_id: "iWckXfdhAruKcwhoBjo3cxCJC6FgiourmJLWaLtqCNy".into(),
            verifier_program_id: "F4ajai56YytKeKFg2mjuhAhNMPqzJLpUNrVxsoo3qnyB".into(),
            token_program_id: "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA".into(),
            associated_token_program_id: "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL".into(),
            compute_budget_program_id: "ComputeBudget111111111111111111111111111111".into(),
            config_seed: "config".into(),
            nullifier_seed: "nullifier_v7".into(),
            nullifier_scheme: NullifierScheme::Secret,
            nullifier_domain_tag: String::new(),
            compute_unit_limit: MAX_COMPUTE_UNIT_LIMIT,
            compute_unit_price: None,
            inline_proof_limit: 512,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_attempts: 3,
            preflight_nullifier_check: true,
            already_claimed_code: 6002,
            already_claimed_patterns: vec!["AlreadyMinted".into(), "already in use".into()],
            display_truncate: 50,
        }
    }
}

impl MintConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value).map_err(|_| ConfigError::InvalidAddress { field, value: value.to_string() })
}

/// Validated configuration shared read-only by every claim attempt.
#[derive(Clone, Debug)]
pub struct MintParams {
    pub program_id: Pubkey,
    pub verifier_program_id: Pubkey,
    pub token_program_id: Pubkey,
    pub associated_token_program_id: Pubkey,
    pub compute_budget_program_id: Pubkey,
    pub config_address: Pubkey,
    pub nullifier_seed: Vec<u8>,
    pub deriver: NullifierDeriver,
    pub compute_unit_limit: u32,
    pub compute_unit_price: Option<u64>,
    pub inline_proof_limit: usize,
    pub chunk_size: usize,
    pub max_chunk_attempts: u32,
    pub preflight_nullifier_check: bool,
    pub already_claimed_code: u32,
    pub already_claimed_patterns: Vec<String>,
    pub display_truncate: usize,
}

impl MintParams {
    pub fn from_config(cfg: &MintConfig) -> Result<Self, ConfigError> {
        if cfg.chunk_size == 0 || cfg.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk_size {} outside 1..={MAX_CHUNK_SIZE}",
                cfg.chunk_size
            )));
        }
        if cfg.max_chunk_attempts == 0 {
            return Err(ConfigError::Invalid("max_chunk_attempts must be at least 1".into()));
        }
        if cfg.compute_unit_limit == 0 || cfg.compute_unit_limit > MAX_COMPUTE_UNIT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "compute_unit_limit {} outside 1..={MAX_COMPUTE_UNIT_LIMIT}",
                cfg.compute_unit_limit
            )));
        }
        // PDA seeds are capped at 32 bytes each
        for (field, seed) in [("config_seed", &cfg.config_seed), ("nullifier_seed", &cfg.nullifier_seed)] {
            if seed.is_empty() || seed.len() > 32 {
                return Err(ConfigError::Invalid(format!("{field} must be 1..=32 bytes")));
            }
        }

        let program_id = parse_address("program_id", &cfg.program_id)?;
        let deriver = NullifierDeriver::new(cfg.nullifier_scheme)
            .with_domain_tag(cfg.nullifier_domain_tag.as_bytes().to_vec());

        Ok(Self {
            program_id,
            verifier_program_id: parse_address("verifier_program_id", &cfg.verifier_program_id)?,
            token_program_id: parse_address("token_program_id", &cfg.token_program_id)?,
            associated_token_program_id: parse_address(
                "associated_token_program_id",
                &cfg.associated_token_program_id,
            )?,
            compute_budget_program_id: parse_address(
                "compute_budget_program_id",
                &cfg.compute_budget_program_id,
            )?,
            config_address: accounts::config_address(&program_id, cfg.config_seed.as_bytes()),
            nullifier_seed: cfg.nullifier_seed.as_bytes().to_vec(),
            deriver,
            compute_unit_limit: cfg.compute_unit_limit,
            compute_unit_price: cfg.compute_unit_price,
            inline_proof_limit: cfg.inline_proof_limit,
            chunk_size: cfg.chunk_size,
            max_chunk_attempts: cfg.max_chunk_attempts,
            preflight_nullifier_check: cfg.preflight_nullifier_check,
            already_claimed_code: cfg.already_claimed_code,
            already_claimed_patterns: cfg.already_claimed_patterns.clone(),
            display_truncate: cfg.display_truncate,
        })
    }
}
