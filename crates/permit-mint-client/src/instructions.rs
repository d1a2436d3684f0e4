//! Instruction builders for the mint program and the runtime programs it leans on.
//!
//! Program instructions are anchor-style: 8-byte discriminator (first bytes of
//! SHA-256("global:" || name)) followed by borsh-encoded arguments.

use anchor_lang::solana_program::{
    hash::hashv,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};
use borsh::BorshSerialize;
use thiserror::Error;

use permit_core::{Node, Nullifier};

use crate::config::{MintParams, MAX_CHUNK_SIZE};

#[derive(Debug, Error)]
pub enum InstructionError {
    #[error("encode: {0}")]
    Encoding(#[from] std::io::Error),
    #[error("chunk payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("offset {0} does not fit in u32")]
    OffsetOverflow(usize),
    #[error("{field} is {len} bytes, the config record holds {max}")]
    FieldTooLong { field: &'static str, len: usize, max: usize },
}

pub type Result<T> = core::result::Result<T, InstructionError>;

/// Anchor discriminator for a global instruction.
pub fn discriminator(name: &str) -> [u8; 8] {
    let h = hashv(&[b"global:", name.as_bytes()]).to_bytes();
    let mut out = [0u8; 8];
    out.copy_from_slice(&h[..8]);
    out
}

fn program_ix<A: BorshSerialize>(
    program_id: Pubkey,
    name: &str,
    args: &A,
    accounts: Vec<AccountMeta>,
) -> Result<Instruction> {
    let mut data = discriminator(name).to_vec();
    args.serialize(&mut data)?;
    Ok(Instruction { program_id, accounts, data })
}

#[derive(BorshSerialize)]
struct WriteChunkArgs<'a> {
    offset: u32,
    payload: &'a [u8],
}

#[derive(BorshSerialize)]
struct VerifyProofArgs<'a> {
    proof: &'a [u8],
    witness: &'a [u8],
    nullifier: [u8; 32],
}

#[derive(BorshSerialize)]
struct VerifyBufferedArgs<'a> {
    witness: &'a [u8],
    nullifier: [u8; 32],
}

#[derive(BorshSerialize)]
struct ClaimArgs {
    nullifier: [u8; 32],
}

#[derive(BorshSerialize)]
struct InitializeArgs<'a> {
    root: [u8; 32],
    name: &'a str,
    symbol: &'a str,
    uri: &'a str,
}

#[derive(BorshSerialize)]
struct UpdateRootArgs {
    root: [u8; 32],
}

/// SetComputeUnitLimit, then SetComputeUnitPrice when a price is configured.
pub fn compute_budget(params: &MintParams) -> Vec<Instruction> {
    let mut limit = vec![2u8];
    limit.extend_from_slice(&params.compute_unit_limit.to_le_bytes());
    let mut out = vec![Instruction::new_with_bytes(params.compute_budget_program_id, &limit, vec![])];
    if let Some(price) = params.compute_unit_price {
        let mut data = vec![3u8];
        data.extend_from_slice(&price.to_le_bytes());
        out.push(Instruction::new_with_bytes(params.compute_budget_program_id, &data, vec![]));
    }
    out
}

/// System CreateAccount: `payer` funds `storage` with `lamports` and `space` bytes owned by `owner`.
pub fn create_storage_account(
    payer: &Pubkey,
    storage: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Instruction {
    let mut data = Vec::with_capacity(52);
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    data.extend_from_slice(&space.to_le_bytes());
    data.extend_from_slice(owner.as_ref());
    Instruction::new_with_bytes(
        system_program::ID,
        &data,
        vec![AccountMeta::new(*payer, true), AccountMeta::new(*storage, true)],
    )
}

/// Writes `payload` at `offset` of the storage account. Idempotent for equal bytes.
pub fn write_chunk(program_id: &Pubkey, storage: &Pubkey, payer: &Pubkey, offset: usize, payload: &[u8]) -> Result<Instruction> {
    if payload.len() > MAX_CHUNK_SIZE {
        return Err(InstructionError::PayloadTooLarge { len: payload.len(), max: MAX_CHUNK_SIZE });
    }
    let offset = u32::try_from(offset).map_err(|_| InstructionError::OffsetOverflow(offset))?;
    program_ix(
        *program_id,
        "write_chunk",
        &WriteChunkArgs { offset, payload },
        vec![AccountMeta::new(*storage, false), AccountMeta::new_readonly(*payer, true)],
    )
}

/// Where the verifier reads the proof bytes from.
#[derive(Clone, Copy, Debug)]
pub enum ProofSource<'a> {
    Inline(&'a [u8]),
    Buffered(Pubkey),
}

/// `verify_proof` or `verify_proof_buffered`, depending on `source`.
pub fn verify(
    params: &MintParams,
    user: &Pubkey,
    nullifier_record: &Pubkey,
    source: ProofSource<'_>,
    witness: &[u8],
    nullifier: &Nullifier,
) -> Result<Instruction> {
    let mut accounts = vec![
        AccountMeta::new(*user, true),
        AccountMeta::new(params.config_address, false),
        AccountMeta::new(*nullifier_record, false),
        AccountMeta::new_readonly(system_program::ID, false),
        AccountMeta::new_readonly(params.verifier_program_id, false),
    ];
    let nullifier = *nullifier.as_bytes();
    match source {
        ProofSource::Inline(proof) => program_ix(
            params.program_id,
            "verify_proof",
            &VerifyProofArgs { proof, witness, nullifier },
            accounts,
        ),
        ProofSource::Buffered(storage) => {
            accounts.push(AccountMeta::new_readonly(storage, false));
            program_ix(
                params.program_id,
                "verify_proof_buffered",
                &VerifyBufferedArgs { witness, nullifier },
                accounts,
            )
        }
    }
}

/// `claim_nft`: mints one unit of the fresh `asset_mint` into the user's associated account.
pub fn claim(
    params: &MintParams,
    user: &Pubkey,
    nullifier_record: &Pubkey,
    asset_mint: &Pubkey,
    token_account: &Pubkey,
    nullifier: &Nullifier,
) -> Result<Instruction> {
    program_ix(
        params.program_id,
        "claim_nft",
        &ClaimArgs { nullifier: *nullifier.as_bytes() },
        vec![
            AccountMeta::new(*user, true),
            AccountMeta::new(params.config_address, false),
            AccountMeta::new(*nullifier_record, false),
            AccountMeta::new(*asset_mint, true),
            AccountMeta::new(*token_account, false),
            AccountMeta::new_readonly(system_program::ID, false),
            AccountMeta::new_readonly(params.token_program_id, false),
            AccountMeta::new_readonly(params.associated_token_program_id, false),
            AccountMeta::new_readonly(sysvar::rent::ID, false),
        ],
    )
}

/// Capacity of the config record's string fields, in bytes.
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_SYMBOL_LEN: usize = 10;
pub const MAX_URI_LEN: usize = 200;

/// Collection metadata stored next to the root.
#[derive(Clone, Copy, Debug)]
pub struct Collection<'a> {
    pub name: &'a str,
    pub symbol: &'a str,
    pub uri: &'a str,
}

impl Collection<'_> {
    fn check(&self) -> Result<()> {
        for (field, value, max) in [
            ("name", self.name, MAX_NAME_LEN),
            ("symbol", self.symbol, MAX_SYMBOL_LEN),
            ("uri", self.uri, MAX_URI_LEN),
        ] {
            if value.len() > max {
                return Err(InstructionError::FieldTooLong { field, len: value.len(), max });
            }
        }
        Ok(())
    }
}

/// `initialize`: creates the config record with the first root. The authority pays and signs.
pub fn initialize(params: &MintParams, authority: &Pubkey, root: &Node, collection: &Collection<'_>) -> Result<Instruction> {
    collection.check()?;
    program_ix(
        params.program_id,
        "initialize",
        &InitializeArgs { root: *root, name: collection.name, symbol: collection.symbol, uri: collection.uri },
        vec![
            AccountMeta::new(*authority, true),
            AccountMeta::new(params.config_address, false),
            AccountMeta::new_readonly(system_program::ID, false),
        ],
    )
}

/// `update_root`: publishes a rebuilt table's root. Signed by the config authority.
pub fn update_root(params: &MintParams, authority: &Pubkey, root: &Node) -> Result<Instruction> {
    program_ix(
        params.program_id,
        "update_root",
        &UpdateRootArgs { root: *root },
        vec![AccountMeta::new_readonly(*authority, true), AccountMeta::new(params.config_address, false)],
    )
}
