//! Deterministic account addressing and the nullifier record layout.
//!
//! Layout of the per-nullifier record written by the ledger program:
//! [0..8) anchor discriminator, [8] status, [9] bump.

use anchor_lang::solana_program::pubkey::Pubkey;

use permit_core::Nullifier;

pub const NULLIFIER_RECORD_LEN: usize = 10;
const STATUS_OFFSET: usize = 8;

/// Status byte values of the nullifier record.
pub const STATUS_VERIFIED: u8 = 1;
pub const STATUS_CLAIMED: u8 = 2;

/// Shared config record (holds the published root).
pub fn config_address(program_id: &Pubkey, seed: &[u8]) -> Pubkey {
    Pubkey::find_program_address(&[seed], program_id).0
}

/// Per-nullifier record; existence marks the permit as used.
pub fn nullifier_address(program_id: &Pubkey, seed: &[u8], nullifier: &Nullifier) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[seed, nullifier.as_ref()], program_id)
}

pub fn associated_token_address(
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
    ata_program: &Pubkey,
) -> Pubkey {
    Pubkey::find_program_address(&[owner.as_ref(), token_program.as_ref(), mint.as_ref()], ata_program).0
}

/// Status byte of a nullifier record, `None` if the data is too short to be one.
pub fn nullifier_status(data: &[u8]) -> Option<u8> {
    if data.len() < NULLIFIER_RECORD_LEN {
        return None;
    }
    data.get(STATUS_OFFSET).copied()
}

/// Whether account data at the nullifier address means the permit can no longer be claimed.
///
/// Any record the program has written counts, whatever its status: the
/// program rejects a second `verify_proof` on an existing record.
pub fn nullifier_used(data: Option<&[u8]>) -> bool {
    match data {
        None => false,
        Some(d) if d.is_empty() => false,
        Some(_) => true,
    }
}
