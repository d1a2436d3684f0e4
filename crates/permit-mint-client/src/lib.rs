//! Claim-time client of the permit mint.
//!
//! config:       deployment identifiers, validated into MintParams.
//! accounts:     PDA / associated-token addressing, nullifier record layout.
//! instructions: discriminators and instruction builders.
//! ledger:       Ledger / Wallet seams and the transaction envelope.
//! prover:       Prover seam and public witness encoding.
//! upload:       chunked proof upload (ProofUploadCoordinator).
//! orchestrator: the per-attempt claim flow (MintOrchestrator).

pub mod accounts;
pub mod config;
pub mod instructions;
pub mod ledger;
pub mod orchestrator;
pub mod prover;
pub mod upload;

pub use anchor_lang::solana_program::{hash::Hash, instruction::Instruction, pubkey::Pubkey};

pub use config::{ConfigError, MintConfig, MintParams};
pub use ledger::{Keypair, KeyfileError, Ledger, LedgerError, LocalWallet, SignedTransaction, TransactionRequest, TxSignature, Wallet};
pub use orchestrator::{MintAttempt, MintError, MintOrchestrator, MintReceipt, MintStep};
pub use prover::{ProofArtifact, ProofRequest, Prover, ProverError};
pub use upload::{ProofUploadCoordinator, UploadError, UploadSession, UploadState, UploadSummary};
