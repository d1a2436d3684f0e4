//! Claim flow: one sequential state machine per attempt.
//!
//! ResolvePermit → RequestProof → DeriveNullifier → (UploadProof) → SubmitVerifyAndClaim → Done,
//! Failed from any step. Local failures (unknown secret, no wallet) happen before
//! any network call. The verify and claim instructions always travel in one
//! transaction, so a claim can never land without its verification.

use std::sync::Arc;

use anchor_lang::solana_program::pubkey::Pubkey;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use permit_core::{CoreError, Nullifier, NullifierScheme, PermitTable};

use crate::{
    accounts,
    config::MintParams,
    instructions::{self, InstructionError, ProofSource},
    ledger::{submit, Keypair, Ledger, LedgerError, TxSignature, Wallet},
    prover::{ProofRequest, Prover, ProverError},
    upload::{ProofUploadCoordinator, UploadError, UploadSummary},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MintStep {
    ResolvePermit,
    RequestProof,
    DeriveNullifier,
    UploadProof,
    SubmitVerifyAndClaim,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum MintError {
    #[error("secret is not on the permit list")]
    InvalidSecret,
    #[error("no wallet connected")]
    WalletUnavailable,
    #[error("permit already claimed (nullifier {nullifier})")]
    AlreadyClaimed { nullifier: String },
    #[error("proof upload failed: {0}")]
    UploadFailure(#[from] UploadError),
    #[error("{display}")]
    NetworkOrSigningFailure { display: String, detail: String },
    #[error("capacity exceeded: {count} secrets, capacity {capacity}")]
    CapacityExceeded { count: usize, capacity: u64 },
    #[error("prover misconfigured: {0}")]
    ProverMisconfigured(String),
    #[error("proof generation failed: {0}")]
    ProofGeneration(#[from] ProverError),
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    #[error("permit table: {0}")]
    Table(CoreError),
    #[error("instruction: {0}")]
    Instruction(#[from] InstructionError),
}

impl From<CoreError> for MintError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::CapacityExceeded { count, capacity, .. } => Self::CapacityExceeded { count, capacity },
            CoreError::ProofTooShort { .. } => Self::InvalidProof(e.to_string()),
            other => Self::Table(other),
        }
    }
}

/// Successful claim.
#[derive(Clone, Debug)]
pub struct MintReceipt {
    pub signature: TxSignature,
    pub nullifier: Nullifier,
    pub nullifier_address: Pubkey,
    pub asset_mint: Pubkey,
    pub token_account: Pubkey,
    /// Present when the proof went through the chunked upload.
    pub upload: Option<UploadSummary>,
}

/// One claim attempt: the steps it went through and how it ended.
#[derive(Debug)]
pub struct MintAttempt {
    steps: Vec<MintStep>,
    pub result: Result<MintReceipt, MintError>,
}

impl MintAttempt {
    pub fn steps(&self) -> &[MintStep] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<MintStep> {
        self.steps.last().copied()
    }

    pub fn into_result(self) -> Result<MintReceipt, MintError> {
        self.result
    }
}

pub struct MintOrchestrator {
    params: Arc<MintParams>,
    permits: Arc<PermitTable>,
    prover: Arc<dyn Prover>,
    ledger: Arc<dyn Ledger>,
    wallet: Option<Arc<dyn Wallet>>,
}

impl MintOrchestrator {
    pub fn new(
        params: Arc<MintParams>,
        permits: Arc<PermitTable>,
        prover: Arc<dyn Prover>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self { params, permits, prover, ledger, wallet: None }
    }

    /// Builds the permit table in place; fails with CapacityExceeded if the list does not fit.
    pub fn from_secrets<S: AsRef<str>>(
        params: Arc<MintParams>,
        secrets: &[S],
        depth: u32,
        prover: Arc<dyn Prover>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self, MintError> {
        let table = PermitTable::build(secrets, depth)?;
        Ok(Self::new(params, Arc::new(table), prover, ledger))
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn params(&self) -> &MintParams {
        &self.params
    }

    pub fn permits(&self) -> &PermitTable {
        &self.permits
    }

    /// Runs one claim attempt for `secret`.
    pub async fn mint(&self, secret: &str) -> Result<MintReceipt, MintError> {
        self.attempt(secret).await.into_result()
    }

    /// Like [`mint`](Self::mint), keeping the step history.
    pub async fn attempt(&self, secret: &str) -> MintAttempt {
        let mut steps = Vec::new();
        let result = self.run(secret, &mut steps).await;
        match &result {
            Ok(receipt) => {
                steps.push(MintStep::Done);
                info!(nullifier = %receipt.nullifier.to_hex(), signature = %receipt.signature, "claim complete");
            }
            Err(e) => {
                let at = steps.last().copied();
                steps.push(MintStep::Failed);
                warn!(step = ?at, error = %e, "claim failed");
            }
        }
        MintAttempt { steps, result }
    }

    async fn run(&self, secret: &str, steps: &mut Vec<MintStep>) -> Result<MintReceipt, MintError> {
        let params = &*self.params;
        let ledger = &*self.ledger;

        enter(steps, MintStep::ResolvePermit);
        let permit = self.permits.lookup(secret).ok_or(MintError::InvalidSecret)?;
        let wallet = self.wallet.as_deref().ok_or(MintError::WalletUnavailable)?;
        let user = wallet.pubkey();

        // Secret-keyed nullifiers are known up front; check before paying for a proof.
        if let Some(early) = params.deriver.preflight(permit.secret.as_bytes()) {
            self.preflight(&early).await?;
        }

        enter(steps, MintStep::RequestProof);
        let artifact = self.prover.prove(&ProofRequest::from(permit)).await?;
        match artifact.bound_root() {
            Some(root) if *root == permit.root => {}
            Some(root) => {
                return Err(MintError::ProverMisconfigured(format!(
                    "proof bound to root {}, table root is {}",
                    hex::encode(root),
                    hex::encode(permit.root)
                )))
            }
            None => return Err(MintError::ProverMisconfigured("proof has no public inputs".into())),
        }
        debug!(proof_len = artifact.proof.len(), inputs = artifact.public_inputs.len(), "proof generated");

        enter(steps, MintStep::DeriveNullifier);
        let nullifier = params.deriver.derive(permit.secret.as_bytes(), &artifact.proof)?;
        if params.deriver.scheme() == NullifierScheme::ProofPrefix {
            self.preflight(&nullifier).await?;
        }
        let (nullifier_address, _) = accounts::nullifier_address(&params.program_id, &params.nullifier_seed, &nullifier);

        let mut upload = None;
        let source = if artifact.proof.len() > params.inline_proof_limit {
            enter(steps, MintStep::UploadProof);
            let coordinator = ProofUploadCoordinator::new(params, ledger, wallet);
            let session = coordinator.upload(&artifact.proof).await?;
            let storage = session.storage_address();
            upload = Some(session.summary());
            ProofSource::Buffered(storage)
        } else {
            ProofSource::Inline(&artifact.proof)
        };

        enter(steps, MintStep::SubmitVerifyAndClaim);
        let asset_mint = Keypair::generate();
        let asset_mint_address = asset_mint.pubkey();
        let token_account = accounts::associated_token_address(
            &user,
            &asset_mint_address,
            &params.token_program_id,
            &params.associated_token_program_id,
        );
        let mut ixs = instructions::compute_budget(params);
        ixs.push(instructions::verify(params, &user, &nullifier_address, source, &artifact.witness(), &nullifier)?);
        ixs.push(instructions::claim(
            params,
            &user,
            &nullifier_address,
            &asset_mint_address,
            &token_account,
            &nullifier,
        )?);
        let signature = submit(ledger, wallet, ixs, vec![asset_mint])
            .await
            .map_err(|e| classify(params, &nullifier, e))?;

        Ok(MintReceipt {
            signature,
            nullifier,
            nullifier_address,
            asset_mint: asset_mint_address,
            token_account,
            upload,
        })
    }

    /// Reads the nullifier record; an existing record means the permit is spent.
    /// A failed read is not fatal: the ledger enforces uniqueness on submit anyway.
    async fn preflight(&self, nullifier: &Nullifier) -> Result<(), MintError> {
        if !self.params.preflight_nullifier_check {
            return Ok(());
        }
        let (address, _) = accounts::nullifier_address(&self.params.program_id, &self.params.nullifier_seed, nullifier);
        match self.ledger.account_data(&address).await {
            Ok(data) if accounts::nullifier_used(data.as_deref()) => {
                info!(nullifier = %nullifier.to_hex(), "nullifier record exists");
                Err(MintError::AlreadyClaimed { nullifier: nullifier.to_hex() })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "nullifier pre-flight read failed; continuing");
                Ok(())
            }
        }
    }
}

fn enter(steps: &mut Vec<MintStep>, step: MintStep) {
    debug!(?step, "mint step");
    steps.push(step);
}

/// Maps a ledger failure of the final transaction onto the user-facing taxonomy.
/// Only a program rejection naming the configured code or pattern counts as spent.
pub fn classify(params: &MintParams, nullifier: &Nullifier, err: LedgerError) -> MintError {
    let detail = err.detail();
    if matches!(err, LedgerError::Rejected { .. }) {
        let code_hit = program_error_codes(&detail).contains(&params.already_claimed_code);
        if code_hit || params.already_claimed_patterns.iter().any(|p| detail.contains(p.as_str())) {
            return MintError::AlreadyClaimed { nullifier: nullifier.to_hex() };
        }
    }
    warn!(%detail, "claim transaction failed");
    MintError::NetworkOrSigningFailure { display: truncate(&err.to_string(), params.display_truncate), detail }
}

/// Codes from `custom program error: 0x1772` (hex) and `Error Number: 6002` (decimal).
fn program_error_codes(text: &str) -> Vec<u32> {
    let mut codes = Vec::new();
    for (marker, radix) in [("custom program error: 0x", 16), ("Error Number: ", 10)] {
        for (at, _) in text.match_indices(marker) {
            let digits: String = text[at + marker.len()..].chars().take_while(|c| c.is_digit(radix)).collect();
            if let Ok(code) = u32::from_str_radix(&digits, radix) {
                codes.push(code);
            }
        }
    }
    codes
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
