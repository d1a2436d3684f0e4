//! Chunked proof upload into a temporary storage account.
//!
//! Idle → StorageAllocated → ChunksPlanned → ChunksSubmitted → ChunksConfirmed → Complete,
//! with Failed reachable from every non-terminal state.
//!
//! Writes are by offset, so chunks are commutative and idempotent: they go out
//! back-to-back, confirmations are awaited together, and a retry round first
//! reads the account back and skips ranges that already hold the right bytes.
//! Allocation is never retried. Abandoned storage accounts are not reclaimed.

use anchor_lang::solana_program::pubkey::Pubkey;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use permit_core::{ChunkPlan, CoreError};

use crate::{
    config::MintParams,
    instructions::{self, InstructionError},
    ledger::{dispatch, submit, Keypair, Ledger, LedgerError, TxSignature, Wallet},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    StorageAllocated,
    ChunksPlanned,
    ChunksSubmitted,
    ChunksConfirmed,
    Complete,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn can_advance_to(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, StorageAllocated)
            | (StorageAllocated, ChunksPlanned)
            | (ChunksPlanned, ChunksSubmitted)
            | (ChunksSubmitted, ChunksConfirmed)
            | (ChunksConfirmed, Complete) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("storage allocation failed: {0}")]
    Allocation(#[source] LedgerError),
    #[error("chunk plan: {0}")]
    Plan(#[from] CoreError),
    #[error("instruction: {0}")]
    Instruction(#[from] InstructionError),
    #[error("chunk {index} rejected: {source}")]
    ChunkRejected { index: usize, source: LedgerError },
    #[error("chunk {index} not durable after {attempts} attempts: {last}")]
    ChunkExhausted { index: usize, attempts: u32, last: LedgerError },
    #[error("session sized for {expected} bytes, proof has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("illegal upload transition {from:?} -> {to:?}")]
    IllegalTransition { from: UploadState, to: UploadState },
}

/// Per-attempt upload state. Owns the storage keypair; never shared between attempts.
#[derive(Debug)]
pub struct UploadSession {
    storage: Keypair,
    total_len: usize,
    plan: Option<ChunkPlan>,
    confirmed: Vec<bool>,
    submissions: u32,
    state: UploadState,
    history: Vec<UploadState>,
}

impl UploadSession {
    fn new(total_len: usize) -> Self {
        Self {
            storage: Keypair::generate(),
            total_len,
            plan: None,
            confirmed: Vec::new(),
            submissions: 0,
            state: UploadState::Idle,
            history: vec![UploadState::Idle],
        }
    }

    pub fn storage_address(&self) -> Pubkey {
        self.storage.pubkey()
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Every state visited, in order, starting with Idle.
    pub fn transitions(&self) -> &[UploadState] {
        &self.history
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn plan(&self) -> Option<&ChunkPlan> {
        self.plan.as_ref()
    }

    pub fn confirmed(&self) -> &[bool] {
        &self.confirmed
    }

    /// write_chunk transactions sent so far, retries included.
    pub fn submissions(&self) -> u32 {
        self.submissions
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            storage: self.storage_address().to_string(),
            total_len: self.total_len,
            total_chunks: self.plan.as_ref().map_or(0, ChunkPlan::total_chunks),
            submissions: self.submissions,
        }
    }

    fn advance(&mut self, next: UploadState) -> Result<(), UploadError> {
        if !self.state.can_advance_to(next) {
            return Err(UploadError::IllegalTransition { from: self.state, to: next });
        }
        debug!(from = ?self.state, to = ?next, "upload transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = UploadState::Failed;
            self.history.push(UploadState::Failed);
        }
    }

    fn pending(&self) -> Vec<usize> {
        self.confirmed
            .iter()
            .enumerate()
            .filter_map(|(i, done)| (!done).then_some(i))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub storage: String,
    pub total_len: usize,
    pub total_chunks: usize,
    pub submissions: u32,
}

pub struct ProofUploadCoordinator<'a> {
    params: &'a MintParams,
    ledger: &'a dyn Ledger,
    wallet: &'a dyn Wallet,
}

impl<'a> ProofUploadCoordinator<'a> {
    pub fn new(params: &'a MintParams, ledger: &'a dyn Ledger, wallet: &'a dyn Wallet) -> Self {
        Self { params, ledger, wallet }
    }

    /// Fresh session with a new storage keypair.
    pub fn begin(&self, proof_len: usize) -> UploadSession {
        UploadSession::new(proof_len)
    }

    /// Allocates, plans, writes and confirms. On error the session ends in Failed.
    pub async fn run(&self, session: &mut UploadSession, proof: &[u8]) -> Result<(), UploadError> {
        let result = self.drive(session, proof).await;
        if let Err(e) = &result {
            warn!(storage = %session.storage_address(), state = ?session.state(), error = %e, "upload failed");
            session.fail();
        }
        result
    }

    /// [`begin`](Self::begin) plus [`run`](Self::run).
    pub async fn upload(&self, proof: &[u8]) -> Result<UploadSession, UploadError> {
        let mut session = self.begin(proof.len());
        self.run(&mut session, proof).await?;
        Ok(session)
    }

    async fn drive(&self, session: &mut UploadSession, proof: &[u8]) -> Result<(), UploadError> {
        if session.total_len != proof.len() {
            return Err(UploadError::LengthMismatch { expected: session.total_len, actual: proof.len() });
        }
        self.allocate(session).await?;

        let plan = ChunkPlan::for_bytes(proof, self.params.chunk_size)?;
        session.confirmed = vec![false; plan.total_chunks()];
        session.plan = Some(plan);
        session.advance(UploadState::ChunksPlanned)?;

        let max_attempts = self.params.max_chunk_attempts;
        let mut last_errors: Vec<Option<LedgerError>> = vec![None; session.confirmed.len()];
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.skip_durable(session, proof).await;
            }
            let pending = session.pending();
            if pending.is_empty() {
                break;
            }
            if attempt > 1 {
                warn!(attempt, pending = pending.len(), "retrying chunk writes");
            }

            let sent = self.submit_round(session, proof, &pending, &mut last_errors).await?;
            if session.state == UploadState::ChunksPlanned {
                session.advance(UploadState::ChunksSubmitted)?;
            }

            let ledger = self.ledger;
            let outcomes = join_all(
                sent.iter()
                    .map(|(index, sig)| async move { (*index, ledger.confirm(sig).await) }),
            )
            .await;
            for (index, outcome) in outcomes {
                match outcome {
                    Ok(()) => {
                        debug!(chunk = index, "chunk durable");
                        session.confirmed[index] = true;
                    }
                    Err(e) => {
                        warn!(chunk = index, attempt, error = %e, "chunk confirmation failed");
                        Self::check_retryable(index, &e)?;
                        last_errors[index] = Some(e);
                    }
                }
            }
        }

        // a write may have landed even though its last confirmation timed out
        if !session.pending().is_empty() {
            self.skip_durable(session, proof).await;
        }
        if let Some(index) = session.pending().first().copied() {
            let last = last_errors[index]
                .take()
                .unwrap_or_else(|| LedgerError::Timeout("no confirmation".into()));
            return Err(UploadError::ChunkExhausted { index, attempts: max_attempts, last });
        }
        if session.state == UploadState::ChunksPlanned {
            // nothing was sent: zero-length artifact
            session.advance(UploadState::ChunksSubmitted)?;
        }
        session.advance(UploadState::ChunksConfirmed)?;
        session.advance(UploadState::Complete)?;
        info!(
            storage = %session.storage_address(),
            chunks = session.confirmed.len(),
            submissions = session.submissions,
            "proof upload complete"
        );
        Ok(())
    }

    async fn allocate(&self, session: &mut UploadSession) -> Result<(), UploadError> {
        let payer = self.wallet.pubkey();
        let space = session.total_len;
        let lamports = self
            .ledger
            .minimum_balance(space)
            .await
            .map_err(UploadError::Allocation)?;
        let ix = instructions::create_storage_account(
            &payer,
            &session.storage_address(),
            lamports,
            space as u64,
            &self.params.program_id,
        );
        submit(self.ledger, self.wallet, vec![ix], vec![session.storage.clone()])
            .await
            .map_err(UploadError::Allocation)?;
        info!(storage = %session.storage_address(), space, lamports, "proof storage allocated");
        session.advance(UploadState::StorageAllocated)
    }

    /// Sends one write per pending chunk without waiting in between.
    async fn submit_round(
        &self,
        session: &mut UploadSession,
        proof: &[u8],
        pending: &[usize],
        last_errors: &mut [Option<LedgerError>],
    ) -> Result<Vec<(usize, TxSignature)>, UploadError> {
        let Some(plan) = session.plan.clone() else {
            return Err(UploadError::IllegalTransition { from: session.state, to: UploadState::ChunksSubmitted });
        };
        let payer = self.wallet.pubkey();
        let storage = session.storage_address();
        let mut sent = Vec::with_capacity(pending.len());
        for &index in pending {
            let chunk = plan.chunks()[index];
            let ix = instructions::write_chunk(
                &self.params.program_id,
                &storage,
                &payer,
                chunk.offset,
                plan.payload(proof, &chunk),
            )?;
            session.submissions += 1;
            match dispatch(self.ledger, self.wallet, vec![ix], vec![]).await {
                Ok(sig) => {
                    debug!(chunk = index, offset = chunk.offset, len = chunk.len, "chunk sent");
                    sent.push((index, sig));
                }
                Err(e) => {
                    warn!(chunk = index, error = %e, "chunk submission failed");
                    Self::check_retryable(index, &e)?;
                    last_errors[index] = Some(e);
                }
            }
        }
        Ok(sent)
    }

    /// Marks pending chunks whose bytes already sit in the storage account.
    async fn skip_durable(&self, session: &mut UploadSession, proof: &[u8]) {
        let Some(plan) = session.plan.as_ref() else { return };
        let stored = match self.ledger.account_data(&session.storage_address()).await {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "storage read-back failed; resubmitting all pending chunks");
                return;
            }
        };
        for chunk in plan.chunks() {
            if session.confirmed[chunk.index] {
                continue;
            }
            if stored.get(chunk.range()) == Some(plan.payload(proof, chunk)) {
                debug!(chunk = chunk.index, "chunk already stored, skipping");
                session.confirmed[chunk.index] = true;
            }
        }
    }

    fn check_retryable(index: usize, e: &LedgerError) -> Result<(), UploadError> {
        if e.is_transient() {
            Ok(())
        } else {
            Err(UploadError::ChunkRejected { index, source: e.clone() })
        }
    }
}
