//! In-memory ledger, prover and wallet used by the integration tests.
//!
//! MockLedger executes the mint program's instructions against a map of
//! accounts, one transaction at a time and atomically: either every
//! instruction applies or none does. A proof is "valid" when its last 32 bytes
//! are SHA-256 of the rest and its witness carries the configured root.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use anchor_lang::solana_program::{hash::hashv, system_program};
use async_trait::async_trait;

use permit_core::{Node, PermitTable};
use permit_mint_client::{
    accounts::{STATUS_CLAIMED, STATUS_VERIFIED},
    config::{MintConfig, MintParams},
    instructions::discriminator,
    prover::{ProofArtifact, ProofRequest, Prover, ProverError},
    Hash, Keypair, Ledger, LedgerError, LocalWallet, MintOrchestrator, Pubkey, SignedTransaction,
    TransactionRequest, TxSignature, Wallet,
};

pub fn secrets(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("permit-{i}")).collect()
}

pub fn params_with(f: impl FnOnce(&mut MintConfig)) -> MintParams {
    let mut cfg = MintConfig::default();
    f(&mut cfg);
    MintParams::from_config(&cfg).unwrap()
}

/// Named ledger interactions, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Blockhash,
    Send(&'static str),
    Confirm(&'static str),
    Read,
    Rent,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, Vec<u8>>,
    root: Node,
    events: Vec<Event>,
    /// Landed transactions by signature, with the label of their main instruction.
    landed: HashMap<TxSignature, &'static str>,
    send_faults: HashMap<&'static str, VecDeque<LedgerError>>,
    confirm_faults: HashMap<&'static str, VecDeque<LedgerError>>,
    /// Byte of the storage account flipped right before a buffered verify.
    corrupt_storage_byte: Option<usize>,
}

pub struct MockLedger {
    params: MintParams,
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new(params: MintParams, root: Node) -> Arc<Self> {
        Arc::new(Self { params, state: Mutex::new(State { root, ..Default::default() }) })
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn network_calls(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn sends(&self, label: &str) -> usize {
        self.events().iter().filter(|e| matches!(e, Event::Send(l) if *l == label)).count()
    }

    pub fn account(&self, key: &Pubkey) -> Option<Vec<u8>> {
        self.state.lock().unwrap().accounts.get(key).cloned()
    }

    pub fn set_account(&self, key: Pubkey, data: Vec<u8>) {
        self.state.lock().unwrap().accounts.insert(key, data);
    }

    /// The next `n` sends of `label` fail with `err` and change nothing.
    pub fn fail_sends(&self, label: &'static str, n: usize, err: LedgerError) {
        let mut st = self.state.lock().unwrap();
        st.send_faults.entry(label).or_default().extend(std::iter::repeat(err).take(n));
    }

    /// The next `n` transactions of `label` land but their confirmation reports `err`.
    pub fn fail_confirms(&self, label: &'static str, n: usize, err: LedgerError) {
        let mut st = self.state.lock().unwrap();
        st.confirm_faults.entry(label).or_default().extend(std::iter::repeat(err).take(n));
    }

    pub fn corrupt_storage_before_verify(&self, offset: usize) {
        self.state.lock().unwrap().corrupt_storage_byte = Some(offset);
    }

    /// Main instruction of a transaction; verify wins over the claim riding with it.
    fn label(&self, tx: &SignedTransaction) -> &'static str {
        let names = ["verify_proof", "verify_proof_buffered", "claim_nft", "write_chunk", "update_root"];
        for name in names {
            let disc = discriminator(name);
            if tx
                .instructions
                .iter()
                .any(|ix| ix.program_id == self.params.program_id && ix.data.starts_with(&disc))
            {
                return name;
            }
        }
        if tx.instructions.iter().any(|ix| ix.program_id == system_program::ID) {
            return "create_account";
        }
        "unknown"
    }

    fn execute(&self, st: &mut State, tx: &SignedTransaction) -> Result<(), LedgerError> {
        let mut accounts = st.accounts.clone();
        let mut corrupt = st.corrupt_storage_byte;
        for ix in &tx.instructions {
            for meta in ix.accounts.iter().filter(|m| m.is_signer) {
                if !tx.is_signed_by(&meta.pubkey) {
                    return Err(reject(format!("missing signature for {}", meta.pubkey)));
                }
            }
            if ix.program_id == self.params.compute_budget_program_id {
                continue;
            }
            if ix.program_id == system_program::ID {
                let space = u64::from_le_bytes(ix.data[12..20].try_into().unwrap()) as usize;
                let target = ix.accounts[1].pubkey;
                if accounts.contains_key(&target) {
                    return Err(reject("Allocate: account already in use".into()));
                }
                accounts.insert(target, vec![0; space]);
                continue;
            }
            if ix.program_id != self.params.program_id {
                return Err(reject(format!("unknown program {}", ix.program_id)));
            }
            let (disc, args) = ix.data.split_at(8);
            if disc == discriminator("write_chunk") {
                let offset = u32_le(args, 0) as usize;
                let len = u32_le(args, 4) as usize;
                let payload = &args[8..8 + len];
                let storage = accounts
                    .get_mut(&ix.accounts[0].pubkey)
                    .ok_or_else(|| reject("storage account missing".into()))?;
                if offset + len > storage.len() {
                    return Err(reject("write past end of storage".into()));
                }
                storage[offset..offset + len].copy_from_slice(payload);
            } else if disc == discriminator("verify_proof") || disc == discriminator("verify_proof_buffered") {
                let (proof, witness, nullifier) = if disc == discriminator("verify_proof") {
                    let (proof, rest) = borsh_bytes(args);
                    let (witness, rest) = borsh_bytes(rest);
                    (proof.to_vec(), witness.to_vec(), rest.to_vec())
                } else {
                    let (witness, rest) = borsh_bytes(args);
                    let key = ix.accounts[5].pubkey;
                    let storage = accounts
                        .get_mut(&key)
                        .ok_or_else(|| reject("proof storage missing".into()))?;
                    if let Some(at) = corrupt.take() {
                        storage[at] ^= 0x01;
                    }
                    (storage.clone(), witness.to_vec(), rest.to_vec())
                };
                if nullifier.len() != 32 {
                    return Err(reject("bad nullifier".into()));
                }
                if witness.get(12..44) != Some(&st.root[..]) {
                    return Err(reject("custom program error: 0x1770 (RootMismatch)".into()));
                }
                if !mock_proof_valid(&proof) {
                    return Err(reject("custom program error: 0x1771 (InvalidProof)".into()));
                }
                let record = ix.accounts[2].pubkey;
                if accounts.contains_key(&record) {
                    return Err(reject(format!("Allocate: account Address {{ address: {record} }} already in use")));
                }
                let mut data = vec![0u8; 10];
                data[8] = STATUS_VERIFIED;
                accounts.insert(record, data);
            } else if disc == discriminator("claim_nft") {
                let record = accounts
                    .get_mut(&ix.accounts[2].pubkey)
                    .ok_or_else(|| reject("nullifier record missing".into()))?;
                if record[8] != STATUS_VERIFIED {
                    return Err(reject("custom program error: 0x1772".into()));
                }
                record[8] = STATUS_CLAIMED;
                accounts.insert(ix.accounts[3].pubkey, vec![0; 82]);
                accounts.insert(ix.accounts[4].pubkey, vec![1; 165]);
            } else if disc == discriminator("update_root") {
                st.root.copy_from_slice(&args[..32]);
            } else {
                return Err(reject("unknown instruction".into()));
            }
        }
        st.accounts = accounts;
        st.corrupt_storage_byte = corrupt;
        Ok(())
    }
}

fn reject(message: String) -> LedgerError {
    LedgerError::Rejected { message, logs: vec![] }
}

fn u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn borsh_bytes(bytes: &[u8]) -> (&[u8], &[u8]) {
    let len = u32_le(bytes, 0) as usize;
    (&bytes[4..4 + len], &bytes[4 + len..])
}

pub fn mock_proof_valid(proof: &[u8]) -> bool {
    if proof.len() < 32 {
        return false;
    }
    let (body, tag) = proof.split_at(proof.len() - 32);
    hashv(&[body]).to_bytes()[..] == tag[..]
}

#[async_trait]
impl Ledger for MockLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.state.lock().unwrap().events.push(Event::Blockhash);
        Ok(Hash::new_unique())
    }

    async fn send(&self, tx: &SignedTransaction) -> Result<TxSignature, LedgerError> {
        let label = self.label(tx);
        let mut st = self.state.lock().unwrap();
        st.events.push(Event::Send(label));
        if let Some(err) = st.send_faults.get_mut(label).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        self.execute(&mut st, tx)?;
        let sig = tx.id().ok_or_else(|| LedgerError::Signing("unsigned".into()))?;
        st.landed.insert(sig, label);
        Ok(sig)
    }

    async fn confirm(&self, signature: &TxSignature) -> Result<(), LedgerError> {
        let mut st = self.state.lock().unwrap();
        let label = st.landed.get(signature).copied().unwrap_or("unknown");
        st.events.push(Event::Confirm(label));
        if let Some(err) = st.confirm_faults.get_mut(label).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if label == "unknown" {
            return Err(LedgerError::Timeout("signature never landed".into()));
        }
        Ok(())
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let mut st = self.state.lock().unwrap();
        st.events.push(Event::Read);
        Ok(st.accounts.get(address).cloned())
    }

    async fn minimum_balance(&self, space: usize) -> Result<u64, LedgerError> {
        self.state.lock().unwrap().events.push(Event::Rent);
        Ok(890_880 + 6_960 * space as u64)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ProverMode {
    Valid,
    WrongRoot,
    NoInputs,
    Broken,
}

/// Proof = body || SHA-256(body), body derived from the secret and padded to `proof_len`.
pub struct MockProver {
    pub proof_len: usize,
    pub mode: ProverMode,
    calls: Mutex<usize>,
}

impl MockProver {
    pub fn new(proof_len: usize) -> Arc<Self> {
        Self::with_mode(proof_len, ProverMode::Valid)
    }

    pub fn with_mode(proof_len: usize, mode: ProverMode) -> Arc<Self> {
        assert!(proof_len >= 96);
        Arc::new(Self { proof_len, mode, calls: Mutex::new(0) })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Prover for MockProver {
    async fn prove(&self, request: &ProofRequest) -> Result<ProofArtifact, ProverError> {
        *self.calls.lock().unwrap() += 1;
        let mut body = Vec::with_capacity(self.proof_len);
        let mut counter = 0u32;
        while body.len() < self.proof_len - 32 {
            body.extend_from_slice(&hashv(&[request.secret.as_bytes(), &counter.to_le_bytes()]).to_bytes());
            counter += 1;
        }
        body.truncate(self.proof_len - 32);
        let tag = hashv(&[&body]).to_bytes();
        body.extend_from_slice(&tag);

        let public_inputs = match self.mode {
            ProverMode::Valid => vec![request.root, [0u8; 32]],
            ProverMode::WrongRoot => vec![[0xee; 32]],
            ProverMode::NoInputs => vec![],
            ProverMode::Broken => return Err(ProverError::Failed("circuit witness unsatisfied".into())),
        };
        Ok(ProofArtifact { proof: body, public_inputs })
    }
}

/// Wallet that refuses to sign, as when the user declines.
pub struct DecliningWallet(pub Pubkey);

#[async_trait]
impl Wallet for DecliningWallet {
    fn pubkey(&self) -> Pubkey {
        self.0
    }

    async fn sign_transaction(&self, _request: TransactionRequest) -> Result<SignedTransaction, LedgerError> {
        Err(LedgerError::Signing("User rejected the request.".into()))
    }
}

pub struct Harness {
    pub table: Arc<PermitTable>,
    pub ledger: Arc<MockLedger>,
    pub prover: Arc<MockProver>,
    pub wallet: Arc<LocalWallet>,
    pub orchestrator: MintOrchestrator,
}

/// Eight permits at depth 20, a ledger holding their root, a funded local wallet.
pub fn harness(params: MintParams, proof_len: usize) -> Harness {
    harness_with_prover(params, MockProver::new(proof_len))
}

pub fn harness_with_prover(params: MintParams, prover: Arc<MockProver>) -> Harness {
    let table = Arc::new(PermitTable::build(&secrets(8), 20).unwrap());
    let ledger = MockLedger::new(params.clone(), table.root());
    let wallet = Arc::new(LocalWallet::new(Keypair::generate()));
    let orchestrator = MintOrchestrator::new(Arc::new(params), table.clone(), prover.clone(), ledger.clone())
        .with_wallet(wallet.clone());
    Harness { table, ledger, prover, wallet, orchestrator }
}
