//! Ledger and wallet seams, plus the transaction envelope passed between them.
//!
//! The ledger is an external collaborator reached through async calls; every
//! transaction is built fresh (new blockhash) per submission so a retry never
//! reuses a stale context.

use core::fmt;
use std::{fs, path::Path};

use anchor_lang::solana_program::{
    hash::Hash,
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum LedgerError {
    #[error("transaction rejected: {message}")]
    Rejected { message: String, logs: Vec<String> },
    #[error("network: {0}")]
    Network(String),
    #[error("confirmation timed out: {0}")]
    Timeout(String),
    #[error("signing: {0}")]
    Signing(String),
}

impl LedgerError {
    /// Full text including program logs, for pattern matching and diagnostics.
    pub fn detail(&self) -> String {
        match self {
            Self::Rejected { message, logs } if !logs.is_empty() => {
                format!("{message}\n{}", logs.join("\n"))
            }
            other => other.to_string(),
        }
    }

    /// Whether a resubmission with a fresh context may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum KeyfileError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("keypair file holds {0} bytes, expected 64")]
    Length(usize),
    #[error("public half does not match the secret key")]
    Mismatch,
}

/// Ed25519 keypair for accounts created per attempt (asset mint, proof storage).
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&seed))
    }

    /// Reads a keypair file: a JSON array of 64 bytes, secret seed then public key.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, KeyfileError> {
        let bytes: Vec<u8> = serde_json::from_str(&fs::read_to_string(path)?)?;
        let bytes: [u8; 64] = bytes.as_slice().try_into().map_err(|_| KeyfileError::Length(bytes.len()))?;
        SigningKey::from_keypair_bytes(&bytes).map(Self).map_err(|_| KeyfileError::Mismatch)
    }

    /// Secret seed followed by the public key, the keypair file layout.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_keypair_bytes()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> TxSignature {
        TxSignature(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.pubkey())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxSignature(pub [u8; 64]);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", &hex::encode(&self.0[..8]))
    }
}

/// Unsigned transaction handed to the wallet. Co-signers (fresh keypairs) ride along.
#[derive(Debug)]
pub struct TransactionRequest {
    pub fee_payer: Pubkey,
    pub recent_blockhash: Hash,
    pub instructions: Vec<Instruction>,
    pub co_signers: Vec<Keypair>,
}

impl TransactionRequest {
    pub fn message(&self) -> Message {
        Message::new_with_blockhash(&self.instructions, Some(&self.fee_payer), &self.recent_blockhash)
    }

    /// Signs with `payer` and every co-signer. The payer's signature comes first.
    pub fn sign_with(self, payer: &Keypair) -> Result<SignedTransaction, LedgerError> {
        if payer.pubkey() != self.fee_payer {
            return Err(LedgerError::Signing(format!(
                "payer {} does not match fee payer {}",
                payer.pubkey(),
                self.fee_payer
            )));
        }
        let message = self.message().serialize();
        let mut signatures = vec![(payer.pubkey(), payer.sign(&message))];
        signatures.extend(self.co_signers.iter().map(|k| (k.pubkey(), k.sign(&message))));
        Ok(SignedTransaction {
            fee_payer: self.fee_payer,
            recent_blockhash: self.recent_blockhash,
            instructions: self.instructions,
            message,
            signatures,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SignedTransaction {
    pub fee_payer: Pubkey,
    pub recent_blockhash: Hash,
    pub instructions: Vec<Instruction>,
    /// Serialized message the signatures cover.
    pub message: Vec<u8>,
    pub signatures: Vec<(Pubkey, TxSignature)>,
}

impl SignedTransaction {
    /// Signature identifying the transaction (fee payer's).
    pub fn id(&self) -> Option<TxSignature> {
        self.signatures.first().map(|(_, s)| *s)
    }

    pub fn is_signed_by(&self, key: &Pubkey) -> bool {
        self.signatures.iter().any(|(k, _)| k == key)
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Submits without waiting for durability.
    async fn send(&self, tx: &SignedTransaction) -> Result<TxSignature, LedgerError>;

    /// Waits until `signature` is durable, or reports why it never will be.
    async fn confirm(&self, signature: &TxSignature) -> Result<(), LedgerError>;

    /// Raw account data; `None` when the account does not exist.
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Rent-exempt balance for `space` bytes.
    async fn minimum_balance(&self, space: usize) -> Result<u64, LedgerError>;
}

#[async_trait]
pub trait Wallet: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    async fn sign_transaction(&self, request: TransactionRequest) -> Result<SignedTransaction, LedgerError>;
}

/// Wallet backed by an in-process keypair.
#[derive(Debug)]
pub struct LocalWallet(Keypair);

impl LocalWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self(keypair)
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn pubkey(&self) -> Pubkey {
        self.0.pubkey()
    }

    async fn sign_transaction(&self, request: TransactionRequest) -> Result<SignedTransaction, LedgerError> {
        request.sign_with(&self.0)
    }
}

/// Builds, signs and sends one transaction on a fresh blockhash. Does not confirm.
pub async fn dispatch(
    ledger: &dyn Ledger,
    wallet: &dyn Wallet,
    instructions: Vec<Instruction>,
    co_signers: Vec<Keypair>,
) -> Result<TxSignature, LedgerError> {
    let request = TransactionRequest {
        fee_payer: wallet.pubkey(),
        recent_blockhash: ledger.latest_blockhash().await?,
        instructions,
        co_signers,
    };
    let signed = wallet.sign_transaction(request).await?;
    ledger.send(&signed).await
}

/// [`dispatch`] followed by confirmation.
pub async fn submit(
    ledger: &dyn Ledger,
    wallet: &dyn Wallet,
    instructions: Vec<Instruction>,
    co_signers: Vec<Keypair>,
) -> Result<TxSignature, LedgerError> {
    let sig = dispatch(ledger, wallet, instructions, co_signers).await?;
    ledger.confirm(&sig).await?;
    Ok(sig)
}
