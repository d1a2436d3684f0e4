//! Operator CLI for the permit mint.
//! Prints one JSON object to stdout per command; logs go to stderr (RUST_LOG).
//! Secrets only ever land in the table file, never on stdout.

use std::{fs, path::{Path, PathBuf}, str::FromStr};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD}, Engine};
use clap::{Parser, Subcommand};
use rand::RngCore;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use permit_core::{
    node_to_hex, AuditReport, ChunkPlan, NullifierScheme, PermitTable, Sha256Hasher, DEFAULT_CHUNK_SIZE, DEFAULT_DEPTH,
};
use permit_mint_client::{
    accounts,
    config::MAX_CHUNK_SIZE,
    instructions::{self, Collection},
    Instruction, Keypair, MintConfig, MintParams, Pubkey,
};

/// Defines the CLI and the selected subcommand.
#[derive(Parser, Debug)]
#[command(name = "permit-cli")]
#[command(about = "Permit table and claim tooling for the permit mint", long_about = None)]
struct Cli {
    /// Deployment config (JSON); built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

/// Lists available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generates random secrets and writes their permit table.
    Generate {
        #[arg(long)]
        count: usize,
        #[arg(long, default_value_t = DEFAULT_DEPTH)]
        depth: u32,
        #[arg(long, default_value_t = 24)]
        secret_bytes: usize,
        #[arg(long)]
        out: PathBuf,
    },
    /// Builds a permit table from a secrets file (one per line, '#' comments).
    Build {
        #[arg(long)]
        secrets: PathBuf,
        #[arg(long, default_value_t = DEFAULT_DEPTH)]
        depth: u32,
        #[arg(long)]
        out: PathBuf,
    },
    /// Re-verifies every path of a table and checks nullifier uniqueness.
    Audit {
        #[arg(long)]
        table: PathBuf,
    },
    /// Prints index and path for a secret.
    Lookup {
        #[arg(long)]
        table: PathBuf,
        #[arg(long)]
        secret: String,
    },
    /// Derives a nullifier and its record address with the configured scheme.
    Nullifier {
        #[arg(long)]
        secret: Option<String>,
        /// Base64 proof bytes, for the proof-prefix scheme.
        #[arg(long)]
        proof_b64: Option<String>,
    },
    /// Prints the chunk plan for a proof of the given length.
    Plan {
        #[arg(long)]
        len: usize,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Renders the initialize instruction creating the config record for a table.
    Init {
        #[arg(long)]
        table: PathBuf,
        /// Authority address, or a path to its keypair file.
        #[arg(long)]
        authority: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        uri: String,
    },
    /// Renders the update_root instruction publishing a table's root.
    PublishRoot {
        #[arg(long)]
        table: PathBuf,
        /// Authority address, or a path to its keypair file.
        #[arg(long)]
        authority: String,
    },
}

/// Holds JSON output of generate and build.
#[derive(Serialize)]
struct OutTable {
    root: String,
    depth: u32,
    permits: usize,
    out: String,
}

/// Holds JSON output of audit.
#[derive(Serialize)]
struct OutAudit {
    root: String,
    clean: bool,
    #[serde(flatten)]
    report: AuditReport,
}

/// Holds JSON output of lookup.
#[derive(Serialize)]
struct OutLookup {
    index: u64,
    root: String,
    hash_path: Vec<String>,
}

/// Holds JSON output of nullifier.
#[derive(Serialize)]
struct OutNullifier {
    scheme: NullifierScheme,
    nullifier: String,
    record_address: String,
}

#[derive(Serialize)]
struct OutAccount {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

/// Holds JSON output of init and publish-root.
#[derive(Serialize)]
struct OutInstruction {
    program_id: String,
    accounts: Vec<OutAccount>,
    #[serde(rename = "dataB64")]
    data_b64: String,
}

impl From<&Instruction> for OutInstruction {
    fn from(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id.to_string(),
            accounts: ix
                .accounts
                .iter()
                .map(|a| OutAccount { pubkey: a.pubkey.to_string(), is_signer: a.is_signer, is_writable: a.is_writable })
                .collect(),
            data_b64: STANDARD.encode(&ix.data),
        }
    }
}

fn load_params(config: Option<&Path>) -> Result<MintParams> {
    let cfg = match config {
        Some(path) => MintConfig::from_json_file(path).with_context(|| format!("reading {}", path.display()))?,
        None => MintConfig::default(),
    };
    Ok(MintParams::from_config(&cfg)?)
}

/// A base58 address, else a keypair file whose public key is used.
fn resolve_authority(authority: &str) -> Result<Pubkey> {
    if let Ok(key) = Pubkey::from_str(authority) {
        return Ok(key);
    }
    let keypair = Keypair::from_json_file(authority)
        .with_context(|| format!("authority {authority:?} is neither an address nor a keypair file"))?;
    Ok(keypair.pubkey())
}

fn read_secrets(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

fn random_secrets(count: usize, bytes: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let mut buf = vec![0u8; bytes];
            rng.fill_bytes(&mut buf);
            URL_SAFE_NO_PAD.encode(buf)
        })
        .collect()
}

fn write_table(secrets: &[String], depth: u32, out: &Path) -> Result<OutTable> {
    let table = PermitTable::build(secrets, depth)?;
    table.save(out).with_context(|| format!("writing {}", out.display()))?;
    Ok(OutTable {
        root: node_to_hex(&table.root()),
        depth,
        permits: table.len(),
        out: out.display().to_string(),
    })
}

fn run(cli: Cli) -> Result<serde_json::Value> {
    let config = cli.config.as_deref();
    let out = match cli.command {
        Commands::Generate { count, depth, secret_bytes, out } => {
            if secret_bytes < 16 {
                bail!("secret_bytes must be at least 16");
            }
            serde_json::to_value(write_table(&random_secrets(count, secret_bytes), depth, &out)?)?
        }
        Commands::Build { secrets, depth, out } => {
            serde_json::to_value(write_table(&read_secrets(&secrets)?, depth, &out)?)?
        }
        Commands::Audit { table } => {
            let params = load_params(config)?;
            let table = PermitTable::load(&table)?;
            let report = table.audit(&Sha256Hasher, &params.deriver);
            serde_json::to_value(OutAudit { root: node_to_hex(&table.root()), clean: report.is_clean(), report })?
        }
        Commands::Lookup { table, secret } => {
            let table = PermitTable::load(&table)?;
            let permit = table.lookup(&secret).ok_or_else(|| anyhow!("secret is not on the permit list"))?;
            serde_json::to_value(OutLookup {
                index: permit.index,
                root: node_to_hex(&permit.root),
                hash_path: permit.hash_path.iter().map(node_to_hex).collect(),
            })?
        }
        Commands::Nullifier { secret, proof_b64 } => {
            let params = load_params(config)?;
            let nullifier = match params.deriver.scheme() {
                NullifierScheme::Secret => {
                    let secret = secret.ok_or_else(|| anyhow!("--secret is required for the secret scheme"))?;
                    params.deriver.for_secret(secret.as_bytes())
                }
                NullifierScheme::ProofPrefix => {
                    let proof = proof_b64.ok_or_else(|| anyhow!("--proof-b64 is required for the proof_prefix scheme"))?;
                    params.deriver.for_proof(&STANDARD.decode(proof)?)?
                }
            };
            let (record, _) = accounts::nullifier_address(&params.program_id, &params.nullifier_seed, &nullifier);
            serde_json::to_value(OutNullifier {
                scheme: params.deriver.scheme(),
                nullifier: nullifier.to_hex(),
                record_address: record.to_string(),
            })?
        }
        Commands::Plan { len, chunk_size } => {
            if chunk_size > MAX_CHUNK_SIZE {
                bail!("chunk_size {chunk_size} exceeds the ledger limit of {MAX_CHUNK_SIZE}");
            }
            serde_json::to_value(ChunkPlan::new(len, chunk_size)?)?
        }
        Commands::Init { table, authority, name, symbol, uri } => {
            let params = load_params(config)?;
            let table = PermitTable::load(&table)?;
            let authority = resolve_authority(&authority)?;
            let collection = Collection { name: &name, symbol: &symbol, uri: &uri };
            let ix = instructions::initialize(&params, &authority, &table.root(), &collection)?;
            tracing::info!(root = %node_to_hex(&table.root()), config = %params.config_address, "initialize rendered");
            serde_json::to_value(OutInstruction::from(&ix))?
        }
        Commands::PublishRoot { table, authority } => {
            let params = load_params(config)?;
            let table = PermitTable::load(&table)?;
            let authority = resolve_authority(&authority)?;
            let ix = instructions::update_root(&params, &authority, &table.root())?;
            tracing::info!(root = %node_to_hex(&table.root()), "update_root rendered");
            serde_json::to_value(OutInstruction::from(&ix))?
        }
    };
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "permit_cli=info,permit_core=info,permit_mint_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parses flags and dispatches.
    let out = run(Cli::parse())?;
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}
