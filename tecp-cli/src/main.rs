//! Command-line interface for issuing and verifying TECP receipts.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;

use tecp_log::TransparencyLog;
use tecp_policy::{Context as PolicyContext, Environment as PolicyEnvironment, PolicyRegistry};
use tecp_receipt::envelope::ReceiptEnvelope;
use tecp_receipt::{create_receipt, verify, CreateReceiptRequest, Profile, ReceiptSigner, VerifyOptions};

#[derive(Parser)]
#[command(name = "tecp")]
#[command(about = "Issue and verify TECP receipts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new Ed25519 signing key and write it to a file (raw 32
    /// bytes, hex-encoded).
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },

    /// Issue a receipt over an input/output pair.
    Issue {
        /// Path to a hex-encoded signing key, as produced by `keygen`.
        #[arg(long)]
        key: PathBuf,

        #[arg(long)]
        code_ref: String,

        /// File whose bytes become the receipt's input_hash.
        #[arg(long)]
        input: PathBuf,

        /// File whose bytes become the receipt's output_hash.
        #[arg(long)]
        output: PathBuf,

        /// Policy id, may be repeated.
        #[arg(long = "policy")]
        policy_ids: Vec<String>,

        #[arg(long, value_enum, default_value = "default")]
        profile: ProfileArg,

        /// Region the computation ran in, for infrastructure policies.
        #[arg(long)]
        region: Option<String>,

        /// Anchor the receipt in a transparency log at this path.
        #[arg(long)]
        log: Option<PathBuf>,

        #[arg(long, default_value = "receipt.json")]
        out: PathBuf,
    },

    /// Verify a receipt's signature, age, policy, and (optionally) log
    /// inclusion.
    Verify {
        #[arg(long)]
        receipt: PathBuf,

        #[arg(long, value_enum, default_value = "default")]
        profile: ProfileArg,

        /// Transparency log to check inclusion proofs against.
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Inspect or administer a transparency log.
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },

    /// List the built-in policy registry.
    Policies,
}

#[derive(Subcommand)]
enum LogCommands {
    /// Create (or open) a log at the given path.
    Init {
        #[arg(long)]
        path: PathBuf,
    },
    /// Print the current signed tree head.
    Root {
        #[arg(long)]
        path: PathBuf,
    },
    /// List the most recently appended entries, newest first.
    Entries {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Retire the active signing key and promote the next one.
    RotateKeys {
        #[arg(long)]
        path: PathBuf,
    },
    /// List the log's key registry, partitioned by status.
    Keys {
        #[arg(long)]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProfileArg {
    Lite,
    Default,
    Strict,
}

impl From<ProfileArg> for Profile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Lite => Profile::Lite,
            ProfileArg::Default => Profile::Default,
            ProfileArg::Strict => Profile::Strict,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen { out } => keygen(&out),
        Commands::Issue {
            key,
            code_ref,
            input,
            output,
            policy_ids,
            profile,
            region,
            log,
            out,
        } => issue(&key, &code_ref, &input, &output, policy_ids, profile.into(), region, log.as_deref(), &out),
        Commands::Verify { receipt, profile, log } => verify_cmd(&receipt, profile.into(), log.as_deref()),
        Commands::Log { command } => log_cmd(command),
        Commands::Policies => policies(),
    }
}

fn keygen(out: &PathBuf) -> Result<()> {
    let mut csprng = rand::rngs::OsRng;
    let key = SigningKey::generate(&mut csprng);
    fs::write(out, hex::encode(key.to_bytes()))
        .with_context(|| format!("writing key to {}", out.display()))?;
    println!("wrote signing key to {}", out.display());
    println!("public key: {}", hex::encode(key.verifying_key().to_bytes()));
    Ok(())
}

fn load_key(path: &PathBuf) -> Result<SigningKey> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading key {}", path.display()))?;
    let bytes = hex::decode(raw.trim()).context("key file is not valid hex")?;
    if bytes.len() != 32 {
        bail!("key file must contain 32 bytes, got {}", bytes.len());
    }
    let mut array = [0u8; 32];
    array.copy_from_slice(&bytes);
    Ok(SigningKey::from_bytes(&array))
}

#[allow(clippy::too_many_arguments)]
fn issue(
    key_path: &PathBuf,
    code_ref: &str,
    input_path: &PathBuf,
    output_path: &PathBuf,
    policy_ids: Vec<String>,
    profile: Profile,
    region: Option<String>,
    log_path: Option<&std::path::Path>,
    out: &PathBuf,
) -> Result<()> {
    let key = load_key(key_path)?;
    let input = fs::read(input_path).with_context(|| format!("reading {}", input_path.display()))?;
    let output = fs::read(output_path).with_context(|| format!("reading {}", output_path.display()))?;

    let log = log_path.map(TransparencyLog::open).transpose()?;
    let signer = match log {
        Some(log) => ReceiptSigner::with_log(key, Box::new(log)),
        None => ReceiptSigner::new(key),
    };

    let registry = PolicyRegistry::standard();
    let now = now_ms();
    let context = PolicyContext {
        environment: PolicyEnvironment {
            region: region.clone(),
            provider: None,
        },
        start_time_ms: now,
        now_ms: now,
        key_erasure_evidence: None,
        code_ref: code_ref.to_string(),
    };

    let receipt = create_receipt(
        &signer,
        &registry,
        &context,
        CreateReceiptRequest {
            code_ref: code_ref.to_string(),
            input: &input,
            output: &output,
            policy_ids,
            profile,
            key_erasure: None,
            environment: region.map(|r| tecp_receipt::ReceiptEnvironment {
                region: Some(r),
                provider: None,
            }),
            ext: Some(BTreeMap::new()),
            anchor_in_log: true,
            now_ms: None,
            nonce: None,
        },
    )
    .map_err(|e| anyhow::anyhow!("issuance failed: {e}"))?;

    let envelope = ReceiptEnvelope::from(&receipt);
    let json = serde_json::to_string_pretty(&envelope)?;
    fs::write(out, &json).with_context(|| format!("writing receipt to {}", out.display()))?;
    println!("issued receipt -> {}", out.display());
    Ok(())
}

fn verify_cmd(receipt_path: &PathBuf, profile: Profile, log_path: Option<&std::path::Path>) -> Result<()> {
    let json = fs::read_to_string(receipt_path)
        .with_context(|| format!("reading {}", receipt_path.display()))?;
    let envelope: ReceiptEnvelope = serde_json::from_str(&json).context("parsing receipt JSON")?;
    let receipt = tecp_receipt::Receipt::try_from(&envelope).context("decoding receipt envelope")?;

    let log = log_path.map(TransparencyLog::open).transpose()?;
    let result = verify(
        &receipt,
        &VerifyOptions {
            profile,
            now_ms: now_ms() as i64,
            log: log.as_ref().map(|l| l as &dyn tecp_receipt::LogClient),
            require_log_inclusion: false,
        },
    );

    if result.valid {
        println!("VALID");
        Ok(())
    } else {
        println!("INVALID");
        for err in &result.errors {
            println!("  {} ({:?}): {}", err.code, err.field, err.message);
        }
        std::process::exit(1);
    }
}

fn log_cmd(command: LogCommands) -> Result<()> {
    match command {
        LogCommands::Init { path } => {
            let log = TransparencyLog::open(&path)?;
            let sth = log.root()?;
            println!("log initialized at {}, tree_size={}", path.display(), sth.tree_size);
        }
        LogCommands::Root { path } => {
            let log = TransparencyLog::open(&path)?;
            let sth = log.root()?;
            println!("tree_size: {}", sth.tree_size);
            println!("root_hash: {}", hex::encode(&sth.root_hash));
            println!("signed_ms: {}", sth.signed_ms);
        }
        LogCommands::Entries { path, limit } => {
            let log = TransparencyLog::open(&path)?;
            for entry in log.entries(limit)? {
                println!(
                    "{}\t{}\t{}",
                    entry.leaf_index,
                    entry.code_ref,
                    hex::encode(&entry.receipt_hash)
                );
            }
        }
        LogCommands::RotateKeys { path } => {
            let log = TransparencyLog::open(&path)?;
            log.rotate_keys()?;
            println!("rotated keys at {}", path.display());
        }
        LogCommands::Keys { path } => {
            let log = TransparencyLog::open(&path)?;
            for state in [tecp_log::KeyState::Active, tecp_log::KeyState::Next, tecp_log::KeyState::Revoked] {
                println!("{state:?}:");
                for key in log.keys()?.into_iter().filter(|k| k.state == state) {
                    println!("  kid={} pubkey={}", key.kid, hex::encode(&key.pubkey));
                }
            }
        }
    }
    Ok(())
}

fn policies() -> Result<()> {
    let registry = PolicyRegistry::standard();
    for id in [
        "no_retention",
        "no_pii",
        "redact_pii",
        "eu_region",
        "us_region",
        "ttl_60s",
        "ttl_300s",
        "key_erasure",
        "code_audit",
    ] {
        if let Some(descriptor) = registry.get(id) {
            println!("{:<14} {:?}\t{}", descriptor.id, descriptor.enforcement_type, descriptor.description);
        }
    }
    Ok(())
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}
