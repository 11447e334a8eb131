use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde_json::{json, Value};

use tokenlink_kernel::{engine_registry, EngineConfig, MemoryStore, Session, TokenCatalog};

#[derive(Parser, Debug)]
#[command(name = "tokenlink")]
#[command(about = "Run a token matching contract against a document snapshot")]
struct CliOptions {
    /// Document snapshot (JSON)
    #[arg(long = "document", short = 'd')]
    document: PathBuf,

    /// Token list (JSON, or YAML by extension)
    #[arg(long = "tokens", short = 't')]
    tokens: Option<PathBuf>,

    /// Engine configuration (TOML)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Contract to call, e.g. tokenlink://remap/scan@1
    #[arg(long = "call", short = 'c')]
    call: String,

    /// JSON input payload file (use '-' for stdin)
    #[arg(long = "input", short = 'i')]
    input: Option<String>,

    /// Write the mutated document snapshot here
    #[arg(long = "write", short = 'w')]
    write: Option<PathBuf>,

    /// Include the audit log in the output
    #[arg(long = "audit", action = ArgAction::SetTrue)]
    audit: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opts = CliOptions::parse();

    let config = load_config(opts.config.as_deref())?;
    let document = fs::read_to_string(&opts.document)
        .with_context(|| format!("Unable to read document {}", opts.document.display()))?;
    let document: Value = serde_json::from_str(&document)
        .with_context(|| format!("Invalid JSON document in {}", opts.document.display()))?;
    let store = MemoryStore::from_json(document)?;

    let mut session = Session::new(Box::new(store), config);
    if let Some(path) = &opts.tokens {
        session = session.with_catalog(load_tokens(path)?);
    }

    let input = load_input(opts.input)?;

    let token = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&token);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let registry = engine_registry();
    let mut ctx = registry.context_with_cancellation(session, token);
    let result = ctx
        .call(&opts.call, input)
        .with_context(|| format!("Contract {} failed", opts.call))?;

    let output = if opts.audit {
        json!({ "result": result, "audit": ctx.audit_log() })
    } else {
        result
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(path) = &opts.write {
        let snapshot = ctx.session().store().export_snapshot()?;
        fs::write(path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Unable to write {}", path.display()))?;
    }
    Ok(())
}

/// `--config`, then `<config_dir>/tokenlink/config.toml`, then defaults;
/// `TOKENLINK_*` variables override whichever was found.
fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let discovered = dirs::config_dir()
        .map(|dir| dir.join("tokenlink").join("config.toml"))
        .filter(|path| path.is_file());
    let mut config = match explicit.map(Path::to_path_buf).or(discovered) {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn load_tokens(path: &Path) -> Result<TokenCatalog> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Unable to read tokens {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    TokenCatalog::from_document(&text, yaml)
        .with_context(|| format!("Invalid token file {}", path.display()))
}

fn load_input(source: Option<String>) -> Result<Value> {
    let payload = match source {
        None => Value::Object(Default::default()),
        Some(path) if path == "-" => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read JSON payload from stdin")?;
            if buffer.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&buffer).context("Invalid JSON payload read from stdin")?
            }
        }
        Some(path) => {
            let data =
                fs::read_to_string(&path).with_context(|| format!("Unable to read {path}"))?;
            serde_json::from_str(&data)
                .with_context(|| format!("Invalid JSON payload in {path}"))?
        }
    };
    Ok(payload)
}
