use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cira_config::CiraConfig;
use cira_core::{ImportMode, RuleStore};
use cira_runtime::lifecycle::{wait_for_signal, CiraRuntime};
use cira_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "cira", about = "CiRA CLAW edge rule evaluation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tick scheduler and run until terminated.
    Run {
        /// Path to cira.toml
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Administer the rule store without running the scheduler.
    Rule {
        #[command(subcommand)]
        action: RuleCommands,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List every atomic and composite rule in the store.
    List {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Export the whole rule store as a portable JSON bundle.
    Export {
        #[arg(short, long)]
        config: PathBuf,
        /// Write the bundle here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Import a JSON bundle produced by `rule export`.
    Import {
        #[arg(short, long)]
        config: PathBuf,
        /// Bundle file to read.
        #[arg(short, long)]
        file: PathBuf,
        /// Overwrite rules that already exist instead of merging.
        #[arg(long)]
        overwrite: bool,
    },
    /// Clear the in-process stateful operator state for the next run.
    ///
    /// The Stateful Node Store lives only in the memory of a running `run`
    /// process and is never written to disk, so there is nothing on disk to
    /// reset; this confirms the next `run` invocation always starts from a
    /// clean slate.
    ResetState {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Exit code paired with the failure, so the runtime's own fatal/bootstrap
/// distinction survives past the `anyhow` boundary into `main`'s process
/// exit code without relying on downcasting.
type CliError = (u8, anyhow::Error);

fn load_config(path: &PathBuf) -> Result<CiraConfig> {
    CiraConfig::load(path)
}

fn open_store(config: &CiraConfig) -> Result<RuleStore> {
    let root = config.rule_store.resolve_root()?;
    RuleStore::open(root).map_err(|e| anyhow::anyhow!("{e}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(0),
        Err((code, e)) => {
            eprintln!("error: {e:#}");
            ExitCode::from(code)
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_server(config).await?,
        Commands::Rule { action } => handle_rule_command(action).map_err(|e| (1, e))?,
    }

    Ok(())
}

/// Config-load and bootstrap failures exit 1; anything the runtime marks
/// fatal once it is running (disk I/O, store corruption) exits 2.
async fn run_server(config: PathBuf) -> Result<(), CliError> {
    let config_path = config
        .canonicalize()
        .map_err(|e| (1, anyhow::anyhow!("config path '{}': {e}", config.display())))?;
    let cira_config = load_config(&config_path).map_err(|e| (1, e))?;
    let base_dir = config_path
        .parent()
        .expect("config path must have a parent directory");

    let _guard = init_tracing(&cira_config.logging, base_dir).map_err(|e| (1, e))?;

    let runtime = CiraRuntime::start(cira_config, base_dir)
        .await
        .map_err(|e| (2, anyhow::anyhow!("{e}")))?;
    tracing::info!(domain = "sys", "cira runtime started");

    wait_for_signal(runtime.cancel_token()).await;
    runtime.shutdown();
    runtime
        .wait()
        .await
        .map_err(|e| (2, anyhow::anyhow!("{e}")))?;
    Ok(())
}

fn handle_rule_command(action: RuleCommands) -> Result<()> {
    match action {
        RuleCommands::List { config } => {
            let cfg = load_config(&config)?;
            let store = open_store(&cfg)?;
            let atomic = store.list_atomic().map_err(|e| anyhow::anyhow!("{e}"))?;
            let composite = store
                .list_composite()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "atomic": atomic,
                    "composite": composite,
                }))?
            );
        }
        RuleCommands::Export { config, out } => {
            let cfg = load_config(&config)?;
            let store = open_store(&cfg)?;
            let bundle = store.export_bundle().map_err(|e| anyhow::anyhow!("{e}"))?;
            let json = serde_json::to_string_pretty(&bundle)?;
            match out {
                Some(path) => std::fs::write(&path, json)
                    .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", path.display()))?,
                None => println!("{json}"),
            }
        }
        RuleCommands::Import {
            config,
            file,
            overwrite,
        } => {
            let cfg = load_config(&config)?;
            let store = open_store(&cfg)?;
            let contents = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", file.display()))?;
            let bundle = serde_json::from_str(&contents)?;
            let mode = if overwrite {
                ImportMode::Overwrite
            } else {
                ImportMode::Merge
            };
            store
                .import_bundle(bundle, mode)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        RuleCommands::ResetState { config } => {
            let _ = load_config(&config)?;
            println!("stateful operator state is held in memory only; the next `run` starts clean");
        }
    }
    Ok(())
}
