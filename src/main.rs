mod activity;
mod api;
mod auth;
mod cli;
mod config;
mod export;
mod ledger;
mod models;
mod navigator;
mod session;
mod sync;
#[cfg(test)]
mod testutil;
mod transfer;

use anyhow::{Context as _, Result};
use clap::Parser;
use session::{FileTokenStore, MemoryTokenStore, RestoreOutcome, SessionStore, TokenStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "p2p", about = "Peer2Paisa terminal client")]
pub struct Args {
    #[arg(long, env = "P2P_BASE_URL", help = "Payments API base URL")]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path (merged over the default layers)")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "P2P_TOKEN_FILE", help = "Where the session token is kept")]
    pub token_file: Option<PathBuf>,

    #[arg(long, value_name = "SECS", help = "Background sync interval")]
    pub interval_secs: Option<u64>,

    #[arg(long, help = "Activity log directory")]
    pub activity_dir: Option<PathBuf>,

    #[arg(short = 'e', long, help = "Run one command (e.g. \"/balance\") and exit")]
    pub exec: Option<String>,

    #[arg(long, help = "Verbose output (sync start/stop)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (print settings)")]
    pub debug: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = config::Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring config: {:#}", e);
        config::Config::default()
    });
    if let Some(config_path) = &args.config {
        cfg.merge(config::Config::load_from(config_path)?);
    }

    // CLI flags win over every config layer
    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = Some(base_url.clone());
    }
    if let Some(secs) = args.interval_secs {
        cfg.sync.interval_secs = Some(secs);
    }
    if let Some(path) = &args.token_file {
        cfg.session.token_path = Some(path.display().to_string());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    if args.debug {
        eprintln!("[DEBUG] Base URL: {}", cfg.base_url());
        eprintln!("[DEBUG] Timeout: {}ms", cfg.timeout_ms());
        eprintln!("[DEBUG] Sync interval: {:?}", cfg.sync_interval());
        eprintln!("[DEBUG] Token path: {:?}", cfg.token_path());
        eprintln!("[DEBUG] Persist session: {}", cfg.persist_session());
    }

    let token_store: Box<dyn TokenStore> = match (cfg.persist_session(), cfg.token_path()) {
        (true, Some(path)) => Box::new(FileTokenStore::new(&path)),
        (true, None) => {
            eprintln!("Warning: no home directory, session will not be saved");
            Box::new(MemoryTokenStore::default())
        }
        (false, _) => Box::new(MemoryTokenStore::default()),
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let activity = match open_activity_log(&args, &run_id) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Warning: activity log disabled: {:#}", e);
            activity::ActivityLog::disabled()
        }
    };
    let activity = Arc::new(activity);

    let session = Arc::new(SessionStore::new(token_store));
    let navigator = Arc::new(navigator::Navigator::new());

    let outcome = session.restore();
    let _ = activity.session_restore(outcome.as_str());
    let surface = navigator.settle(&session);
    match outcome {
        RestoreOutcome::Expired => println!("Session expired, please log in again"),
        RestoreOutcome::Malformed => println!("Saved session was unreadable, please log in again"),
        _ => {}
    }
    if args.verbose || args.debug {
        eprintln!(
            "[VERBOSE] session restore: {} -> {}",
            outcome.as_str(),
            surface.as_str()
        );
    }

    let transport = Box::new(api::UreqTransport::new(cfg.base_url(), cfg.timeout_ms()));
    let ctx = cli::Context::new(args, cfg, run_id, transport, session, navigator, activity);

    if let Some(line) = ctx.args.exec.clone() {
        cli::run_once(&ctx, &line)
    } else {
        cli::run_repl(ctx)
    }
}

fn open_activity_log(args: &Args, run_id: &str) -> Result<activity::ActivityLog> {
    let dir = match &args.activity_dir {
        Some(dir) => dir.clone(),
        None => dirs::home_dir()
            .context("no home directory")?
            .join(".p2p")
            .join("activity"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    activity::ActivityLog::new(&dir.join(format!("{}.jsonl", run_id)), run_id)
}
