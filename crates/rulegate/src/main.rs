mod check;
mod cli;
mod config;

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use access_rules::{loader, InMemoryStore, RulesEngine, Service};
use audit_log::{AuditEventType, AuditSink};

use crate::check::{parse_requests, run_checks, CheckLine, Outcome};
use crate::cli::{Cli, Command};
use crate::config::Config;

const COMPONENT: &str = "rulegate";

/// Load both rule files and compile them into one engine.
fn build_engine(cfg: &Config) -> Result<RulesEngine> {
    let database = loader::load_rules(&cfg.rules.database).context("failed to load database rules")?;
    let storage = loader::load_rules(&cfg.rules.storage).context("failed to load storage rules")?;

    if database.service != Service::Database {
        bail!("{} does not hold database rules", cfg.rules.database.display());
    }
    if storage.service != Service::Storage {
        bail!("{} does not hold storage rules", cfg.rules.storage.display());
    }

    let engine = RulesEngine::from_rule_files([&database, &storage], cfg.evaluation.settings())
        .context("failed to initialize rules engine")?;
    info!(?engine, "rules engine loaded");
    Ok(engine)
}

/// Lookups read from the configured store; a missing store file means an
/// empty one.
fn load_store(path: &Path) -> Result<InMemoryStore> {
    if !path.exists() {
        warn!(path = %path.display(), "document store not found; lookups will find nothing");
        return Ok(InMemoryStore::new());
    }
    let store = InMemoryStore::load(path)?;
    info!(path = %path.display(), documents = store.len(), "document store loaded");
    Ok(store)
}

fn print_lines(lines: &[CheckLine]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for line in lines {
        serde_json::to_writer(&mut stdout, line)?;
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

async fn run_check(cfg: &Config, requests_path: &Path) -> Result<()> {
    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path, COMPONENT)
        .await
        .context("failed to start audit logger")?;

    audit
        .log_event(
            AuditEventType::ProcessStarted,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "requests": requests_path.display().to_string(),
            }),
        )
        .await;

    let result = check_requests(cfg, requests_path, &audit).await;

    let details = match &result {
        Ok(summary) => serde_json::json!({
            "total": summary.total,
            "allowed": summary.allowed,
            "rejected": summary.rejected,
        }),
        Err(err) => serde_json::json!({ "error": format!("{err:#}") }),
    };
    audit.log_event(AuditEventType::ProcessStopped, details).await;

    // The writer flushes and exits once the last sink is gone.
    drop(audit);
    if let Err(err) = audit_handle.await {
        warn!(%err, "audit writer task failed");
    }

    let summary = result?;
    if summary.rejected > 0 {
        bail!("{} of {} request(s) were malformed", summary.rejected, summary.total);
    }
    Ok(())
}

#[derive(Debug)]
struct CheckSummary {
    total: usize,
    allowed: usize,
    rejected: usize,
}

async fn check_requests(cfg: &Config, requests_path: &Path, audit: &AuditSink) -> Result<CheckSummary> {
    let engine = build_engine(cfg)?;
    audit
        .log_event(
            AuditEventType::RulesLoaded,
            serde_json::json!({
                "database": cfg.rules.database.display().to_string(),
                "storage": cfg.rules.storage.display().to_string(),
            }),
        )
        .await;

    let store = load_store(&cfg.store)?;

    let contents = std::fs::read_to_string(requests_path)
        .with_context(|| format!("failed to read requests file: {}", requests_path.display()))?;
    let requests = parse_requests(&contents)
        .with_context(|| format!("failed to parse requests file: {}", requests_path.display()))?;

    let lines = run_checks(&engine, &store, requests, Some(audit)).await;
    print_lines(&lines)?;

    let summary = CheckSummary {
        total: lines.len(),
        allowed: lines
            .iter()
            .filter(|l| matches!(&l.outcome, Outcome::Decided(d) if d.is_allowed()))
            .count(),
        rejected: lines.iter().filter(|l| l.is_rejected()).count(),
    };
    info!(?summary, "check complete");
    Ok(summary)
}

fn run_validate(cfg: &Config) -> Result<()> {
    let engine = build_engine(cfg)?;
    for service in [Service::Database, Service::Storage] {
        let count = engine.table(service).map(|t| t.len()).unwrap_or(0);
        println!("{service} rules: {count} ok");
    }

    let auth = platform_config::load_auth_config(&cfg.auth_config)?;
    let methods: Vec<&str> = auth.enabled_methods().iter().map(|m| m.as_str()).collect();
    println!("auth: {} ok", methods.join(", "));

    let indexes = platform_config::load_indexes(&cfg.indexes)?;
    println!("indexes: {} ok", indexes.indexes.len());

    let store = load_store(&cfg.store)?;
    println!("store: {} document(s) ok", store.len());
    Ok(())
}

fn run_indexes(cfg: &Config) -> Result<()> {
    let indexes = platform_config::load_indexes(&cfg.indexes)?;
    println!("{}", indexes.to_json()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cfg.merge_cli(&cli);

    // 3. Init tracing-subscriber with JSON format. Logs go to stderr so
    //    stdout carries only command output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(
        config_file = %cli.config.display(),
        database_rules = %cfg.rules.database.display(),
        storage_rules = %cfg.rules.storage.display(),
        timeout_ms = cfg.evaluation.timeout_ms,
        max_lookups = cfg.evaluation.max_lookups,
        "rulegate starting"
    );

    // 4. Dispatch.
    match &cli.command {
        Command::Check { requests } => run_check(&cfg, requests).await,
        Command::Validate => run_validate(&cfg),
        Command::Indexes => run_indexes(&cfg),
    }
}
