use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use freshdesk_harvest::config::{self, AppConfig, AppConfigOverrides};
use freshdesk_harvest::export::export_store;
use freshdesk_harvest::freshdesk::FreshdeskClient;
use freshdesk_harvest::logging;
use freshdesk_harvest::metrics::Metrics;
use freshdesk_harvest::rate_limit::RateLimiter;
use freshdesk_harvest::store::Store;
use freshdesk_harvest::sync::{normalize_since, SyncEngine, SyncMode, SyncReport};

/// Mirror Freshdesk tickets and conversations into a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "freshdesk-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Config file (defaults to $XDG_CONFIG_HOME/freshdesk-harvest/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Freshdesk API key
    #[arg(long, global = true, env = "FRESHDESK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Freshdesk subdomain, host or base URL
    #[arg(long, global = true, env = "FRESHDESK_DOMAIN")]
    domain: Option<String>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<String>,

    /// Pause when remaining API calls drop to this value
    #[arg(long, global = true)]
    rate_limit_threshold: Option<u64>,

    /// Initial pause in seconds once the threshold is reached
    #[arg(long, global = true)]
    pause_secs: Option<u64>,

    /// Delay in milliseconds after every API call
    #[arg(long, global = true)]
    request_delay_ms: Option<u64>,

    /// Page ceiling per listing
    #[arg(long, global = true)]
    max_pages: Option<u32>,

    /// Refetch conversations for tickets that are already stored
    #[arg(long, global = true)]
    recheck_existing: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every ticket
    Full,
    /// Sync tickets updated since a date (YYYY-MM-DD or RFC 3339)
    Since { date: String },
    /// Fetch conversations for tickets with ids in LOW..=HIGH
    Range { low: i64, high: i64 },
    /// Export stored tickets as JSONL
    Export {
        /// Output file
        #[arg(long, default_value = "tickets.jsonl")]
        out: PathBuf,
    },
}

impl GlobalArgs {
    fn overrides(&self) -> AppConfigOverrides {
        AppConfigOverrides {
            freshdesk_domain: self.domain.clone(),
            freshdesk_api_key: self.api_key.clone(),
            store_db_path: self.db.clone(),
            rate_limit_threshold: self.rate_limit_threshold,
            rate_limit_pause_secs: self.pause_secs,
            sync_request_delay_ms: self.request_delay_ms,
            sync_max_pages: self.max_pages,
            sync_assume_conversations_synced: self.recheck_existing.then_some(false),
            logging_debug: self.debug.then_some(true),
            ..AppConfigOverrides::default()
        }
    }
}

fn log_report(report: &SyncReport) {
    logging::info(format!(
        "sync finished tickets_seen={} tickets_inserted={} tickets_skipped={} conversations_inserted={} conversations_skipped={} failed={}",
        report.tickets_seen,
        report.tickets_inserted,
        report.tickets_skipped,
        report.conversations_inserted,
        report.conversations_skipped,
        report.failed_tickets.len()
    ));
    for (ticket_id, err) in &report.failed_tickets {
        logging::warn(format!("ticket {} not synced: {}", ticket_id, err));
    }
}

enum Plan {
    Export { out: PathBuf },
    Sync(SyncMode),
}

/// Checks everything the command needs before any file is created.
fn plan(command: Command, cfg: &AppConfig) -> Result<Plan, Box<dyn std::error::Error>> {
    match command {
        Command::Export { out } => {
            if !Path::new(&cfg.store.db_path).exists() {
                return Err(format!("no ticket store at {}", cfg.store.db_path).into());
            }
            Ok(Plan::Export { out })
        }
        command => {
            let mode = match command {
                Command::Since { date } => SyncMode::UpdatedSince(normalize_since(&date)?),
                Command::Range { low, high } => SyncMode::Range { low, high },
                _ => SyncMode::Full,
            };
            cfg.require_credentials()?;
            Ok(Plan::Sync(mode))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.global.config.as_deref())?;
    cfg.apply_overrides(&cli.global.overrides())?;
    logging::init(cfg.logging.debug);

    let plan = plan(cli.command, &cfg)?;
    let store = Store::open(Path::new(&cfg.store.db_path))?;
    logging::info(format!("using ticket store {}", cfg.store.db_path));

    let mode = match plan {
        Plan::Export { out } => {
            export_store(&store, &out)?;
            return Ok(());
        }
        Plan::Sync(mode) => mode,
    };

    let metrics = Arc::new(Metrics::new());
    let client = FreshdeskClient::with_policy(
        &cfg.freshdesk.domain,
        cfg.freshdesk.api_key.clone(),
        cfg.retry_policy(),
        Arc::clone(&metrics),
    )?;
    logging::info(format!("using freshdesk base url {}", client.base_url));

    let engine = SyncEngine::new(
        client,
        RateLimiter::new(cfg.rate_limit_policy(), Arc::clone(&metrics)),
        cfg.fetch_options(),
        cfg.sync_policy(),
        Arc::clone(&metrics),
    );

    let result = engine.run(&store, &mode);
    metrics.log_summary();
    let report = result?;
    log_report(&report);
    logging::info(format!(
        "store now holds {} ticket(s) and {} conversation(s)",
        store.ticket_count()?,
        store.conversation_count()?
    ));
    Ok(())
}
