//! CNPJ Ingest - registry snapshot loader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig, LogLevel};
use cnpj_common::types::Period;
use cnpj_ingest::archive::{ArchiveClient, HttpDirectoryHost};
use cnpj_ingest::config::IngestConfig;
use cnpj_ingest::ledger::Ledger;
use cnpj_ingest::orchestrator::Orchestrator;
use cnpj_ingest::sink::{MemorySink, PostgresSink, Sink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about = "Load monthly CNPJ registry snapshots into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and load one period
    Run(RunArgs),

    /// List the periods published on the remote host
    ListPeriods,

    /// List the archives published for a period
    ListFiles {
        /// Period as YYYY-MM, defaults to the most recent
        #[arg(short, long)]
        period: Option<Period>,
    },

    /// Forget processed files so the next run loads them again
    ResetLedger {
        /// Only forget files of this period
        #[arg(short, long)]
        period: Option<Period>,
    },

    /// Create or update the database schema
    Migrate,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Period as YYYY-MM, defaults to the most recent
    #[arg(short, long)]
    period: Option<Period>,

    /// Reload files that are already marked processed
    #[arg(short, long)]
    force: bool,

    /// Records per committed batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent downloads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per download
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// Seconds between download attempts
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Scratch directory for archives
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Keep downloaded archives and reuse them next time
    #[arg(long)]
    keep_files: bool,

    /// Stop at the first failed file
    #[arg(long)]
    fail_fast: bool,

    /// Load into memory instead of Postgres, for checking archives
    #[arg(long)]
    dry_run: bool,

    /// Hide the download progress bar
    #[arg(long)]
    no_progress: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, mut config: IngestConfig) -> IngestConfig {
        if let Some(period) = self.period {
            config = config.with_period(period);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(workers) = self.workers {
            config = config.with_download_workers(workers);
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay_secs = delay;
        }
        if let Some(dir) = &self.temp_dir {
            config = config.with_temp_dir(dir);
        }
        let force = self.force || config.force;
        let keep_files = self.keep_files || config.keep_files;
        let fail_fast = self.fail_fast || config.fail_fast;
        let show_progress = config.show_progress && !self.no_progress;

        config
            .with_force(force)
            .with_keep_files(keep_files)
            .with_fail_fast(fail_fast)
            .with_progress(show_progress)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = match log_config(cli.verbose) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e:#}");
            return ExitCode::from(2);
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::from(2);
        },
    };

    match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal error");
            ExitCode::from(2)
        },
    }
}

/// Console logging at info, or debug with `--verbose`, then `LOG_*` overrides.
fn log_config(verbose: bool) -> Result<LogConfig> {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    LogConfig::builder()
        .level(level)
        .build()
        .merge_env()
        .context("LOG_LEVEL, LOG_OUTPUT or LOG_FORMAT is not recognised")
}

async fn execute(command: Command) -> Result<ExitCode> {
    let config = IngestConfig::from_env().context("Invalid configuration")?;

    match command {
        Command::Run(args) => run(args.apply(config), args.dry_run, args.json).await,
        Command::ListPeriods => {
            let client = archive_client(&config)?;
            for period in client.list_periods().await? {
                println!("{period}");
            }
            Ok(ExitCode::SUCCESS)
        },
        Command::ListFiles { period } => {
            let client = archive_client(&config)?;
            let period = match period.or(config.period) {
                Some(period) => period,
                None => client.latest_period().await?,
            };
            for file in client.list_files(period).await? {
                let kind = file.kind.map_or("-".to_string(), |k| k.to_string());
                println!("{:<32} {}", file.filename, kind);
            }
            Ok(ExitCode::SUCCESS)
        },
        Command::ResetLedger { period } => {
            let ledger = Ledger::new(Arc::new(postgres_sink(&config).await?));
            let removed = match period {
                Some(period) => ledger.reset_period(period).await?,
                None => ledger.reset().await?,
            };
            println!("Removed {removed} ledger entries");
            Ok(ExitCode::SUCCESS)
        },
        Command::Migrate => {
            postgres_sink(&config).await?;
            println!("Schema is up to date");
            Ok(ExitCode::SUCCESS)
        },
    }
}

async fn run(config: IngestConfig, dry_run: bool, json: bool) -> Result<ExitCode> {
    let host = HttpDirectoryHost::new(&config.base_url, config.connect_timeout(), config.read_timeout())?;
    let sink: Arc<dyn Sink> = if dry_run {
        warn!("Dry run: records are loaded into memory and discarded");
        Arc::new(MemorySink::new())
    } else {
        Arc::new(postgres_sink(&config).await?)
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut orchestrator = Orchestrator::new(config, Arc::new(host), sink)?.with_cancellation(cancel);
    let summary = orchestrator.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render());
    }

    Ok(if summary.has_failures() || summary.cancelled {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn archive_client(config: &IngestConfig) -> Result<ArchiveClient> {
    let host = HttpDirectoryHost::new(&config.base_url, config.connect_timeout(), config.read_timeout())?;
    Ok(ArchiveClient::new(Arc::new(host), config.retry_policy()))
}

async fn postgres_sink(config: &IngestConfig) -> Result<PostgresSink> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set (use --dry-run to load without a database)")?;
    let sink = PostgresSink::connect(url, config.database_max_connections).await?;
    sink.migrate().await?;
    Ok(sink)
}

/// Cancel the run on Ctrl+C or SIGTERM. The batch in flight is allowed to commit.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping after the current batch"),
        _ = terminate => info!("Received terminate signal, stopping after the current batch"),
    }

    cancel.cancel();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_log_env() {
        for key in ["LOG_LEVEL", "LOG_OUTPUT", "LOG_FORMAT"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_verbose_selects_debug() {
        clear_log_env();
        assert_eq!(log_config(true).unwrap().level, LogLevel::Debug);
        assert_eq!(log_config(false).unwrap().level, LogLevel::Info);
    }

    #[test]
    #[serial]
    fn test_unknown_log_level_is_an_error() {
        clear_log_env();
        std::env::set_var("LOG_LEVEL", "loud");
        let err = log_config(false).unwrap_err();
        clear_log_env();

        assert!(format!("{err:#}").contains("Invalid log level: loud"));
    }

    #[test]
    #[serial]
    fn test_unknown_log_format_is_an_error() {
        clear_log_env();
        std::env::set_var("LOG_FORMAT", "xml");
        let result = log_config(false);
        clear_log_env();

        assert!(result.is_err());
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::parse_from(["cnpj-ingest", "run", "--period", "2024-03", "--force", "--batch-size", "10"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.apply(IngestConfig::new());

        assert_eq!(config.period, Some("2024-03".parse().unwrap()));
        assert!(config.force);
        assert_eq!(config.batch_size, 10);
    }
}
