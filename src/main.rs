//! wikimirror command-line entry point.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use wikimirror::config::load_config_with_hash;
use wikimirror::store::UrlStatus;
use wikimirror::Orchestrator;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl From<StatusArg> for UrlStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => UrlStatus::Pending,
            StatusArg::Downloading => UrlStatus::Downloading,
            StatusArg::Completed => UrlStatus::Completed,
            StatusArg::Failed => UrlStatus::Failed,
        }
    }
}

/// wikimirror: a resumable, parallel site/wiki mirroring crawler.
#[derive(Parser, Debug)]
#[command(name = "wikimirror")]
#[command(version = "0.1.0")]
#[command(about = "Mirrors a bounded slice of a website or Confluence-compatible wiki", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Truncate the Store's lifecycle tables and exit
    #[arg(long)]
    reset_progress: bool,

    /// Print `clean_url\tstatus` for every URL in the given status and exit
    #[arg(long, value_name = "STATUS")]
    export_urls_by_status: Option<StatusArg>,

    /// Print the aggregate crawl summary and exit
    #[arg(long)]
    stats: bool,

    /// Write the aggregate crawl summary to this markdown file and exit
    #[arg(long, value_name = "PATH")]
    summary_report: Option<PathBuf>,

    /// Validate configuration and credentials, print what would run, and exit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("loading configuration from {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)?;
    let orchestrator = Orchestrator::new(config, config_hash);

    if cli.reset_progress {
        orchestrator.reset_progress()?;
        println!("progress reset");
        return Ok(());
    }

    if let Some(status) = cli.export_urls_by_status {
        for (clean_url, status) in orchestrator.export_by_status(status.into())? {
            println!("{clean_url}\t{status}");
        }
        return Ok(());
    }

    if cli.stats {
        let summary = orchestrator.summary()?;
        print!("{}", wikimirror::summary::format_markdown_summary(&summary));
        return Ok(());
    }

    if let Some(path) = cli.summary_report {
        orchestrator.write_summary_report(&path)?;
        println!("summary written to {}", path.display());
        return Ok(());
    }

    if cli.dry_run {
        print!("{}", orchestrator.dry_run_report()?);
        return Ok(());
    }

    orchestrator.run_crawl().await?;
    tracing::info!("crawl complete");
    Ok(())
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("wikimirror=info,warn"),
            1 => EnvFilter::new("wikimirror=debug,info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
