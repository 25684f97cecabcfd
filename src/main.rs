use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Host-resident log-to-metrics collector: tails declared log files,
/// aggregates derived numeric observations into counters/meters/
/// histograms, and pushes the result to a TSD-style endpoint.
#[derive(Parser, Debug)]
#[command(name = "logmetrics-collector")]
#[command(about = "Host-resident log-to-metrics collector", long_about = None)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Number of OS threads for the tokio runtime (defaults to the
    /// runtime's own heuristic when omitted).
    #[arg(short = 'j', long = "threads")]
    threads: Option<usize>,

    /// Log to the console instead of the syslog-formatted stdout sink.
    #[arg(short = 'd', long = "debug-console")]
    debug_console: bool,

    /// Print rendered metric lines to stdout instead of sending them
    /// downstream.
    #[arg(short = 'D', long = "do-not-send")]
    do_not_send: bool,

    /// CPU-profile start/stop is an external process-level concern; accepted
    /// and logged, not acted on here.
    #[arg(short = 'P', long = "profile")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write (or print) a minimal starter config.
    Init {
        #[arg(long)]
        stdout: bool,
    },
}

fn init_tracing(debug_console: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("logmetrics_collector=info"));

    if debug_console {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        // No syslog crate appears anywhere in the stack this project draws
        // from; absent `-d`, fall back to a compact, untimed, unadorned
        // stdout format rather than fabricate a syslog dependency.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .compact()
            .init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug_console);

    if let Some(profile) = &cli.profile {
        tracing::info!(profile = %profile, "CPU profiling is an external process-level concern; accepted but not started here");
    }

    // `#[tokio::main]` can't take a dynamic worker count, so build the
    // runtime by hand when `-j` is given.
    let runtime = match cli.threads {
        Some(n) => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(n.max(1))
            .enable_all()
            .build()?,
        None => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?,
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logmetrics_collector::cli::config::init(stdout)?;
            }
        },
        None => {
            let config_path =
                logmetrics_collector::config::resolve_config_path(cli.config.as_deref());
            logmetrics_collector::cli::run::run(config_path, cli.do_not_send).await?;
        }
    }
    Ok(())
}
