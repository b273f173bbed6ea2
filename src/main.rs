use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use ambientwatch::analysis::Analyzer;
use ambientwatch::collect::{IwScanCollector, JsonLinesSource};
use ambientwatch::config::{Config, LoggingConfig};
use ambientwatch::monitor::{self, Monitor, MonitorOptions};
use ambientwatch::{detect, report, storage};

#[derive(Parser)]
#[command(
    name = "ambientwatch",
    about = "Statistical monitoring of the local wireless environment",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $AMBIENTWATCH_CONFIG, then /etc/ambientwatch/ambientwatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan once, analyze and print the report
    Scan {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Do not store the observation, report or baseline
        #[arg(long)]
        no_save: bool,
    },

    /// Run the monitoring loop in the foreground
    Monitor {
        /// Seconds between scans (overrides monitor.interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        count: Option<u64>,
    },

    /// Start the daemon (monitor loop + HTTP API)
    Serve {
        /// Bind address (overrides api.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Analyze recorded observations (JSON lines) without touching the database
    Replay {
        /// JSON-lines file, one observation per line
        #[arg(long)]
        input: PathBuf,

        /// Print every report as one JSON line
        #[arg(long)]
        json: bool,
    },

    /// Show the latest stored report
    Status,

    /// Inspect or rebuild the baseline
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Print the current baseline
    Show,

    /// Rebuild from every stored observation (the old one is backed up)
    Rebuild,
}

fn init_tracing(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
        token.cancel();
    });
}

async fn open_and_restore(config: &Config) -> Result<(storage::Pool, Analyzer)> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> Result<(storage::Pool, Analyzer)> {
        let pool = storage::open_pool(&config.storage.db_path)?;
        let analyzer = ambientwatch::restore_analyzer(&config, &pool)?;
        Ok((pool, analyzer))
    })
    .await?
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Scan { json, no_save } => {
            let (pool, analyzer) = open_and_restore(&config).await?;
            let collector = Arc::new(IwScanCollector::new(&config.monitor));
            let pool = (!no_save).then_some(pool);
            let monitor = Monitor::new(Arc::new(RwLock::new(analyzer)), collector, pool);

            let sequence_id = monitor.next_sequence_id().await?;
            let report = monitor.run_cycle(sequence_id).await?;
            if json {
                println!("{}", report::render_json(&report)?);
            } else {
                print!("{}", report::render_text(&report));
            }
        }
        Commands::Monitor { interval, count } => {
            let (pool, analyzer) = open_and_restore(&config).await?;
            let collector = Arc::new(IwScanCollector::new(&config.monitor));
            let monitor = Monitor::new(Arc::new(RwLock::new(analyzer)), collector, Some(pool));
            let options = MonitorOptions {
                interval: Duration::from_secs(interval.unwrap_or(config.monitor.interval_secs).max(1)),
                max_cycles: count,
            };

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let completed = monitor::run_monitor_loop(monitor, options, cancel).await?;
            println!("{} cycle(s) completed", completed);
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.api.bind.clone());
            tracing::info!(%bind, "Starting ambientwatch daemon");
            ambientwatch::serve(config, &bind).await?;
        }
        Commands::Replay { input, json } => {
            let observations = JsonLinesSource::new(&input).read_all()?;
            let mut analyzer = Analyzer::new(&config);
            let mut last = None;

            for obs in observations {
                let sequence_id = obs.sequence_id;
                match analyzer.process(obs) {
                    Ok(r) => {
                        if json {
                            println!("{}", serde_json::to_string(&r)?);
                        } else {
                            println!(
                                "{:>6}  {:<18} {:>5.1}%  {}",
                                r.sequence_id,
                                r.status.to_string(),
                                r.confidence * 100.0,
                                detect::summarize(&r.findings)
                            );
                        }
                        last = Some(r);
                    }
                    Err(e) => warn!(sequence_id, "Skipping observation: {}", e),
                }
            }

            match last {
                Some(r) if !json => print!("\n{}", report::render_text(&r)),
                Some(_) => {}
                None => println!("No valid observations in {}", input.display()),
            }
        }
        Commands::Status => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            match storage::latest_report(&pool)? {
                Some(r) => print!("{}", report::render_text(&r)),
                None => println!("No reports yet. Run `ambientwatch scan` or `ambientwatch monitor`."),
            }
        }
        Commands::Baseline { action } => {
            let pool = storage::open_pool(&config.storage.db_path)?;
            match action {
                BaselineAction::Show => match storage::load_baseline(&pool, storage::CURRENT_BASELINE)? {
                    Some(mut model) => {
                        model.reconfigure(config.baseline.clone());
                        print!("{}", report::render_baseline(&model.snapshot()));
                    }
                    None => println!("No baseline stored yet."),
                },
                BaselineAction::Rebuild => {
                    let status = ambientwatch::rebuild_baseline(&config, &pool)?;
                    println!(
                        "Baseline rebuilt: {} ({} samples, confidence {:.1}%)",
                        status.state,
                        status.sample_count,
                        status.confidence * 100.0
                    );
                }
            }
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK");
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
