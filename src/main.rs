use std::path::PathBuf;

use anyhow::{Context, Result};
use antigravity::config::{AppConfig, DecisionLogKind, LogFormat};
use antigravity::engine::Decision;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "antigravity",
    about = "Carbon-aware GPU job scheduler",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (overrides ANTIGRAVITY_CONFIG and the system path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + decision engine)
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Pre-load the demo jobs, forecast and telemetry
        #[arg(long)]
        seed: bool,
    },

    /// Run the demo workload through an in-memory engine
    Demo {
        /// Number of decision cycles
        #[arg(long, default_value = "6")]
        cycles: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show decisions from the persisted decision log
    History {
        /// Decision log path (overrides decision_log.path)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Newest N decisions
        #[arg(long, default_value = "50")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Stderr subscriber active while the config file is located and loaded.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn print_decisions(decisions: &[Decision]) {
    println!(
        "{:<26} | {:<8} | {:<20} | {:<11} | Reason",
        "Timestamp", "Action", "Task", "Mode"
    );
    println!("{:-<26}-|-{:-<8}-|-{:-<20}-|-{:-<11}-|-{:-<30}", "", "", "", "", "");
    for d in decisions {
        println!(
            "{:<26} | {:<8} | {:<20} | {:<11} | {}",
            d.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            d.action(),
            d.task_id().unwrap_or("-"),
            d.mode(),
            d.reason()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        AppConfig::resolve(cli.config.as_deref())
    })?;

    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind, seed } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            tracing::info!(bind = %config.server.bind, "starting antigravity daemon");
            antigravity::serve(config, seed).await?;
        }
        Commands::Demo { cycles, json } => {
            let decisions = antigravity::demo::run(&config, cycles).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&decisions)?);
            } else {
                println!("\nAntiGravity Demo ({} cycles)", cycles);
                print_decisions(&decisions);
                let saved: f64 = decisions
                    .iter()
                    .map(|d| d.metrics.carbon_saved_est_grams)
                    .sum();
                println!("\nEstimated carbon saved: {:.2} gCO2", saved);
            }
        }
        Commands::History { db, limit, json } => {
            let path = db.unwrap_or_else(|| config.decision_log.path.clone());
            let decisions = match config.decision_log.kind {
                DecisionLogKind::Memory => {
                    anyhow::bail!("the memory decision log is not persisted between runs")
                }
                DecisionLogKind::Jsonl => {
                    let all = antigravity::storage::journal::read_journal(&path).await?;
                    let skip = all.len().saturating_sub(limit);
                    all.into_iter().skip(skip).collect::<Vec<_>>()
                }
                DecisionLogKind::Sqlite => {
                    let path_str = path.to_string_lossy();
                    let pool = antigravity::storage::open_pool(&path_str)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    antigravity::storage::SqliteDecisionLog::new(pool).recent(limit)?
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&decisions)?);
            } else if decisions.is_empty() {
                println!("No decisions recorded in {}", path.display());
            } else {
                print_decisions(&decisions);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
