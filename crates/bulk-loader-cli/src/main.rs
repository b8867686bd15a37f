//! bulk-loader CLI - benchmark record loading strategies against a table.

use bulk_loader::target::TargetConnection;
use bulk_loader::{
    health_check, input, AnyTarget, BenchCase, BenchRunner, Config, ConnectionFactory, LoadError,
    Loader, Strategy,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "bulk-loader")]
#[command(about = "Benchmark bulk record loading strategies")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the strategy suite over the configured input
    Bench {
        /// Suite case to run; repeat to run several (default: bench.strategies or the full suite)
        #[arg(long = "strategy")]
        strategies: Vec<String>,
    },

    /// Load the configured input once with a single strategy
    Load {
        /// Strategy: row-at-a-time, periodic-commit, range-insert, native-bulk-copy, bulk-helper
        #[arg(long)]
        strategy: String,

        /// Truncate the table before loading
        #[arg(long)]
        truncate: bool,
    },

    /// Test the target connection and table
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let schema = config.resolve_schema()?;
    let target = AnyTarget::from_config(&config.target, &schema)?;

    match cli.command {
        Commands::Bench { strategies } => {
            if !strategies.is_empty() {
                config.bench.strategies = strategies;
            }
            let cases = BenchCase::select(&config.bench.strategies)?;
            let records = input::load(&config.input)?;

            let report = BenchRunner::new(&target, &schema, config.load.clone())
                .create_table(config.table.create_if_missing)
                .run(&cases, &records)
                .await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_text());
                if report.failed() > 0 {
                    println!("\n  Failed cases: {}/{}", report.failed(), report.cases.len());
                }
            }
        }

        Commands::Load { strategy, truncate } => {
            let strategy: Strategy = strategy.parse()?;
            config.load.validate(strategy)?;
            let mut records = input::load(&config.input)?;

            if config.table.create_if_missing || truncate {
                let mut conn = target.connect().await?;
                if config.table.create_if_missing {
                    conn.ensure_table(&schema).await?;
                }
                if truncate {
                    conn.truncate(&schema.table).await?;
                }
                conn.close().await?;
            }

            let outcome = Loader::new(&target, &schema)
                .persist(strategy, &mut records, &config.load)
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("\nLoad completed!");
                println!("  Strategy: {}", outcome.strategy);
                println!("  Table: {}", schema.table);
                println!("  Rows: {}", outcome.records_written);
                println!("  Duration: {}ms", outcome.elapsed_ms());
                println!("  Sessions: {}", outcome.sessions_opened);
                println!("  Flushes: {}", outcome.flushes);
            }
        }

        Commands::HealthCheck => {
            let result = health_check(&target, &schema.table).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target ({}): {} ({}ms)",
                    result.target,
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(rows) = result.table_rows {
                    println!("  Table {}: {} rows", schema.table, rows);
                }
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(LoadError::connectivity(
                    "running health check",
                    result.error.unwrap_or_else(|| "unhealthy".to_string()),
                ));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
