mod commands;
mod input;
mod output;

use allocation_core::{AllocationConfig, AllocationError};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::analyze::AnalyzeArgs;
use commands::optimize::{FrontierArgs, HrpArgs, MeanVarianceArgs};
use commands::performance::PerformanceArgs;
use commands::returns::ReturnsArgs;

/// Portfolio allocation from historical prices
#[derive(Parser)]
#[command(
    name = "alloc",
    version,
    about = "Portfolio allocation from historical prices",
    long_about = "Computes return statistics, long-only maximum Sharpe (mean-variance) \
                  and Hierarchical Risk Parity weights from a price history, and \
                  evaluates current and optimized portfolios."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Allocation settings file (JSON or YAML)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlation, covariance and annualised volatility of returns
    Returns(ReturnsArgs),
    /// Long-only maximum Sharpe ratio weights
    MeanVariance(MeanVarianceArgs),
    /// Hierarchical Risk Parity weights
    Hrp(HrpArgs),
    /// Efficient frontier points
    Frontier(FrontierArgs),
    /// Expected return and volatility of a weighting
    Performance(PerformanceArgs),
    /// Full analysis of a portfolio: statistics, both optimizers, advice
    Analyze(AnalyzeArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => fail(e),
    };

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Returns(args) => commands::returns::run_returns(args, &config),
        Commands::MeanVariance(args) => commands::optimize::run_mean_variance(args, &config),
        Commands::Hrp(args) => commands::optimize::run_hrp(args, &config),
        Commands::Frontier(args) => commands::optimize::run_frontier(args, &config),
        Commands::Performance(args) => commands::performance::run_performance(args, &config),
        Commands::Analyze(args) => commands::analyze::run_analyze(args, &config),
        Commands::Version => {
            println!("alloc {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => fail(e),
    }
}

fn load_config(path: Option<&str>) -> Result<AllocationConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => input::file::read_config(path)?,
        None => AllocationConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Internal numerical failures exit with 1; anything caused by the input
/// (bad files, bad arguments, insufficient data) exits with 2.
fn fail(e: Box<dyn std::error::Error>) -> ! {
    eprintln!("{}: {}", "error".red().bold(), e);
    let code = match e.downcast_ref::<AllocationError>() {
        Some(err) if !err.is_client_error() => 1,
        _ => 2,
    };
    process::exit(code);
}
