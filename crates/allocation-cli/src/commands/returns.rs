use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

use allocation_core::{
    compute_annualized_volatility, compute_correlation, compute_covariance, compute_returns,
    with_metadata, AllocationConfig, CorrelationMatrix, CovarianceMatrix, PriceMatrix, TickerMap,
    TRADING_PERIODS_PER_YEAR,
};

use super::PriceArgs;
use crate::input;

#[derive(Args)]
pub struct ReturnsArgs {
    /// Price matrix as JSON (`tickers`, `dates`, `rows`)
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,
}

#[derive(Debug, Serialize)]
struct ReturnsSummary {
    tickers: Vec<String>,
    n_observations: usize,
    start_date: Option<String>,
    end_date: Option<String>,
    volatility: TickerMap,
    correlation: CorrelationMatrix,
    /// Sample covariance x 252.
    annualized_covariance: CovarianceMatrix,
}

pub fn run_returns(args: ReturnsArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let prices: PriceMatrix = match args.prices.load(config)? {
        Some(p) => p,
        None => input::read_request(args.input.as_deref(), "return statistics")?,
    };

    let returns = compute_returns(&prices)?;
    let summary = ReturnsSummary {
        tickers: returns.tickers().to_vec(),
        n_observations: returns.n_periods(),
        start_date: returns.dates().first().map(|d| d.to_string()),
        end_date: returns.dates().last().map(|d| d.to_string()),
        volatility: compute_annualized_volatility(&returns)?,
        correlation: compute_correlation(&returns)?,
        annualized_covariance: compute_covariance(&returns)?.scaled(TRADING_PERIODS_PER_YEAR),
    };

    let output = with_metadata(
        "Simple returns, Pearson correlation, sample covariance",
        &serde_json::json!({ "annualization_periods": TRADING_PERIODS_PER_YEAR }),
        Vec::new(),
        start.elapsed().as_micros() as u64,
        summary,
    );
    Ok(serde_json::to_value(output)?)
}
