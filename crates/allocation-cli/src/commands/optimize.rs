use clap::Args;
use serde_json::{json, Value};

use allocation_core::optimization::hrp::{self, HrpInput};
use allocation_core::optimization::mean_variance::{self, MeanVarianceInput};
use allocation_core::AllocationConfig;

use super::PriceArgs;
use crate::input;

#[derive(Args)]
pub struct MeanVarianceArgs {
    /// Mean-variance request as JSON (`prices` plus optional settings)
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,

    /// Annual risk-free rate (overrides --config)
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<f64>,

    /// Minimise risk at this annual return instead of maximising Sharpe
    #[arg(long, allow_hyphen_values = true)]
    pub target_return: Option<f64>,

    /// Number of efficient frontier points
    #[arg(long)]
    pub frontier_points: Option<usize>,
}

#[derive(Args)]
pub struct HrpArgs {
    /// HRP request as JSON (`prices`, optional `weight_cutoff`)
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,
}

#[derive(Args)]
pub struct FrontierArgs {
    /// Mean-variance request as JSON
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,

    /// Annual risk-free rate used for each point's Sharpe ratio
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<f64>,

    /// Number of points
    #[arg(long)]
    pub points: Option<usize>,
}

fn mean_variance_input(
    path: Option<&str>,
    prices: &PriceArgs,
    config: &AllocationConfig,
) -> Result<MeanVarianceInput, Box<dyn std::error::Error>> {
    let mut mv_input = match prices.load(config)? {
        Some(prices) => MeanVarianceInput {
            prices,
            risk_free_rate: None,
            weight_cutoff: None,
            frontier_points: None,
            target_return: None,
            solver: None,
        },
        None => input::read_request(path, "mean-variance optimization")?,
    };
    mv_input.risk_free_rate = mv_input.risk_free_rate.or(Some(config.risk_free_rate));
    mv_input.weight_cutoff = mv_input.weight_cutoff.or(Some(config.weight_cutoff));
    mv_input.frontier_points = mv_input.frontier_points.or(Some(config.frontier_points));
    mv_input.solver = mv_input.solver.or(Some(config.solver));
    Ok(mv_input)
}

pub fn run_mean_variance(args: MeanVarianceArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let mut mv_input = mean_variance_input(args.input.as_deref(), &args.prices, config)?;
    if args.risk_free_rate.is_some() {
        mv_input.risk_free_rate = args.risk_free_rate;
    }
    if args.target_return.is_some() {
        mv_input.target_return = args.target_return;
    }
    if args.frontier_points.is_some() {
        mv_input.frontier_points = args.frontier_points;
    }
    let result = mean_variance::run_mean_variance(&mv_input)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_hrp(args: HrpArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let mut hrp_input: HrpInput = match args.prices.load(config)? {
        Some(prices) => HrpInput {
            prices,
            weight_cutoff: None,
        },
        None => input::read_request(args.input.as_deref(), "HRP optimization")?,
    };
    hrp_input.weight_cutoff = hrp_input.weight_cutoff.or(Some(config.weight_cutoff));
    let result = hrp::run_hrp(&hrp_input)?;
    Ok(serde_json::to_value(result)?)
}

/// Frontier points as rows, each with its weights keyed by ticker.
pub fn run_frontier(args: FrontierArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let mut mv_input = mean_variance_input(args.input.as_deref(), &args.prices, config)?;
    if args.risk_free_rate.is_some() {
        mv_input.risk_free_rate = args.risk_free_rate;
    }
    if args.points.is_some() {
        mv_input.frontier_points = args.points;
    }
    let result = mean_variance::run_mean_variance(&mv_input)?.result;
    let tickers: Vec<&str> = result.weights.tickers().collect();

    let rows: Vec<Value> = result
        .efficient_frontier
        .iter()
        .map(|p| {
            let weights: serde_json::Map<String, Value> = tickers
                .iter()
                .zip(&p.weights)
                .map(|(t, w)| (t.to_string(), json!(w)))
                .collect();
            json!({
                "expected_return": p.expected_return,
                "risk": p.risk,
                "sharpe_ratio": p.sharpe_ratio,
                "weights": weights,
            })
        })
        .collect();
    Ok(Value::Array(rows))
}
