use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use allocation_core::{
    compute_returns, portfolio_performance, resolve_weights, with_metadata, AllocationConfig,
    Holding, PerformanceMetrics, PriceMatrix, WeightIntent, WeightVector,
};

use super::PriceArgs;
use crate::input;

#[derive(Args)]
pub struct PerformanceArgs {
    /// Performance request as JSON (`prices`, `weights`)
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,

    /// Holdings CSV (`ticker`, optional `weight` / `quantity`)
    #[arg(long)]
    pub holdings: Option<String>,

    /// Inline weights, e.g. `AAPL=0.6,MSFT=0.4`
    #[arg(long, value_delimiter = ',')]
    pub weights: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PerformanceInput {
    prices: PriceMatrix,
    weights: WeightVector,
}

#[derive(Debug, Serialize)]
struct PerformanceReport {
    weights: WeightVector,
    /// Tickers present in both the weights and the price history.
    matched_tickers: Vec<String>,
    n_observations: usize,
    #[serde(flatten)]
    metrics: PerformanceMetrics,
}

pub fn run_performance(args: PerformanceArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();

    let (prices, weights) = match args.prices.load(config)? {
        Some(prices) => {
            let holdings = match (&args.holdings, args.weights.is_empty()) {
                (Some(path), _) => input::csv_in::read_holdings(path)?,
                (None, false) => parse_inline_weights(&args.weights)?,
                (None, true) => return Err("--holdings <file.csv> or --weights required with --prices".into()),
            };
            let intent = WeightIntent::from_holdings(&holdings)?;
            let weights = resolve_weights(&intent, &prices)?;
            (prices, weights)
        }
        None => {
            let req: PerformanceInput = input::read_request(args.input.as_deref(), "performance evaluation")?;
            (req.prices, req.weights)
        }
    };

    let returns = compute_returns(&prices)?;
    let metrics = portfolio_performance(&weights, &returns);
    let matched_tickers: Vec<String> = weights
        .tickers()
        .filter(|t| returns.position(t).is_some())
        .map(str::to_string)
        .collect();

    let mut warnings = Vec::new();
    if matched_tickers.len() < weights.len() {
        warnings.push(format!(
            "{} of {} weighted tickers have no price history and were ignored",
            weights.len() - matched_tickers.len(),
            weights.len()
        ));
    }

    let report = PerformanceReport {
        weights,
        matched_tickers,
        n_observations: returns.n_periods(),
        metrics,
    };
    let output = with_metadata(
        "Annualised mean and volatility of the weighted daily return series",
        &serde_json::json!({
            "annualization_periods": 252,
            "sharpe_risk_free_rate": 0.0,
        }),
        warnings,
        start.elapsed().as_micros() as u64,
        report,
    );
    Ok(serde_json::to_value(output)?)
}

/// `TICK=weight` pairs into weighted holdings.
fn parse_inline_weights(pairs: &[String]) -> Result<Vec<Holding>, Box<dyn std::error::Error>> {
    pairs
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|pair| -> Result<Holding, Box<dyn std::error::Error>> {
            let (ticker, weight) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected TICKER=WEIGHT, got '{pair}'"))?;
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|e| format!("Invalid weight for {}: {e}", ticker.trim()))?;
            Ok(Holding::new(ticker.trim()).with_weight(weight))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_weights() {
        let h = parse_inline_weights(&["AAA=0.6".into(), " BBB = 0.4".into()]).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[1].ticker, "BBB");
        assert_eq!(h[1].weight, Some(0.4));
    }

    #[test]
    fn test_parse_inline_weights_rejects_missing_separator() {
        assert!(parse_inline_weights(&["AAA:0.6".into()]).is_err());
        assert!(parse_inline_weights(&["AAA=abc".into()]).is_err());
    }
}
