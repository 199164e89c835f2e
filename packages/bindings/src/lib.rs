use napi::Result as NapiResult;
use napi_derive::napi;
use serde::Deserialize;

use allocation_core::analysis::AnalysisInput;
use allocation_core::collaborators::DisabledAdvisor;
use allocation_core::optimization::hrp::HrpInput;
use allocation_core::optimization::mean_variance::{MeanVarianceInput, MeanVarianceSettings};
use allocation_core::{PriceMatrix, WeightVector};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

#[derive(Deserialize)]
struct WeightsAndPrices {
    weights: WeightVector,
    prices: PriceMatrix,
}

#[derive(Deserialize)]
struct CleanInput {
    weights: WeightVector,
    #[serde(default)]
    cutoff: Option<f64>,
}

#[derive(Deserialize)]
struct OptimizeInput {
    prices: PriceMatrix,
    #[serde(default)]
    risk_free_rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// Returns and statistics
// ---------------------------------------------------------------------------

#[napi]
pub fn compute_returns(prices_json: String) -> NapiResult<String> {
    let prices: PriceMatrix = serde_json::from_str(&prices_json).map_err(to_napi_error)?;
    let output = allocation_core::compute_returns(&prices).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn compute_correlation(prices_json: String) -> NapiResult<String> {
    let prices: PriceMatrix = serde_json::from_str(&prices_json).map_err(to_napi_error)?;
    let returns = allocation_core::compute_returns(&prices).map_err(to_napi_error)?;
    let output = allocation_core::compute_correlation(&returns).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn compute_annualized_volatility(prices_json: String) -> NapiResult<String> {
    let prices: PriceMatrix = serde_json::from_str(&prices_json).map_err(to_napi_error)?;
    let returns = allocation_core::compute_returns(&prices).map_err(to_napi_error)?;
    let output = allocation_core::compute_annualized_volatility(&returns).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn evaluate_performance(input_json: String) -> NapiResult<String> {
    let input: WeightsAndPrices = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let returns = allocation_core::compute_returns(&input.prices).map_err(to_napi_error)?;
    let output = allocation_core::portfolio_performance(&input.weights, &returns);
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Optimization
// ---------------------------------------------------------------------------

/// Raw max-Sharpe weights; `{}` when the optimizer has no solution.
#[napi]
pub fn optimize_mean_variance(input_json: String) -> NapiResult<String> {
    let input: OptimizeInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let settings = MeanVarianceSettings {
        risk_free_rate: input.risk_free_rate.unwrap_or(0.02),
        ..Default::default()
    };
    let output =
        allocation_core::optimization::mean_variance::optimize_mean_variance_with(&input.prices, &settings);
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn optimize_hrp(prices_json: String) -> NapiResult<String> {
    let prices: PriceMatrix = serde_json::from_str(&prices_json).map_err(to_napi_error)?;
    let output = allocation_core::optimize_hrp(&prices);
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn clean_weights(input_json: String) -> NapiResult<String> {
    let input: CleanInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let cutoff = input
        .cutoff
        .unwrap_or(allocation_core::optimization::cleaning::DEFAULT_WEIGHT_CUTOFF);
    let output = allocation_core::clean_weights(&input.weights, cutoff).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn run_mean_variance(input_json: String) -> NapiResult<String> {
    let input: MeanVarianceInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        allocation_core::optimization::mean_variance::run_mean_variance(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn run_hrp(input_json: String) -> NapiResult<String> {
    let input: HrpInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = allocation_core::optimization::hrp::run_hrp(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Full portfolio analysis. Advice is always the disabled-advisor message;
/// hosts that own an LLM client generate advice from the returned weights.
#[napi]
pub fn analyze_portfolio(input_json: String) -> NapiResult<String> {
    let input: AnalysisInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output =
        allocation_core::analysis::run_analysis(&input, &DisabledAdvisor).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}
