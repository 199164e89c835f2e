//! End-to-end portfolio analysis: statistics on the current holdings, both
//! optimizers, cleaning, evaluation of every candidate and advice.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::analytics::performance::portfolio_performance;
use crate::analytics::returns::compute_returns;
use crate::analytics::statistics::{compute_annualized_volatility, compute_correlation};
use crate::collaborators::{AdviceGenerator, AdviceRequest, ChatRequest, OptimizedWeights};
use crate::config::AllocationConfig;
use crate::error::AllocationError;
use crate::holdings::{resolve_weights, Holding, WeightIntent};
use crate::optimization::cleaning::clean_weights;
use crate::optimization::hrp::optimize_hrp;
use crate::optimization::mean_variance::{optimize_mean_variance_with, MeanVarianceSettings};
use crate::prices::{LookbackPeriod, PriceMatrix};
use crate::types::{
    with_metadata, ComputationOutput, CorrelationMatrix, PerformanceMetrics, Ticker, TickerMap,
    WeightVector,
};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The portfolio to analyse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub holdings: Vec<Holding>,
}

/// Self-contained analysis input for JSON surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub holdings: Vec<Holding>,
    pub prices: PriceMatrix,
    #[serde(default)]
    pub config: AllocationConfig,
}

/// Performance of each optimized candidate after cleaning. `None` when the
/// optimizer was unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidatePerformance {
    pub mvo: Option<PerformanceMetrics>,
    pub hrp: Option<PerformanceMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub tickers: Vec<Ticker>,
    pub lookback: LookbackPeriod,
    pub n_observations: usize,
    pub correlation_matrix: CorrelationMatrix,
    pub volatility: TickerMap,
    pub current_weights: Option<WeightVector>,
    pub current_performance: Option<PerformanceMetrics>,
    /// Cleaned weights; an empty mapping means the optimizer was
    /// unavailable for this input.
    pub optimized_weights: OptimizedWeights,
    pub optimized_performance: CandidatePerformance,
    pub advice: String,
    /// Chat completion for the configured advisor, for hosts that send it
    /// themselves. Absent when no advisor is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice_request: Option<ChatRequest>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Analyse `request` against `prices`.
///
/// Insufficient history and invalid holdings are errors. Optimizer
/// failures and timeouts leave that candidate empty; an advisor failure
/// is reported in the advice text and as a warning.
pub fn analyze_portfolio(
    request: &AnalysisRequest,
    prices: &PriceMatrix,
    config: &AllocationConfig,
    advisor: &dyn AdviceGenerator,
) -> AllocationResult<ComputationOutput<AnalysisOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    config.validate()?;

    let intent = WeightIntent::from_holdings(&request.holdings)?;
    let tickers = intent.tickers();
    let prices = prices
        .select(&tickers)?
        .with_lookback(config.lookback)
        .trim_to_common_history();

    let returns = compute_returns(&prices)?;
    let correlation_matrix = compute_correlation(&returns)?;
    let volatility = compute_annualized_volatility(&returns)?;
    info!(
        n_assets = tickers.len(),
        n_observations = returns.n_periods(),
        "portfolio statistics computed"
    );

    let current_weights = match resolve_weights(&intent, &prices) {
        Ok(w) => Some(w),
        Err(AllocationError::DegenerateAllocation(msg)) => {
            warnings.push(format!("Current weights unavailable: {msg}"));
            None
        }
        Err(e) => return Err(e),
    };
    let current_performance = current_weights
        .as_ref()
        .map(|w| portfolio_performance(w, &returns));

    let settings = MeanVarianceSettings::from(config);
    let deadline = engine_deadline(config.optimization_timeout_ms, Instant::now());
    let mvo_rx = spawn_engine({
        let prices = prices.clone();
        move || optimize_mean_variance_with(&prices, &settings)
    });
    let hrp_rx = spawn_engine({
        let prices = prices.clone();
        move || optimize_hrp(&prices)
    });
    let mvo_raw = await_engine("Mean-variance", &mvo_rx, deadline, &mut warnings);
    let hrp_raw = await_engine("HRP", &hrp_rx, deadline, &mut warnings);

    let optimized_weights = OptimizedWeights {
        mvo: clean_weights(&mvo_raw, config.weight_cutoff)?,
        hrp: clean_weights(&hrp_raw, config.weight_cutoff)?,
    };
    let evaluate = |w: &WeightVector| (!w.is_empty()).then(|| portfolio_performance(w, &returns));
    let optimized_performance = CandidatePerformance {
        mvo: evaluate(&optimized_weights.mvo),
        hrp: evaluate(&optimized_weights.hrp),
    };

    let advice_request = AdviceRequest {
        tickers: tickers.clone(),
        current_weights: current_weights.clone(),
        current_performance,
        optimized: optimized_weights.clone(),
    };
    let chat_request = advice_request.chat_request(&config.advisor);
    let advice = match advisor.generate(&advice_request) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "advice generation failed");
            warnings.push(format!("Advice unavailable: {e}"));
            format!("Error gathering advice: {e}")
        }
    };

    let output = AnalysisOutput {
        tickers,
        lookback: config.lookback,
        n_observations: returns.n_periods(),
        correlation_matrix,
        volatility,
        current_weights,
        current_performance,
        optimized_weights,
        optimized_performance,
        advice,
        advice_request: chat_request,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Portfolio analysis: correlation, volatility, max-Sharpe MVO and HRP",
        &serde_json::json!({
            "lookback": config.lookback,
            "risk_free_rate": config.risk_free_rate,
            "weight_cutoff": config.weight_cutoff,
            "annualization_periods": 252,
            "optimization_timeout_ms": config.optimization_timeout_ms,
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// [`analyze_portfolio`] for a self-contained JSON input.
pub fn run_analysis(
    input: &AnalysisInput,
    advisor: &dyn AdviceGenerator,
) -> AllocationResult<ComputationOutput<AnalysisOutput>> {
    let request = AnalysisRequest {
        holdings: input.holdings.clone(),
    };
    analyze_portfolio(&request, &input.prices, &input.config, advisor)
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Both engines start together, so one deadline bounds each of them.
fn engine_deadline(timeout_ms: Option<u64>, spawned_at: Instant) -> Option<Instant> {
    timeout_ms.map(|ms| spawned_at + Duration::from_millis(ms))
}

fn spawn_engine<F>(job: F) -> Receiver<WeightVector>
where
    F: FnOnce() -> WeightVector + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // receiver may already have given up
        let _ = tx.send(job());
    });
    rx
}

fn await_engine(
    name: &str,
    rx: &Receiver<WeightVector>,
    deadline: Option<Instant>,
    warnings: &mut Vec<String>,
) -> WeightVector {
    let received = match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(weights) if weights.is_empty() => {
            warnings.push(format!("{name} optimization unavailable for this input"));
            weights
        }
        Ok(weights) => {
            debug!(engine = name, n = weights.len(), "optimizer finished");
            weights
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(engine = name, "optimizer timed out");
            warnings.push(format!("{name} optimization timed out"));
            WeightVector::new()
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!(engine = name, "optimizer worker terminated");
            warnings.push(format!("{name} optimization failed"));
            WeightVector::new()
        }
    }
}
