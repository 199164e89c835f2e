//! Hierarchical Risk Parity.
//!
//! Correlation distance, single-linkage clustering, quasi-diagonal
//! ordering and recursive bisection. No covariance inversion is involved,
//! so the engine stays usable when the covariance matrix is singular.

pub mod bisection;
pub mod linkage;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::analytics::returns::compute_returns;
use crate::analytics::statistics::{annualized_covariance, compute_correlation};
use crate::error::AllocationError;
use crate::optimization::cleaning::{clean_weights, DEFAULT_WEIGHT_CUTOFF};
use crate::prices::{PriceMatrix, ReturnMatrix};
use crate::types::{with_metadata, ComputationOutput, CorrelationMatrix, Ticker, WeightVector};
use crate::AllocationResult;

pub use bisection::{cluster_variance, recursive_bisection};
pub use linkage::{single_linkage, ClusterTree, Merge};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input to the full HRP report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrpInput {
    pub prices: PriceMatrix,
    /// Cleaning cutoff (default 1e-4).
    #[serde(default)]
    pub weight_cutoff: Option<f64>,
}

/// Output of the full HRP report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrpOutput {
    /// Cleaned weights in input ticker order.
    pub weights: WeightVector,
    /// Bisection weights before cleaning.
    pub raw_weights: WeightVector,
    /// Tickers in quasi-diagonal order.
    pub ordered_tickers: Vec<Ticker>,
    /// Merge records; node ids index `ordered_tickers`' source universe.
    pub tree: ClusterTree,
    /// Annualised variance per ticker, the bisection input.
    pub variances: WeightVector,
    pub hhi_concentration: f64,
}

/// Intermediate results shared by [`optimize_hrp`] and [`run_hrp`].
struct HrpAllocation {
    tree: ClusterTree,
    order: Vec<usize>,
    variances: Vec<f64>,
    weights: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// `sqrt(0.5 * (1 - ρ))`, in [0, 1].
pub fn correlation_distance(correlation: &CorrelationMatrix) -> DMatrix<f64> {
    correlation
        .values()
        .map(|rho| (0.5 * (1.0 - rho.clamp(-1.0, 1.0))).sqrt())
}

/// HRP weights for `prices`.
///
/// An empty universe yields an empty vector and a single asset gets 1.0.
/// Any other failure (insufficient history, zero-variance asset,
/// non-finite distances) is logged and yields an empty vector.
pub fn optimize_hrp(prices: &PriceMatrix) -> WeightVector {
    match prices.n_assets() {
        0 => return WeightVector::new(),
        1 => return WeightVector::from_pairs([(prices.tickers()[0].clone(), 1.0)]),
        _ => {}
    }
    let result = compute_returns(prices).and_then(|returns| {
        let alloc = allocate(&returns)?;
        Ok(weight_vector(returns.tickers(), &alloc.weights))
    });
    match result {
        Ok(weights) => weights,
        Err(e) => {
            warn!(error = %e, "hrp optimization unavailable");
            WeightVector::new()
        }
    }
}

/// Full HRP report: cleaned and raw weights, the cluster tree and the
/// quasi-diagonal order.
pub fn run_hrp(input: &HrpInput) -> AllocationResult<ComputationOutput<HrpOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let cutoff = input.weight_cutoff.unwrap_or(DEFAULT_WEIGHT_CUTOFF);

    let returns = compute_returns(&input.prices)?;
    let alloc = allocate(&returns)?;
    let tickers = returns.tickers();

    let raw_weights = weight_vector(tickers, &alloc.weights);
    let weights = clean_weights(&raw_weights, cutoff)?;
    let hhi_concentration: f64 = weights.values().map(|w| w * w).sum();

    for (t, w) in weights.iter() {
        if w > 0.40 {
            warnings.push(format!("Concentrated position: {t} has weight {w:.4}"));
        }
    }
    if let Some(last) = alloc.tree.merges().last() {
        if last.distance < 0.1 {
            warnings.push(format!(
                "All assets are highly correlated (max merge distance {:.4})",
                last.distance
            ));
        }
    }

    let output = HrpOutput {
        weights,
        raw_weights,
        ordered_tickers: alloc.order.iter().map(|&i| tickers[i].clone()).collect(),
        tree: alloc.tree,
        variances: weight_vector(tickers, &alloc.variances),
        hhi_concentration,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Hierarchical Risk Parity (single linkage, inverse-variance bisection)",
        &serde_json::json!({
            "n_assets": tickers.len(),
            "n_observations": returns.n_periods(),
            "distance": "sqrt(0.5 * (1 - rho))",
            "linkage": "single",
            "weight_cutoff": cutoff,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn allocate(returns: &ReturnMatrix) -> AllocationResult<HrpAllocation> {
    let n = returns.n_assets();
    if n == 0 {
        return Err(AllocationError::DataError("No assets to allocate".into()));
    }
    let correlation = compute_correlation(returns)?;
    let tree = single_linkage(&correlation_distance(&correlation))?;
    let order = tree.leaves_in_order();

    let covariance = annualized_covariance(returns)?;
    let variances: Vec<f64> = (0..n).map(|i| covariance[(i, i)]).collect();
    let weights = recursive_bisection(&variances, &order)?;

    let total: f64 = weights.iter().sum();
    if !total.is_finite() || (total - 1.0).abs() > 1e-9 {
        return Err(AllocationError::NumericalInstability(format!(
            "Bisection weights sum to {total}"
        )));
    }
    debug!(n_assets = n, ?order, "hrp allocation");
    Ok(HrpAllocation {
        tree,
        order,
        variances,
        weights,
    })
}

fn weight_vector(tickers: &[Ticker], values: &[f64]) -> WeightVector {
    tickers.iter().cloned().zip(values.iter().copied()).collect()
}
