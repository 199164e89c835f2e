use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::analytics::returns::compute_returns;
use crate::analytics::statistics::{annualized_covariance, annualized_mean_returns};
use crate::config::AllocationConfig;
use crate::error::AllocationError;
use crate::optimization::cleaning::{clean_weights, DEFAULT_WEIGHT_CUTOFF};
use crate::optimization::qp::{solve_nonnegative_qp, QpSettings, QuadraticProgram};
use crate::prices::PriceMatrix;
use crate::types::{with_metadata, ComputationOutput, Ticker, WeightVector};
use crate::AllocationResult;

/// Budget and non-negativity residuals above this reject a solution.
const RESIDUAL_TOLERANCE: f64 = 1e-6;

/// Smallest squared Cholesky pivot, relative to the largest variance,
/// accepted as positive definite.
const SINGULARITY_THRESHOLD: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Parameters of the max-Sharpe optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanVarianceSettings {
    /// Annual risk-free rate.
    pub risk_free_rate: f64,
    pub solver: QpSettings,
}

impl Default for MeanVarianceSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            solver: QpSettings::default(),
        }
    }
}

impl From<&AllocationConfig> for MeanVarianceSettings {
    fn from(config: &AllocationConfig) -> Self {
        Self {
            risk_free_rate: config.risk_free_rate,
            solver: config.solver,
        }
    }
}

/// Annualised return and covariance estimates for a ticker universe.
#[derive(Debug, Clone)]
pub struct MarketEstimates {
    pub tickers: Vec<Ticker>,
    /// Historical mean return x 252.
    pub expected_returns: DVector<f64>,
    /// Sample covariance x 252.
    pub covariance: DMatrix<f64>,
}

impl MarketEstimates {
    pub fn from_prices(prices: &PriceMatrix) -> AllocationResult<Self> {
        let returns = compute_returns(prices)?;
        Ok(Self {
            tickers: returns.tickers().to_vec(),
            expected_returns: annualized_mean_returns(&returns)?,
            covariance: annualized_covariance(&returns)?,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    fn portfolio_return(&self, w: &DVector<f64>) -> f64 {
        w.dot(&self.expected_returns)
    }

    fn portfolio_risk(&self, w: &DVector<f64>) -> f64 {
        w.dot(&(&self.covariance * w)).max(0.0).sqrt()
    }

    fn to_weight_vector(&self, w: &DVector<f64>) -> WeightVector {
        self.tickers.iter().cloned().zip(w.iter().copied()).collect()
    }
}

/// Input to the full mean-variance report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanVarianceInput {
    pub prices: PriceMatrix,
    /// Annual risk-free rate (default 0.02).
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    /// Cleaning cutoff (default 1e-4).
    #[serde(default)]
    pub weight_cutoff: Option<f64>,
    /// Number of efficient frontier points (default 20).
    #[serde(default)]
    pub frontier_points: Option<usize>,
    /// Minimise risk at this annual return instead of maximising Sharpe.
    #[serde(default)]
    pub target_return: Option<f64>,
    #[serde(default)]
    pub solver: Option<QpSettings>,
}

/// A single asset weight with risk/return contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWeight {
    pub name: String,
    pub weight: f64,
    /// Marginal risk contribution times weight.
    pub contribution_to_risk: f64,
    /// Weight times expected return.
    pub contribution_to_return: f64,
}

/// A single point on the efficient frontier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
    pub weights: Vec<f64>,
}

/// A named portfolio point (tangency or min-variance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPoint {
    pub weights: WeightVector,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
}

/// Output of the full mean-variance report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanVarianceOutput {
    /// Cleaned optimal weights.
    pub weights: WeightVector,
    /// Per-asset breakdown of the cleaned weights.
    pub optimal_weights: Vec<AssetWeight>,
    pub portfolio_return: f64,
    pub portfolio_risk: f64,
    /// (return - rf) / risk.
    pub sharpe_ratio: f64,
    /// Maximum Sharpe ratio portfolio (uncleaned); `None` when no asset
    /// earns more than the risk-free rate.
    pub tangency_portfolio: Option<PortfolioPoint>,
    /// Global minimum variance portfolio (uncleaned).
    pub min_variance_portfolio: PortfolioPoint,
    pub efficient_frontier: Vec<FrontierPoint>,
    /// Weighted average vol / portfolio vol.
    pub diversification_ratio: f64,
    /// Herfindahl-Hirschman index of weights.
    pub hhi_concentration: f64,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Long-only maximum Sharpe weights with the default risk-free rate.
///
/// Returns an empty vector when the optimization is unavailable for this
/// input (singular covariance, no asset beating the risk-free rate, solver
/// failure); the reason is logged.
pub fn optimize_mean_variance(prices: &PriceMatrix) -> WeightVector {
    optimize_mean_variance_with(prices, &MeanVarianceSettings::default())
}

/// [`optimize_mean_variance`] with explicit settings.
pub fn optimize_mean_variance_with(
    prices: &PriceMatrix,
    settings: &MeanVarianceSettings,
) -> WeightVector {
    if prices.n_assets() == 1 {
        return WeightVector::from_pairs([(prices.tickers()[0].clone(), 1.0)]);
    }
    let result = MarketEstimates::from_prices(prices)
        .and_then(|est| max_sharpe(&est, settings).map(|w| est.to_weight_vector(&w)));
    match result {
        Ok(weights) => weights,
        Err(e) => {
            warn!(error = %e, "mean-variance optimization unavailable");
            WeightVector::new()
        }
    }
}

/// Maximum Sharpe ratio weights, long-only, fully invested.
///
/// Uses the standard convex reformulation: minimise y'Σy subject to
/// (μ - r_f)'y = 1 and y >= 0, then w = y / Σy.
pub fn max_sharpe(est: &MarketEstimates, settings: &MeanVarianceSettings) -> AllocationResult<DVector<f64>> {
    let n = est.n_assets();
    if n == 1 {
        return Ok(DVector::from_element(1, 1.0));
    }
    ensure_positive_definite(&est.covariance)?;

    let excess = est.expected_returns.add_scalar(-settings.risk_free_rate);
    let (best, best_excess) = excess
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, e)| if e > acc.1 { (i, e) } else { acc });
    if best_excess <= 0.0 {
        return Err(AllocationError::InfeasibleOptimization(format!(
            "No asset has an expected return above the risk-free rate {}",
            settings.risk_free_rate
        )));
    }

    let problem = QuadraticProgram::new(
        est.covariance.clone(),
        DMatrix::from_row_slice(1, n, excess.as_slice()),
        DVector::from_element(1, 1.0),
    );
    let mut start = DVector::zeros(n);
    start[best] = 1.0 / best_excess;

    let solution = solve_nonnegative_qp(&problem, &start, &settings.solver);
    debug!(status = ?solution.status, iterations = solution.iterations, "max-sharpe solve");
    let y = solution.into_result("max_sharpe")?;

    let total = y.sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(AllocationError::NumericalInstability(format!(
            "Max-Sharpe scaling vector sums to {total}"
        )));
    }
    let w = y / total;
    check_residuals(&w)?;
    Ok(w)
}

/// Global minimum variance weights, long-only, fully invested.
pub fn min_volatility(est: &MarketEstimates, settings: &QpSettings) -> AllocationResult<DVector<f64>> {
    let n = est.n_assets();
    if n == 0 {
        return Err(AllocationError::DataError("No assets to optimize".into()));
    }
    ensure_positive_definite(&est.covariance)?;

    let problem = QuadraticProgram::new(
        est.covariance.clone(),
        DMatrix::from_element(1, n, 1.0),
        DVector::from_element(1, 1.0),
    );
    let start = DVector::from_element(n, 1.0 / n as f64);
    let w = solve_nonnegative_qp(&problem, &start, settings).into_result("min_volatility")?;
    check_residuals(&w)?;
    Ok(w)
}

/// Minimum variance weights earning `target` annual return.
pub fn efficient_return(
    est: &MarketEstimates,
    target: f64,
    settings: &QpSettings,
) -> AllocationResult<DVector<f64>> {
    let n = est.n_assets();
    if n == 0 {
        return Err(AllocationError::DataError("No assets to optimize".into()));
    }
    let mu = &est.expected_returns;
    let (lo_idx, lo) = extreme(mu, |a, b| a < b);
    let (hi_idx, hi) = extreme(mu, |a, b| a > b);
    let eps = 1e-12 * (1.0 + hi.abs().max(lo.abs()));

    if !target.is_finite() || target < lo - eps || target > hi + eps {
        return Err(AllocationError::InfeasibleOptimization(format!(
            "Target return {target} outside achievable range [{lo}, {hi}]"
        )));
    }
    if hi - lo <= eps {
        return min_volatility(est, settings);
    }
    if target >= hi - eps {
        return Ok(unit_vector(n, hi_idx));
    }
    if target <= lo + eps {
        return Ok(unit_vector(n, lo_idx));
    }
    ensure_positive_definite(&est.covariance)?;

    // Strictly positive feasible start: blend equal weights with the
    // two-asset mix of the lowest and highest returning assets.
    let mean = mu.mean();
    let room = if target >= mean {
        (hi - target) / (hi - mean)
    } else {
        (target - lo) / (mean - lo)
    };
    let lambda = 0.5 * room.min(1.0);
    let blended_target = (target - lambda * mean) / (1.0 - lambda);
    let hi_share = (blended_target - lo) / (hi - lo);
    let mut start = DVector::from_element(n, lambda / n as f64);
    start[lo_idx] += (1.0 - lambda) * (1.0 - hi_share);
    start[hi_idx] += (1.0 - lambda) * hi_share;

    let mut constraints = DMatrix::from_element(2, n, 1.0);
    constraints.set_row(1, &mu.transpose());
    let problem = QuadraticProgram::new(
        est.covariance.clone(),
        constraints,
        DVector::from_vec(vec![1.0, target]),
    );
    let w = solve_nonnegative_qp(&problem, &start, settings).into_result("efficient_return")?;
    check_residuals(&w)?;
    Ok(w)
}

/// Sweep target returns from the minimum variance portfolio up to the
/// highest-returning asset. Points whose solve fails are skipped.
pub fn efficient_frontier(
    est: &MarketEstimates,
    risk_free_rate: f64,
    points: usize,
    settings: &QpSettings,
) -> AllocationResult<Vec<FrontierPoint>> {
    let min_var = min_volatility(est, settings)?;
    let start_ret = est.portfolio_return(&min_var);
    let (_, end_ret) = extreme(&est.expected_returns, |a, b| a > b);
    let points = points.max(2);

    let mut frontier = Vec::with_capacity(points);
    for i in 0..points {
        let w = if i == 0 {
            min_var.clone()
        } else {
            let target = start_ret + (end_ret - start_ret) * i as f64 / (points - 1) as f64;
            match efficient_return(est, target.max(start_ret), settings) {
                Ok(w) => w,
                Err(e) => {
                    debug!(target, error = %e, "frontier point skipped");
                    continue;
                }
            }
        };
        let ret = est.portfolio_return(&w);
        let risk = est.portfolio_risk(&w);
        frontier.push(FrontierPoint {
            expected_return: ret,
            risk,
            sharpe_ratio: excess_sharpe(ret, risk_free_rate, risk),
            weights: w.iter().copied().collect(),
        });
    }
    Ok(frontier)
}

/// Full mean-variance report: tangency, minimum variance, frontier and the
/// cleaned optimal portfolio with its risk decomposition.
pub fn run_mean_variance(
    input: &MeanVarianceInput,
) -> AllocationResult<ComputationOutput<MeanVarianceOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let settings = MeanVarianceSettings {
        risk_free_rate: input.risk_free_rate.unwrap_or(0.02),
        solver: input.solver.unwrap_or_default(),
    };
    settings.solver.validate()?;
    let cutoff = input.weight_cutoff.unwrap_or(DEFAULT_WEIGHT_CUTOFF);
    let num_points = input.frontier_points.unwrap_or(20);
    let rf = settings.risk_free_rate;

    let est = MarketEstimates::from_prices(&input.prices)?;
    let n = est.n_assets();

    let min_var_w = min_volatility(&est, &settings.solver)?;
    let tang_w = match max_sharpe(&est, &settings) {
        Ok(w) => Some(w),
        Err(AllocationError::InfeasibleOptimization(msg)) => {
            warnings.push(format!("Maximum Sharpe portfolio unavailable: {msg}"));
            None
        }
        Err(e) => return Err(e),
    };
    let optimal_raw = match (input.target_return, &tang_w) {
        (Some(target), _) => efficient_return(&est, target, &settings.solver)?,
        (None, Some(tang)) => tang.clone(),
        (None, None) => {
            warnings.push("Reporting the minimum variance portfolio as optimal".into());
            min_var_w.clone()
        }
    };

    let cleaned = clean_weights(&est.to_weight_vector(&optimal_raw), cutoff)?;
    let w = DVector::from_iterator(n, cleaned.values());

    let port_ret = est.portfolio_return(&w);
    let port_risk = est.portfolio_risk(&w);
    let sigma_w = &est.covariance * &w;

    let optimal_weights: Vec<AssetWeight> = (0..n)
        .map(|i| {
            let mcr = if port_risk == 0.0 { 0.0 } else { sigma_w[i] / port_risk };
            AssetWeight {
                name: est.tickers[i].clone(),
                weight: w[i],
                contribution_to_risk: w[i] * mcr,
                contribution_to_return: w[i] * est.expected_returns[i],
            }
        })
        .collect();

    let weighted_avg_vol: f64 = (0..n)
        .map(|i| w[i] * est.covariance[(i, i)].max(0.0).sqrt())
        .sum();
    let diversification_ratio = if port_risk == 0.0 { 1.0 } else { weighted_avg_vol / port_risk };
    let hhi_concentration: f64 = w.iter().map(|x| x * x).sum();

    let efficient_frontier = efficient_frontier(&est, rf, num_points, &settings.solver)?;
    if efficient_frontier.len() < num_points.max(2) {
        warnings.push(format!(
            "Efficient frontier has {} of {} requested points",
            efficient_frontier.len(),
            num_points.max(2)
        ));
    }

    for aw in &optimal_weights {
        if aw.weight > 0.40 {
            warnings.push(format!("Concentrated position: {} has weight {:.4}", aw.name, aw.weight));
        }
    }
    if hhi_concentration > 0.5 {
        warnings.push(format!("High concentration: HHI = {:.4}", hhi_concentration));
    }
    if port_risk > 0.30 {
        warnings.push(format!("High portfolio volatility: {:.4}", port_risk));
    }

    let output = MeanVarianceOutput {
        weights: cleaned,
        optimal_weights,
        portfolio_return: port_ret,
        portfolio_risk: port_risk,
        sharpe_ratio: excess_sharpe(port_ret, rf, port_risk),
        tangency_portfolio: tang_w.as_ref().map(|w| portfolio_point(&est, w, rf)),
        min_variance_portfolio: portfolio_point(&est, &min_var_w, rf),
        efficient_frontier,
        diversification_ratio,
        hhi_concentration,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Markowitz Mean-Variance Optimization (long-only, active-set QP)",
        &serde_json::json!({
            "n_assets": n,
            "n_observations": input.prices.n_rows(),
            "risk_free_rate": rf,
            "annualization_periods": 252,
            "weight_cutoff": cutoff,
            "frontier_points": num_points,
            "target_return": input.target_return,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_positive_definite(cov: &DMatrix<f64>) -> AllocationResult<()> {
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(AllocationError::NumericalInstability(
            "Covariance matrix contains non-finite values".into(),
        ));
    }
    let Some(chol) = Cholesky::new(cov.clone()) else {
        return Err(AllocationError::SingularMatrix(
            "Covariance matrix is not positive definite".into(),
        ));
    };
    // Rounding lets an exactly singular matrix factor with a tiny pivot.
    let scale = cov.diagonal().max();
    let min_pivot = chol.l_dirty().diagonal().map(|d| d * d).min();
    if min_pivot <= SINGULARITY_THRESHOLD * scale {
        return Err(AllocationError::SingularMatrix(format!(
            "Covariance matrix is numerically singular (pivot {min_pivot:e})"
        )));
    }
    Ok(())
}

fn check_residuals(w: &DVector<f64>) -> AllocationResult<()> {
    if w.iter().any(|v| !v.is_finite()) {
        return Err(AllocationError::NumericalInstability(
            "Solved weights contain non-finite values".into(),
        ));
    }
    let budget = (w.sum() - 1.0).abs();
    let min_w = w.min();
    if budget > RESIDUAL_TOLERANCE || min_w < -RESIDUAL_TOLERANCE {
        return Err(AllocationError::InfeasibleOptimization(format!(
            "Constraint residuals too large (budget {budget:e}, min weight {min_w:e})"
        )));
    }
    Ok(())
}

fn extreme(v: &DVector<f64>, better: impl Fn(f64, f64) -> bool) -> (usize, f64) {
    v.iter()
        .copied()
        .enumerate()
        .skip(1)
        .fold((0, v[0]), |acc, (i, x)| if better(x, acc.1) { (i, x) } else { acc })
}

fn unit_vector(n: usize, i: usize) -> DVector<f64> {
    let mut v = DVector::zeros(n);
    v[i] = 1.0;
    v
}

fn excess_sharpe(ret: f64, rf: f64, risk: f64) -> f64 {
    if risk == 0.0 {
        0.0
    } else {
        (ret - rf) / risk
    }
}

fn portfolio_point(est: &MarketEstimates, w: &DVector<f64>, rf: f64) -> PortfolioPoint {
    let ret = est.portfolio_return(w);
    let risk = est.portfolio_risk(w);
    PortfolioPoint {
        weights: est.to_weight_vector(w),
        expected_return: ret,
        risk,
        sharpe_ratio: excess_sharpe(ret, rf, risk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn estimates(mu: &[f64], cov: &[f64]) -> MarketEstimates {
        let n = mu.len();
        MarketEstimates {
            tickers: (0..n).map(|i| format!("A{i}")).collect(),
            expected_returns: DVector::from_column_slice(mu),
            covariance: DMatrix::from_row_slice(n, n, cov),
        }
    }

    fn three_assets() -> MarketEstimates {
        estimates(
            &[0.10, 0.15, 0.08],
            &[
                0.04, 0.006, 0.002, //
                0.006, 0.09, 0.009, //
                0.002, 0.009, 0.0225,
            ],
        )
    }

    #[test]
    fn test_max_sharpe_uncorrelated_closed_form() {
        // Uncorrelated assets, all positive excess: w_i ∝ (μ_i - rf) / σ_i²
        let est = estimates(&[0.10, 0.06], &[0.04, 0.0, 0.0, 0.01]);
        let settings = MeanVarianceSettings { risk_free_rate: 0.02, ..Default::default() };
        let w = max_sharpe(&est, &settings).unwrap();
        let raw = [0.08 / 0.04, 0.04 / 0.01];
        let total: f64 = raw.iter().sum();
        assert_abs_diff_eq!(w[0], raw[0] / total, epsilon = 1e-9);
        assert_abs_diff_eq!(w[1], raw[1] / total, epsilon = 1e-9);
    }

    #[test]
    fn test_max_sharpe_excludes_negative_excess_asset() {
        let est = estimates(&[0.10, 0.01], &[0.04, 0.0, 0.0, 0.01]);
        let w = max_sharpe(&est, &MeanVarianceSettings::default()).unwrap();
        assert_abs_diff_eq!(w[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_max_sharpe_beats_frontier_points() {
        let est = three_assets();
        let settings = MeanVarianceSettings::default();
        let tang = max_sharpe(&est, &settings).unwrap();
        let tang_sharpe = excess_sharpe(est.portfolio_return(&tang), 0.02, est.portfolio_risk(&tang));
        let frontier = efficient_frontier(&est, 0.02, 15, &settings.solver).unwrap();
        for p in &frontier {
            assert!(p.sharpe_ratio <= tang_sharpe + 1e-9);
        }
    }

    #[test]
    fn test_all_returns_below_risk_free_infeasible() {
        let est = estimates(&[0.01, 0.015], &[0.04, 0.0, 0.0, 0.01]);
        assert!(matches!(
            max_sharpe(&est, &MeanVarianceSettings::default()),
            Err(AllocationError::InfeasibleOptimization(_))
        ));
    }

    #[test]
    fn test_singular_covariance_rejected() {
        let est = estimates(&[0.10, 0.10], &[0.04, 0.04, 0.04, 0.04]);
        assert!(matches!(
            max_sharpe(&est, &MeanVarianceSettings::default()),
            Err(AllocationError::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_min_volatility_uncorrelated() {
        let est = estimates(&[0.10, 0.06], &[0.04, 0.0, 0.0, 0.01]);
        let w = min_volatility(&est, &QpSettings::default()).unwrap();
        assert_abs_diff_eq!(w[0], 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(w[1], 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_efficient_return_hits_target() {
        let est = three_assets();
        let w = efficient_return(&est, 0.12, &QpSettings::default()).unwrap();
        assert_abs_diff_eq!(est.portfolio_return(&w), 0.12, epsilon = 1e-9);
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-9);
        assert!(w.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn test_efficient_return_out_of_range() {
        let est = three_assets();
        assert!(efficient_return(&est, 0.5, &QpSettings::default()).is_err());
    }

    #[test]
    fn test_efficient_return_at_maximum() {
        let est = three_assets();
        let w = efficient_return(&est, 0.15, &QpSettings::default()).unwrap();
        assert_eq!(w[1], 1.0);
    }

    #[test]
    fn test_frontier_monotonic_return() {
        let est = three_assets();
        let frontier = efficient_frontier(&est, 0.02, 10, &QpSettings::default()).unwrap();
        assert_eq!(frontier.len(), 10);
        for pair in frontier.windows(2) {
            assert!(pair[1].expected_return >= pair[0].expected_return - 1e-9);
            assert!(pair[1].risk >= pair[0].risk - 1e-9);
        }
    }

    #[test]
    fn test_residual_check() {
        assert!(check_residuals(&DVector::from_vec(vec![0.5, 0.5])).is_ok());
        assert!(check_residuals(&DVector::from_vec(vec![0.6, 0.5])).is_err());
        assert!(check_residuals(&DVector::from_vec(vec![1.1, -0.1])).is_err());
    }
}
