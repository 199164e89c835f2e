use nalgebra::{DMatrix, DVector};
use statrs::statistics::Statistics;

use crate::error::AllocationError;
use crate::prices::ReturnMatrix;
use crate::types::{
    CorrelationMatrix, CovarianceMatrix, LabeledMatrix, TickerMap, TRADING_PERIODS_PER_YEAR,
};
use crate::AllocationResult;

fn require_observations(returns: &ReturnMatrix) -> AllocationResult<()> {
    if returns.n_periods() < 2 {
        return Err(AllocationError::DataError(format!(
            "At least 2 return observations required, got {}",
            returns.n_periods()
        )));
    }
    Ok(())
}

/// Sample covariance (n-1) of the return columns. The upper triangle is
/// mirrored so the result is exactly symmetric.
pub fn compute_covariance(returns: &ReturnMatrix) -> AllocationResult<CovarianceMatrix> {
    require_observations(returns)?;
    let cov = sample_covariance(&returns.columns());
    LabeledMatrix::new(returns.tickers().to_vec(), cov)
}

/// Pearson correlation of the return columns.
///
/// The diagonal is exactly 1. A column with zero variance is uncorrelated
/// (0.0) with every other column.
pub fn compute_correlation(returns: &ReturnMatrix) -> AllocationResult<CorrelationMatrix> {
    require_observations(returns)?;
    let cov = sample_covariance(&returns.columns());
    let n = cov.nrows();
    let std: Vec<f64> = (0..n).map(|i| cov[(i, i)].max(0.0).sqrt()).collect();

    let mut corr = DMatrix::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let denom = std[i] * std[j];
            let rho = if denom > 0.0 {
                (cov[(i, j)] / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            corr[(i, j)] = rho;
            corr[(j, i)] = rho;
        }
    }
    LabeledMatrix::new(returns.tickers().to_vec(), corr)
}

/// Per-ticker sample standard deviation scaled by sqrt(252).
pub fn compute_annualized_volatility(returns: &ReturnMatrix) -> AllocationResult<TickerMap> {
    require_observations(returns)?;
    let scale = TRADING_PERIODS_PER_YEAR.sqrt();
    Ok(returns
        .tickers()
        .iter()
        .enumerate()
        .map(|(c, t)| (t.clone(), returns.column(c).iter().std_dev() * scale))
        .collect())
}

/// Historical mean return per ticker, annualised (x252).
pub fn annualized_mean_returns(returns: &ReturnMatrix) -> AllocationResult<DVector<f64>> {
    require_observations(returns)?;
    Ok(DVector::from_iterator(
        returns.n_assets(),
        (0..returns.n_assets()).map(|c| returns.column(c).iter().mean() * TRADING_PERIODS_PER_YEAR),
    ))
}

/// Sample covariance annualised (x252).
pub fn annualized_covariance(returns: &ReturnMatrix) -> AllocationResult<DMatrix<f64>> {
    require_observations(returns)?;
    Ok(sample_covariance(&returns.columns()) * TRADING_PERIODS_PER_YEAR)
}

fn sample_covariance(columns: &[Vec<f64>]) -> DMatrix<f64> {
    let n = columns.len();
    let mut cov = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let c = if i == j {
                columns[i].iter().variance()
            } else {
                columns[i].iter().covariance(columns[j].iter())
            };
            cov[(i, j)] = c;
            cov[(j, i)] = c;
        }
    }
    cov
}
