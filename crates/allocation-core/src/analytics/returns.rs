use tracing::debug;

use crate::error::AllocationError;
use crate::prices::{PriceMatrix, ReturnMatrix};
use crate::AllocationResult;

/// Convert prices into simple period returns.
///
/// `r_t = p_t / p_{t-1} - 1` per column. The first row has no predecessor
/// and is dropped, as is every row where any ticker's return is undefined
/// (a gap on either side of the period). Fails with `DataError` when the
/// matrix has no tickers or fewer than two valid rows survive.
pub fn compute_returns(prices: &PriceMatrix) -> AllocationResult<ReturnMatrix> {
    if prices.n_assets() == 0 {
        return Err(AllocationError::DataError(
            "Price history contains no tickers".into(),
        ));
    }

    let rows = prices.rows();
    let mut dates = Vec::with_capacity(rows.len().saturating_sub(1));
    let mut returns = Vec::with_capacity(rows.len().saturating_sub(1));
    let mut dropped = 0usize;

    for t in 1..rows.len() {
        let row: Option<Vec<f64>> = rows[t - 1]
            .iter()
            .zip(rows[t].iter())
            .map(|(prev, cur)| match (prev, cur) {
                (Some(p0), Some(p1)) => Some(p1 / p0 - 1.0).filter(|r| r.is_finite()),
                _ => None,
            })
            .collect();

        match row {
            Some(r) => {
                dates.push(prices.dates()[t]);
                returns.push(r);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, kept = returns.len(), "dropped return rows with undefined values");
    }

    if returns.len() < 2 {
        return Err(AllocationError::DataError(format!(
            "At least 2 valid return observations required, got {}",
            returns.len()
        )));
    }

    ReturnMatrix::new(prices.tickers().to_vec(), dates, returns)
}
