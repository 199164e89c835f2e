use nalgebra::DVector;
use statrs::statistics::Statistics;

use crate::prices::ReturnMatrix;
use crate::types::{PerformanceMetrics, WeightVector, TRADING_PERIODS_PER_YEAR};

/// Expected annual return and volatility of `weights` over `returns`.
///
/// Only tickers present in both inputs are used, and their weights are
/// renormalised to sum to one. An empty intersection (or a restricted
/// weight sum that is zero) yields `(0.0, 0.0)`.
pub fn evaluate_performance(weights: &WeightVector, returns: &ReturnMatrix) -> (f64, f64) {
    let (cols, raw): (Vec<usize>, Vec<f64>) = weights
        .iter()
        .filter_map(|(t, w)| returns.position(t).map(|c| (c, w)))
        .unzip();

    if cols.is_empty() || returns.n_periods() < 2 {
        return (0.0, 0.0);
    }

    let total: f64 = raw.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return (0.0, 0.0);
    }
    let w = DVector::from_iterator(raw.len(), raw.iter().map(|x| x / total));

    let series: Vec<Vec<f64>> = cols.iter().map(|&c| returns.column(c)).collect();
    let mu = DVector::from_iterator(
        series.len(),
        series.iter().map(|s| s.iter().mean() * TRADING_PERIODS_PER_YEAR),
    );

    let k = series.len();
    let mut variance = 0.0;
    for i in 0..k {
        for j in 0..k {
            let cov = if i == j {
                series[i].iter().variance()
            } else {
                series[i].iter().covariance(series[j].iter())
            };
            variance += w[i] * cov * TRADING_PERIODS_PER_YEAR * w[j];
        }
    }

    (mu.dot(&w), variance.max(0.0).sqrt())
}

/// [`evaluate_performance`] plus the return/volatility ratio.
pub fn portfolio_performance(weights: &WeightVector, returns: &ReturnMatrix) -> PerformanceMetrics {
    let (expected_return, volatility) = evaluate_performance(weights, returns);
    PerformanceMetrics::new(expected_return, volatility)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn returns() -> ReturnMatrix {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let dates = (0..4u64).map(|i| start + chrono::Days::new(i)).collect();
        ReturnMatrix::new(
            vec!["A".into(), "B".into()],
            dates,
            vec![
                vec![0.01, 0.02],
                vec![-0.01, 0.00],
                vec![0.02, 0.01],
                vec![0.00, -0.01],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_disjoint_tickers_zero() {
        let w = WeightVector::from_pairs([("X", 0.5), ("Y", 0.5)]);
        assert_eq!(evaluate_performance(&w, &returns()), (0.0, 0.0));
    }

    #[test]
    fn test_single_asset_matches_moments() {
        let w = WeightVector::from_pairs([("A", 1.0)]);
        let (ret, vol) = evaluate_performance(&w, &returns());
        let a = [0.01, -0.01, 0.02, 0.00];
        let mean = a.iter().sum::<f64>() / 4.0;
        let var = a.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 3.0;
        assert_relative_eq!(ret, mean * 252.0, epsilon = 1e-12);
        assert_relative_eq!(vol, (var * 252.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_weights_renormalized_over_intersection() {
        // "Z" is not in the return matrix; A and B are rescaled to 0.5/0.5.
        let partial = WeightVector::from_pairs([("A", 0.2), ("B", 0.2), ("Z", 0.6)]);
        let full = WeightVector::from_pairs([("A", 0.5), ("B", 0.5)]);
        let (r1, v1) = evaluate_performance(&partial, &returns());
        let (r2, v2) = evaluate_performance(&full, &returns());
        assert_relative_eq!(r1, r2, epsilon = 1e-12);
        assert_relative_eq!(v1, v2, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_weight_sum() {
        let w = WeightVector::from_pairs([("A", 0.0), ("B", 0.0)]);
        assert_eq!(evaluate_performance(&w, &returns()), (0.0, 0.0));
    }

    #[test]
    fn test_sharpe_defined_as_ratio() {
        let w = WeightVector::from_pairs([("A", 0.5), ("B", 0.5)]);
        let m = portfolio_performance(&w, &returns());
        assert_relative_eq!(m.sharpe_ratio, m.expected_return / m.volatility, epsilon = 1e-12);
    }
}
