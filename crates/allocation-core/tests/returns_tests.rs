mod common;

use allocation_core::{
    compute_annualized_volatility, compute_correlation, compute_covariance, compute_returns,
    evaluate_performance, AllocationError, PriceMatrix, ReturnMatrix, WeightVector,
};
use approx::{assert_abs_diff_eq, assert_relative_eq};
use chrono::{Days, NaiveDate};
use common::*;
use pretty_assertions::assert_eq;

fn literal_returns(tickers: &[&str], rows: Vec<Vec<f64>>) -> ReturnMatrix {
    let dates = (0..rows.len() as u64).map(|i| start_date() + Days::new(i)).collect();
    ReturnMatrix::new(tickers.iter().map(|t| t.to_string()).collect(), dates, rows).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Returns
// ---------------------------------------------------------------------------

#[test]
fn test_returns_skip_gaps() {
    let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
    let prices = PriceMatrix::new(
        vec!["AAA".into(), "BBB".into()],
        vec![d(3), d(4), d(5), d(6), d(7)],
        vec![
            vec![Some(100.0), Some(50.0)],
            vec![Some(101.0), None],
            vec![Some(102.0), Some(51.0)],
            vec![Some(103.0), Some(52.0)],
            vec![Some(104.0), Some(52.0)],
        ],
    )
    .unwrap();
    let r = compute_returns(&prices).unwrap();
    // rows 4 and 5 touch the gap
    assert_eq!(r.dates(), &[d(6), d(7)]);
    assert_relative_eq!(r.rows()[0][1], 52.0 / 51.0 - 1.0, epsilon = 1e-15);
    assert_eq!(r.rows()[1][1], 0.0);
}

#[test]
fn test_returns_from_price_json() {
    let json = r#"{
        "tickers": ["AAA"],
        "dates": ["2024-01-02", "2024-01-03", "2024-01-04"],
        "rows": [[10.0], [11.0], [null]]
    }"#;
    let prices: PriceMatrix = serde_json::from_str(json).unwrap();
    assert!(matches!(compute_returns(&prices), Err(AllocationError::DataError(_))));
}

#[test]
fn test_unsorted_dates_rejected() {
    let json = r#"{
        "tickers": ["AAA"],
        "dates": ["2024-01-03", "2024-01-02"],
        "rows": [[10.0], [11.0]]
    }"#;
    assert!(serde_json::from_str::<PriceMatrix>(json).is_err());
}

// ---------------------------------------------------------------------------
// 2. Correlation and covariance
// ---------------------------------------------------------------------------

#[test]
fn test_correlation_diagonal_and_covariance_symmetry() {
    let returns = compute_returns(&correlated_pair_scenario()).unwrap();
    let corr = compute_correlation(&returns).unwrap();
    let cov = compute_covariance(&returns).unwrap();

    for i in 0..4 {
        assert_eq!(corr.values()[(i, i)], 1.0);
        assert!(cov.values()[(i, i)] >= 0.0);
        for j in 0..4 {
            assert_abs_diff_eq!(cov.values()[(i, j)], cov.values()[(j, i)], epsilon = 1e-18);
        }
    }
    assert_abs_diff_eq!(corr.get("A", "B").unwrap(), 0.95, epsilon = 1e-9);
    assert_abs_diff_eq!(corr.get("A", "C").unwrap(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_correlation_serializes_as_nested_map() {
    let r = literal_returns(&["X", "Y"], vec![vec![0.01, 0.02], vec![0.02, 0.04], vec![0.0, 0.0]]);
    let corr = compute_correlation(&r).unwrap();
    let json = serde_json::to_value(&corr).unwrap();
    assert_eq!(json["X"]["X"], serde_json::json!(1.0));
    assert_abs_diff_eq!(json["Y"]["X"].as_f64().unwrap(), 1.0, epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// 3. Volatility
// ---------------------------------------------------------------------------

#[test]
fn test_annualized_volatility_literal_series() {
    // mean 0.01; deviations 0.01, -0.02, 0.01 -> sample variance 3e-4
    let r = literal_returns(&["V"], vec![vec![0.02], vec![-0.01], vec![0.02]]);
    let vol = compute_annualized_volatility(&r).unwrap();
    let expected = 3e-4f64.sqrt() * 252f64.sqrt();
    assert_relative_eq!(vol.get("V").unwrap(), expected, epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// 4. Performance evaluation
// ---------------------------------------------------------------------------

#[test]
fn test_evaluate_disjoint_is_zero() {
    let returns = compute_returns(&correlated_pair_scenario()).unwrap();
    let w = WeightVector::from_pairs([("MSFT", 0.5), ("AAPL", 0.5)]);
    assert_eq!(evaluate_performance(&w, &returns), (0.0, 0.0));
}

#[test]
fn test_evaluate_scenario_portfolio() {
    let returns = compute_returns(&correlated_pair_scenario()).unwrap();
    let w = WeightVector::from_pairs([("C", 0.5), ("D", 0.5)]);
    let (ret, vol) = evaluate_performance(&w, &returns);
    // C and D are uncorrelated; each has sample variance 0.01² * 30 / 59
    let var = 1e-4 * 30.0 / 59.0;
    assert_relative_eq!(ret, 0.0005 * 252.0, epsilon = 1e-9);
    assert_relative_eq!(vol, (0.5 * var * 252.0f64).sqrt(), epsilon = 1e-6);
}
