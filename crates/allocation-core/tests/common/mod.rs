#![allow(dead_code)]

use allocation_core::PriceMatrix;
use chrono::{Days, NaiveDate};
use std::f64::consts::PI;

pub const DAYS: usize = 60;

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

/// `amplitude * sin(2π k t / n)` for t in 0..n. Waves with different k are
/// orthogonal over a full window and have mean zero.
pub fn wave(k: usize, amplitude: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|t| amplitude * (2.0 * PI * (k * t) as f64 / n as f64).sin())
        .collect()
}

pub fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

pub fn shift(a: &[f64], c: f64) -> Vec<f64> {
    a.iter().map(|x| x + c).collect()
}

/// Prices starting at 100 whose simple returns are exactly `returns`.
pub fn prices_from_returns(tickers: &[&str], returns: &[Vec<f64>]) -> PriceMatrix {
    let n = returns[0].len() + 1;
    let dates = (0..n as u64).map(|i| start_date() + Days::new(i)).collect();
    let columns: Vec<Vec<f64>> = returns
        .iter()
        .map(|r| {
            let mut p = Vec::with_capacity(n);
            p.push(100.0);
            for x in r {
                let last = p[p.len() - 1];
                p.push(last * (1.0 + x));
            }
            p
        })
        .collect();
    PriceMatrix::from_columns(
        tickers.iter().map(|t| t.to_string()).collect(),
        dates,
        &columns,
    )
    .unwrap()
}

/// Four assets over 60 days: A and B share a common factor and have
/// correlation 0.95; C and D are uncorrelated with everything.
pub fn correlated_pair_scenario() -> PriceMatrix {
    let factor = wave(1, 0.01, DAYS);
    let idio = 0.01 * (0.05f64 / 0.95).sqrt();
    let a = shift(&add(&factor, &wave(2, idio, DAYS)), 0.0010);
    let b = shift(&add(&factor, &wave(3, idio, DAYS)), 0.0008);
    let c = shift(&wave(5, 0.01, DAYS), 0.0006);
    let d = shift(&wave(7, 0.01, DAYS), 0.0004);
    prices_from_returns(&["A", "B", "C", "D"], &[a, b, c, d])
}
