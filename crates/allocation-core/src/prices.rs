//! Price and return matrices.
//!
//! A [`PriceMatrix`] is what the market-data provider hands over: an ordered
//! date index by ticker columns, with `None` marking gaps. A
//! [`ReturnMatrix`] is derived from it by the returns engine and never
//! contains undefined cells.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AllocationError;
use crate::types::Ticker;
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Lookback
// ---------------------------------------------------------------------------

/// History window requested from the market-data provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookbackPeriod {
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[default]
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "2Y")]
    TwoYears,
    #[serde(rename = "5Y")]
    FiveYears,
    #[serde(rename = "MAX")]
    Max,
}

impl LookbackPeriod {
    /// Number of trailing price rows to keep; `None` keeps everything.
    pub fn periods(&self) -> Option<usize> {
        match self {
            LookbackPeriod::OneMonth => Some(21),
            LookbackPeriod::ThreeMonths => Some(63),
            LookbackPeriod::SixMonths => Some(126),
            LookbackPeriod::OneYear => Some(252),
            LookbackPeriod::TwoYears => Some(504),
            LookbackPeriod::FiveYears => Some(1260),
            LookbackPeriod::Max => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LookbackPeriod::OneMonth => "1M",
            LookbackPeriod::ThreeMonths => "3M",
            LookbackPeriod::SixMonths => "6M",
            LookbackPeriod::OneYear => "1Y",
            LookbackPeriod::TwoYears => "2Y",
            LookbackPeriod::FiveYears => "5Y",
            LookbackPeriod::Max => "MAX",
        }
    }
}

impl fmt::Display for LookbackPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookbackPeriod {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1M" => Ok(LookbackPeriod::OneMonth),
            "3M" => Ok(LookbackPeriod::ThreeMonths),
            "6M" => Ok(LookbackPeriod::SixMonths),
            "1Y" => Ok(LookbackPeriod::OneYear),
            "2Y" => Ok(LookbackPeriod::TwoYears),
            "5Y" => Ok(LookbackPeriod::FiveYears),
            "MAX" => Ok(LookbackPeriod::Max),
            other => Err(AllocationError::InvalidInput {
                field: "period".into(),
                reason: format!("Unknown lookback period '{other}' (expected 1M, 3M, 6M, 1Y, 2Y, 5Y or MAX)"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// PriceMatrix
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PriceMatrixData {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

/// Ordered time index x ticker columns of prices.
///
/// Cells that are missing, non-finite or non-positive are stored as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PriceMatrixData")]
pub struct PriceMatrix {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<Option<f64>>>,
}

impl TryFrom<PriceMatrixData> for PriceMatrix {
    type Error = AllocationError;

    fn try_from(data: PriceMatrixData) -> Result<Self, Self::Error> {
        PriceMatrix::new(data.tickers, data.dates, data.rows)
    }
}

impl PriceMatrix {
    pub fn new(
        tickers: Vec<Ticker>,
        dates: Vec<NaiveDate>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> AllocationResult<Self> {
        validate_tickers(&tickers)?;

        if rows.len() != dates.len() {
            return Err(AllocationError::InvalidInput {
                field: "rows".into(),
                reason: format!("{} rows for {} dates", rows.len(), dates.len()),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != tickers.len() {
                return Err(AllocationError::InvalidInput {
                    field: format!("rows[{i}]"),
                    reason: format!("{} cells for {} tickers", row.len(), tickers.len()),
                });
            }
        }
        if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
            return Err(AllocationError::InvalidInput {
                field: "dates".into(),
                reason: format!("Dates must be strictly increasing ({} then {})", w[0], w[1]),
            });
        }

        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.filter(|p| p.is_finite() && *p > 0.0))
                    .collect()
            })
            .collect();

        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    /// Build a gap-free matrix from per-ticker price columns.
    pub fn from_columns(
        tickers: Vec<Ticker>,
        dates: Vec<NaiveDate>,
        columns: &[Vec<f64>],
    ) -> AllocationResult<Self> {
        if columns.len() != tickers.len() {
            return Err(AllocationError::InvalidInput {
                field: "columns".into(),
                reason: format!("{} columns for {} tickers", columns.len(), tickers.len()),
            });
        }
        if let Some(bad) = columns.iter().position(|c| c.len() != dates.len()) {
            return Err(AllocationError::InvalidInput {
                field: format!("columns[{bad}]"),
                reason: format!("Expected {} prices", dates.len()),
            });
        }
        let rows = (0..dates.len())
            .map(|r| columns.iter().map(|c| Some(c[r])).collect())
            .collect();
        Self::new(tickers, dates, rows)
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() || self.rows.is_empty()
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Most recent available price for `ticker`.
    pub fn last_price(&self, ticker: &str) -> Option<f64> {
        let col = self.position(ticker)?;
        self.rows.iter().rev().find_map(|row| row[col])
    }

    /// Restrict to `tickers`, in the order given.
    pub fn select(&self, tickers: &[Ticker]) -> AllocationResult<Self> {
        let mut cols = Vec::with_capacity(tickers.len());
        for t in tickers {
            let col = self
                .position(t)
                .ok_or_else(|| AllocationError::DataError(format!("No price history for {t}")))?;
            cols.push(col);
        }
        let rows = self
            .rows
            .iter()
            .map(|row| cols.iter().map(|&c| row[c]).collect())
            .collect();
        Self::new(tickers.to_vec(), self.dates.clone(), rows)
    }

    /// Keep the last `n` rows.
    pub fn tail(&self, n: usize) -> Self {
        let skip = self.rows.len().saturating_sub(n);
        Self {
            tickers: self.tickers.clone(),
            dates: self.dates[skip..].to_vec(),
            rows: self.rows[skip..].to_vec(),
        }
    }

    pub fn with_lookback(&self, period: LookbackPeriod) -> Self {
        match period.periods() {
            Some(n) => self.tail(n),
            None => self.clone(),
        }
    }

    /// Drop leading and trailing rows that contain any gap, so every ticker
    /// has a price on the first and last date.
    pub fn trim_to_common_history(&self) -> Self {
        let complete = |row: &Vec<Option<f64>>| row.iter().all(Option::is_some);
        let first = self.rows.iter().position(complete);
        let last = self.rows.iter().rposition(complete);
        match (first, last) {
            (Some(first), Some(last)) => Self {
                tickers: self.tickers.clone(),
                dates: self.dates[first..=last].to_vec(),
                rows: self.rows[first..=last].to_vec(),
            },
            _ => Self {
                tickers: self.tickers.clone(),
                dates: Vec::new(),
                rows: Vec::new(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ReturnMatrix
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReturnMatrixData {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

/// Period simple returns; every cell is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReturnMatrixData")]
pub struct ReturnMatrix {
    tickers: Vec<Ticker>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl TryFrom<ReturnMatrixData> for ReturnMatrix {
    type Error = AllocationError;

    fn try_from(data: ReturnMatrixData) -> Result<Self, Self::Error> {
        ReturnMatrix::new(data.tickers, data.dates, data.rows)
    }
}

impl ReturnMatrix {
    pub fn new(
        tickers: Vec<Ticker>,
        dates: Vec<NaiveDate>,
        rows: Vec<Vec<f64>>,
    ) -> AllocationResult<Self> {
        validate_tickers(&tickers)?;
        if rows.len() != dates.len() {
            return Err(AllocationError::InvalidInput {
                field: "rows".into(),
                reason: format!("{} rows for {} dates", rows.len(), dates.len()),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != tickers.len() {
                return Err(AllocationError::InvalidInput {
                    field: format!("rows[{i}]"),
                    reason: format!("{} cells for {} tickers", row.len(), tickers.len()),
                });
            }
            if row.iter().any(|r| !r.is_finite()) {
                return Err(AllocationError::NumericalInstability(format!(
                    "Non-finite return in row {i}"
                )));
            }
        }
        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_periods(&self) -> usize {
        self.rows.len()
    }

    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Return series of column `col`.
    pub fn column(&self, col: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[col]).collect()
    }

    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.n_assets()).map(|c| self.column(c)).collect()
    }
}

fn validate_tickers(tickers: &[Ticker]) -> AllocationResult<()> {
    let mut seen = HashSet::with_capacity(tickers.len());
    for t in tickers {
        if t.trim().is_empty() {
            return Err(AllocationError::InvalidInput {
                field: "tickers".into(),
                reason: "Ticker symbols must not be blank".into(),
            });
        }
        if !seen.insert(t.as_str()) {
            return Err(AllocationError::InvalidInput {
                field: "tickers".into(),
                reason: format!("Duplicate ticker {t}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n as u64)
            .map(|i| start + chrono::Days::new(i))
            .collect()
    }

    #[test]
    fn test_duplicate_tickers_rejected() {
        let r = PriceMatrix::new(
            vec!["AAPL".into(), "AAPL".into()],
            dates(1),
            vec![vec![Some(1.0), Some(2.0)]],
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_unsorted_dates_rejected() {
        let mut d = dates(2);
        d.reverse();
        let r = PriceMatrix::new(vec!["A".into()], d, vec![vec![Some(1.0)], vec![Some(2.0)]]);
        assert!(r.is_err());
    }

    #[test]
    fn test_invalid_cells_become_gaps() {
        let m = PriceMatrix::new(
            vec!["A".into(), "B".into()],
            dates(1),
            vec![vec![Some(f64::NAN), Some(-3.0)]],
        )
        .unwrap();
        assert_eq!(m.rows()[0], vec![None, None]);
    }

    #[test]
    fn test_trim_to_common_history() {
        let m = PriceMatrix::new(
            vec!["A".into(), "B".into()],
            dates(4),
            vec![
                vec![Some(1.0), None],
                vec![Some(1.1), Some(5.0)],
                vec![Some(1.2), Some(5.1)],
                vec![None, Some(5.2)],
            ],
        )
        .unwrap();
        let trimmed = m.trim_to_common_history();
        assert_eq!(trimmed.n_rows(), 2);
        assert_eq!(trimmed.dates()[0], dates(4)[1]);
    }

    #[test]
    fn test_last_price_skips_gaps() {
        let m = PriceMatrix::new(
            vec!["A".into()],
            dates(3),
            vec![vec![Some(1.0)], vec![Some(2.0)], vec![None]],
        )
        .unwrap();
        assert_eq!(m.last_price("A"), Some(2.0));
        assert_eq!(m.last_price("B"), None);
    }

    #[test]
    fn test_tail_and_lookback() {
        let cols = vec![(0..300).map(|i| 100.0 + i as f64).collect::<Vec<_>>()];
        let m = PriceMatrix::from_columns(vec!["A".into()], dates(300), &cols).unwrap();
        assert_eq!(m.with_lookback(LookbackPeriod::OneYear).n_rows(), 252);
        assert_eq!(m.with_lookback(LookbackPeriod::Max).n_rows(), 300);
        assert_eq!(m.tail(500).n_rows(), 300);
    }

    #[test]
    fn test_select_unknown_ticker() {
        let m = PriceMatrix::from_columns(vec!["A".into()], dates(2), &[vec![1.0, 2.0]]).unwrap();
        assert!(matches!(
            m.select(&["B".to_string()]),
            Err(AllocationError::DataError(_))
        ));
    }

    #[test]
    fn test_lookback_parse() {
        assert_eq!("1y".parse::<LookbackPeriod>().unwrap(), LookbackPeriod::OneYear);
        assert_eq!("MAX".parse::<LookbackPeriod>().unwrap(), LookbackPeriod::Max);
        assert!("10Y".parse::<LookbackPeriod>().is_err());
    }

    #[test]
    fn test_price_matrix_deserialize_validates() {
        let ok = r#"{"tickers":["A"],"dates":["2024-01-01","2024-01-02"],"rows":[[1.0],[null]]}"#;
        let m: PriceMatrix = serde_json::from_str(ok).unwrap();
        assert_eq!(m.rows()[1], vec![None]);

        let bad = r#"{"tickers":["A","A"],"dates":["2024-01-01"],"rows":[[1.0,2.0]]}"#;
        assert!(serde_json::from_str::<PriceMatrix>(bad).is_err());
    }

    #[test]
    fn test_return_matrix_rejects_non_finite() {
        let r = ReturnMatrix::new(vec!["A".into()], dates(1), vec![vec![f64::INFINITY]]);
        assert!(r.is_err());
    }
}
