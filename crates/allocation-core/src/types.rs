use indexmap::IndexMap;
use nalgebra::DMatrix;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AllocationError;
use crate::AllocationResult;

/// Trading periods per year used for every annualisation (daily data).
pub const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

/// Asset identifier.
pub type Ticker = String;

// ---------------------------------------------------------------------------
// Ticker -> value mapping
// ---------------------------------------------------------------------------

/// Ordered ticker -> value mapping.
///
/// Insertion order is preserved so that output is deterministic and follows
/// the column order of the input universe. Serialises as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickerMap {
    entries: IndexMap<Ticker, f64>,
}

/// Portfolio weights keyed by ticker.
pub type WeightVector = TickerMap;

impl TickerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pairs; a repeated ticker overwrites the earlier value in
    /// its original position.
    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<Ticker>,
        I: IntoIterator<Item = (S, f64)>,
    {
        Self {
            entries: pairs.into_iter().map(|(t, v)| (t.into(), v)).collect(),
        }
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, ticker: impl Into<Ticker>, value: f64) -> Option<f64> {
        self.entries.insert(ticker.into(), value)
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.entries.get(ticker).copied()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.entries.contains_key(ticker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), *v))
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.values().copied()
    }

    pub fn sum(&self) -> f64 {
        self.values().sum()
    }
}

impl FromIterator<(Ticker, f64)> for TickerMap {
    fn from_iter<I: IntoIterator<Item = (Ticker, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

// ---------------------------------------------------------------------------
// Ticker-labelled square matrix
// ---------------------------------------------------------------------------

/// Square matrix indexed on both axes by the same ticker set.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    tickers: Vec<Ticker>,
    values: DMatrix<f64>,
}

/// Pearson correlation matrix; diagonal is exactly 1.
pub type CorrelationMatrix = LabeledMatrix;

/// Covariance matrix; symmetric with non-negative diagonal.
pub type CovarianceMatrix = LabeledMatrix;

impl LabeledMatrix {
    pub fn new(tickers: Vec<Ticker>, values: DMatrix<f64>) -> AllocationResult<Self> {
        let n = tickers.len();
        if values.nrows() != n || values.ncols() != n {
            return Err(AllocationError::InvalidInput {
                field: "matrix".into(),
                reason: format!(
                    "Expected {n}x{n} matrix for {n} tickers, got {}x{}",
                    values.nrows(),
                    values.ncols()
                ),
            });
        }
        Ok(Self { tickers, values })
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn position(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Entry by row/column ticker.
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        Some(self.values[(self.position(row)?, self.position(col)?)])
    }

    /// Copy with every entry multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            tickers: self.tickers.clone(),
            values: &self.values * factor,
        }
    }
}

struct MatrixRow<'a> {
    tickers: &'a [Ticker],
    values: &'a DMatrix<f64>,
    row: usize,
}

impl Serialize for MatrixRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tickers.len()))?;
        for (col, ticker) in self.tickers.iter().enumerate() {
            map.serialize_entry(ticker, &self.values[(self.row, col)])?;
        }
        map.end()
    }
}

impl Serialize for LabeledMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tickers.len()))?;
        for (row, ticker) in self.tickers.iter().enumerate() {
            map.serialize_entry(
                ticker,
                &MatrixRow {
                    tickers: &self.tickers,
                    values: &self.values,
                    row,
                },
            )?;
        }
        map.end()
    }
}

/// Reads back the nested `{row: {col: value}}` object written above. Every
/// row must list the same tickers as the outer object.
impl<'de> Deserialize<'de> for LabeledMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = IndexMap::<Ticker, IndexMap<Ticker, f64>>::deserialize(deserializer)?;
        let tickers: Vec<Ticker> = rows.keys().cloned().collect();
        let n = tickers.len();
        let mut values = DMatrix::zeros(n, n);
        for (i, cells) in rows.values().enumerate() {
            if cells.len() != n {
                return Err(D::Error::custom(format!(
                    "row {} has {} entries, expected {n}",
                    tickers[i],
                    cells.len()
                )));
            }
            for (j, col) in tickers.iter().enumerate() {
                values[(i, j)] = *cells
                    .get(col)
                    .ok_or_else(|| D::Error::custom(format!("row {} is missing column {col}", tickers[i])))?;
            }
        }
        Ok(Self { tickers, values })
    }
}

// ---------------------------------------------------------------------------
// Performance
// ---------------------------------------------------------------------------

/// Annualised expected return, volatility and Sharpe ratio of a portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub expected_return: f64,
    pub volatility: f64,
    /// expected_return / volatility; 0 when volatility is 0.
    pub sharpe_ratio: f64,
}

impl PerformanceMetrics {
    pub fn new(expected_return: f64, volatility: f64) -> Self {
        let sharpe_ratio = if volatility == 0.0 {
            0.0
        } else {
            expected_return / volatility
        };
        Self {
            expected_return,
            volatility,
            sharpe_ratio,
        }
    }
}

// ---------------------------------------------------------------------------
// Output envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "f64".to_string(),
        },
    }
}
