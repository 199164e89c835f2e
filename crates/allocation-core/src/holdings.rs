//! Turning a user's holdings into a weight vector.
//!
//! Holdings may carry explicit weights, share quantities or nothing at
//! all. Quantities are only valued once prices are known: market value is
//! quantity times the last available price.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::prices::PriceMatrix;
use crate::types::{Ticker, WeightVector};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One line of an uploaded portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: Ticker,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

impl Holding {
    pub fn new(ticker: impl Into<Ticker>) -> Self {
        Self {
            ticker: ticker.into(),
            weight: None,
            quantity: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

/// How the current portfolio's weights should be determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightIntent {
    /// Weights as given, renormalised to sum to one.
    Explicit(WeightVector),
    /// Share counts, valued at the last available price.
    Quantities(Vec<(Ticker, Decimal)>),
    /// 1/N across the listed tickers.
    EqualWeight(Vec<Ticker>),
}

impl WeightIntent {
    /// Classify holdings: every line weighted gives `Explicit`, otherwise
    /// every line with a quantity gives `Quantities`, otherwise
    /// `EqualWeight`. Duplicate tickers are merged by summing.
    pub fn from_holdings(holdings: &[Holding]) -> AllocationResult<Self> {
        if holdings.is_empty() {
            return Err(AllocationError::InvalidInput {
                field: "holdings".into(),
                reason: "At least one holding is required".into(),
            });
        }
        for h in holdings {
            validate_holding(h)?;
        }
        let tickers = unique_tickers(holdings);

        if holdings.iter().all(|h| h.weight.is_some()) {
            let weights = tickers
                .iter()
                .map(|t| {
                    let w = holdings
                        .iter()
                        .filter(|h| h.ticker.trim() == t.as_str())
                        .filter_map(|h| h.weight)
                        .sum::<f64>();
                    (t.clone(), w)
                })
                .collect();
            return Ok(WeightIntent::Explicit(weights));
        }

        if holdings.iter().all(|h| h.quantity.is_some()) {
            let quantities = tickers
                .iter()
                .map(|t| {
                    let q = holdings
                        .iter()
                        .filter(|h| h.ticker.trim() == t.as_str())
                        .filter_map(|h| h.quantity)
                        .sum::<Decimal>();
                    (t.clone(), q)
                })
                .collect();
            return Ok(WeightIntent::Quantities(quantities));
        }

        Ok(WeightIntent::EqualWeight(tickers))
    }

    pub fn tickers(&self) -> Vec<Ticker> {
        match self {
            WeightIntent::Explicit(w) => w.tickers().map(str::to_string).collect(),
            WeightIntent::Quantities(q) => q.iter().map(|(t, _)| t.clone()).collect(),
            WeightIntent::EqualWeight(t) => t.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Concrete weights for `intent`, summing to one.
pub fn resolve_weights(intent: &WeightIntent, prices: &PriceMatrix) -> AllocationResult<WeightVector> {
    match intent {
        WeightIntent::Explicit(weights) => {
            let total = weights.sum();
            if !(total.is_finite() && total > 0.0) {
                return Err(AllocationError::DegenerateAllocation(format!(
                    "Explicit weights sum to {total}"
                )));
            }
            Ok(weights.iter().map(|(t, w)| (t.to_string(), w / total)).collect())
        }
        WeightIntent::Quantities(quantities) => {
            let values = market_values(quantities, prices)?;
            let total: Decimal = values.iter().map(|(_, v)| *v).sum();
            if total.is_zero() {
                return Err(AllocationError::DegenerateAllocation(
                    "Holdings have zero total market value".into(),
                ));
            }
            values
                .into_iter()
                .map(|(t, v)| -> AllocationResult<(Ticker, f64)> {
                    let share = (v / total).to_f64().ok_or_else(|| {
                        AllocationError::NumericalInstability(format!("Weight for {t} overflows"))
                    })?;
                    Ok((t, share))
                })
                .collect()
        }
        WeightIntent::EqualWeight(tickers) => {
            if tickers.is_empty() {
                return Err(AllocationError::InvalidInput {
                    field: "tickers".into(),
                    reason: "Equal weighting needs at least one ticker".into(),
                });
            }
            let w = 1.0 / tickers.len() as f64;
            Ok(tickers.iter().map(|t| (t.clone(), w)).collect())
        }
    }
}

/// Quantity x last available price for each position.
pub fn market_values(
    quantities: &[(Ticker, Decimal)],
    prices: &PriceMatrix,
) -> AllocationResult<Vec<(Ticker, Decimal)>> {
    quantities
        .iter()
        .map(|(t, q)| -> AllocationResult<(Ticker, Decimal)> {
            let last = prices
                .last_price(t)
                .ok_or_else(|| AllocationError::DataError(format!("No price available for {t}")))?;
            let price = Decimal::from_f64(last).ok_or_else(|| {
                AllocationError::NumericalInstability(format!("Price {last} for {t} is not representable"))
            })?;
            let value = q.checked_mul(price).ok_or_else(|| {
                AllocationError::NumericalInstability(format!("Market value of {t} overflows"))
            })?;
            Ok((t.clone(), value))
        })
        .collect()
}

fn validate_holding(h: &Holding) -> AllocationResult<()> {
    if h.ticker.trim().is_empty() {
        return Err(AllocationError::InvalidInput {
            field: "ticker".into(),
            reason: "Ticker must not be blank".into(),
        });
    }
    if let Some(w) = h.weight {
        if !w.is_finite() || w < 0.0 {
            return Err(AllocationError::InvalidInput {
                field: format!("{}.weight", h.ticker),
                reason: format!("Weight must be a non-negative number, got {w}"),
            });
        }
    }
    if let Some(q) = h.quantity {
        if q.is_sign_negative() && !q.is_zero() {
            return Err(AllocationError::InvalidInput {
                field: format!("{}.quantity", h.ticker),
                reason: format!("Quantity must be non-negative, got {q}"),
            });
        }
    }
    Ok(())
}

fn unique_tickers(holdings: &[Holding]) -> Vec<Ticker> {
    let mut tickers: Vec<Ticker> = Vec::with_capacity(holdings.len());
    for h in holdings {
        let t = h.ticker.trim();
        if !tickers.iter().any(|x| x == t) {
            tickers.push(t.to_string());
        }
    }
    tickers
}
