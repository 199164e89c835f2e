use crate::error::AllocationError;
use crate::types::WeightVector;
use crate::AllocationResult;

/// Weights below this are treated as noise from the optimizer.
pub const DEFAULT_WEIGHT_CUTOFF: f64 = 1e-4;

/// Zero out negligible weights and renormalise the rest to sum to one.
///
/// Any weight below `cutoff` (negative weights included) becomes 0.0 but
/// keeps its ticker, so the key set still matches the optimizer's
/// universe. An empty vector is passed through unchanged: it means the
/// optimization was unavailable, not that everything was cut.
pub fn clean_weights(weights: &WeightVector, cutoff: f64) -> AllocationResult<WeightVector> {
    if !cutoff.is_finite() || cutoff < 0.0 {
        return Err(AllocationError::InvalidInput {
            field: "cutoff".into(),
            reason: format!("Cutoff must be a non-negative number, got {cutoff}"),
        });
    }
    if weights.is_empty() {
        return Ok(WeightVector::new());
    }
    if let Some((t, w)) = weights.iter().find(|(_, w)| !w.is_finite()) {
        return Err(AllocationError::NumericalInstability(format!(
            "Weight for {t} is {w}"
        )));
    }

    let kept = |w: f64| w >= cutoff && w > 0.0;
    let total: f64 = weights.values().filter(|w| kept(*w)).sum();
    if total <= 0.0 {
        return Err(AllocationError::DegenerateAllocation(format!(
            "All {} weights are below the cutoff {cutoff}",
            weights.len()
        )));
    }

    Ok(weights
        .iter()
        .map(|(t, w)| (t.to_string(), if kept(w) { w / total } else { 0.0 }))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_small_weights_zeroed_and_renormalized() {
        let w = WeightVector::from_pairs([("A", 0.6), ("B", 0.39995), ("C", 0.00005)]);
        let cleaned = clean_weights(&w, DEFAULT_WEIGHT_CUTOFF).unwrap();
        assert_eq!(cleaned.get("C"), Some(0.0));
        assert_relative_eq!(cleaned.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cleaned.get("A").unwrap(), 0.6 / 0.99995, epsilon = 1e-12);
        assert_eq!(cleaned.len(), 3);
    }

    #[test]
    fn test_negative_weights_removed() {
        let w = WeightVector::from_pairs([("A", 0.7), ("B", -0.2), ("C", 0.5)]);
        let cleaned = clean_weights(&w, DEFAULT_WEIGHT_CUTOFF).unwrap();
        assert_eq!(cleaned.get("B"), Some(0.0));
        assert!(cleaned.values().all(|x| x >= 0.0));
        assert_relative_eq!(cleaned.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_all_below_cutoff_is_degenerate() {
        let w = WeightVector::from_pairs([("A", 1e-6), ("B", 2e-6)]);
        assert!(matches!(
            clean_weights(&w, DEFAULT_WEIGHT_CUTOFF),
            Err(AllocationError::DegenerateAllocation(_))
        ));
    }

    #[test]
    fn test_empty_passthrough() {
        let cleaned = clean_weights(&WeightVector::new(), DEFAULT_WEIGHT_CUTOFF).unwrap();
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_non_finite_weight() {
        let w = WeightVector::from_pairs([("A", f64::NAN), ("B", 1.0)]);
        assert!(matches!(
            clean_weights(&w, DEFAULT_WEIGHT_CUTOFF),
            Err(AllocationError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_invalid_cutoff() {
        let w = WeightVector::from_pairs([("A", 1.0)]);
        assert!(clean_weights(&w, -1.0).is_err());
    }

    #[test]
    fn test_order_preserved() {
        let w = WeightVector::from_pairs([("Z", 0.5), ("A", 0.5)]);
        let cleaned = clean_weights(&w, DEFAULT_WEIGHT_CUTOFF).unwrap();
        assert_eq!(cleaned.tickers().collect::<Vec<_>>(), vec!["Z", "A"]);
    }
}
