use crate::error::AllocationError;
use crate::AllocationResult;

/// Variance of the inverse-variance portfolio over `members`, using only
/// the diagonal: 1 / Σ(1/σ²).
pub fn cluster_variance(variances: &[f64], members: &[usize]) -> AllocationResult<f64> {
    let mut precision = 0.0;
    for &i in members {
        let v = variances[i];
        if !(v.is_finite() && v > 0.0) {
            return Err(AllocationError::NumericalInstability(format!(
                "Asset {i} has non-positive variance {v}"
            )));
        }
        precision += 1.0 / v;
    }
    if precision <= 0.0 {
        return Err(AllocationError::DataError("Empty cluster".into()));
    }
    Ok(1.0 / precision)
}

/// Top-down allocation along `order`: split at the midpoint, give the
/// left half var_right / (var_left + var_right) of the parent weight and
/// the right half the rest, down to single assets.
///
/// Returns weights indexed by asset id (not by position in `order`).
pub fn recursive_bisection(variances: &[f64], order: &[usize]) -> AllocationResult<Vec<f64>> {
    let mut weights = vec![0.0; variances.len()];
    if !order.is_empty() {
        bisect(variances, order, 1.0, &mut weights)?;
    }
    Ok(weights)
}

/// Allocates `weight` over `cluster` and returns the number of splits below
/// it; the larger half always has ⌈len/2⌉ members.
fn bisect(variances: &[f64], cluster: &[usize], weight: f64, out: &mut [f64]) -> AllocationResult<usize> {
    if let [only] = cluster {
        out[*only] = weight;
        return Ok(0);
    }
    let (left, right) = cluster.split_at(cluster.len() / 2);
    let var_left = cluster_variance(variances, left)?;
    let var_right = cluster_variance(variances, right)?;
    let alpha = var_right / (var_left + var_right);

    let depth_left = bisect(variances, left, weight * alpha, out)?;
    let depth_right = bisect(variances, right, weight * (1.0 - alpha), out)?;
    Ok(1 + depth_left.max(depth_right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recursion_depth_is_ceil_log2() {
        for n in 1..=40usize {
            let variances: Vec<f64> = (0..n).map(|i| 0.01 + 0.001 * i as f64).collect();
            let order: Vec<usize> = (0..n).rev().collect();
            let mut weights = vec![0.0; n];
            let depth = bisect(&variances, &order, 1.0, &mut weights).unwrap();
            let bound = (n as f64).log2().ceil() as usize;
            assert_eq!(depth, bound, "n = {n}");
            assert_relative_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_equal_variances_equal_weights() {
        let w = recursive_bisection(&[0.04, 0.04], &[0, 1]).unwrap();
        assert_eq!(w, vec![0.5, 0.5]);
    }

    #[test]
    fn test_two_assets_inverse_variance() {
        let w = recursive_bisection(&[0.01, 0.04], &[0, 1]).unwrap();
        assert_relative_eq!(w[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(w[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_weights_follow_asset_ids_not_order() {
        let w = recursive_bisection(&[0.01, 0.04], &[1, 0]).unwrap();
        assert_relative_eq!(w[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(w[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_three_assets_hand_computed() {
        // split [0] | [1, 2]; var_right = 1 / (1/0.02 + 1/0.02) = 0.01
        let w = recursive_bisection(&[0.01, 0.02, 0.02], &[0, 1, 2]).unwrap();
        assert_relative_eq!(w[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(w[1], 0.25, epsilon = 1e-12);
        assert_relative_eq!(w[2], 0.25, epsilon = 1e-12);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cluster_variance() {
        assert_relative_eq!(cluster_variance(&[0.02, 0.02], &[0, 1]).unwrap(), 0.01);
        assert_relative_eq!(cluster_variance(&[0.03], &[0]).unwrap(), 0.03);
    }

    #[test]
    fn test_zero_variance_rejected() {
        assert!(matches!(
            recursive_bisection(&[0.0, 0.04], &[0, 1]),
            Err(AllocationError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_empty_order() {
        assert!(recursive_bisection(&[], &[]).unwrap().is_empty());
    }
}
