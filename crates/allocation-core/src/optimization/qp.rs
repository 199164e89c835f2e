//! Primal active-set solver for non-negative convex quadratic programs.
//!
//! Solves
//!
//! ```text
//!   minimise    1/2 x'Qx + c'x
//!   subject to  Ax = b
//!               x >= 0
//! ```
//!
//! for positive definite `Q`. The working set holds the variables pinned at
//! zero; each iteration solves the equality-constrained subproblem on the
//! free variables through its KKT system, then either steps towards that
//! solution (pinning the first variable that would go negative) or releases
//! the pinned variable with the most negative multiplier.
//!
//! The solver never fails loudly: the outcome is reported through
//! [`QpStatus`] alongside the last iterate.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::AllocationError;
use crate::AllocationResult;

/// Iteration limits for [`solve_nonnegative_qp`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpSettings {
    pub max_iterations: usize,
    /// Tolerance on step length, multipliers and feasibility.
    pub tolerance: f64,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
        }
    }
}

impl QpSettings {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.max_iterations == 0 {
            return Err(AllocationError::InvalidInput {
                field: "solver.max_iterations".into(),
                reason: "Must be positive".into(),
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0 && self.tolerance < 1e-3) {
            return Err(AllocationError::InvalidInput {
                field: "solver.tolerance".into(),
                reason: "Must be in (0, 1e-3)".into(),
            });
        }
        Ok(())
    }
}

/// A convex QP with linear equalities and non-negativity bounds.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    /// n x n, symmetric positive definite.
    pub hessian: DMatrix<f64>,
    /// n
    pub linear: DVector<f64>,
    /// m x n
    pub equality_matrix: DMatrix<f64>,
    /// m
    pub equality_rhs: DVector<f64>,
}

impl QuadraticProgram {
    /// Quadratic-only objective `1/2 x'Qx`.
    pub fn new(hessian: DMatrix<f64>, equality_matrix: DMatrix<f64>, equality_rhs: DVector<f64>) -> Self {
        let n = hessian.nrows();
        Self {
            hessian,
            linear: DVector::zeros(n),
            equality_matrix,
            equality_rhs,
        }
    }

    pub fn dimension(&self) -> usize {
        self.hessian.nrows()
    }

    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.hessian * x)) + self.linear.dot(x)
    }

    /// Largest absolute violation of `Ax = b` and `x >= 0`.
    pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
        let eq = (&self.equality_matrix * x - &self.equality_rhs).amax();
        let bound = x.iter().fold(0.0f64, |acc, &v| acc.max(-v));
        eq.max(bound)
    }

    fn is_well_formed(&self) -> bool {
        let n = self.hessian.nrows();
        self.hessian.ncols() == n
            && self.linear.len() == n
            && self.equality_matrix.ncols() == n
            && self.equality_matrix.nrows() == self.equality_rhs.len()
            && self.hessian.iter().all(|v| v.is_finite())
            && self.linear.iter().all(|v| v.is_finite())
            && self.equality_matrix.iter().all(|v| v.is_finite())
            && self.equality_rhs.iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QpStatus {
    /// KKT conditions satisfied.
    Optimal,
    /// Malformed problem or infeasible starting point.
    Infeasible,
    /// A KKT system could not be solved.
    Singular,
    /// Iteration limit reached before optimality.
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub status: QpStatus,
    pub iterations: usize,
    pub objective: f64,
    /// Largest component of the final step taken.
    pub last_step: f64,
}

impl QpSolution {
    pub fn is_optimal(&self) -> bool {
        self.status == QpStatus::Optimal
    }

    /// Turn a non-optimal outcome into the matching error.
    pub fn into_result(self, context: &str) -> AllocationResult<DVector<f64>> {
        match self.status {
            QpStatus::Optimal => Ok(self.x),
            QpStatus::Infeasible => Err(AllocationError::InfeasibleOptimization(format!(
                "{context}: constraints cannot be satisfied"
            ))),
            QpStatus::Singular => Err(AllocationError::SingularMatrix(format!(
                "{context}: KKT system is singular"
            ))),
            QpStatus::MaxIterations => Err(AllocationError::ConvergenceFailure {
                function: context.to_string(),
                iterations: self.iterations,
                last_delta: self.last_step,
            }),
        }
    }
}

/// Solve `problem` starting from the feasible point `start`.
pub fn solve_nonnegative_qp(
    problem: &QuadraticProgram,
    start: &DVector<f64>,
    settings: &QpSettings,
) -> QpSolution {
    let n = problem.dimension();
    let tol = settings.tolerance;
    let mut last_step = 0.0;
    let finish = |x: DVector<f64>, status: QpStatus, iterations: usize, last_step: f64| {
        let objective = problem.objective(&x);
        QpSolution {
            x,
            status,
            iterations,
            objective,
            last_step,
        }
    };

    if !problem.is_well_formed() || start.len() != n {
        return finish(DVector::zeros(n), QpStatus::Infeasible, 0, 0.0);
    }

    // Feasibility is judged relative to the scale of the constraint data.
    let scale = 1.0 + problem.equality_rhs.amax() + problem.equality_matrix.amax();
    if problem.max_violation(start) > 1e-8 * scale {
        return finish(start.clone(), QpStatus::Infeasible, 0, 0.0);
    }

    let mut x = start.map(|v| v.max(0.0));
    let mut free: Vec<bool> = x.iter().map(|&v| v > 0.0).collect();

    for iteration in 0..settings.max_iterations {
        let free_idx: Vec<usize> = (0..n).filter(|&i| free[i]).collect();
        let Some((x_free, nu)) = solve_equality_subproblem(problem, &free_idx) else {
            return finish(x, QpStatus::Singular, iteration, last_step);
        };

        let mut target = DVector::zeros(n);
        for (k, &i) in free_idx.iter().enumerate() {
            target[i] = x_free[k];
        }
        let step = &target - &x;

        if step.amax() <= tol * (1.0 + x.amax()) {
            // Stationary on the current working set: check pinned multipliers.
            let grad = &problem.hessian * &x + &problem.linear;
            let multipliers = &grad - problem.equality_matrix.transpose() * &nu;
            let release = (0..n)
                .filter(|&i| !free[i])
                .map(|i| (i, multipliers[i]))
                .filter(|&(_, m)| m < -tol)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

            match release {
                None => {
                    trace!(iteration, "active set converged");
                    return finish(x, QpStatus::Optimal, iteration + 1, last_step);
                }
                Some((i, _)) => free[i] = true,
            }
            continue;
        }

        // Longest feasible step towards the subproblem solution.
        let mut alpha = 1.0;
        let mut blocking = None;
        for &i in &free_idx {
            if step[i] < 0.0 {
                let ratio = -x[i] / step[i];
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(i);
                }
            }
        }

        last_step = step.amax() * alpha;
        x += step * alpha;
        if let Some(i) = blocking {
            x[i] = 0.0;
            free[i] = false;
        }
        for v in x.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }

        if x.iter().any(|v| !v.is_finite()) {
            return finish(x, QpStatus::Singular, iteration + 1, last_step);
        }
    }

    finish(x, QpStatus::MaxIterations, settings.max_iterations, last_step)
}

/// Minimise the objective over the free variables with the pinned ones at
/// zero, subject to the equalities. Returns the free-variable solution and
/// the equality multipliers.
fn solve_equality_subproblem(
    problem: &QuadraticProgram,
    free_idx: &[usize],
) -> Option<(DVector<f64>, DVector<f64>)> {
    let k = free_idx.len();
    let m = problem.equality_rhs.len();
    if k == 0 {
        return None;
    }

    //  [ Q_FF  -A_F' ] [x_F]   [ -c_F ]
    //  [ A_F     0   ] [ nu] = [  b   ]
    let mut kkt = DMatrix::zeros(k + m, k + m);
    let mut rhs = DVector::zeros(k + m);
    for (r, &i) in free_idx.iter().enumerate() {
        for (c, &j) in free_idx.iter().enumerate() {
            kkt[(r, c)] = problem.hessian[(i, j)];
        }
        for e in 0..m {
            kkt[(r, k + e)] = -problem.equality_matrix[(e, i)];
            kkt[(k + e, r)] = problem.equality_matrix[(e, i)];
        }
        rhs[r] = -problem.linear[i];
    }
    for e in 0..m {
        rhs[k + e] = problem.equality_rhs[e];
    }

    let lu = kkt.lu();
    if !lu.is_invertible() {
        return None;
    }
    let sol = lu.solve(&rhs)?;
    if sol.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((sol.rows(0, k).into_owned(), sol.rows(k, m).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn budget(n: usize) -> (DMatrix<f64>, DVector<f64>) {
        (DMatrix::from_element(1, n, 1.0), DVector::from_element(1, 1.0))
    }

    #[test]
    fn test_unconstrained_interior_solution() {
        // min var of two uncorrelated assets: w ~ 1/var
        let q = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]);
        let (a, b) = budget(2);
        let problem = QuadraticProgram::new(q, a, b);
        let sol = solve_nonnegative_qp(&problem, &DVector::from_element(2, 0.5), &QpSettings::default());
        assert!(sol.is_optimal());
        assert_abs_diff_eq!(sol.x[0], 0.2, epsilon = 1e-10);
        assert_abs_diff_eq!(sol.x[1], 0.8, epsilon = 1e-10);
    }

    #[test]
    fn test_bound_becomes_active() {
        // Linear term pushes asset 0 negative in the unconstrained optimum.
        let q = DMatrix::identity(2, 2);
        let (a, b) = budget(2);
        let mut problem = QuadraticProgram::new(q, a, b);
        problem.linear = DVector::from_vec(vec![5.0, 0.0]);
        let sol = solve_nonnegative_qp(&problem, &DVector::from_element(2, 0.5), &QpSettings::default());
        assert!(sol.is_optimal());
        assert_abs_diff_eq!(sol.x[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sol.x[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_releases_pinned_variable() {
        // Start at a vertex; the optimum is interior.
        let q = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let (a, b) = budget(3);
        let problem = QuadraticProgram::new(q, a, b);
        let start = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let sol = solve_nonnegative_qp(&problem, &start, &QpSettings::default());
        assert!(sol.is_optimal());
        for i in 0..3 {
            assert_abs_diff_eq!(sol.x[i], 1.0 / 3.0, epsilon = 1e-10);
        }
        assert!(problem.max_violation(&sol.x) < 1e-12);
    }

    #[test]
    fn test_infeasible_start_reported() {
        let q = DMatrix::identity(2, 2);
        let (a, b) = budget(2);
        let problem = QuadraticProgram::new(q, a, b);
        let sol = solve_nonnegative_qp(&problem, &DVector::from_element(2, 0.1), &QpSettings::default());
        assert_eq!(sol.status, QpStatus::Infeasible);
        assert!(matches!(
            sol.into_result("test"),
            Err(AllocationError::InfeasibleOptimization(_))
        ));
    }

    #[test]
    fn test_singular_hessian_reported() {
        // Two identical assets: the KKT system on both free variables is singular.
        let q = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let (a, b) = budget(2);
        let problem = QuadraticProgram::new(q, a, b);
        let sol = solve_nonnegative_qp(&problem, &DVector::from_element(2, 0.5), &QpSettings::default());
        assert_eq!(sol.status, QpStatus::Singular);
    }

    #[test]
    fn test_settings_validation() {
        assert!(QpSettings::default().validate().is_ok());
        let bad = QpSettings {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
