use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    DataError(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Infeasible optimization: {0}")]
    InfeasibleOptimization(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta:e})")]
    ConvergenceFailure {
        function: String,
        iterations: usize,
        last_delta: f64,
    },

    #[error("Degenerate allocation: {0}")]
    DegenerateAllocation(String),

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AllocationError {
    /// Whether the failure was caused by the caller's input rather than by
    /// the computation itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AllocationError::InvalidInput { .. }
                | AllocationError::DataError(_)
                | AllocationError::SerializationError(_)
        )
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::SerializationError(e.to_string())
    }
}
