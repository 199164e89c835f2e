pub mod analytics;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod holdings;
pub mod optimization;
pub mod prices;
pub mod types;

#[cfg(feature = "analysis")]
pub mod analysis;

#[cfg(feature = "analysis")]
pub use analysis::analyze_portfolio;
pub use analytics::performance::{evaluate_performance, portfolio_performance};
pub use analytics::returns::compute_returns;
pub use analytics::statistics::{
    compute_annualized_volatility, compute_correlation, compute_covariance,
};
pub use collaborators::{AdviceGenerator, MarketDataProvider};
pub use config::AllocationConfig;
pub use error::AllocationError;
pub use holdings::{resolve_weights, Holding, WeightIntent};
pub use optimization::cleaning::clean_weights;
#[cfg(feature = "hrp")]
pub use optimization::hrp::optimize_hrp;
#[cfg(feature = "mean_variance")]
pub use optimization::mean_variance::optimize_mean_variance;
pub use prices::{LookbackPeriod, PriceMatrix, ReturnMatrix};
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;
