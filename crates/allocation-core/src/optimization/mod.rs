pub mod cleaning;
pub mod qp;

#[cfg(feature = "hrp")]
pub mod hrp;

#[cfg(feature = "mean_variance")]
pub mod mean_variance;
