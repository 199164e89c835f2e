pub mod performance;
pub mod returns;
pub mod statistics;
