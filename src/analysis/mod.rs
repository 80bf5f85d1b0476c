//! Analysis modules.
//!
//! Turns raw backend records into rendering features: coordinate
//! extraction, grid aggregation and cluster attribute summaries.

pub mod aggregator;
pub mod coords;
pub mod summary;

pub use aggregator::*;
