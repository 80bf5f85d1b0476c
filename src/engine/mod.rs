//! Map engine: paint building, layer lifecycle and the session façade.

pub mod lifecycle;
pub mod paint;
pub mod session;

pub use lifecycle::{DesiredLayer, LayerLifecycleManager, LifecycleStats, ReconcileReport};
pub use session::{MapSession, MetricDataset};
