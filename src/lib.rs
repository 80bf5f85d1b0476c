//! civicmap - geospatial metric visualization engine.
//!
//! Turns timestamped, geolocated civic-data records into aggregated,
//! temporally styled map layers, and keeps an external rendering surface
//! consistent with them through a single lifecycle manager.
//!
//! The pieces, leaves first:
//!
//! - [`color`]: stable palette indices for layer keys
//! - [`analysis`]: coordinate extraction and point aggregation
//! - [`temporal`]: date handling, timeline state and fade styling
//! - [`loader`]: backends and the deduplicating metric loader
//! - [`shapes`]: static polygon layer ordering and coloring
//! - [`surface`]: the rendering surface adapter and a recording fake
//! - [`engine`]: paint building, layer lifecycle and the session façade
//! - [`report`]: Markdown and JSON session reports

pub mod analysis;
pub mod cli;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod models;
pub mod report;
pub mod shapes;
pub mod surface;
pub mod temporal;
