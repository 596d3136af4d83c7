//! Autoscaler library for MongoDB Atlas clusters
//!
//! This crate provides the core functionality for:
//! - Fetching cluster state and member measurements from the Atlas Admin API
//! - The size catalog and the pure scaling decision
//! - The fetch → decide → act control loop
//! - Health checks, observability and measurement history

pub mod api;
pub mod atlas;
pub mod catalog;
pub mod control;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod sink;

pub use catalog::{SizeCatalog, SizeTier};
pub use control::{ControlLoop, ControlLoopBuilder, TickOutcome};
pub use engine::{decide, Decision, Outcome};
pub use error::{AtlasError, CatalogError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
