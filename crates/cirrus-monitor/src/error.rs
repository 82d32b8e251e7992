//! Monitor error types.

use thiserror::Error;

use cirrus_state::StateError;

/// Errors raised while building or driving monitors.
///
/// None of these are retried inside this crate; the orchestration layer
/// decides whether to try again on the next change notification.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The entity a context points at is absent from its store.
    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),

    /// Dependency metadata is malformed.
    #[error("dependency graph: {0}")]
    DependencyGraph(String),

    #[error("invalid autoscale policy: {0}")]
    PolicyValidation(String),

    #[error("invalid partition: {0}")]
    PartitionValidation(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
