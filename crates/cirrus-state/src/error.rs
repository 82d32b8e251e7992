//! Error types for the Cirrus stores.

use thiserror::Error;

/// Result type alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the store write paths.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("group {group} not found in application {application}")]
    GroupNotFound { application: String, group: String },

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("cluster {cluster} not found in service {service}")]
    ClusterNotFound { service: String, cluster: String },
}
