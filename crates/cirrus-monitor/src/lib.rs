//! cirrus-monitor — supervision trees for Cirrus applications.
//!
//! Every deployed application is watched by a tree of monitors that
//! mirrors its composition:
//!
//! ```text
//!                 ApplicationMonitor (app1)
//!                  /                  \
//!        GroupMonitor (g1)      VmClusterMonitor (c3)
//!          /          \
//!   GroupMonitor   VmClusterMonitor (c1)
//!      (g1a)            │
//!        │              └─ execution unit (tokio task)
//!   VmClusterMonitor (c2)
//! ```
//!
//! # Architecture
//!
//! - [`builder`]: one builder per node kind plus the dispatcher. Builds
//!   read the [`cirrus_state`] stores under a shared key lock and never
//!   hold locks from both stores at once.
//! - [`dependency`]: the startup-order tree of a composite's members.
//! - [`factory`]: turns a topology cluster into a concrete monitor after
//!   validating its policies.
//! - [`cluster`]: the VM cluster monitor and its execution unit.
//! - [`supervisor`]: the orchestration layer that launches members in
//!   dependency order as their predecessors become active.

pub mod builder;
pub mod cluster;
pub mod context;
pub mod dependency;
pub mod error;
pub mod factory;
pub mod monitor;
pub mod supervisor;

pub use builder::{MonitorBuilder, MonitorDispatcher};
pub use cluster::{ClusterObservation, StatusEvent, VmClusterMonitor};
pub use context::{ApplicationContext, ClusterContext, GroupContext};
pub use dependency::{DependencyNode, DependencyTree};
pub use error::{MonitorError, MonitorResult};
pub use factory::{
    ClusterMonitorFactory, ClusterMonitorKind, DEFAULT_MONITOR_INTERVAL,
    PolicyClusterMonitorFactory,
};
pub use monitor::{
    ApplicationMonitor, GroupMonitor, Monitor, MonitorId, MonitorKind, MonitorSnapshot,
    ParentComponentMonitor,
};
pub use supervisor::{DEFAULT_EVENT_BUFFER, Supervisor};
