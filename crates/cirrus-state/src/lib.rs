//! cirrus-state — in-memory application and topology stores for Cirrus.
//!
//! Holds the two live inventories the monitor core reads from:
//!
//! - [`ApplicationStore`]: Application → Group → (Group | ClusterRef)
//!   trees, guarded by a shared/exclusive lock per application id.
//! - [`TopologyStore`]: Service → Cluster → Member, guarded by a
//!   shared/exclusive lock per `(service, cluster)` pair.
//!
//! # Architecture
//!
//! Both stores keep their records behind `Arc` so a reader takes a cheap
//! snapshot while holding its shared key lock. Writers take the exclusive
//! key lock, then swap the record with copy-on-write (`Arc::make_mut`).
//! The two lock domains are independent; nothing in this crate ever holds
//! locks from both at once.
//!
//! The stores are `Clone` + `Send` + `Sync` and can be shared across
//! async tasks.

pub mod applications;
pub mod error;
pub mod lock;
pub mod policy;
pub mod topology;
pub mod types;

pub use applications::{ApplicationReadGuard, ApplicationStore};
pub use error::{StateError, StateResult};
pub use lock::KeyedLocks;
pub use policy::*;
pub use topology::{TopologyReadGuard, TopologyStore};
pub use types::*;
