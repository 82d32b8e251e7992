//! VM cluster monitor — the leaf of the supervision tree.
//!
//! A `VmClusterMonitor` mirrors one topology cluster and owns exactly one
//! execution unit: a tokio task started by [`VmClusterMonitor::start`].
//! The task periodically re-reads the cluster under the topology shared
//! lock, records member counts, and reports live status changes upward as
//! [`StatusEvent`]s. It makes no scaling decisions.
//!
//! The task's lifetime belongs to the monitor: `stop()` (or dropping the
//! monitor) signals it to exit. Whoever starts it never joins it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use cirrus_state::{AutoscalePolicy, Cluster, DeploymentPolicy, Status, TopologyStore};

use crate::monitor::{MonitorId, MonitorKind, MonitorSnapshot};

/// A status change reported by a monitor to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub app_id: String,
    pub monitor_id: MonitorId,
    pub kind: MonitorKind,
    pub status: Status,
}

/// What the run loop last saw of its cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterObservation {
    pub status: Status,
    pub members: usize,
    pub active_members: usize,
    /// Completed refresh passes.
    pub refreshes: u64,
}

/// Handle to the running execution unit.
struct Runtime {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Monitor for a VM-backed cluster.
pub struct VmClusterMonitor {
    cluster_id: String,
    service_name: String,
    app_id: String,
    parent: Option<MonitorId>,
    has_dependent: bool,
    autoscale_policy: AutoscalePolicy,
    deployment_policy: DeploymentPolicy,
    interval: Duration,
    topology: TopologyStore,
    observation: Arc<Mutex<ClusterObservation>>,
    runtime: Option<Runtime>,
}

impl VmClusterMonitor {
    /// Create a monitor for `cluster`. Its status starts at the cluster's
    /// live status.
    pub fn new(
        cluster: &Cluster,
        autoscale_policy: AutoscalePolicy,
        deployment_policy: DeploymentPolicy,
        topology: TopologyStore,
        interval: Duration,
    ) -> Self {
        let observation = ClusterObservation {
            status: cluster.status,
            members: cluster.members.len(),
            active_members: cluster.active_member_count(),
            refreshes: 0,
        };
        Self {
            cluster_id: cluster.id.clone(),
            service_name: cluster.service_name.clone(),
            app_id: String::new(),
            parent: None,
            has_dependent: false,
            autoscale_policy,
            deployment_policy,
            interval,
            topology,
            observation: Arc::new(Mutex::new(observation)),
            runtime: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.cluster_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn set_app_id(&mut self, app_id: &str) {
        self.app_id = app_id.to_string();
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn set_parent(&mut self, parent_id: &str) {
        self.parent = Some(parent_id.to_string());
    }

    pub fn has_dependent(&self) -> bool {
        self.has_dependent
    }

    pub fn autoscale_policy(&self) -> &AutoscalePolicy {
        &self.autoscale_policy
    }

    pub fn deployment_policy(&self) -> &DeploymentPolicy {
        &self.deployment_policy
    }

    pub fn observation(&self) -> ClusterObservation {
        *self.observation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Status {
        self.observation().status
    }

    pub fn set_status(&mut self, status: Status) {
        self.observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    /// Whether `start()` has been called.
    pub fn is_started(&self) -> bool {
        self.runtime.is_some()
    }

    /// Whether the execution unit is alive.
    pub fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|rt| !rt.handle.is_finished())
    }

    /// Spawn the execution unit. Returns false if it was already started.
    ///
    /// Must be called from within a tokio runtime. Returns immediately;
    /// the unit runs until `stop()`, until the monitor is dropped, or until
    /// its cluster leaves the topology.
    pub fn start(&mut self, events: Option<mpsc::Sender<StatusEvent>>) -> bool {
        if self.runtime.is_some() {
            debug!(cluster_id = %self.cluster_id, "cluster monitor already started");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let unit = ClusterLoop {
            cluster_id: self.cluster_id.clone(),
            service_name: self.service_name.clone(),
            app_id: self.app_id.clone(),
            interval: self.interval,
            topology: self.topology.clone(),
            observation: Arc::clone(&self.observation),
            events,
        };
        let handle = tokio::spawn(unit.run(shutdown_rx));
        self.runtime = Some(Runtime {
            handle,
            shutdown_tx,
        });

        info!(
            cluster_id = %self.cluster_id,
            service = %self.service_name,
            app_id = %self.app_id,
            "cluster monitor started"
        );
        true
    }

    /// Signal the execution unit to exit.
    pub fn stop(&self) {
        if let Some(rt) = &self.runtime {
            let _ = rt.shutdown_tx.send(true);
            debug!(cluster_id = %self.cluster_id, "cluster monitor stop requested");
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let observation = self.observation();
        MonitorSnapshot {
            id: self.cluster_id.clone(),
            kind: MonitorKind::Cluster,
            status: observation.status,
            parent: self.parent.clone(),
            has_dependent: self.has_dependent,
            cluster: Some(observation),
            children: Vec::new(),
        }
    }
}

impl Drop for VmClusterMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for VmClusterMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmClusterMonitor")
            .field("cluster_id", &self.cluster_id)
            .field("service_name", &self.service_name)
            .field("app_id", &self.app_id)
            .field("parent", &self.parent)
            .field("observation", &self.observation())
            .field("started", &self.is_started())
            .finish()
    }
}

/// Everything the execution unit needs, detached from the monitor.
struct ClusterLoop {
    cluster_id: String,
    service_name: String,
    app_id: String,
    interval: Duration,
    topology: TopologyStore,
    observation: Arc<Mutex<ClusterObservation>>,
    events: Option<mpsc::Sender<StatusEvent>>,
}

impl ClusterLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(cluster_id = %self.cluster_id, "cluster monitor loop starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.refresh().await {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    debug!(cluster_id = %self.cluster_id, "cluster monitor loop shutting down");
                    break;
                }
            }
        }
    }

    /// One observation pass. Returns false once the cluster is gone.
    async fn refresh(&self) -> bool {
        let (status, members, active_members) = {
            let guard = self
                .topology
                .read_cluster(&self.service_name, &self.cluster_id)
                .await;
            match guard.cluster() {
                Some(c) => (c.status, c.members.len(), c.active_member_count()),
                None => {
                    warn!(
                        cluster_id = %self.cluster_id,
                        service = %self.service_name,
                        "cluster left the topology, stopping monitor"
                    );
                    return false;
                }
            }
        };

        let previous = {
            let mut obs = self
                .observation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let previous = obs.status;
            obs.status = status;
            obs.members = members;
            obs.active_members = active_members;
            obs.refreshes += 1;
            previous
        };

        if previous != status {
            info!(
                cluster_id = %self.cluster_id,
                from = %previous,
                to = %status,
                "cluster status changed"
            );
            self.publish(status).await;
        }
        true
    }

    async fn publish(&self, status: Status) {
        let Some(events) = &self.events else {
            return;
        };
        let event = StatusEvent {
            app_id: self.app_id.clone(),
            monitor_id: self.cluster_id.clone(),
            kind: MonitorKind::Cluster,
            status,
        };
        if events.send(event).await.is_err() {
            debug!(cluster_id = %self.cluster_id, "status event receiver dropped");
        }
    }
}
