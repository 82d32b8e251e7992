//! Monitor builders and the dispatcher.
//!
//! Each call builds exactly one node of the supervision tree for one
//! [`ApplicationContext`]:
//!
//! ```text
//! Root    ─► build_application  (application lock, shared)
//! Group   ─► build_group        (application lock, shared)
//! Cluster ─► build_cluster      (topology (service, cluster) lock, shared)
//! ```
//!
//! A call touches one lock domain only and releases its lock on every
//! exit path. [`MonitorBuilder`] has no side effects beyond locking;
//! [`MonitorDispatcher`] adds the start of a cluster monitor's execution
//! unit.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use cirrus_state::{ApplicationStore, TopologyStore};

use crate::cluster::{StatusEvent, VmClusterMonitor};
use crate::context::{ApplicationContext, ClusterContext, GroupContext};
use crate::dependency::DependencyTree;
use crate::error::{MonitorError, MonitorResult};
use crate::factory::{ClusterMonitorFactory, ClusterMonitorKind};
use crate::monitor::{ApplicationMonitor, GroupMonitor, Monitor, ParentComponentMonitor};

/// Builds monitors from the live stores.
#[derive(Clone)]
pub struct MonitorBuilder {
    applications: ApplicationStore,
    topology: TopologyStore,
    factory: Arc<dyn ClusterMonitorFactory>,
}

impl MonitorBuilder {
    pub fn new(
        applications: ApplicationStore,
        topology: TopologyStore,
        factory: Arc<dyn ClusterMonitorFactory>,
    ) -> Self {
        Self {
            applications,
            topology,
            factory,
        }
    }

    pub fn applications(&self) -> &ApplicationStore {
        &self.applications
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    /// Build the monitor for `context` without starting anything.
    ///
    /// `Ok(None)` is only possible for cluster contexts whose cluster has
    /// no usable monitor.
    pub async fn build(
        &self,
        parent: Option<&ParentComponentMonitor>,
        context: &ApplicationContext,
        app_id: &str,
    ) -> MonitorResult<Option<Monitor>> {
        match context {
            ApplicationContext::Group(ctx) => {
                let monitor = self.build_group(parent, ctx, app_id).await?;
                Ok(Some(Monitor::Group(monitor)))
            }
            ApplicationContext::Cluster(ctx) => {
                let monitor = self.build_cluster(parent, ctx, app_id).await?;
                Ok(monitor.map(Monitor::Cluster))
            }
            ApplicationContext::Root { .. } => {
                let monitor = self.build_application(app_id).await?;
                Ok(Some(Monitor::Application(monitor)))
            }
        }
    }

    /// Build the monitor for a group of `app_id`.
    pub async fn build_group(
        &self,
        parent: Option<&ParentComponentMonitor>,
        context: &GroupContext,
        app_id: &str,
    ) -> MonitorResult<GroupMonitor> {
        let guard = self.applications.read(app_id).await;
        let application = guard.application().ok_or_else(|| {
            MonitorError::ReferentialIntegrity(format!(
                "[application] {app_id} cannot be found in the application store"
            ))
        })?;

        let group = match application.groups_matching(&context.id).as_slice() {
            [] => {
                return Err(MonitorError::ReferentialIntegrity(format!(
                    "[group] {} cannot be found in [application] {app_id}",
                    context.id
                )));
            }
            [group] => *group,
            many => {
                return Err(MonitorError::DependencyGraph(format!(
                    "[group] {} appears {} times in [application] {app_id}",
                    context.id,
                    many.len()
                )));
            }
        };
        let dependencies = DependencyTree::for_group(group)?;

        let mut monitor = GroupMonitor::new(&group.id, app_id, dependencies);
        monitor.set_app_id(app_id);

        if let Some(parent) = parent {
            monitor.set_parent(parent.id());
            monitor.set_has_dependent(
                parent.has_dependent() || (context.is_dependent && context.has_child),
            );
            // Resume after restart: adopt the live status so the parent
            // sees where this group already is.
            if group.status != monitor.status() {
                monitor.set_status(group.status);
            }
        }

        debug!(
            %app_id,
            group_id = %context.id,
            has_dependent = monitor.has_dependent(),
            status = %monitor.status(),
            "group monitor built"
        );
        Ok(monitor)
    }

    /// Build the root monitor of `app_id`.
    pub async fn build_application(&self, app_id: &str) -> MonitorResult<ApplicationMonitor> {
        let guard = self.applications.read(app_id).await;
        let application = guard.application().ok_or_else(|| {
            MonitorError::ReferentialIntegrity(format!(
                "[application] {app_id} cannot be found in the application store"
            ))
        })?;

        let dependencies = DependencyTree::for_application(application)?;
        let mut monitor = ApplicationMonitor::new(app_id, dependencies);
        monitor.set_has_dependent(false);
        if application.status != monitor.status() {
            monitor.set_status(application.status);
        }

        debug!(%app_id, status = %monitor.status(), "application monitor built");
        Ok(monitor)
    }

    /// Build the monitor for a cluster referenced by `app_id`.
    ///
    /// Returns `Ok(None)` when the factory yields no monitor or a monitor
    /// of a kind this builder does not drive.
    pub async fn build_cluster(
        &self,
        parent: Option<&ParentComponentMonitor>,
        context: &ClusterContext,
        app_id: &str,
    ) -> MonitorResult<Option<VmClusterMonitor>> {
        let service_name = &context.service_name;
        let cluster_id = &context.id;

        let guard = self.topology.read_cluster(service_name, cluster_id).await;
        if !guard.service_exists() {
            return Err(MonitorError::ReferentialIntegrity(format!(
                "[service] {service_name} cannot be found in the topology"
            )));
        }
        let cluster = guard.cluster().ok_or_else(|| {
            MonitorError::ReferentialIntegrity(format!(
                "[cluster] {cluster_id} cannot be found in the topology for [service] {service_name}"
            ))
        })?;
        debug!(%app_id, %cluster_id, "dependency check starting the cluster");

        match self.factory.create(cluster)? {
            Some(ClusterMonitorKind::Vm(mut monitor)) => {
                monitor.set_app_id(app_id);
                if let Some(parent) = parent {
                    monitor.set_parent(parent.id());
                }
                debug!(%app_id, %cluster_id, status = %monitor.status(), "cluster monitor built");
                Ok(Some(monitor))
            }
            Some(ClusterMonitorKind::Unrecognized { kind, .. }) => {
                warn!(%app_id, %cluster_id, %kind, "unknown cluster monitor found");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Builds a monitor and starts cluster execution units.
#[derive(Clone)]
pub struct MonitorDispatcher {
    builder: MonitorBuilder,
    events: Option<mpsc::Sender<StatusEvent>>,
}

impl MonitorDispatcher {
    pub fn new(builder: MonitorBuilder) -> Self {
        Self {
            builder,
            events: None,
        }
    }

    /// Route status events of started cluster monitors to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<StatusEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn builder(&self) -> &MonitorBuilder {
        &self.builder
    }

    /// Build the monitor for `context`; for a cluster, also start its
    /// execution unit. Returns without waiting on the unit.
    pub async fn dispatch(
        &self,
        parent: Option<&ParentComponentMonitor>,
        context: &ApplicationContext,
        app_id: &str,
    ) -> MonitorResult<Option<Monitor>> {
        let monitor = self.builder.build(parent, context, app_id).await?;
        match monitor {
            Some(Monitor::Cluster(mut cluster)) => {
                cluster.start(self.events.clone());
                Ok(Some(Monitor::Cluster(cluster)))
            }
            other => Ok(other),
        }
    }
}
