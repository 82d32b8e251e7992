//! Supervisor — the orchestration layer that grows supervision trees.
//!
//! Monitors are built lazily, one builder call per context:
//!
//! 1. `start_application` builds the root and dispatches the members that
//!    start first; every group built this way does the same for its own
//!    members.
//! 2. Cluster monitors report live status changes as [`StatusEvent`]s.
//!    `handle_event` records the change and dispatches any member whose
//!    predecessor just became active. Members whose build failed earlier
//!    are retried here too.
//! 3. A composite whose members are all active becomes active itself, and
//!    the change is written back to the application store.
//!
//! A failed build is logged and affects only its own member.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use cirrus_state::{ApplicationId, Status};

use crate::builder::{MonitorBuilder, MonitorDispatcher};
use crate::cluster::StatusEvent;
use crate::context::ApplicationContext;
use crate::error::MonitorResult;
use crate::monitor::{ApplicationMonitor, Monitor, MonitorKind, MonitorSnapshot, ParentComponentMonitor};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Default capacity of the status event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Owns the supervision trees of all started applications.
pub struct Supervisor {
    dispatcher: MonitorDispatcher,
    events_rx: mpsc::Receiver<StatusEvent>,
    trees: HashMap<ApplicationId, ApplicationMonitor>,
}

impl Supervisor {
    pub fn new(builder: MonitorBuilder, event_buffer: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        Self {
            dispatcher: MonitorDispatcher::new(builder).with_events(events_tx),
            events_rx,
            trees: HashMap::new(),
        }
    }

    /// Build the root monitor for `app_id` and dispatch its first members.
    ///
    /// Fails only if the root itself cannot be built. Starting an
    /// application that is already supervised is a no-op.
    pub async fn start_application(&mut self, app_id: &str) -> MonitorResult<()> {
        if self.trees.contains_key(app_id) {
            debug!(%app_id, "application already supervised");
            return Ok(());
        }

        let mut root = self
            .dispatcher
            .builder()
            .build_application(app_id)
            .await?;
        if root.status() == Status::Created {
            root.set_status(Status::Starting);
        }
        relaunch(&self.dispatcher, &mut root, app_id).await;

        info!(
            %app_id,
            status = %root.status(),
            children = root.children().count(),
            "application monitor started"
        );
        self.trees.insert(app_id.to_string(), root);
        self.settle(app_id).await;
        Ok(())
    }

    /// Wait for the next status event from a cluster monitor.
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        self.events_rx.recv().await
    }

    /// Apply every event already queued. Returns how many were handled.
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Record a status change and advance the tree.
    pub async fn handle_event(&mut self, event: StatusEvent) {
        let app_id = event.app_id.as_str();
        let Some(root) = self.trees.get_mut(app_id) else {
            debug!(%app_id, monitor_id = %event.monitor_id, "event for unsupervised application");
            return;
        };
        let Some(monitor) = root.find_mut(&event.monitor_id) else {
            debug!(%app_id, monitor_id = %event.monitor_id, "event for unknown monitor");
            return;
        };

        let previous = monitor.status();
        monitor.set_status(event.status);
        debug!(
            %app_id,
            monitor_id = %event.monitor_id,
            kind = ?event.kind,
            from = %previous,
            to = %event.status,
            "monitor status updated"
        );

        if !root.status().is_shutting_down() {
            relaunch(&self.dispatcher, root, app_id).await;
        }
        self.settle(app_id).await;
    }

    /// Mark every composite whose members are all active as active,
    /// innermost first, and dispatch whatever that unblocks.
    async fn settle(&mut self, app_id: &str) {
        loop {
            let Some(root) = self.trees.get_mut(app_id) else {
                return;
            };
            let Some(completed) = root.completed_composite() else {
                return;
            };
            let Some(composite) = root.component_mut(&completed) else {
                return;
            };
            composite.set_status(Status::Active);
            let kind = composite.kind();
            info!(%app_id, monitor_id = %completed, ?kind, "all members active");

            let applications = self.dispatcher.builder().applications();
            let persisted = match kind {
                MonitorKind::Application => {
                    applications
                        .set_application_status(app_id, Status::Active)
                        .await
                }
                _ => {
                    applications
                        .set_group_status(app_id, &completed, Status::Active)
                        .await
                }
            };
            if let Err(e) = persisted {
                warn!(%app_id, monitor_id = %completed, error = %e, "failed to persist status");
            }

            relaunch(&self.dispatcher, root, app_id).await;
        }
    }

    /// Stop an application's monitors and mark it terminated in the store.
    ///
    /// Returns false if the application was not supervised.
    pub async fn stop_application(&mut self, app_id: &str) -> MonitorResult<bool> {
        let Some(mut root) = self.trees.remove(app_id) else {
            return Ok(false);
        };

        root.set_status_recursive(Status::Terminating);
        let clusters = root.cluster_monitors();
        for cluster in &clusters {
            cluster.stop();
        }
        let stopped = clusters.len();
        root.set_status_recursive(Status::Terminated);

        self.dispatcher
            .builder()
            .applications()
            .set_application_status(app_id, Status::Terminated)
            .await?;

        info!(%app_id, clusters = stopped, "application monitor stopped");
        Ok(true)
    }

    /// Stop every execution unit without touching the stores.
    pub fn shutdown(&mut self) {
        for (app_id, root) in self.trees.drain() {
            for cluster in root.cluster_monitors() {
                cluster.stop();
            }
            debug!(%app_id, "application monitor released");
        }
        info!("supervisor shut down");
    }

    pub fn application(&self, app_id: &str) -> Option<&ApplicationMonitor> {
        self.trees.get(app_id)
    }

    pub fn snapshot(&self, app_id: &str) -> Option<MonitorSnapshot> {
        self.trees.get(app_id).map(|root| root.snapshot())
    }

    /// Supervised application ids, sorted.
    pub fn application_ids(&self) -> Vec<ApplicationId> {
        let mut ids: Vec<_> = self.trees.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Members of a cluster that are active, as seen by its monitor.
    pub fn active_members(&self, app_id: &str, cluster_id: &str) -> Option<usize> {
        let monitor = self.trees.get(app_id)?.find(cluster_id)?.as_cluster()?;
        Some(monitor.observation().active_members)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.trees.is_empty() {
            self.shutdown();
        }
    }
}

/// Dispatch every pending member of `composite` and of the composites
/// below it.
fn relaunch<'a>(
    dispatcher: &'a MonitorDispatcher,
    composite: &'a mut ParentComponentMonitor,
    app_id: &'a str,
) -> BoxFuture<'a> {
    Box::pin(async move {
        if composite.status().is_shutting_down() {
            return;
        }
        // Members that come up already active unblock their successors
        // within the same pass.
        let mut attempted = HashSet::new();
        loop {
            let pending: Vec<_> = composite
                .pending_contexts()
                .into_iter()
                .filter(|ctx| attempted.insert(ctx.id().to_string()))
                .collect();
            if pending.is_empty() {
                break;
            }
            launch(dispatcher, composite, pending, app_id).await;
        }
        for child in composite
            .children_mut()
            .filter_map(Monitor::as_component_mut)
        {
            relaunch(dispatcher, child, app_id).await;
        }
    })
}

/// Dispatch `contexts` as children of `composite`.
async fn launch(
    dispatcher: &MonitorDispatcher,
    composite: &mut ParentComponentMonitor,
    contexts: Vec<ApplicationContext>,
    app_id: &str,
) {
    for context in contexts {
        let member_id = context.id().to_string();
        if composite.is_launched(&member_id) {
            continue;
        }

        match dispatcher.dispatch(Some(&*composite), &context, app_id).await {
            Ok(Some(mut monitor)) => {
                if let Some(group) = monitor.as_component_mut()
                    && group.status() == Status::Created
                {
                    group.set_status(Status::Starting);
                }
                debug!(
                    %app_id,
                    parent = %composite.id(),
                    %member_id,
                    kind = ?monitor.kind(),
                    "member monitor attached"
                );
                composite.add_child(monitor);
            }
            Ok(None) => {
                info!(%app_id, %member_id, "member has no monitor, treating as settled");
                composite.mark_unmonitored(&member_id);
            }
            Err(e) => {
                error!(%app_id, %member_id, error = %e, "failed to build member monitor");
            }
        }
    }
}
