//! Monitor model — the supervision tree.
//!
//! ```text
//! ApplicationMonitor            (root, no parent, has_dependent = false)
//!   ├── GroupMonitor            (composite, owned by its parent)
//!   │     ├── GroupMonitor
//!   │     └── VmClusterMonitor  (leaf, owns one execution unit)
//!   └── VmClusterMonitor
//! ```
//!
//! Composites own their children by id. A child refers back to its parent
//! by id only; the back-reference is used to route status upward, never
//! for ownership.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::{Deref, DerefMut};

use serde::Serialize;

use cirrus_state::{ApplicationId, Status};

use crate::cluster::{ClusterObservation, VmClusterMonitor};
use crate::context::ApplicationContext;
use crate::dependency::{DependencyNode, DependencyTree};

/// Monitor ids are the ids of the entities they mirror.
pub type MonitorId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Application,
    Group,
    Cluster,
}

/// Any node of the supervision tree.
#[derive(Debug)]
pub enum Monitor {
    Application(ApplicationMonitor),
    Group(GroupMonitor),
    Cluster(VmClusterMonitor),
}

impl Monitor {
    pub fn id(&self) -> &str {
        match self {
            Monitor::Application(m) => m.id(),
            Monitor::Group(m) => m.id(),
            Monitor::Cluster(m) => m.id(),
        }
    }

    pub fn kind(&self) -> MonitorKind {
        match self {
            Monitor::Application(_) => MonitorKind::Application,
            Monitor::Group(_) => MonitorKind::Group,
            Monitor::Cluster(_) => MonitorKind::Cluster,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Monitor::Application(m) => m.status(),
            Monitor::Group(m) => m.status(),
            Monitor::Cluster(m) => m.status(),
        }
    }

    pub fn set_status(&mut self, status: Status) {
        match self {
            Monitor::Application(m) => m.set_status(status),
            Monitor::Group(m) => m.set_status(status),
            Monitor::Cluster(m) => m.set_status(status),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            Monitor::Application(m) => m.parent(),
            Monitor::Group(m) => m.parent(),
            Monitor::Cluster(m) => m.parent(),
        }
    }

    pub fn has_dependent(&self) -> bool {
        match self {
            Monitor::Application(m) => m.has_dependent(),
            Monitor::Group(m) => m.has_dependent(),
            Monitor::Cluster(m) => m.has_dependent(),
        }
    }

    pub fn as_component(&self) -> Option<&ParentComponentMonitor> {
        match self {
            Monitor::Application(m) => Some(&m.component),
            Monitor::Group(m) => Some(&m.component),
            Monitor::Cluster(_) => None,
        }
    }

    pub fn as_component_mut(&mut self) -> Option<&mut ParentComponentMonitor> {
        match self {
            Monitor::Application(m) => Some(&mut m.component),
            Monitor::Group(m) => Some(&mut m.component),
            Monitor::Cluster(_) => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&VmClusterMonitor> {
        match self {
            Monitor::Cluster(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_cluster_mut(&mut self) -> Option<&mut VmClusterMonitor> {
        match self {
            Monitor::Cluster(m) => Some(m),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        match self {
            Monitor::Application(m) => m.snapshot(),
            Monitor::Group(m) => m.snapshot(),
            Monitor::Cluster(m) => m.snapshot(),
        }
    }
}

// ── Composite ─────────────────────────────────────────────────────

/// State shared by application and group monitors.
#[derive(Debug)]
pub struct ParentComponentMonitor {
    kind: MonitorKind,
    id: MonitorId,
    app_id: ApplicationId,
    status: Status,
    parent: Option<MonitorId>,
    has_dependent: bool,
    dependencies: DependencyTree,
    children: BTreeMap<MonitorId, Monitor>,
    /// Members the factory declined to monitor; they never block
    /// completion of this composite.
    unmonitored: BTreeSet<MonitorId>,
}

impl ParentComponentMonitor {
    fn new(kind: MonitorKind, id: &str, app_id: &str, dependencies: DependencyTree) -> Self {
        Self {
            kind,
            id: id.to_string(),
            app_id: app_id.to_string(),
            status: Status::Created,
            parent: None,
            has_dependent: false,
            dependencies,
            children: BTreeMap::new(),
            unmonitored: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn set_app_id(&mut self, app_id: &str) {
        self.app_id = app_id.to_string();
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
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

    pub fn set_has_dependent(&mut self, value: bool) {
        self.has_dependent = value;
    }

    pub fn dependencies(&self) -> &DependencyTree {
        &self.dependencies
    }

    /// Take ownership of a child. Returns the child it replaced, if any.
    pub fn add_child(&mut self, child: Monitor) -> Option<Monitor> {
        self.unmonitored.remove(child.id());
        self.children.insert(child.id().to_string(), child)
    }

    pub fn children(&self) -> impl Iterator<Item = &Monitor> {
        self.children.values()
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Monitor> {
        self.children.values_mut()
    }

    pub fn has_child(&self, id: &str) -> bool {
        self.children.contains_key(id)
    }

    /// Record that no monitor exists for a member.
    pub fn mark_unmonitored(&mut self, id: &str) {
        self.unmonitored.insert(id.to_string());
    }

    pub fn is_unmonitored(&self, id: &str) -> bool {
        self.unmonitored.contains(id)
    }

    /// Whether a member has been built or deliberately skipped.
    pub fn is_launched(&self, id: &str) -> bool {
        self.has_child(id) || self.is_unmonitored(id)
    }

    /// True when every declared member is active or unmonitored.
    pub fn all_members_active(&self) -> bool {
        self.dependencies.member_ids().into_iter().all(|id| {
            self.is_unmonitored(id)
                || self
                    .children
                    .get(id)
                    .is_some_and(|c| c.status() == Status::Active)
        })
    }

    /// Contexts that are due to be built: dependency roots not yet
    /// launched, and successors of members that are already active.
    pub fn pending_contexts(&self) -> Vec<ApplicationContext> {
        let mut pending = Vec::new();
        let mut frontier: VecDeque<&DependencyNode> = self.dependencies.roots().iter().collect();
        while let Some(node) = frontier.pop_front() {
            let id = node.context.id();
            if !self.is_launched(id) {
                pending.push(node.context.clone());
                continue;
            }
            let active = self.is_unmonitored(id)
                || self
                    .children
                    .get(id)
                    .is_some_and(|c| c.status() == Status::Active);
            if active {
                frontier.extend(node.children.iter());
            }
        }
        pending
    }

    /// Find a descendant monitor by id.
    pub fn find(&self, id: &str) -> Option<&Monitor> {
        if let Some(child) = self.children.get(id) {
            return Some(child);
        }
        self.children
            .values()
            .filter_map(Monitor::as_component)
            .find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Monitor> {
        if self.children.contains_key(id) {
            return self.children.get_mut(id);
        }
        self.children
            .values_mut()
            .filter_map(Monitor::as_component_mut)
            .find_map(|c| c.find_mut(id))
    }

    /// Find this composite or a descendant composite by id.
    pub fn component_mut(&mut self, id: &str) -> Option<&mut ParentComponentMonitor> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .values_mut()
            .filter_map(Monitor::as_component_mut)
            .find_map(|c| c.component_mut(id))
    }

    /// First composite, in post-order, that is not yet active but whose
    /// members all are.
    pub fn completed_composite(&self) -> Option<MonitorId> {
        let nested = self
            .children
            .values()
            .filter_map(Monitor::as_component)
            .find_map(ParentComponentMonitor::completed_composite);
        if nested.is_some() {
            return nested;
        }
        let pending = self.status != Status::Active && !self.status.is_shutting_down();
        (pending && self.all_members_active()).then(|| self.id.clone())
    }

    /// Every cluster monitor below this composite.
    pub fn cluster_monitors(&self) -> Vec<&VmClusterMonitor> {
        let mut found = Vec::new();
        for child in self.children.values() {
            match child {
                Monitor::Cluster(m) => found.push(m),
                Monitor::Application(c) => found.extend(c.cluster_monitors()),
                Monitor::Group(c) => found.extend(c.cluster_monitors()),
            }
        }
        found
    }

    /// Set the status of this composite and everything below it.
    pub fn set_status_recursive(&mut self, status: Status) {
        self.status = status;
        for child in self.children.values_mut() {
            match child.as_component_mut() {
                Some(c) => c.set_status_recursive(status),
                None => child.set_status(status),
            }
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            parent: self.parent.clone(),
            has_dependent: self.has_dependent,
            cluster: None,
            children: self.children.values().map(Monitor::snapshot).collect(),
        }
    }
}

// ── Application / Group ───────────────────────────────────────────

/// Root of an application's supervision tree.
#[derive(Debug)]
pub struct ApplicationMonitor {
    component: ParentComponentMonitor,
}

impl ApplicationMonitor {
    pub fn new(app_id: &str, dependencies: DependencyTree) -> Self {
        Self {
            component: ParentComponentMonitor::new(
                MonitorKind::Application,
                app_id,
                app_id,
                dependencies,
            ),
        }
    }
}

impl Deref for ApplicationMonitor {
    type Target = ParentComponentMonitor;

    fn deref(&self) -> &Self::Target {
        &self.component
    }
}

impl DerefMut for ApplicationMonitor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.component
    }
}

/// Mirrors one group of an application.
#[derive(Debug)]
pub struct GroupMonitor {
    component: ParentComponentMonitor,
}

impl GroupMonitor {
    pub fn new(group_id: &str, app_id: &str, dependencies: DependencyTree) -> Self {
        Self {
            component: ParentComponentMonitor::new(
                MonitorKind::Group,
                group_id,
                app_id,
                dependencies,
            ),
        }
    }
}

impl Deref for GroupMonitor {
    type Target = ParentComponentMonitor;

    fn deref(&self) -> &Self::Target {
        &self.component
    }
}

impl DerefMut for GroupMonitor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.component
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Serializable view of a monitor and its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub id: MonitorId,
    pub kind: MonitorKind,
    pub status: Status,
    pub parent: Option<MonitorId>,
    pub has_dependent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterObservation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MonitorSnapshot>,
}
