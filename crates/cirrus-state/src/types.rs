//! Domain types for the Cirrus stores.
//!
//! These types describe the live inventory the monitor core mirrors:
//! applications and their nested groups, and the topology of services,
//! clusters, and members. All types deserialize from the daemon's TOML
//! configuration.

use serde::{Deserialize, Serialize};

/// Unique identifier for an application.
pub type ApplicationId = String;

/// Unique identifier for a group within an application.
pub type GroupId = String;

/// Unique identifier for a cluster within a service.
pub type ClusterId = String;

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle status shared by applications, groups, clusters, and their
/// monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Created,
    Starting,
    Active,
    InMaintenance,
    Terminating,
    Terminated,
}

impl Status {
    /// Terminating or terminated.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Status::Terminating | Status::Terminated)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Starting => "starting",
            Status::Active => "active",
            Status::InMaintenance => "in_maintenance",
            Status::Terminating => "terminating",
            Status::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ── Application ───────────────────────────────────────────────────

/// A deployable composite of groups and clusters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: ApplicationId,
    #[serde(default)]
    pub status: Status,
    /// Ordered member references, e.g. `["group.db", "cluster.php"]`.
    #[serde(default)]
    pub startup_orders: Vec<Vec<String>>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
}

/// A nested sub-tree of an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub status: Status,
    /// Members of this group start and stop in declared order.
    #[serde(default)]
    pub is_dependent: bool,
    #[serde(default)]
    pub startup_orders: Vec<Vec<String>>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
}

/// Reference from an application or group to a topology cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterRef {
    /// Name used in startup orders (`cluster.<alias>`).
    pub alias: String,
    pub service_name: String,
    pub cluster_id: ClusterId,
}

impl Application {
    /// Every group in the nested tree whose id equals `id`.
    ///
    /// Searches to arbitrary depth. More than one match means the tree is
    /// malformed; callers decide how to treat that.
    pub fn groups_matching(&self, id: &str) -> Vec<&Group> {
        let mut found = Vec::new();
        for group in &self.groups {
            group.collect_matching(id, &mut found);
        }
        found
    }

    /// First group in the nested tree with the given id.
    pub fn group_recursively(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find_map(|g| g.find(id))
    }

    /// Mutable variant of [`Application::group_recursively`].
    pub fn group_recursively_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find_map(|g| g.find_mut(id))
    }
}

impl Group {
    fn collect_matching<'a>(&'a self, id: &str, found: &mut Vec<&'a Group>) {
        if self.id == id {
            found.push(self);
        }
        for child in &self.groups {
            child.collect_matching(id, found);
        }
    }

    fn find(&self, id: &str) -> Option<&Group> {
        if self.id == id {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.find(id))
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Group> {
        if self.id == id {
            return Some(self);
        }
        self.groups.iter_mut().find_map(|g| g.find_mut(id))
    }
}

// ── Topology ──────────────────────────────────────────────────────

/// A service and the clusters fronted by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

impl Service {
    pub fn cluster(&self, cluster_id: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == cluster_id)
    }

    pub fn cluster_mut(&mut self, cluster_id: &str) -> Option<&mut Cluster> {
        self.clusters.iter_mut().find(|c| c.id == cluster_id)
    }
}

/// Backing kind of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// Virtual-machine members provisioned through the cloud controller.
    #[default]
    Vm,
    /// Container members scheduled by Kubernetes.
    Kubernetes,
    /// Fixed membership, not autoscaled.
    Static,
}

/// A set of homogeneous members fronted by one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    /// Filled in from the owning service when loaded through the store.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub kind: ClusterKind,
    #[serde(default)]
    pub status: Status,
    /// Autoscale policy id.
    #[serde(default)]
    pub autoscale_policy: String,
    /// Deployment policy id.
    #[serde(default)]
    pub deployment_policy: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Cluster {
    pub fn active_member_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.status == MemberStatus::Active)
            .count()
    }
}

/// Lifecycle status of a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Created,
    Initialized,
    Active,
    Inactive,
    Terminated,
}

/// One running instance within a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub member_id: String,
    pub host_name: String,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

/// A (protocol, listen port, proxy port) triple exposed by a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub protocol: String,
    pub port: u16,
    pub proxy_port: u16,
}
