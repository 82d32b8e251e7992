//! Application contexts — the addressable nodes a monitor is built for.

use serde::Serialize;

/// What a single builder call is asked to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplicationContext {
    /// The application itself.
    Root { id: String },
    Group(GroupContext),
    Cluster(ClusterContext),
}

/// A group member of an application or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupContext {
    pub id: String,
    /// The group orders its own members.
    pub is_dependent: bool,
    /// Other members start only after this one is active.
    pub has_child: bool,
}

/// A cluster member of an application or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterContext {
    /// Cluster id in the topology.
    pub id: String,
    /// Alias used in startup orders.
    pub alias: String,
    pub service_name: String,
    pub is_dependent: bool,
    pub has_child: bool,
}

impl ApplicationContext {
    pub fn root(app_id: &str) -> Self {
        ApplicationContext::Root {
            id: app_id.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ApplicationContext::Root { id } => id,
            ApplicationContext::Group(ctx) => &ctx.id,
            ApplicationContext::Cluster(ctx) => &ctx.id,
        }
    }

    pub fn is_dependent(&self) -> bool {
        match self {
            ApplicationContext::Root { .. } => false,
            ApplicationContext::Group(ctx) => ctx.is_dependent,
            ApplicationContext::Cluster(ctx) => ctx.is_dependent,
        }
    }

    pub fn has_child(&self) -> bool {
        match self {
            ApplicationContext::Root { .. } => false,
            ApplicationContext::Group(ctx) => ctx.has_child,
            ApplicationContext::Cluster(ctx) => ctx.has_child,
        }
    }

    fn set_has_child(&mut self, value: bool) {
        match self {
            ApplicationContext::Root { .. } => {}
            ApplicationContext::Group(ctx) => ctx.has_child = value,
            ApplicationContext::Cluster(ctx) => ctx.has_child = value,
        }
    }

    pub(crate) fn with_has_child(mut self, value: bool) -> Self {
        self.set_has_child(value);
        self
    }
}
