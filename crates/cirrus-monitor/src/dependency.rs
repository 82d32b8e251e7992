//! Dependency trees — startup ordering of a composite's members.
//!
//! An application or group lists its members (groups and cluster
//! references) and may declare `startup_orders`, each a sequence of member
//! references such as `["group.db", "cluster.php"]`. Within one order a
//! member starts only after its predecessor is active. The tree's roots
//! are the members with no predecessor; they start immediately and in
//! parallel.
//!
//! ```text
//! startup_orders = [["group.db", "cluster.php", "cluster.lb"]]
//! members        = group.db, cluster.php, cluster.lb, cluster.cache
//!
//! roots:  group.db            cluster.cache
//!           └─ cluster.php
//!                └─ cluster.lb
//! ```

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use cirrus_state::{Application, ClusterRef, Group};

use crate::context::{ApplicationContext, ClusterContext, GroupContext};
use crate::error::{MonitorError, MonitorResult};

const GROUP_PREFIX: &str = "group.";
const CLUSTER_PREFIX: &str = "cluster.";

/// A member and the members that start after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyNode {
    pub context: ApplicationContext,
    pub children: Vec<DependencyNode>,
}

/// Startup ordering of one composite's direct members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyTree {
    roots: Vec<DependencyNode>,
}

impl DependencyTree {
    pub fn for_application(app: &Application) -> MonitorResult<Self> {
        Self::build(&app.id, &app.startup_orders, &app.groups, &app.clusters)
    }

    pub fn for_group(group: &Group) -> MonitorResult<Self> {
        Self::build(&group.id, &group.startup_orders, &group.groups, &group.clusters)
    }

    fn build(
        owner: &str,
        startup_orders: &[Vec<String>],
        groups: &[Group],
        clusters: &[ClusterRef],
    ) -> MonitorResult<Self> {
        // Declared members in declaration order, indexed by reference.
        let mut members: Vec<(String, ApplicationContext)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let group_members = groups.iter().map(|g| {
            (
                format!("{GROUP_PREFIX}{}", g.id),
                ApplicationContext::Group(GroupContext {
                    id: g.id.clone(),
                    is_dependent: g.is_dependent,
                    has_child: false,
                }),
            )
        });
        let cluster_members = clusters.iter().map(|c| {
            (
                format!("{CLUSTER_PREFIX}{}", c.alias),
                ApplicationContext::Cluster(ClusterContext {
                    id: c.cluster_id.clone(),
                    alias: c.alias.clone(),
                    service_name: c.service_name.clone(),
                    is_dependent: false,
                    has_child: false,
                }),
            )
        });
        // Parents key their children by bare id, so ids must be unique across kinds.
        let mut ids: HashSet<String> = HashSet::new();
        for (reference, context) in group_members.chain(cluster_members) {
            if index.insert(reference.clone(), members.len()).is_some() {
                return Err(MonitorError::DependencyGraph(format!(
                    "[{owner}] declares {reference} more than once"
                )));
            }
            if !ids.insert(context.id().to_string()) {
                return Err(MonitorError::DependencyGraph(format!(
                    "[{owner}] member {reference} reuses id {}",
                    context.id()
                )));
            }
            members.push((reference, context));
        }

        let mut predecessor: HashMap<usize, usize> = HashMap::new();
        for order in startup_orders {
            let mut previous: Option<usize> = None;
            for reference in order {
                let reference = reference.trim();
                if !reference.starts_with(GROUP_PREFIX) && !reference.starts_with(CLUSTER_PREFIX) {
                    return Err(MonitorError::DependencyGraph(format!(
                        "startup order of [{owner}] has malformed reference {reference:?}"
                    )));
                }
                let slot = *index.get(reference).ok_or_else(|| {
                    MonitorError::DependencyGraph(format!(
                        "startup order of [{owner}] references unknown member {reference}"
                    ))
                })?;

                if let ApplicationContext::Cluster(ctx) = &mut members[slot].1 {
                    ctx.is_dependent = true;
                }

                if let Some(prev) = previous {
                    if prev == slot {
                        return Err(MonitorError::DependencyGraph(format!(
                            "startup order of [{owner}] orders {reference} after itself"
                        )));
                    }
                    match predecessor.get(&slot) {
                        Some(&existing) if existing != prev => {
                            return Err(MonitorError::DependencyGraph(format!(
                                "[{owner}] orders {reference} after both {} and {}",
                                members[existing].0, members[prev].0
                            )));
                        }
                        _ => {
                            predecessor.insert(slot, prev);
                        }
                    }
                }
                previous = Some(slot);
            }
        }

        for start in 0..members.len() {
            let mut seen = HashSet::new();
            let mut cursor = start;
            while let Some(&prev) = predecessor.get(&cursor) {
                if !seen.insert(cursor) {
                    return Err(MonitorError::DependencyGraph(format!(
                        "startup orders of [{owner}] form a cycle through {}",
                        members[start].0
                    )));
                }
                cursor = prev;
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
        for slot in 0..members.len() {
            if let Some(&prev) = predecessor.get(&slot) {
                successors[prev].push(slot);
            }
        }

        let roots = (0..members.len())
            .filter(|slot| !predecessor.contains_key(slot))
            .map(|slot| node(slot, &members, &successors))
            .collect();

        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[DependencyNode] {
        &self.roots
    }

    /// Contexts of the members that start first.
    pub fn starting_contexts(&self) -> Vec<ApplicationContext> {
        self.roots.iter().map(|n| n.context.clone()).collect()
    }

    /// The node for a member id, at any depth.
    pub fn find(&self, id: &str) -> Option<&DependencyNode> {
        fn walk<'a>(nodes: &'a [DependencyNode], id: &str) -> Option<&'a DependencyNode> {
            nodes.iter().find_map(|n| {
                if n.context.id() == id {
                    Some(n)
                } else {
                    walk(&n.children, id)
                }
            })
        }
        walk(&self.roots, id)
    }

    /// Contexts of the members that start once `id` is active.
    pub fn successors_of(&self, id: &str) -> Vec<ApplicationContext> {
        self.find(id)
            .map(|n| n.children.iter().map(|c| c.context.clone()).collect())
            .unwrap_or_default()
    }

    /// Ids of every member in the tree.
    pub fn member_ids(&self) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [DependencyNode], out: &mut Vec<&'a str>) {
            for n in nodes {
                out.push(n.context.id());
                walk(&n.children, out);
            }
        }
        let mut ids = Vec::new();
        walk(&self.roots, &mut ids);
        ids
    }
}

fn node(
    slot: usize,
    members: &[(String, ApplicationContext)],
    successors: &[Vec<usize>],
) -> DependencyNode {
    let children: Vec<_> = successors[slot]
        .iter()
        .map(|&s| node(s, members, successors))
        .collect();
    DependencyNode {
        context: members[slot].1.clone().with_has_child(!children.is_empty()),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_state::Status;

    fn group(id: &str, is_dependent: bool) -> Group {
        Group {
            id: id.to_string(),
            status: Status::Created,
            is_dependent,
            startup_orders: Vec::new(),
            groups: Vec::new(),
            clusters: Vec::new(),
        }
    }

    fn cluster_ref(alias: &str) -> ClusterRef {
        ClusterRef {
            alias: alias.to_string(),
            service_name: format!("{alias}-svc"),
            cluster_id: format!("{alias}.cluster"),
        }
    }

    fn orders(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|o| o.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    fn app(startup_orders: Vec<Vec<String>>) -> Application {
        Application {
            id: "app1".to_string(),
            status: Status::Created,
            startup_orders,
            groups: vec![group("db", true)],
            clusters: vec![cluster_ref("php"), cluster_ref("lb"), cluster_ref("cache")],
        }
    }

    #[test]
    fn no_orders_starts_everything_at_once() {
        let tree = DependencyTree::for_application(&app(Vec::new())).unwrap();
        assert_eq!(tree.roots().len(), 4);
        assert!(tree.roots().iter().all(|n| !n.context.has_child()));
        assert!(!tree.starting_contexts().iter().any(|c| c.is_dependent() && c.id() != "db"));
    }

    #[test]
    fn chain_builds_nested_successors() {
        let tree = DependencyTree::for_application(&app(orders(&[&[
            "group.db",
            "cluster.php",
            "cluster.lb",
        ]])))
        .unwrap();

        let roots: Vec<_> = tree.roots().iter().map(|n| n.context.id()).collect();
        assert_eq!(roots, vec!["db", "cache.cluster"]);

        let db = tree.find("db").unwrap();
        assert!(db.context.has_child());
        assert!(db.context.is_dependent());

        assert_eq!(
            tree.successors_of("db")
                .iter()
                .map(|c| c.id().to_string())
                .collect::<Vec<_>>(),
            vec!["php.cluster"]
        );
        assert_eq!(tree.successors_of("php.cluster")[0].id(), "lb.cluster");
        assert!(tree.successors_of("lb.cluster").is_empty());

        // Clusters that take part in an order are dependent, others are not.
        assert!(tree.find("php.cluster").unwrap().context.is_dependent());
        assert!(!tree.find("cache.cluster").unwrap().context.is_dependent());
        assert_eq!(tree.member_ids().len(), 4);
    }

    #[test]
    fn unknown_reference_is_a_dependency_error() {
        let err = DependencyTree::for_application(&app(orders(&[&["group.db", "cluster.ghost"]])))
            .unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(msg) if msg.contains("cluster.ghost")));
    }

    #[test]
    fn malformed_prefix_is_a_dependency_error() {
        let err = DependencyTree::for_application(&app(orders(&[&["service.php"]]))).unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(_)));
    }

    #[test]
    fn two_predecessors_is_a_dependency_error() {
        let err = DependencyTree::for_application(&app(orders(&[
            &["group.db", "cluster.lb"],
            &["cluster.php", "cluster.lb"],
        ])))
        .unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(msg) if msg.contains("after both")));
    }

    #[test]
    fn repeated_order_is_accepted() {
        let tree = DependencyTree::for_application(&app(orders(&[
            &["group.db", "cluster.lb"],
            &["group.db", "cluster.lb"],
        ])))
        .unwrap();
        assert_eq!(tree.successors_of("db").len(), 1);
    }

    #[test]
    fn cycle_is_a_dependency_error() {
        let err = DependencyTree::for_application(&app(orders(&[
            &["cluster.php", "cluster.lb"],
            &["cluster.lb", "cluster.php"],
        ])))
        .unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(msg) if msg.contains("cycle")));
    }

    #[test]
    fn self_order_is_a_dependency_error() {
        let err =
            DependencyTree::for_application(&app(orders(&[&["cluster.php", "cluster.php"]])))
                .unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(_)));
    }

    #[test]
    fn duplicate_member_is_a_dependency_error() {
        let mut app = app(Vec::new());
        app.groups.push(group("db", false));
        let err = DependencyTree::for_application(&app).unwrap_err();
        assert!(matches!(err, MonitorError::DependencyGraph(msg) if msg.contains("more than once")));
    }

    #[test]
    fn group_and_cluster_sharing_an_id_is_rejected() {
        let mut app = app(Vec::new());
        app.groups.push(group("php.cluster", false));
        let err = DependencyTree::for_application(&app).unwrap_err();
        assert!(
            matches!(err, MonitorError::DependencyGraph(msg) if msg.contains("reuses id php.cluster"))
        );
    }

    #[test]
    fn group_tree_uses_group_members() {
        let mut g = group("g1", true);
        g.groups.push(group("g1a", false));
        g.clusters.push(cluster_ref("php"));
        g.startup_orders = orders(&[&["group.g1a", "cluster.php"]]);

        let tree = DependencyTree::for_group(&g).unwrap();
        assert_eq!(tree.roots().len(), 1);
        assert_eq!(tree.roots()[0].context.id(), "g1a");
        assert!(tree.roots()[0].context.has_child());
    }
}
