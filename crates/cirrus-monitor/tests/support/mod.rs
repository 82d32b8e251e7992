//! Shared fixtures for cirrus-monitor integration tests.
//!
//! The sample application:
//!
//! ```text
//! app1   order: g1 -> lb
//! ├── g1 (dependent)   order: db -> g1a
//! │   ├── cluster db  (mysql/c-db)
//! │   └── g1a
//! │       └── cluster web (php/c-web)
//! └── cluster lb (nginx/c-lb)
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cirrus_monitor::{MonitorBuilder, PolicyClusterMonitorFactory};
use cirrus_state::{
    Application, ApplicationStore, AutoscalePolicy, Cluster, ClusterKind, ClusterRef,
    DeploymentPolicy, Group, LoadThresholds, Partition, PolicyRegistry, PolicySet, Service,
    Status, TopologyStore,
};

pub const APP: &str = "app1";

pub fn orders(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|order| order.iter().map(|s| s.to_string()).collect())
        .collect()
}

pub fn cluster_ref(alias: &str, service: &str, cluster_id: &str) -> ClusterRef {
    ClusterRef {
        alias: alias.to_string(),
        service_name: service.to_string(),
        cluster_id: cluster_id.to_string(),
    }
}

pub fn application() -> Application {
    Application {
        id: APP.to_string(),
        status: Status::Created,
        startup_orders: orders(&[&["group.g1", "cluster.lb"]]),
        groups: vec![Group {
            id: "g1".to_string(),
            status: Status::Created,
            is_dependent: true,
            startup_orders: orders(&[&["cluster.db", "group.g1a"]]),
            groups: vec![Group {
                id: "g1a".to_string(),
                status: Status::Created,
                is_dependent: false,
                startup_orders: Vec::new(),
                groups: Vec::new(),
                clusters: vec![cluster_ref("web", "php", "c-web")],
            }],
            clusters: vec![cluster_ref("db", "mysql", "c-db")],
        }],
        clusters: vec![cluster_ref("lb", "nginx", "c-lb")],
    }
}

pub fn cluster(id: &str, kind: ClusterKind) -> Cluster {
    Cluster {
        id: id.to_string(),
        service_name: String::new(),
        kind,
        status: Status::Created,
        autoscale_policy: "economy".to_string(),
        deployment_policy: "single-zone".to_string(),
        members: Vec::new(),
    }
}

pub fn service(name: &str, clusters: Vec<Cluster>) -> Service {
    Service {
        name: name.to_string(),
        clusters,
    }
}

pub fn policies() -> PolicySet {
    PolicySet {
        autoscale: vec![
            AutoscalePolicy {
                id: "economy".to_string(),
                load_thresholds: LoadThresholds {
                    requests_in_flight: Some(80.0),
                    memory_consumption: Some(75.0),
                    load_average: Some(4.0),
                },
            },
            AutoscalePolicy {
                id: "greedy".to_string(),
                load_thresholds: LoadThresholds {
                    memory_consumption: Some(250.0),
                    ..Default::default()
                },
            },
        ],
        deployment: vec![
            DeploymentPolicy {
                id: "single-zone".to_string(),
                partitions: vec![Partition {
                    id: "p1".to_string(),
                    provider: "openstack".to_string(),
                    min_members: 1,
                    max_members: 3,
                }],
            },
            DeploymentPolicy {
                id: "nowhere".to_string(),
                partitions: Vec::new(),
            },
        ],
    }
}

pub struct Fixture {
    pub applications: ApplicationStore,
    pub topology: TopologyStore,
    pub builder: MonitorBuilder,
}

/// Stores seeded with the sample application and all three services.
pub async fn fixture(interval: Duration) -> Fixture {
    let applications = ApplicationStore::new();
    let topology = TopologyStore::new();

    applications.put_application(application()).await;
    topology
        .put_service(service("mysql", vec![cluster("c-db", ClusterKind::Vm)]))
        .await;
    topology
        .put_service(service("php", vec![cluster("c-web", ClusterKind::Vm)]))
        .await;
    topology
        .put_service(service("nginx", vec![cluster("c-lb", ClusterKind::Vm)]))
        .await;

    let factory = PolicyClusterMonitorFactory::new(
        Arc::new(PolicyRegistry::from(policies())),
        topology.clone(),
    )
    .with_interval(interval);
    let builder = MonitorBuilder::new(applications.clone(), topology.clone(), Arc::new(factory));

    Fixture {
        applications,
        topology,
        builder,
    }
}
