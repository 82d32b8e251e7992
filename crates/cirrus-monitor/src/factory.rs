//! Cluster monitor factory — picks the monitor implementation for a
//! cluster's backing kind.
//!
//! The factory is called by the cluster builder while it holds the
//! topology shared lock for the cluster. Before building anything it
//! validates the policies bound to the cluster; invalid policies surface
//! as `PolicyValidation` / `PartitionValidation` and affect only this
//! cluster.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use cirrus_state::{
    AutoscalePolicy, Cluster, ClusterKind, DeploymentPolicy, PolicyRegistry, TopologyStore,
};

use crate::cluster::VmClusterMonitor;
use crate::error::{MonitorError, MonitorResult};

/// Default refresh period of a cluster monitor's execution unit.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(15);

/// What a factory produced for a cluster.
#[derive(Debug)]
pub enum ClusterMonitorKind {
    /// A monitor the tree builder knows how to run.
    Vm(VmClusterMonitor),
    /// A monitor of a kind the tree builder does not drive.
    Unrecognized { kind: String, cluster_id: String },
}

/// Resolves a cluster into a concrete monitor.
pub trait ClusterMonitorFactory: Send + Sync {
    /// `Ok(None)` means the cluster is not monitored at all.
    fn create(&self, cluster: &Cluster) -> MonitorResult<Option<ClusterMonitorKind>>;
}

/// Factory backed by the policy registry.
pub struct PolicyClusterMonitorFactory {
    policies: Arc<PolicyRegistry>,
    topology: TopologyStore,
    interval: Duration,
}

impl PolicyClusterMonitorFactory {
    pub fn new(policies: Arc<PolicyRegistry>, topology: TopologyStore) -> Self {
        Self {
            policies,
            topology,
            interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    /// Set the refresh period handed to every monitor this factory builds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn autoscale_policy(&self, cluster: &Cluster) -> MonitorResult<AutoscalePolicy> {
        if cluster.autoscale_policy.is_empty() {
            return Err(MonitorError::PolicyValidation(format!(
                "[cluster] {} has no autoscale policy",
                cluster.id
            )));
        }
        let policy = self
            .policies
            .autoscale_policy(&cluster.autoscale_policy)
            .ok_or_else(|| {
                MonitorError::PolicyValidation(format!(
                    "[autoscale policy] {} of [cluster] {} not found",
                    cluster.autoscale_policy, cluster.id
                ))
            })?;
        validate_autoscale_policy(policy)?;
        Ok(policy.clone())
    }

    fn deployment_policy(&self, cluster: &Cluster) -> MonitorResult<DeploymentPolicy> {
        let policy = self
            .policies
            .deployment_policy(&cluster.deployment_policy)
            .ok_or_else(|| {
                MonitorError::PolicyValidation(format!(
                    "[deployment policy] {:?} of [cluster] {} not found",
                    cluster.deployment_policy, cluster.id
                ))
            })?;
        validate_partitions(policy)?;
        Ok(policy.clone())
    }
}

impl ClusterMonitorFactory for PolicyClusterMonitorFactory {
    fn create(&self, cluster: &Cluster) -> MonitorResult<Option<ClusterMonitorKind>> {
        if cluster.kind == ClusterKind::Static {
            debug!(cluster_id = %cluster.id, "static cluster, no monitor");
            return Ok(None);
        }

        let autoscale_policy = self.autoscale_policy(cluster)?;
        let deployment_policy = self.deployment_policy(cluster)?;

        match cluster.kind {
            ClusterKind::Vm => Ok(Some(ClusterMonitorKind::Vm(VmClusterMonitor::new(
                cluster,
                autoscale_policy,
                deployment_policy,
                self.topology.clone(),
                self.interval,
            )))),
            ClusterKind::Kubernetes => Ok(Some(ClusterMonitorKind::Unrecognized {
                kind: "kubernetes".to_string(),
                cluster_id: cluster.id.clone(),
            })),
            ClusterKind::Static => Ok(None),
        }
    }
}

fn validate_autoscale_policy(policy: &AutoscalePolicy) -> MonitorResult<()> {
    let thresholds = &policy.load_thresholds;
    let named = [
        ("requests_in_flight", thresholds.requests_in_flight),
        ("memory_consumption", thresholds.memory_consumption),
        ("load_average", thresholds.load_average),
    ];
    for (name, value) in named {
        if let Some(v) = value
            && (!v.is_finite() || v <= 0.0)
        {
            return Err(MonitorError::PolicyValidation(format!(
                "[autoscale policy] {}: {name} threshold must be positive, got {v}",
                policy.id
            )));
        }
    }
    if let Some(memory) = thresholds.memory_consumption
        && memory > 100.0
    {
        return Err(MonitorError::PolicyValidation(format!(
            "[autoscale policy] {}: memory_consumption is a percentage, got {memory}",
            policy.id
        )));
    }
    Ok(())
}

fn validate_partitions(policy: &DeploymentPolicy) -> MonitorResult<()> {
    if policy.partitions.is_empty() {
        return Err(MonitorError::PartitionValidation(format!(
            "[deployment policy] {} has no partitions",
            policy.id
        )));
    }
    for partition in &policy.partitions {
        if partition.provider.trim().is_empty() {
            return Err(MonitorError::PartitionValidation(format!(
                "[partition] {} of [deployment policy] {} has no provider",
                partition.id, policy.id
            )));
        }
        if partition.max_members == 0 || partition.min_members > partition.max_members {
            return Err(MonitorError::PartitionValidation(format!(
                "[partition] {} of [deployment policy] {} has invalid member bounds {}..{}",
                partition.id, policy.id, partition.min_members, partition.max_members
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_state::{LoadThresholds, Partition, PolicySet, Status};

    fn registry() -> Arc<PolicyRegistry> {
        Arc::new(PolicyRegistry::from(PolicySet {
            autoscale: vec![
                AutoscalePolicy {
                    id: "economy".to_string(),
                    load_thresholds: LoadThresholds {
                        requests_in_flight: Some(80.0),
                        memory_consumption: Some(75.0),
                        load_average: None,
                    },
                },
                AutoscalePolicy {
                    id: "broken".to_string(),
                    load_thresholds: LoadThresholds {
                        memory_consumption: Some(140.0),
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
                    id: "empty".to_string(),
                    partitions: Vec::new(),
                },
                DeploymentPolicy {
                    id: "inverted".to_string(),
                    partitions: vec![Partition {
                        id: "p1".to_string(),
                        provider: "ec2".to_string(),
                        min_members: 5,
                        max_members: 2,
                    }],
                },
            ],
        }))
    }

    fn cluster(kind: ClusterKind, autoscale: &str, deployment: &str) -> Cluster {
        Cluster {
            id: "c1".to_string(),
            service_name: "php".to_string(),
            kind,
            status: Status::Created,
            autoscale_policy: autoscale.to_string(),
            deployment_policy: deployment.to_string(),
            members: Vec::new(),
        }
    }

    fn factory() -> PolicyClusterMonitorFactory {
        PolicyClusterMonitorFactory::new(registry(), TopologyStore::new())
            .with_interval(Duration::from_secs(1))
    }

    #[test]
    fn vm_cluster_gets_vm_monitor() {
        let kind = factory()
            .create(&cluster(ClusterKind::Vm, "economy", "single-zone"))
            .unwrap();
        match kind {
            Some(ClusterMonitorKind::Vm(m)) => {
                assert_eq!(m.id(), "c1");
                assert_eq!(m.autoscale_policy().id, "economy");
                assert_eq!(m.deployment_policy().partitions.len(), 1);
                assert!(!m.is_started());
            }
            other => panic!("expected vm monitor, got {other:?}"),
        }
    }

    #[test]
    fn kubernetes_cluster_is_unrecognized() {
        let kind = factory()
            .create(&cluster(ClusterKind::Kubernetes, "economy", "single-zone"))
            .unwrap();
        assert!(matches!(kind, Some(ClusterMonitorKind::Unrecognized { .. })));
    }

    #[test]
    fn static_cluster_gets_nothing() {
        let kind = factory()
            .create(&cluster(ClusterKind::Static, "", ""))
            .unwrap();
        assert!(kind.is_none());
    }

    #[test]
    fn missing_or_invalid_autoscale_policy_is_a_policy_error() {
        for autoscale in ["", "premium", "broken"] {
            let err = factory()
                .create(&cluster(ClusterKind::Vm, autoscale, "single-zone"))
                .unwrap_err();
            assert!(
                matches!(err, MonitorError::PolicyValidation(_)),
                "{autoscale}: {err}"
            );
        }
    }

    #[test]
    fn missing_deployment_policy_is_a_policy_error() {
        let err = factory()
            .create(&cluster(ClusterKind::Vm, "economy", "nowhere"))
            .unwrap_err();
        assert!(matches!(err, MonitorError::PolicyValidation(_)));
    }

    #[test]
    fn bad_partitions_are_partition_errors() {
        for deployment in ["empty", "inverted"] {
            let err = factory()
                .create(&cluster(ClusterKind::Vm, "economy", deployment))
                .unwrap_err();
            assert!(
                matches!(err, MonitorError::PartitionValidation(_)),
                "{deployment}: {err}"
            );
        }
    }
}
