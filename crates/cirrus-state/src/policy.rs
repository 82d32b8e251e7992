//! Autoscale and deployment policies.
//!
//! Clusters reference policies by id. The registry is loaded once at
//! startup and read by the cluster monitor factory when it validates a
//! cluster before building its monitor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Scaling thresholds a cluster monitor works towards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoscalePolicy {
    pub id: String,
    #[serde(default)]
    pub load_thresholds: LoadThresholds,
}

/// Upper bounds per observed load metric. Unset metrics are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadThresholds {
    pub requests_in_flight: Option<f64>,
    /// Percentage, 0–100.
    pub memory_consumption: Option<f64>,
    pub load_average: Option<f64>,
}

/// Where members of a cluster may be placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentPolicy {
    pub id: String,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

/// A placement zone with member limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Partition {
    pub id: String,
    /// IaaS provider name, e.g. "openstack".
    pub provider: String,
    #[serde(default)]
    pub min_members: u32,
    pub max_members: u32,
}

/// Serialized form of a registry: plain lists, as written in config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicySet {
    #[serde(default)]
    pub autoscale: Vec<AutoscalePolicy>,
    #[serde(default)]
    pub deployment: Vec<DeploymentPolicy>,
}

/// Lookup table of policies by id.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    autoscale: HashMap<String, AutoscalePolicy>,
    deployment: HashMap<String, DeploymentPolicy>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_autoscale_policy(&mut self, policy: AutoscalePolicy) {
        self.autoscale.insert(policy.id.clone(), policy);
    }

    pub fn add_deployment_policy(&mut self, policy: DeploymentPolicy) {
        self.deployment.insert(policy.id.clone(), policy);
    }

    pub fn autoscale_policy(&self, id: &str) -> Option<&AutoscalePolicy> {
        self.autoscale.get(id)
    }

    pub fn deployment_policy(&self, id: &str) -> Option<&DeploymentPolicy> {
        self.deployment.get(id)
    }
}

impl From<PolicySet> for PolicyRegistry {
    fn from(set: PolicySet) -> Self {
        let mut registry = PolicyRegistry::new();
        for policy in set.autoscale {
            registry.add_autoscale_policy(policy);
        }
        for policy in set.deployment {
            registry.add_deployment_policy(policy);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_from_set() {
        let set = PolicySet {
            autoscale: vec![AutoscalePolicy {
                id: "economy".to_string(),
                load_thresholds: LoadThresholds {
                    requests_in_flight: Some(80.0),
                    ..Default::default()
                },
            }],
            deployment: vec![DeploymentPolicy {
                id: "single-zone".to_string(),
                partitions: vec![Partition {
                    id: "p1".to_string(),
                    provider: "openstack".to_string(),
                    min_members: 1,
                    max_members: 4,
                }],
            }],
        };

        let registry = PolicyRegistry::from(set);
        assert!(registry.autoscale_policy("economy").is_some());
        assert_eq!(
            registry.deployment_policy("single-zone").unwrap().partitions.len(),
            1
        );
        assert!(registry.autoscale_policy("premium").is_none());
    }
}
