//! TopologyStore — the live service/cluster/member inventory.
//!
//! Locking is per `(service, cluster)` pair. Readers take the shared lock
//! for the pair they resolve; the write path takes the exclusive lock for
//! every pair it touches, acquiring them in sorted order.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lock::KeyedLocks;
use crate::types::*;

type ClusterKey = (String, ClusterId);

fn cluster_key(service_name: &str, cluster_id: &str) -> ClusterKey {
    (service_name.to_string(), cluster_id.to_string())
}

/// Thread-safe topology store.
#[derive(Clone, Default)]
pub struct TopologyStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    locks: KeyedLocks<ClusterKey>,
    services: RwLock<HashMap<String, Arc<Service>>>,
}

/// Shared lock on one `(service, cluster)` pair, with the service
/// resolved under it. Released on drop. Holds no lock when the cluster
/// is absent.
pub struct TopologyReadGuard {
    service: Option<Arc<Service>>,
    cluster_id: ClusterId,
    _lock: Option<OwnedRwLockReadGuard<()>>,
}

impl TopologyReadGuard {
    pub fn service_exists(&self) -> bool {
        self.service.is_some()
    }

    pub fn service(&self) -> Option<&Service> {
        self.service.as_deref()
    }

    /// The locked cluster, if both it and its service exist.
    pub fn cluster(&self) -> Option<&Cluster> {
        self.service()?.cluster(&self.cluster_id)
    }
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the shared lock for `(service_name, cluster_id)` and resolve
    /// the service.
    pub async fn read_cluster(&self, service_name: &str, cluster_id: &str) -> TopologyReadGuard {
        let key = cluster_key(service_name, cluster_id);
        let lock = self.inner.locks.read(&key).await;
        debug!(service = %service_name, %cluster_id, "cluster read lock acquired");

        let service = self.lookup(service_name);
        let found = service
            .as_deref()
            .is_some_and(|s| s.cluster(cluster_id).is_some());
        let lock = if found {
            Some(lock)
        } else {
            // Misses leave no lock entry behind.
            drop(lock);
            self.inner.locks.forget(&key);
            None
        };
        TopologyReadGuard {
            service,
            cluster_id: cluster_id.to_string(),
            _lock: lock,
        }
    }

    fn lookup(&self, service_name: &str) -> Option<Arc<Service>> {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .cloned()
    }

    /// Take exclusive locks for every key, in sorted order.
    async fn write_all(&self, keys: BTreeSet<ClusterKey>) -> Vec<OwnedRwLockWriteGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.inner.locks.write(key).await);
        }
        guards
    }

    /// Insert or replace a service together with its clusters.
    pub async fn put_service(&self, mut service: Service) {
        for cluster in &mut service.clusters {
            cluster.service_name = service.name.clone();
        }

        let mut keys: BTreeSet<ClusterKey> = service
            .clusters
            .iter()
            .map(|c| cluster_key(&service.name, &c.id))
            .collect();
        if let Some(existing) = self.lookup(&service.name) {
            keys.extend(existing.clusters.iter().map(|c| cluster_key(&existing.name, &c.id)));
        }

        let _locks = self.write_all(keys).await;
        let name = service.name.clone();
        let clusters = service.clusters.len();
        self.inner
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::new(service));
        debug!(service = %name, clusters, "service stored");
    }

    /// Remove a service and all its clusters. Returns true if it existed.
    pub async fn remove_service(&self, service_name: &str) -> bool {
        let Some(existing) = self.lookup(service_name) else {
            return false;
        };
        let keys: BTreeSet<ClusterKey> = existing
            .clusters
            .iter()
            .map(|c| cluster_key(service_name, &c.id))
            .collect();

        let existed = {
            let _locks = self.write_all(keys.clone()).await;
            self.inner
                .services
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(service_name)
                .is_some()
        };
        for key in &keys {
            self.inner.locks.forget(key);
        }
        debug!(service = %service_name, existed, "service removed");
        existed
    }

    /// Insert or replace a cluster within its (existing) service.
    pub async fn put_cluster(&self, cluster: Cluster) -> StateResult<()> {
        let service_name = cluster.service_name.clone();
        let cluster_id = cluster.id.clone();
        self.mutate(&service_name, &cluster_id, |service| {
            match service.cluster_mut(&cluster.id) {
                Some(slot) => *slot = cluster,
                None => service.clusters.push(cluster),
            }
            Ok(())
        })
        .await?;
        debug!(service = %service_name, %cluster_id, "cluster stored");
        Ok(())
    }

    /// Remove a cluster. Returns true if it existed.
    pub async fn remove_cluster(&self, service_name: &str, cluster_id: &str) -> StateResult<bool> {
        let mut existed = false;
        self.mutate(service_name, cluster_id, |service| {
            let before = service.clusters.len();
            service.clusters.retain(|c| c.id != cluster_id);
            existed = service.clusters.len() != before;
            Ok(())
        })
        .await?;
        self.inner.locks.forget(&cluster_key(service_name, cluster_id));
        debug!(service = %service_name, %cluster_id, existed, "cluster removed");
        Ok(existed)
    }

    /// Update the status of a cluster.
    pub async fn set_cluster_status(
        &self,
        service_name: &str,
        cluster_id: &str,
        status: Status,
    ) -> StateResult<()> {
        self.mutate_cluster(service_name, cluster_id, |cluster| {
            cluster.status = status;
        })
        .await?;
        debug!(service = %service_name, %cluster_id, %status, "cluster status updated");
        Ok(())
    }

    /// Insert or replace a member of a cluster.
    pub async fn upsert_member(
        &self,
        service_name: &str,
        cluster_id: &str,
        member: Member,
    ) -> StateResult<()> {
        let member_id = member.member_id.clone();
        self.mutate_cluster(service_name, cluster_id, |cluster| {
            match cluster
                .members
                .iter_mut()
                .find(|m| m.member_id == member.member_id)
            {
                Some(slot) => *slot = member,
                None => cluster.members.push(member),
            }
        })
        .await?;
        debug!(service = %service_name, %cluster_id, %member_id, "member stored");
        Ok(())
    }

    /// Remove a member from a cluster. Returns true if it existed.
    pub async fn remove_member(
        &self,
        service_name: &str,
        cluster_id: &str,
        member_id: &str,
    ) -> StateResult<bool> {
        let mut existed = false;
        self.mutate_cluster(service_name, cluster_id, |cluster| {
            let before = cluster.members.len();
            cluster.members.retain(|m| m.member_id != member_id);
            existed = cluster.members.len() != before;
        })
        .await?;
        Ok(existed)
    }

    /// Apply `f` to a service under the exclusive lock for one of its
    /// cluster keys.
    async fn mutate<F>(&self, service_name: &str, cluster_id: &str, f: F) -> StateResult<()>
    where
        F: FnOnce(&mut Service) -> StateResult<()>,
    {
        let key = cluster_key(service_name, cluster_id);
        let result = {
            let _lock = self.inner.locks.write(&key).await;
            let mut services = self
                .inner
                .services
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match services.get_mut(service_name) {
                Some(service) => f(Arc::make_mut(service)),
                None => Err(StateError::ServiceNotFound(service_name.to_string())),
            }
        };
        if matches!(
            result,
            Err(StateError::ServiceNotFound(_) | StateError::ClusterNotFound { .. })
        ) {
            self.inner.locks.forget(&key);
        }
        result
    }

    async fn mutate_cluster<F>(&self, service_name: &str, cluster_id: &str, f: F) -> StateResult<()>
    where
        F: FnOnce(&mut Cluster),
    {
        self.mutate(service_name, cluster_id, |service| {
            let cluster = service
                .cluster_mut(cluster_id)
                .ok_or_else(|| StateError::ClusterNotFound {
                    service: service_name.to_string(),
                    cluster: cluster_id.to_string(),
                })?;
            f(cluster);
            Ok(())
        })
        .await
    }

    /// All service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Whether any reader or writer currently holds the lock for the pair.
    pub fn is_locked(&self, service_name: &str, cluster_id: &str) -> bool {
        self.inner
            .locks
            .is_locked(&cluster_key(service_name, cluster_id))
    }
}
