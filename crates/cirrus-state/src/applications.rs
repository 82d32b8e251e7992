//! ApplicationStore — the live application/group inventory.
//!
//! Readers call [`ApplicationStore::read`] to take the shared lock for one
//! application id and resolve the application under it. The write path
//! (`put_application`, `set_group_status`, ...) holds the exclusive lock
//! for the application it mutates, so a reader never observes a partially
//! updated tree.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OwnedRwLockReadGuard;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lock::KeyedLocks;
use crate::types::*;

/// Thread-safe application store.
#[derive(Clone, Default)]
pub struct ApplicationStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    locks: KeyedLocks<ApplicationId>,
    applications: RwLock<HashMap<ApplicationId, Arc<Application>>>,
}

/// Shared lock on one application id, with the application resolved
/// under it. The lock is released when the guard is dropped; a guard for
/// an absent application holds no lock.
pub struct ApplicationReadGuard {
    application: Option<Arc<Application>>,
    _lock: Option<OwnedRwLockReadGuard<()>>,
}

impl ApplicationReadGuard {
    /// The application, or `None` if it is absent from the store.
    pub fn application(&self) -> Option<&Application> {
        self.application.as_deref()
    }
}

impl ApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the shared lock for `app_id` and resolve the application.
    pub async fn read(&self, app_id: &str) -> ApplicationReadGuard {
        let key = app_id.to_string();
        let lock = self.inner.locks.read(&key).await;
        debug!(%app_id, "application read lock acquired");

        let application = self.lookup(app_id);
        if application.is_none() {
            // Misses leave no lock entry behind.
            drop(lock);
            self.inner.locks.forget(&key);
            return ApplicationReadGuard {
                application: None,
                _lock: None,
            };
        }
        ApplicationReadGuard {
            application,
            _lock: Some(lock),
        }
    }

    fn lookup(&self, app_id: &str) -> Option<Arc<Application>> {
        self.inner
            .applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app_id)
            .cloned()
    }

    /// Insert or replace an application.
    pub async fn put_application(&self, application: Application) {
        let app_id = application.id.clone();
        let _lock = self.inner.locks.write(&app_id).await;
        self.inner
            .applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app_id.clone(), Arc::new(application));
        debug!(%app_id, "application stored");
    }

    /// Remove an application. Returns true if it existed.
    pub async fn remove_application(&self, app_id: &str) -> bool {
        let key = app_id.to_string();
        let existed = {
            let _lock = self.inner.locks.write(&key).await;
            self.inner
                .applications
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(app_id)
                .is_some()
        };
        self.inner.locks.forget(&key);
        debug!(%app_id, existed, "application removed");
        existed
    }

    /// Update the status of an application.
    pub async fn set_application_status(&self, app_id: &str, status: Status) -> StateResult<()> {
        self.mutate(app_id, |app| {
            app.status = status;
            Ok(())
        })
        .await?;
        debug!(%app_id, %status, "application status updated");
        Ok(())
    }

    /// Update the status of a group anywhere in an application's tree.
    pub async fn set_group_status(
        &self,
        app_id: &str,
        group_id: &str,
        status: Status,
    ) -> StateResult<()> {
        self.mutate(app_id, |app| {
            let group = app
                .group_recursively_mut(group_id)
                .ok_or_else(|| StateError::GroupNotFound {
                    application: app_id.to_string(),
                    group: group_id.to_string(),
                })?;
            group.status = status;
            Ok(())
        })
        .await?;
        debug!(%app_id, %group_id, %status, "group status updated");
        Ok(())
    }

    /// Apply `f` to an application under its exclusive lock.
    async fn mutate<F>(&self, app_id: &str, f: F) -> StateResult<()>
    where
        F: FnOnce(&mut Application) -> StateResult<()>,
    {
        let key = app_id.to_string();
        let result = {
            let _lock = self.inner.locks.write(&key).await;
            let mut applications = self
                .inner
                .applications
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match applications.get_mut(app_id) {
                Some(app) => f(Arc::make_mut(app)),
                None => Err(StateError::ApplicationNotFound(app_id.to_string())),
            }
        };
        if matches!(result, Err(StateError::ApplicationNotFound(_))) {
            self.inner.locks.forget(&key);
        }
        result
    }

    /// All application ids, sorted.
    pub fn application_ids(&self) -> Vec<ApplicationId> {
        let mut ids: Vec<_> = self
            .inner
            .applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Whether any reader or writer currently holds the lock for `app_id`.
    pub fn is_locked(&self, app_id: &str) -> bool {
        self.inner.locks.is_locked(&app_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_app(id: &str) -> Application {
        Application {
            id: id.to_string(),
            status: Status::Created,
            startup_orders: Vec::new(),
            groups: vec![Group {
                id: "g1".to_string(),
                status: Status::Created,
                is_dependent: true,
                startup_orders: Vec::new(),
                groups: vec![Group {
                    id: "g1a".to_string(),
                    status: Status::Created,
                    is_dependent: false,
                    startup_orders: Vec::new(),
                    groups: Vec::new(),
                    clusters: Vec::new(),
                }],
                clusters: Vec::new(),
            }],
            clusters: Vec::new(),
        }
    }

    #[tokio::test]
    async fn put_and_read() {
        let store = ApplicationStore::new();
        store.put_application(test_app("app1")).await;

        let guard = store.read("app1").await;
        assert_eq!(guard.application().unwrap().id, "app1");
        assert!(store.is_locked("app1"));

        drop(guard);
        assert!(!store.is_locked("app1"));
    }

    #[tokio::test]
    async fn read_missing_application_returns_none() {
        let store = ApplicationStore::new();
        let guard = store.read("nope").await;
        assert!(guard.application().is_none());
    }

    #[tokio::test]
    async fn set_group_status_updates_nested_group() {
        let store = ApplicationStore::new();
        store.put_application(test_app("app1")).await;

        store
            .set_group_status("app1", "g1a", Status::Active)
            .await
            .unwrap();

        let guard = store.read("app1").await;
        let group = guard.application().unwrap().group_recursively("g1a").unwrap();
        assert_eq!(group.status, Status::Active);
    }

    #[tokio::test]
    async fn set_group_status_unknown_group_fails() {
        let store = ApplicationStore::new();
        store.put_application(test_app("app1")).await;

        let err = store
            .set_group_status("app1", "ghost", Status::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::GroupNotFound { .. }));
        assert!(!store.is_locked("app1"));
    }

    #[tokio::test]
    async fn set_application_status_unknown_application_fails() {
        let store = ApplicationStore::new();
        let err = store
            .set_application_status("nope", Status::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::ApplicationNotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_taken_by_reader_is_stable() {
        let store = ApplicationStore::new();
        store.put_application(test_app("app1")).await;

        let guard = store.read("app1").await;
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .set_application_status("app1", Status::Active)
                    .await
                    .unwrap();
            })
        };

        // The writer cannot proceed while the shared lock is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());
        assert_eq!(guard.application().unwrap().status, Status::Created);

        drop(guard);
        writer.await.unwrap();
        let guard = store.read("app1").await;
        assert_eq!(guard.application().unwrap().status, Status::Active);
    }

    #[tokio::test]
    async fn remove_application() {
        let store = ApplicationStore::new();
        store.put_application(test_app("app1")).await;
        store.put_application(test_app("app2")).await;
        assert_eq!(store.application_ids(), vec!["app1", "app2"]);

        assert!(store.remove_application("app1").await);
        assert!(!store.remove_application("app1").await);
        assert_eq!(store.application_ids(), vec!["app2"]);
    }

    #[tokio::test]
    async fn misses_leave_no_lock_entries() {
        let store = ApplicationStore::new();
        for i in 0..100 {
            let guard = store.read(&format!("ghost-{i}")).await;
            assert!(guard.application().is_none());
        }
        assert!(store.set_application_status("ghost", Status::Active).await.is_err());
        assert_eq!(store.inner.locks.len(), 0);

        store.put_application(test_app("app1")).await;
        assert!(store.remove_application("app1").await);
        let guard = store.read("app1").await;
        assert!(guard.application().is_none());
        drop(guard);
        assert_eq!(store.inner.locks.len(), 0);

        store.put_application(test_app("app2")).await;
        drop(store.read("app2").await);
        assert_eq!(store.inner.locks.len(), 1);
    }
}
