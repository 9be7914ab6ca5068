//! Disposable test namespaces
//!
//! [`NamespaceManager::setup`] wipes any leftover namespace of the same name
//! and creates it fresh. [`NamespaceManager::wipe`] deletes its contents in
//! dependency order, stripping finalizers from clusters and pods so teardown
//! does not depend on a healthy operator, then polls the inventory until
//! nothing is left.

pub mod inventory;

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use tracing::{debug, info, instrument, warn};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::store::{ObjectPatch, ObjectStore, ResourceKind, delete_with_timeout};
use crate::wait::wait_until;

pub use inventory::{PendingItems, collect_pending};

/// Label placed on every namespace created by the harness
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "mysql-operator-e2e";

/// Deletion order of a wipe; the namespace itself goes last.
pub const WIPE_ORDER: [ResourceKind; 13] = [
    ResourceKind::InnoDBCluster,
    ResourceKind::Pod,
    ResourceKind::MySQLBackup,
    ResourceKind::StatefulSet,
    ResourceKind::ReplicaSet,
    ResourceKind::Service,
    ResourceKind::ConfigMap,
    ResourceKind::Secret,
    ResourceKind::Job,
    ResourceKind::Deployment,
    ResourceKind::PersistentVolumeClaim,
    ResourceKind::PersistentVolume,
    ResourceKind::ServiceAccount,
];

/// Kinds whose finalizers are removed before deletion
fn strips_finalizers(kind: ResourceKind) -> bool {
    matches!(kind, ResourceKind::InnoDBCluster | ResourceKind::Pod)
}

/// Namespace of the claim a persistent volume is bound to.
pub fn claim_namespace(pv: &DynamicObject) -> Option<&str> {
    pv.data
        .get("spec")?
        .get("claimRef")?
        .get("namespace")?
        .as_str()
}

pub struct NamespaceManager<'a> {
    store: &'a dyn ObjectStore,
    config: &'a HarnessConfig,
}

impl<'a> NamespaceManager<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a HarnessConfig) -> Self {
        Self { store, config }
    }

    /// Wipe any previous incarnation of the namespace, then create it.
    #[instrument(skip(self))]
    pub async fn setup(&self, namespace: &str) -> Result<()> {
        self.wipe(namespace).await?;
        let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]);
        self.store.create_namespace(namespace, labels).await?;
        info!("Namespace created");
        Ok(())
    }

    /// Delete everything in the namespace and the namespace itself, then wait
    /// until the inventory is empty. A missing namespace is a no-op.
    #[instrument(skip(self))]
    pub async fn wipe(&self, namespace: &str) -> Result<()> {
        if !self.store.namespace_exists(namespace).await? {
            debug!("Namespace absent, nothing to wipe");
            return Ok(());
        }
        self.delete_contents(namespace).await?;
        self.wait_empty(namespace).await?;
        info!("Namespace wiped");
        Ok(())
    }

    pub async fn pending_items(&self, namespace: &str) -> Result<PendingItems> {
        collect_pending(self.store, namespace).await
    }

    /// Remove all finalizers of an object if it has any.
    ///
    /// Returns whether a patch was sent.
    pub async fn strip_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        match self.store.get(kind, namespace, name).await? {
            Some(obj) => self.strip_object_finalizers(kind, namespace, &obj).await,
            None => Ok(false),
        }
    }

    async fn strip_object_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        obj: &DynamicObject,
    ) -> Result<bool> {
        let has_finalizers = obj
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if !has_finalizers {
            return Ok(false);
        }
        let name = obj.metadata.name.as_deref().unwrap_or_default();
        self.store
            .patch(kind, namespace, name, &ObjectPatch::strip_finalizers())
            .await?;
        debug!(%kind, namespace, name, "Finalizers stripped");
        Ok(true)
    }

    async fn delete_contents(&self, namespace: &str) -> Result<()> {
        for kind in WIPE_ORDER {
            let timeout = if kind.is_custom() {
                self.config.custom_resource_delete_timeout()
            } else {
                self.config.delete_timeout()
            };

            for obj in self.store.list(kind, namespace).await? {
                if kind == ResourceKind::PersistentVolume && claim_namespace(&obj) != Some(namespace)
                {
                    continue;
                }
                let Some(name) = obj.metadata.name.as_deref() else {
                    continue;
                };

                if strips_finalizers(kind)
                    && let Err(e) = self.strip_object_finalizers(kind, namespace, &obj).await
                {
                    warn!(%kind, name, error = %e, "Failed to strip finalizers");
                }

                match delete_with_timeout(self.store, kind, namespace, name, timeout).await {
                    Ok(()) => debug!(%kind, name, "Delete issued"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(%kind, name, error = %e, "Delete failed, continuing"),
                }
            }
        }

        match self.store.delete_namespace(namespace).await {
            Ok(()) => debug!("Namespace delete issued"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(error = %e, "Namespace delete failed"),
        }
        Ok(())
    }

    async fn wait_empty(&self, namespace: &str) -> Result<()> {
        let store = self.store;
        let last = tokio::sync::Mutex::new(PendingItems::default());
        let last_ref = &last;
        let what = format!("namespace {namespace} to become empty");

        let result = wait_until(&what, self.config.namespace_empty.schedule(), || async move {
            let pending = collect_pending(store, namespace).await?;
            let empty = pending.is_empty();
            if !empty {
                debug!(remaining = pending.total(), "Namespace not empty yet");
            }
            *last_ref.lock().await = pending;
            Ok(empty)
        })
        .await;

        match result {
            Err(Error::Timeout { .. }) => Err(Error::ResidualState {
                namespace: namespace.to_string(),
                pending: last.into_inner().to_string(),
            }),
            other => other,
        }
    }
}
