//! Inventory of objects that must be gone after teardown

use std::fmt;

use crate::error::Result;
use crate::store::{ObjectStore, ResourceKind};

/// Secrets created by the control plane for every namespace
pub const IGNORED_SECRET_PREFIX: &str = "default-token-";

/// Kinds scanned by the inventory, with their section headings.
pub const INVENTORY: [(ResourceKind, &str); 12] = [
    (ResourceKind::ConfigMap, "config maps"),
    (ResourceKind::Deployment, "deployments"),
    (ResourceKind::Job, "jobs"),
    (ResourceKind::PersistentVolumeClaim, "persistent volume claims"),
    (ResourceKind::Pod, "pods"),
    (ResourceKind::ReplicaSet, "replica sets"),
    (ResourceKind::Secret, "secrets"),
    (ResourceKind::Service, "services"),
    (ResourceKind::ServiceAccount, "service accounts"),
    (ResourceKind::StatefulSet, "stateful sets"),
    (ResourceKind::InnoDBCluster, "innodbclusters"),
    (ResourceKind::MySQLBackup, "mysqlbackups"),
];

pub const NAMESPACE_SECTION: &str = "namespace";

pub fn is_pending_secret(name: &str) -> bool {
    !name.starts_with(IGNORED_SECRET_PREFIX)
}

/// Objects still present in a namespace, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingItems {
    sections: Vec<(String, Vec<String>)>,
}

impl PendingItems {
    /// Add a section; empty sections are dropped.
    pub fn push(&mut self, section: &str, names: Vec<String>) {
        if !names.is_empty() {
            self.sections.push((section.to_string(), names));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections(&self) -> &[(String, Vec<String>)] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&[String]> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, names)| names.as_slice())
    }

    pub fn total(&self) -> usize {
        self.sections.iter().map(|(_, names)| names.len()).sum()
    }
}

impl fmt::Display for PendingItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (section, names) in &self.sections {
            writeln!(f, "{section}:")?;
            for name in names {
                writeln!(f, " - {name}")?;
            }
        }
        Ok(())
    }
}

/// Scan every inventory kind plus the namespace object itself.
pub async fn collect_pending(store: &dyn ObjectStore, namespace: &str) -> Result<PendingItems> {
    let mut pending = PendingItems::default();
    for (kind, section) in INVENTORY {
        let names = store
            .list(kind, namespace)
            .await?
            .into_iter()
            .filter_map(|obj| obj.metadata.name)
            .filter(|name| kind != ResourceKind::Secret || is_pending_secret(name))
            .collect();
        pending.push(section, names);
    }
    if store.namespace_exists(namespace).await? {
        pending.push(NAMESPACE_SECTION, vec![namespace.to_string()]);
    }
    Ok(pending)
}
