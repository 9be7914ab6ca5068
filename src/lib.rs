//! End-to-end verification harness for a MySQL InnoDB Cluster operator
//!
//! The crate gives test suites bounded waits over Kubernetes objects,
//! disposable namespaces, and structural plus SQL-level checks of a running
//! cluster. Everything talks to the outside world through two seams:
//! [`store::ObjectStore`] for the Kubernetes API and
//! [`mysql::SessionProvider`] for database sessions.

pub mod config;
pub mod error;
pub mod fault;
pub mod mysql;
pub mod namespace;
pub mod store;
pub mod telemetry;
pub mod unit;
pub mod verify;
pub mod wait;

pub use config::{ConfigError, HarnessConfig};
pub use error::{Error, Result};
pub use mysql::{Credentials, Records, SessionProvider, SqlError, SqlSession};
pub use namespace::{NamespaceManager, PendingItems};
pub use store::{
    ClusterSnapshot, ContainerId, KubeStore, ObjectEvent, ObjectPatch, ObjectStore, ResourceKind,
    SinceVersion, StoreError,
};
pub use unit::TestUnit;
pub use verify::{CheckParams, MemberRole, Verifier};
pub use wait::{ClusterExpectation, EventMatcher, OnlineCount, PodPhase, PollSchedule, wait_until};
