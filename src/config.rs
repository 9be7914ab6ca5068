//! Harness configuration
//!
//! Every timeout, polling interval and retry budget used by the wait and
//! verification primitives lives here so a suite can tune them in one place.
//! Values come from [`HarnessConfig::default`], optionally overlaid by a YAML
//! file named in `MYSQL_E2E_CONFIG` and by `MYSQL_E2E_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::wait::PollSchedule;

/// Environment variable naming an optional YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "MYSQL_E2E_CONFIG";

pub const ROOT_USER_ENV: &str = "MYSQL_E2E_ROOT_USER";
pub const ROOT_PASSWORD_ENV: &str = "MYSQL_E2E_ROOT_PASSWORD";
pub const OPERATOR_NAMESPACE_ENV: &str = "MYSQL_E2E_OPERATOR_NAMESPACE";
pub const NAMESPACE_PREFIX_ENV: &str = "MYSQL_E2E_NAMESPACE_PREFIX";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A bounded polling budget expressed in whole seconds, as in the YAML file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ScheduleSecs {
    pub timeout: u64,
    pub interval: u64,
}

impl ScheduleSecs {
    pub const fn new(timeout: u64, interval: u64) -> Self {
        Self { timeout, interval }
    }

    pub fn schedule(&self) -> PollSchedule {
        PollSchedule::from_secs(self.timeout, self.interval)
    }
}

/// A fixed retry budget: number of attempts and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetrySecs {
    pub attempts: u32,
    pub backoff: u64,
}

impl RetrySecs {
    pub const fn new(attempts: u32, backoff: u64) -> Self {
        Self { attempts, backoff }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Account used by the verifiers to open database sessions
    pub root_user: String,
    pub root_password: String,
    /// Namespace the operator under test runs in
    pub operator_namespace: String,
    /// Prefix for generated test namespaces
    pub namespace_prefix: String,

    /// Cluster status wait, seconds
    pub cluster_timeout: u64,
    /// Pod phase wait, seconds
    pub pod_timeout: u64,
    /// Pod-gone and cluster-gone waits, seconds
    pub gone_timeout: u64,
    pub routers: ScheduleSecs,
    pub events: ScheduleSecs,
    pub namespace_empty: ScheduleSecs,

    /// Deletion budget for custom resources, seconds
    pub custom_resource_delete_timeout: u64,
    /// Deletion budget for every other kind, seconds
    pub delete_timeout: u64,

    pub session_retry: RetrySecs,
    pub label_retry: RetrySecs,
    pub kill_retry: RetrySecs,

    /// Timeout handed to WAIT_FOR_EXECUTED_GTID_SET, seconds
    pub gtid_wait_timeout: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root_user: "root".to_string(),
            root_password: "sakila".to_string(),
            operator_namespace: "mysql-operator".to_string(),
            namespace_prefix: "e2e".to_string(),
            cluster_timeout: 300,
            pod_timeout: 120,
            gone_timeout: 120,
            routers: ScheduleSecs::new(120, 3),
            events: ScheduleSecs::new(60, 3),
            namespace_empty: ScheduleSecs::new(300, 10),
            custom_resource_delete_timeout: 90,
            delete_timeout: 30,
            session_retry: RetrySecs::new(5, 2),
            label_retry: RetrySecs::new(5, 2),
            kill_retry: RetrySecs::new(5, 2),
            gtid_wait_timeout: 1,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the optional YAML file and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        info!(
            operator_namespace = %config.operator_namespace,
            namespace_prefix = %config.namespace_prefix,
            "Harness configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Reading harness configuration file");
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup(ROOT_USER_ENV) {
            self.root_user = user;
        }
        if let Some(password) = lookup(ROOT_PASSWORD_ENV) {
            self.root_password = password;
        }
        if let Some(ns) = lookup(OPERATOR_NAMESPACE_ENV) {
            self.operator_namespace = ns;
        }
        if let Some(prefix) = lookup(NAMESPACE_PREFIX_ENV) {
            self.namespace_prefix = prefix;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, schedule) in [
            ("routers", self.routers),
            ("events", self.events),
            ("namespaceEmpty", self.namespace_empty),
        ] {
            if schedule.interval == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.interval must be greater than zero"
                )));
            }
        }
        for (name, retry) in [
            ("sessionRetry", self.session_retry),
            ("labelRetry", self.label_retry),
            ("killRetry", self.kill_retry),
        ] {
            if retry.attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.attempts must be at least 1"
                )));
            }
        }
        if self.root_user.is_empty() {
            return Err(ConfigError::Invalid("rootUser must not be empty".into()));
        }
        Ok(())
    }

    pub fn cluster_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_timeout)
    }

    pub fn pod_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_timeout)
    }

    pub fn gone_timeout(&self) -> Duration {
        Duration::from_secs(self.gone_timeout)
    }

    pub fn custom_resource_delete_timeout(&self) -> Duration {
        Duration::from_secs(self.custom_resource_delete_timeout)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout)
    }
}
