//! Integration tests for the MySQL operator e2e harness
//!
//! These tests require a running Kubernetes cluster with the MySQL operator
//! and its CRDs installed, accessible via kubeconfig.
//! Tests are marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored --test-threads=1
//! ```
//!
//! Credentials and timeouts come from `MYSQL_E2E_*` environment variables or
//! the YAML file named in `MYSQL_E2E_CONFIG`.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]


mod teardown;

pub use fixtures::*;
