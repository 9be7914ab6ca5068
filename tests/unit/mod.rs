// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the e2e harness
//!
//! Everything here runs against the in-memory store and session fakes:
//! - Polling and retry primitives
//! - Watch-driven waits
//! - Namespace setup and wipe
//! - Cluster, instance and router verification
//! - GTID synchronisation and data consistency
//! - The per-suite test unit

#[path = "../common/mod.rs"]
mod common;

mod verify;
mod waiter;
