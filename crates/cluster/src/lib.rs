// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-cluster: orchestrator mediation for the subprovisioner driver.
//!
//! Both driver processes are stateless; every durable fact lives on the
//! orchestrator's objects. This crate maps domain records onto claim and
//! snapshot metadata, runs state transitions with optimistic compare-and-set,
//! dispatches image jobs and staging workers, and hosts the deletion reaper.
//!
//! Object-store access goes through narrow `async_trait` seams
//! ([`ClaimStore`], [`SnapshotStore`], [`JobRunner`], [`WorkerRunner`]) so
//! the protocol logic can be exercised against in-memory fakes.

pub mod claims;
pub mod env;
pub mod error;
pub mod jobs;
pub mod reaper;
pub mod snapshots;
pub mod store;
pub mod workers;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use claims::{FINALIZER_CLEANUP, LABEL_UID};
pub use error::ClusterError;
pub use jobs::{ImageJob, JobRunner, KubeJobs};
pub use reaper::{ReapOutcome, Reaper};
pub use snapshots::{KubeSnapshots, SnapshotStore};
pub use store::{initialize_volume, mutate_volume, release_finalizer, ClaimStore, KubeClaims};
pub use workers::{KubeWorkers, StageWorker, WorkerRunner};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeClaims, FakeJobs, FakeSnapshots, FakeWorkers};
