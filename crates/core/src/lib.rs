// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sp-core: domain types for the subprovisioner CSI driver.
//!
//! Everything here is pure data: identifiers, the per-volume state machine,
//! capacity arithmetic, and the deterministic image/job/worker names. The
//! orchestrator-facing plumbing lives in `sp-cluster`.

pub mod backing;
pub mod capacity;
pub mod id;
pub mod names;
pub mod scripts;
pub mod snapshot;
pub mod state;
pub mod volume;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backing::BackingRef;
pub use capacity::{round_up_to_sector, validate_range, CapacityError, SECTOR_SIZE};
pub use id::{NodeName, SnapshotId, VolumeId};
pub use names::DRIVER_DOMAIN;
pub use snapshot::SnapshotRecord;
pub use state::{ExclusiveOp, StateError, VolumeState};
pub use volume::VolumeRecord;
