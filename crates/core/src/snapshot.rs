// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-snapshot record.

use crate::backing::BackingRef;
use crate::id::SnapshotId;
use serde::{Deserialize, Serialize};

/// Parsed form of the annotations mirrored on the orchestrator's snapshot
/// object. A snapshot owns one read-only ancestor image and never changes
/// after the creating job completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub sid: SnapshotId,
    /// Size of the source volume at snapshot time, in bytes.
    pub size: u64,
    pub backing: BackingRef,
}

impl SnapshotRecord {
    pub fn new(sid: SnapshotId, size: u64, backing: BackingRef) -> Self {
        Self { sid, size, backing }
    }
}
