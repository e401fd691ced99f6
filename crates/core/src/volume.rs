// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-volume record and its transition rules.
//!
//! A `VolumeRecord` is the parsed form of the labels, annotations, and
//! finalizer mirrored on the claim object. Transitions mutate the record in
//! memory; `sp-cluster` persists the result with compare-and-set and retries
//! on conflict, so these methods are the single place the exclusion rules
//! live.
//!
//! Transition map:
//!
//! ```text
//! idle ↔ expanding | cloning | snapshotting      (begin / finish)
//! idle | staged → staged → idle                  (stage_on / unstage_from,
//!                                                 staged_on tracks multiplicity)
//! ```
//!
//! `begin` and `stage_on` reject a claim marked for deletion; `finish` and
//! `unstage_from` stay tolerant so an operation that already started can
//! always complete and the reaper's idle precondition is eventually
//! reachable.

use crate::backing::BackingRef;
use crate::id::{NodeName, VolumeId};
use crate::state::{ExclusiveOp, StateError, VolumeState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub vid: VolumeId,
    /// Provisioned size in bytes, always a multiple of 512. Never decreases.
    pub capacity: u64,
    pub backing: BackingRef,
    pub state: VolumeState,
    /// Nodes currently staging this volume. Non-empty iff `state` is
    /// [`VolumeState::Staged`].
    pub staged_on: BTreeSet<NodeName>,
    /// Mirrors the claim's deletion timestamp.
    pub deletion_pending: bool,
}

impl VolumeRecord {
    pub fn new(vid: VolumeId, capacity: u64, backing: BackingRef) -> Self {
        Self {
            vid,
            capacity,
            backing,
            state: VolumeState::Idle,
            staged_on: BTreeSet::new(),
            deletion_pending: false,
        }
    }

    /// Start an exclusive operation. Idempotent when the operation is
    /// already in flight.
    pub fn begin(&mut self, op: ExclusiveOp) -> Result<(), StateError> {
        if self.deletion_pending {
            return Err(StateError::Deleting);
        }
        match self.state {
            VolumeState::Idle => {
                self.state = op.state();
                Ok(())
            }
            current if current == op.state() => Ok(()),
            current => Err(StateError::Busy { current }),
        }
    }

    /// Complete an exclusive operation, returning the volume to idle.
    /// Idempotent when already idle; tolerant of a pending deletion.
    pub fn finish(&mut self, op: ExclusiveOp) -> Result<(), StateError> {
        match self.state {
            VolumeState::Idle => Ok(()),
            current if current == op.state() => {
                self.state = VolumeState::Idle;
                Ok(())
            }
            current => Err(StateError::Busy { current }),
        }
    }

    /// Add a node to the staged set. Accepts idle or already-staged volumes;
    /// re-staging from the same node is idempotent.
    pub fn stage_on(&mut self, node: &NodeName) -> Result<(), StateError> {
        if self.deletion_pending {
            return Err(StateError::Deleting);
        }
        match self.state {
            VolumeState::Idle | VolumeState::Staged => {
                self.staged_on.insert(node.clone());
                self.state = VolumeState::Staged;
                Ok(())
            }
            current => Err(StateError::Busy { current }),
        }
    }

    /// Remove a node from the staged set, reverting to idle when the set
    /// becomes empty. Tolerant: unstaging a node that is not staged (or a
    /// volume that is not staged at all) succeeds, and a pending deletion
    /// never blocks the reduction path.
    pub fn unstage_from(&mut self, node: &NodeName) -> Result<(), StateError> {
        if self.state == VolumeState::Staged {
            self.staged_on.remove(node);
            if self.staged_on.is_empty() {
                self.state = VolumeState::Idle;
            }
        }
        Ok(())
    }

    /// True when the reaper may delete the image and release the finalizer.
    pub fn reapable(&self) -> bool {
        self.deletion_pending && self.state == VolumeState::Idle && self.staged_on.is_empty()
    }

    /// Comma-joined `staged-on-nodes` annotation value; `None` when empty
    /// (the annotation is cleared rather than written as "").
    pub fn staged_on_annotation(&self) -> Option<String> {
        if self.staged_on.is_empty() {
            return None;
        }
        let joined: Vec<&str> = self.staged_on.iter().map(|n| n.as_str()).collect();
        Some(joined.join(","))
    }

    /// Parse the comma-joined `staged-on-nodes` annotation value.
    pub fn parse_staged_on(value: &str) -> BTreeSet<NodeName> {
        value.split(',').filter(|s| !s.is_empty()).map(NodeName::new).collect()
    }
}

#[cfg(test)]
#[path = "volume_tests.rs"]
mod tests;
