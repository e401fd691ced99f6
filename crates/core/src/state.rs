// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Volume state annotation values and transition errors.
//!
//! A volume's mutually-exclusive operations are serialized by a single
//! `state` annotation on the claim object. The values here are the wire
//! strings written into that annotation; [`crate::volume::VolumeRecord`]
//! holds the transition rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Value of the `state` annotation. A missing annotation means [`Idle`].
///
/// [`Idle`]: VolumeState::Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Idle,
    Expanding,
    Cloning,
    Snapshotting,
    Staged,
}

impl VolumeState {
    /// Wire string written into the annotation, or `None` for idle (the
    /// annotation is cleared rather than written as "idle").
    pub fn annotation_value(self) -> Option<&'static str> {
        match self {
            VolumeState::Idle => None,
            VolumeState::Expanding => Some("expanding"),
            VolumeState::Cloning => Some("cloning"),
            VolumeState::Snapshotting => Some("snapshotting"),
            VolumeState::Staged => Some("staged"),
        }
    }

    /// Progressive verb used in operator-facing error messages.
    fn busy_verb(self) -> &'static str {
        match self {
            VolumeState::Idle => "idle",
            VolumeState::Expanding => "expanded",
            VolumeState::Cloning => "cloned",
            VolumeState::Snapshotting => "snapshotted",
            VolumeState::Staged => "staged",
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.annotation_value().unwrap_or("idle"))
    }
}

impl FromStr for VolumeState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "idle" => Ok(VolumeState::Idle),
            "expanding" => Ok(VolumeState::Expanding),
            "cloning" => Ok(VolumeState::Cloning),
            "snapshotting" => Ok(VolumeState::Snapshotting),
            "staged" => Ok(VolumeState::Staged),
            other => Err(StateError::Unknown(other.to_string())),
        }
    }
}

/// One of the mutually-exclusive long-running operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveOp {
    Expand,
    Clone,
    Snapshot,
}

impl ExclusiveOp {
    pub fn state(self) -> VolumeState {
        match self {
            ExclusiveOp::Expand => VolumeState::Expanding,
            ExclusiveOp::Clone => VolumeState::Cloning,
            ExclusiveOp::Snapshot => VolumeState::Snapshotting,
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The volume holds a conflicting state; the caller should retry later.
    #[error("volume is being {}", .current.busy_verb())]
    Busy { current: VolumeState },

    /// The claim is marked for deletion; no new operation may start.
    #[error("volume is being deleted")]
    Deleting,

    /// Unparseable state annotation on the claim.
    #[error("unknown volume state {0:?}")]
    Unknown(String),
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
