// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic names for images, jobs, and staging workers.
//!
//! Image filenames are part of the on-disk format and must never change.
//! Job and worker names are derived from the affected record so that an RPC
//! retry dispatches the same object and deduplicates naturally.

use crate::id::{NodeName, SnapshotId, VolumeId};
use sha2::{Digest, Sha256};

/// Domain prefix for all labels, annotations, and the cleanup finalizer.
/// Also the CSI plugin name.
pub const DRIVER_DOMAIN: &str = "subprovisioner.gitlab.io";

/// `pvc-<vid>.qcow2` — the volume's own overlay image.
pub fn volume_image(vid: &VolumeId) -> String {
    format!("pvc-{vid}.qcow2")
}

/// `snapshot-<sid>.qcow2` — read-only snapshot ancestor image.
pub fn snapshot_image(sid: &SnapshotId) -> String {
    format!("snapshot-{sid}.qcow2")
}

/// `cloned-<srcvid>-to-<dstvid>.qcow2` — read-only clone ancestor image.
pub fn clone_ancestor_image(src: &VolumeId, dst: &VolumeId) -> String {
    format!("cloned-{src}-to-{dst}.qcow2")
}

pub fn create_job(vid: &VolumeId) -> String {
    format!("subprovisioner-create-{vid}")
}

pub fn delete_job(vid: &VolumeId) -> String {
    format!("subprovisioner-delete-{vid}")
}

pub fn expand_job(vid: &VolumeId) -> String {
    format!("subprovisioner-expand-{vid}")
}

pub fn snapshot_job(sid: &SnapshotId) -> String {
    format!("subprovisioner-snapshot-{sid}")
}

/// `subprovisioner-stage-<vid>-on-<sha256(node)>`.
///
/// The node name is hashed rather than embedded because node names may
/// exceed the orchestrator's object-name length limit, and SHA-256 keeps the
/// mapping collision-free under adversarial node naming.
pub fn stage_worker(vid: &VolumeId, node: &NodeName) -> String {
    let digest = Sha256::digest(node.as_str().as_bytes());
    format!("subprovisioner-stage-{vid}-on-{}", hex::encode(digest))
}

#[cfg(test)]
#[path = "names_tests.rs"]
mod tests;
