// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The image protocols: orchestration of state transitions and image jobs.
//!
//! Every protocol follows the same choreography: transition the affected
//! volume, dispatch a deterministically-named job, await its success, and
//! transition back. Failures leave the state in place — the job keeps
//! retrying inside the orchestrator, and a retried RPC re-enters the
//! protocol idempotently (begin tolerates the state it set, dispatch
//! tolerates an existing job).

use sp_cluster::{mutate_volume, ClaimStore, ClusterError, ImageJob, JobRunner, SnapshotStore};
use sp_core::{names, scripts, ExclusiveOp, SnapshotId, SnapshotRecord, VolumeRecord};
use std::sync::Arc;

/// Location of a claim object plus its parsed record.
#[derive(Debug, Clone)]
pub struct LocatedVolume {
    pub namespace: String,
    pub name: String,
    pub record: VolumeRecord,
}

pub struct Provisioner {
    pub claims: Arc<dyn ClaimStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub jobs: Arc<dyn JobRunner>,
    /// Driver image used for every image job.
    pub image: String,
}

impl Provisioner {
    fn job(&self, name: String, record: &VolumeRecord, script: String) -> ImageJob {
        ImageJob {
            name,
            uid: record.vid.to_string(),
            backing: record.backing.clone(),
            image: self.image.clone(),
            script,
        }
    }

    /// Create-from-nothing: a single job creating an empty overlay.
    pub async fn create_blank(&self, volume: &VolumeRecord) -> Result<(), ClusterError> {
        let path = volume.backing.image_path(&names::volume_image(&volume.vid));
        let job = self.job(
            names::create_job(&volume.vid),
            volume,
            scripts::create_blank(&path, volume.capacity),
        );
        self.jobs.run_to_success(&job).await
    }

    /// Create-from-volume: pin the source in `cloning`, run the rebase
    /// dance, and release the source. The source is only released after the
    /// job succeeds; a failed attempt stays resumable through RPC retry.
    pub async fn create_from_volume(
        &self,
        volume: &VolumeRecord,
        source: &LocatedVolume,
    ) -> Result<(), ClusterError> {
        mutate_volume(self.claims.as_ref(), &source.namespace, &source.name, |r| {
            r.begin(ExclusiveOp::Clone)
        })
        .await?;
        tracing::info!(src = %source.record.vid, dst = %volume.vid, "cloning volume");

        let src_path =
            source.record.backing.image_path(&names::volume_image(&source.record.vid));
        let ancestor_path = source
            .record
            .backing
            .image_path(&names::clone_ancestor_image(&source.record.vid, &volume.vid));
        let dst_path = volume.backing.image_path(&names::volume_image(&volume.vid));

        let job = self.job(
            names::create_job(&volume.vid),
            volume,
            scripts::clone_volume(&src_path, &ancestor_path, &dst_path, volume.capacity),
        );
        self.jobs.run_to_success(&job).await?;

        mutate_volume(self.claims.as_ref(), &source.namespace, &source.name, |r| {
            r.finish(ExclusiveOp::Clone)
        })
        .await?;
        Ok(())
    }

    /// Create-from-snapshot: a single job rooting the new overlay at the
    /// read-only snapshot ancestor.
    pub async fn create_from_snapshot(
        &self,
        volume: &VolumeRecord,
        snapshot: &SnapshotRecord,
    ) -> Result<(), ClusterError> {
        let snap_path = snapshot.backing.image_path(&names::snapshot_image(&snapshot.sid));
        let dst_path = volume.backing.image_path(&names::volume_image(&volume.vid));
        let job = self.job(
            names::create_job(&volume.vid),
            volume,
            scripts::create_from_snapshot(&snap_path, &dst_path, volume.capacity),
        );
        self.jobs.run_to_success(&job).await
    }

    /// Expand to `target` bytes. Returns the resulting capacity. A retry
    /// against an already-large-enough volume succeeds with the current
    /// capacity and no state transition at all.
    pub async fn expand(
        &self,
        namespace: &str,
        name: &str,
        target: u64,
    ) -> Result<u64, ClusterError> {
        let record = mutate_volume(self.claims.as_ref(), namespace, name, |r| {
            if r.capacity >= target {
                return Ok(());
            }
            r.begin(ExclusiveOp::Expand)
        })
        .await?;
        if record.capacity >= target {
            return Ok(record.capacity);
        }
        tracing::info!(vid = %record.vid, from = record.capacity, to = target, "expanding volume");

        let path = record.backing.image_path(&names::volume_image(&record.vid));
        let job = self.job(
            names::expand_job(&record.vid),
            &record,
            scripts::expand_volume(&path, target),
        );
        self.jobs.run_to_success(&job).await?;
        self.jobs.delete(&record.backing.namespace, &job.name).await?;

        // Capacity and state go back in one write.
        mutate_volume(self.claims.as_ref(), namespace, name, |r| {
            r.finish(ExclusiveOp::Expand)?;
            r.capacity = r.capacity.max(target);
            Ok(())
        })
        .await?;
        Ok(target)
    }

    /// Snapshot protocol: pin the source, record the snapshot object, run
    /// the rebase job, clean the job up, release the source.
    pub async fn snapshot(
        &self,
        source: &LocatedVolume,
        snapshot_namespace: &str,
        snapshot_name: &str,
        sid: &SnapshotId,
    ) -> Result<SnapshotRecord, ClusterError> {
        let source_record =
            mutate_volume(self.claims.as_ref(), &source.namespace, &source.name, |r| {
                r.begin(ExclusiveOp::Snapshot)
            })
            .await?;
        tracing::info!(vid = %source_record.vid, sid = %sid, "snapshotting volume");

        let record = SnapshotRecord::new(
            sid.clone(),
            source_record.capacity,
            source_record.backing.clone(),
        );
        self.snapshots.record(snapshot_namespace, snapshot_name, &record).await?;

        let src_path =
            source_record.backing.image_path(&names::volume_image(&source_record.vid));
        let snap_path = source_record.backing.image_path(&names::snapshot_image(sid));
        let job = ImageJob {
            name: names::snapshot_job(sid),
            uid: sid.to_string(),
            backing: source_record.backing.clone(),
            image: self.image.clone(),
            script: scripts::snapshot_volume(&src_path, &snap_path),
        };
        self.jobs.run_to_success(&job).await?;
        self.jobs.delete(&record.backing.namespace, &job.name).await?;

        mutate_volume(self.claims.as_ref(), &source.namespace, &source.name, |r| {
            r.finish(ExclusiveOp::Snapshot)
        })
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
