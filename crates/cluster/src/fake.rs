// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store and runner fakes for tests.
//!
//! `FakeClaims` reproduces the object store's compare-and-set semantics:
//! updates must carry the current resource version, stale writers get a
//! conflict, and releasing the last finalizer on a deletion-marked claim
//! deletes the object, as the real API server does.

use crate::claims;
use crate::error::ClusterError;
use crate::jobs::{ImageJob, JobRunner};
use crate::snapshots::{self, SnapshotStore};
use crate::store::ClaimStore;
use crate::workers::{StageWorker, WorkerRunner};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;
use parking_lot::Mutex;
use sp_core::{SnapshotId, SnapshotRecord, VolumeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type Key = (String, String);

fn key_of(claim: &PersistentVolumeClaim) -> Option<Key> {
    claims::locate(claim)
}

#[derive(Default)]
struct ClaimsState {
    claims: HashMap<Key, PersistentVolumeClaim>,
    next_version: u64,
}

/// In-memory [`ClaimStore`] with resource-version conflict semantics.
#[derive(Clone, Default)]
pub struct FakeClaims {
    inner: Arc<Mutex<ClaimsState>>,
}

impl FakeClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a claim, assigning it a resource version.
    pub fn insert(&self, mut claim: PersistentVolumeClaim) {
        let mut state = self.inner.lock();
        state.next_version += 1;
        claim.metadata.resource_version = Some(state.next_version.to_string());
        if let Some(key) = key_of(&claim) {
            state.claims.insert(key, claim);
        }
    }

    /// Set the deletion timestamp, as the orchestrator does on delete.
    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        let mut state = self.inner.lock();
        if let Some(claim) = state.claims.get_mut(&(namespace.to_string(), name.to_string())) {
            claim.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
        }
    }

    /// Current stored object, if any.
    pub fn raw(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.inner.lock().claims.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

#[async_trait]
impl ClaimStore for FakeClaims {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        self.raw(namespace, name)
            .ok_or_else(|| ClusterError::NotFound { kind: "claim", name: name.to_string() })
    }

    async fn update(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        let key = key_of(claim).ok_or(ClusterError::NotFound {
            kind: "claim",
            name: String::new(),
        })?;
        let mut state = self.inner.lock();
        let Some(current) = state.claims.get(&key) else {
            return Err(ClusterError::NotFound { kind: "claim", name: key.1 });
        };
        if current.metadata.resource_version != claim.metadata.resource_version {
            return Err(ClusterError::Conflict);
        }

        let prior_deletion = current.metadata.deletion_timestamp.clone();

        // The API server deletes a deletion-marked object when its last
        // finalizer is removed.
        let finalizers_empty =
            claim.metadata.finalizers.as_ref().map(Vec::len).unwrap_or(0) == 0;
        if prior_deletion.is_some() && finalizers_empty {
            state.claims.remove(&key);
            return Ok(());
        }

        let mut stored = claim.clone();
        // Deletion timestamps are immutable server-side.
        stored.metadata.deletion_timestamp = prior_deletion;
        state.next_version += 1;
        stored.metadata.resource_version = Some(state.next_version.to_string());
        state.claims.insert(key, stored);
        Ok(())
    }

    async fn find_by_uid(
        &self,
        vid: &VolumeId,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        let state = self.inner.lock();
        Ok(state
            .claims
            .values()
            .find(|c| {
                c.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(claims::LABEL_UID))
                    .is_some_and(|uid| uid == vid.as_str())
            })
            .cloned())
    }
}

#[derive(Default)]
struct JobsState {
    runs: Vec<ImageJob>,
    deletions: Vec<Key>,
    failures: HashSet<String>,
}

/// Recording [`JobRunner`]; jobs succeed unless marked to fail.
#[derive(Clone, Default)]
pub struct FakeJobs {
    inner: Arc<Mutex<JobsState>>,
}

impl FakeJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `run_to_success` fail for the named job.
    pub fn fail_job(&self, name: &str) {
        self.inner.lock().failures.insert(name.to_string());
    }

    pub fn runs(&self) -> Vec<ImageJob> {
        self.inner.lock().runs.clone()
    }

    pub fn deletions(&self) -> Vec<Key> {
        self.inner.lock().deletions.clone()
    }
}

#[async_trait]
impl JobRunner for FakeJobs {
    async fn run_to_success(&self, job: &ImageJob) -> Result<(), ClusterError> {
        let mut state = self.inner.lock();
        state.runs.push(job.clone());
        if state.failures.contains(&job.name) {
            return Err(ClusterError::External {
                what: format!("image job {}", job.name),
                detail: "job did not succeed".to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.inner.lock().deletions.push((namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct WorkersState {
    launched: Vec<StageWorker>,
    deletions: Vec<Key>,
}

/// Recording [`WorkerRunner`].
#[derive(Clone, Default)]
pub struct FakeWorkers {
    inner: Arc<Mutex<WorkersState>>,
}

impl FakeWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> Vec<StageWorker> {
        self.inner.lock().launched.clone()
    }

    pub fn deletions(&self) -> Vec<Key> {
        self.inner.lock().deletions.clone()
    }
}

#[async_trait]
impl WorkerRunner for FakeWorkers {
    async fn launch(&self, worker: &StageWorker) -> Result<(), ClusterError> {
        self.inner.lock().launched.push(worker.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.inner.lock().deletions.push((namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// In-memory [`SnapshotStore`].
#[derive(Clone, Default)]
pub struct FakeSnapshots {
    inner: Arc<Mutex<HashMap<Key, DynamicObject>>>,
}

impl FakeSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a bare snapshot object, as created by the snapshotter sidecar.
    pub fn insert(&self, namespace: &str, name: &str, uid: &str) {
        let mut obj = DynamicObject {
            types: Some(kube::core::TypeMeta {
                api_version: "snapshot.storage.k8s.io/v1".to_string(),
                kind: "VolumeSnapshot".to_string(),
            }),
            metadata: Default::default(),
            data: serde_json::json!({}),
        };
        obj.metadata.name = Some(name.to_string());
        obj.metadata.namespace = Some(namespace.to_string());
        obj.metadata.uid = Some(uid.to_string());
        self.inner.lock().insert((namespace.to_string(), name.to_string()), obj);
    }

    pub fn raw(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.inner.lock().get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

#[async_trait]
impl SnapshotStore for FakeSnapshots {
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClusterError> {
        self.raw(namespace, name)
            .ok_or_else(|| ClusterError::NotFound { kind: "snapshot", name: name.to_string() })
    }

    async fn find_by_uid(&self, sid: &SnapshotId) -> Result<Option<DynamicObject>, ClusterError> {
        let state = self.inner.lock();
        Ok(state
            .values()
            .find(|o| {
                o.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(claims::LABEL_UID))
                    .is_some_and(|uid| uid == sid.as_str())
            })
            .cloned())
    }

    async fn record(
        &self,
        namespace: &str,
        name: &str,
        record: &SnapshotRecord,
    ) -> Result<(), ClusterError> {
        let (labels, annotations) = snapshots::snapshot_metadata(record);
        let mut state = self.inner.lock();
        let obj = state
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound { kind: "snapshot", name: name.to_string() })?;
        obj.metadata.labels.get_or_insert_with(Default::default).extend(labels);
        obj.metadata.annotations.get_or_insert_with(Default::default).extend(annotations);
        Ok(())
    }
}
