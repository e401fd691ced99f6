// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fake::FakeClaims;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use sp_core::{BackingRef, ExclusiveOp, NodeName, VolumeState};

fn seeded_store() -> FakeClaims {
    let store = FakeClaims::new();
    let mut claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            namespace: Some("apps".to_string()),
            uid: Some("vid-1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let record =
        VolumeRecord::new(VolumeId::new("vid-1"), 128 << 20, BackingRef::new("shared", "storage"));
    claims::initialize(&mut claim, &record);
    store.insert(claim);
    store
}

#[tokio::test]
async fn mutate_applies_and_persists() {
    let store = seeded_store();
    let record = mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Expand))
        .await
        .unwrap();
    assert_eq!(record.state, VolumeState::Expanding);

    let stored = store.raw("apps", "data").unwrap();
    assert_eq!(claims::read_record(&stored).unwrap().state, VolumeState::Expanding);
}

#[tokio::test]
async fn idempotent_mutation_skips_the_write() {
    let store = seeded_store();
    mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Expand)).await.unwrap();
    let version_before = store.raw("apps", "data").unwrap().metadata.resource_version;

    // Same transition again: no-op, no new resource version.
    mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Expand)).await.unwrap();
    let version_after = store.raw("apps", "data").unwrap().metadata.resource_version;
    assert_eq!(version_before, version_after);
}

#[tokio::test]
async fn busy_transition_surfaces_the_state_error() {
    let store = seeded_store();
    mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Clone)).await.unwrap();

    let err = mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Snapshot))
        .await
        .unwrap_err();
    match err {
        ClusterError::State(StateError::Busy { current }) => {
            assert_eq!(current, VolumeState::Cloning)
        }
        other => panic!("expected busy, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_claim_is_not_found() {
    let store = FakeClaims::new();
    let err = mutate_volume(&store, "apps", "ghost", |_| Ok(())).await.unwrap_err();
    assert!(err.is_not_found());
}

/// Store wrapper injecting a fixed number of update conflicts.
struct Flaky {
    inner: FakeClaims,
    conflicts: Mutex<u32>,
}

#[async_trait]
impl ClaimStore for Flaky {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        self.inner.get(namespace, name).await
    }

    async fn update(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        {
            let mut remaining = self.conflicts.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Conflict);
            }
        }
        self.inner.update(claim).await
    }

    async fn find_by_uid(
        &self,
        vid: &VolumeId,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        self.inner.find_by_uid(vid).await
    }
}

#[tokio::test(start_paused = true)]
async fn conflicts_are_retried_until_the_write_lands() {
    let store = Flaky { inner: seeded_store(), conflicts: Mutex::new(3) };
    let record = mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Expand))
        .await
        .unwrap();
    assert_eq!(record.state, VolumeState::Expanding);
    assert_eq!(
        claims::read_record(&store.inner.raw("apps", "data").unwrap()).unwrap().state,
        VolumeState::Expanding
    );
}

#[tokio::test(start_paused = true)]
async fn persistent_conflict_exhausts_the_budget() {
    let store = Flaky { inner: seeded_store(), conflicts: Mutex::new(u32::MAX) };
    let err = mutate_volume(&store, "apps", "data", |r| r.begin(ExclusiveOp::Expand))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Conflict));
}

#[tokio::test]
async fn concurrent_staging_from_two_nodes_merges() {
    let store = std::sync::Arc::new(seeded_store());
    let a = {
        let store = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            mutate_volume(store.as_ref(), "apps", "data", |r| r.stage_on(&NodeName::new("node-a")))
                .await
        })
    };
    let b = {
        let store = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            mutate_volume(store.as_ref(), "apps", "data", |r| r.stage_on(&NodeName::new("node-b")))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let record = claims::read_record(&store.raw("apps", "data").unwrap()).unwrap();
    assert_eq!(record.state, VolumeState::Staged);
    assert_eq!(record.staged_on_annotation().as_deref(), Some("node-a,node-b"));
}

#[tokio::test]
async fn initialize_writes_once_and_is_idempotent() {
    let store = FakeClaims::new();
    let mut claim = PersistentVolumeClaim::default();
    claim.metadata.name = Some("data".to_string());
    claim.metadata.namespace = Some("apps".to_string());
    claim.metadata.uid = Some("vid-1".to_string());
    store.insert(claim);

    let record =
        VolumeRecord::new(VolumeId::new("vid-1"), 128 << 20, BackingRef::new("shared", "storage"));
    initialize_volume(&store, "apps", "data", &record).await.unwrap();

    let stored = store.raw("apps", "data").unwrap();
    assert!(claims::has_cleanup_finalizer(&stored));
    assert_eq!(claims::read_record(&stored).unwrap(), record);

    let version = stored.metadata.resource_version.clone();
    initialize_volume(&store, "apps", "data", &record).await.unwrap();
    assert_eq!(store.raw("apps", "data").unwrap().metadata.resource_version, version);
}

#[tokio::test]
async fn initialize_rejects_a_deleting_claim() {
    let store = seeded_store();
    store.mark_deleting("apps", "data");

    let record =
        VolumeRecord::new(VolumeId::new("vid-1"), 128 << 20, BackingRef::new("shared", "storage"));
    let err = initialize_volume(&store, "apps", "data", &record).await.unwrap_err();
    assert!(matches!(err, ClusterError::State(StateError::Deleting)));
}

#[tokio::test]
async fn release_finalizer_deletes_a_marked_claim() {
    let store = seeded_store();
    store.mark_deleting("apps", "data");

    release_finalizer(&store, "apps", "data").await.unwrap();
    assert!(store.raw("apps", "data").is_none());
}

#[tokio::test]
async fn release_finalizer_tolerates_missing_claims() {
    let store = FakeClaims::new();
    release_finalizer(&store, "apps", "ghost").await.unwrap();
}
