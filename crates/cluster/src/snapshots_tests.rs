// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::fake::FakeSnapshots;

fn record() -> SnapshotRecord {
    SnapshotRecord::new(
        SnapshotId::new("sid-1"),
        128 << 20,
        BackingRef::new("shared", "storage").with_base_path("vols"),
    )
}

#[tokio::test]
async fn recorded_metadata_round_trips() {
    let store = FakeSnapshots::new();
    store.insert("apps", "snap-1", "sid-1");
    store.record("apps", "snap-1", &record()).await.unwrap();

    let obj = store.get("apps", "snap-1").await.unwrap();
    assert_eq!(read_snapshot_record(&obj).unwrap(), record());
    assert_eq!(
        obj.metadata.labels.as_ref().unwrap()[LABEL_UID],
        "sid-1"
    );
}

#[tokio::test]
async fn find_by_uid_only_sees_recorded_snapshots() {
    let store = FakeSnapshots::new();
    store.insert("apps", "snap-1", "sid-1");
    assert!(store.find_by_uid(&SnapshotId::new("sid-1")).await.unwrap().is_none());

    store.record("apps", "snap-1", &record()).await.unwrap();
    let found = store.find_by_uid(&SnapshotId::new("sid-1")).await.unwrap().unwrap();
    assert_eq!(found.metadata.name.as_deref(), Some("snap-1"));
}

#[test]
fn bare_object_falls_back_to_its_uid_but_lacks_a_size() {
    let store = FakeSnapshots::new();
    store.insert("apps", "snap-1", "sid-1");
    let obj = store.raw("apps", "snap-1").unwrap();

    match read_snapshot_record(&obj) {
        Err(ClusterError::Malformed { key, .. }) => assert_eq!(key, ANN_SIZE),
        other => panic!("expected malformed size, got {other:?}"),
    }
}

#[test]
fn malformed_size_is_rejected() {
    let store = FakeSnapshots::new();
    store.insert("apps", "snap-1", "sid-1");
    let mut obj = store.raw("apps", "snap-1").unwrap();
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANN_SIZE.to_string(), "big".to_string());

    assert!(matches!(
        read_snapshot_record(&obj),
        Err(ClusterError::Malformed { key: ANN_SIZE, .. })
    ));
}

#[test]
fn resource_targets_the_v1_snapshot_api() {
    let ar = volume_snapshot_resource();
    assert_eq!(ar.api_version, "snapshot.storage.k8s.io/v1");
    assert_eq!(ar.plural, "volumesnapshots");
}
