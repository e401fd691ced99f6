// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn vid(s: &str) -> VolumeId {
    VolumeId::new(s)
}

#[test]
fn image_names_are_bit_exact() {
    let src = vid("11111111-2222-3333-4444-555555555555");
    let dst = vid("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
    let sid = SnapshotId::new("99999999-8888-7777-6666-555555555555");

    assert_eq!(volume_image(&src), "pvc-11111111-2222-3333-4444-555555555555.qcow2");
    assert_eq!(
        snapshot_image(&sid),
        "snapshot-99999999-8888-7777-6666-555555555555.qcow2"
    );
    assert_eq!(
        clone_ancestor_image(&src, &dst),
        "cloned-11111111-2222-3333-4444-555555555555-to-aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee.qcow2"
    );
}

#[test]
fn job_names_carry_the_record_id() {
    let v = vid("x");
    assert_eq!(create_job(&v), "subprovisioner-create-x");
    assert_eq!(delete_job(&v), "subprovisioner-delete-x");
    assert_eq!(expand_job(&v), "subprovisioner-expand-x");
    assert_eq!(snapshot_job(&SnapshotId::new("s")), "subprovisioner-snapshot-s");
}

#[test]
fn stage_worker_hashes_the_node_name() {
    let name = stage_worker(&vid("v1"), &NodeName::new("node-a"));
    assert_eq!(
        name,
        "subprovisioner-stage-v1-on-66570ff05a2074043084d4aca94293ef067530dde94ff4e92b8d8459253eb779"
    );
}

#[test]
fn stage_worker_is_stable_and_node_scoped() {
    let v = vid("v1");
    let a = stage_worker(&v, &NodeName::new("kind-worker"));
    let b = stage_worker(&v, &NodeName::new("kind-worker"));
    let c = stage_worker(&v, &NodeName::new("kind-worker2"));

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.ends_with("696ae930fbed08677065273f2dd537c0aee286f86158376d1d81ea788a9367f1"));
}

#[test]
fn long_node_names_stay_within_object_name_limits() {
    let node = NodeName::new("n".repeat(4096));
    let name = stage_worker(&vid("0663e655-9383-42f7-a4c1-3856105cf804"), &node);
    assert!(name.len() <= 253, "worker name too long: {}", name.len());
}
