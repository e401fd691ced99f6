// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::csi::v1::volume_capability::access_mode::Mode;
use crate::csi::v1::volume_capability::{AccessMode, AccessType, BlockVolume};
use crate::csi::v1::VolumeCapability;
use crate::csi::volume_context;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sp_cluster::{FakeClaims, FakeWorkers};
use sp_core::{BackingRef, ExclusiveOp, VolumeId, VolumeRecord, VolumeState};
use tonic::Code;

const VID: &str = "0663e655-9383-42f7-a4c1-3856105cf804";

struct Rig {
    claims: FakeClaims,
    workers: FakeWorkers,
    service: NodeService,
    _dir: tempfile::TempDir,
    staging_path: std::path::PathBuf,
}

fn rig() -> Rig {
    let claims = FakeClaims::new();
    let workers = FakeWorkers::new();
    let service = NodeService::new(
        Arc::new(claims.clone()),
        Arc::new(workers.clone()),
        NodeName::new("node-a"),
        "example.test/subprovisioner:latest".to_string(),
    );
    let dir = tempfile::tempdir().unwrap();
    let staging_path = dir.path().join("volumeDevices/pv-1/dev");
    Rig { claims, workers, service, _dir: dir, staging_path }
}

fn seed(rig: &Rig, record: &VolumeRecord) {
    let mut claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            namespace: Some("apps".to_string()),
            uid: Some(record.vid.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    sp_cluster::claims::initialize(&mut claim, record);
    rig.claims.insert(claim);
}

fn record() -> VolumeRecord {
    VolumeRecord::new(VolumeId::new(VID), 128 << 20, BackingRef::new("shared", "storage"))
}

fn block_capability(mode: Mode) -> VolumeCapability {
    VolumeCapability {
        access_type: Some(AccessType::Block(BlockVolume {})),
        access_mode: Some(AccessMode { mode: mode as i32 }),
    }
}

fn stage_request(rig: &Rig, mode: Mode) -> NodeStageVolumeRequest {
    NodeStageVolumeRequest {
        volume_id: VID.to_string(),
        staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
        volume_capability: Some(block_capability(mode)),
        volume_context: volume_context("data", "apps", &BackingRef::new("shared", "storage")),
        ..Default::default()
    }
}

fn place_device(rig: &Rig) {
    std::fs::create_dir_all(rig.staging_path.parent().unwrap()).unwrap();
    std::fs::write(&rig.staging_path, b"").unwrap();
}

fn stored_record(rig: &Rig) -> VolumeRecord {
    sp_cluster::claims::read_record(&rig.claims.raw("apps", "data").unwrap()).unwrap()
}

#[tokio::test]
async fn stage_transitions_launches_and_waits_for_the_device() {
    let rig = rig();
    seed(&rig, &record());
    place_device(&rig); // worker output already present

    rig.service
        .node_stage_volume(Request::new(stage_request(&rig, Mode::SingleNodeWriter)))
        .await
        .unwrap();

    let stored = stored_record(&rig);
    assert_eq!(stored.state, VolumeState::Staged);
    assert!(stored.staged_on.contains("node-a"));

    let launched = rig.workers.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].name, sp_core::names::stage_worker(&VolumeId::new(VID), &NodeName::new("node-a")));
    assert_eq!(launched[0].image_path, format!("/var/backing/pvc-{VID}.qcow2"));
    assert!(launched[0].writable);
    assert_eq!(launched[0].node, NodeName::new("node-a"));
}

#[tokio::test]
async fn stage_is_idempotent_per_node() {
    let rig = rig();
    seed(&rig, &record());
    place_device(&rig);

    let req = stage_request(&rig, Mode::SingleNodeWriter);
    rig.service.node_stage_volume(Request::new(req.clone())).await.unwrap();
    rig.service.node_stage_volume(Request::new(req)).await.unwrap();

    let stored = stored_record(&rig);
    assert_eq!(stored.staged_on.len(), 1);
    // Dispatch tolerates the existing worker; both launches name the same one.
    let launched = rig.workers.launched();
    assert_eq!(launched[0], launched[1]);
}

#[tokio::test]
async fn readonly_mode_stages_a_readonly_export() {
    let rig = rig();
    seed(&rig, &record());
    place_device(&rig);

    rig.service
        .node_stage_volume(Request::new(stage_request(&rig, Mode::SingleNodeReaderOnly)))
        .await
        .unwrap();
    assert!(!rig.workers.launched()[0].writable);
}

#[tokio::test]
async fn stage_rejects_a_busy_volume() {
    let rig = rig();
    let mut rec = record();
    rec.begin(ExclusiveOp::Expand).unwrap();
    seed(&rig, &rec);

    let err = rig
        .service
        .node_stage_volume(Request::new(stage_request(&rig, Mode::SingleNodeWriter)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(err.message(), "volume is being expanded");
    assert!(rig.workers.launched().is_empty());
}

#[tokio::test]
async fn stage_rejects_a_mismatched_volume_id() {
    let rig = rig();
    seed(&rig, &record());

    let mut req = stage_request(&rig, Mode::SingleNodeWriter);
    req.volume_id = "someone-else".to_string();
    let err = rig.service.node_stage_volume(Request::new(req)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn unstage_deletes_the_worker_and_reverts_to_idle() {
    let rig = rig();
    let mut rec = record();
    rec.stage_on(&NodeName::new("node-a")).unwrap();
    seed(&rig, &rec);
    place_device(&rig);

    rig.service
        .node_unstage_volume(Request::new(NodeUnstageVolumeRequest {
            volume_id: VID.to_string(),
            staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
        }))
        .await
        .unwrap();

    let stored = stored_record(&rig);
    assert_eq!(stored.state, VolumeState::Idle);
    assert!(stored.staged_on.is_empty());
    assert!(!rig.staging_path.exists());

    let deletions = rig.workers.deletions();
    assert_eq!(deletions.len(), 1);
    assert_eq!(deletions[0].0, "storage");
}

#[tokio::test]
async fn unstage_keeps_the_volume_staged_for_other_nodes() {
    let rig = rig();
    let mut rec = record();
    rec.stage_on(&NodeName::new("node-a")).unwrap();
    rec.stage_on(&NodeName::new("node-b")).unwrap();
    seed(&rig, &rec);

    rig.service
        .node_unstage_volume(Request::new(NodeUnstageVolumeRequest {
            volume_id: VID.to_string(),
            staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
        }))
        .await
        .unwrap();

    let stored = stored_record(&rig);
    assert_eq!(stored.state, VolumeState::Staged);
    assert_eq!(stored.staged_on_annotation().as_deref(), Some("node-b"));
}

#[tokio::test]
async fn unstage_is_idempotent_and_tolerates_a_missing_claim() {
    let rig = rig();
    seed(&rig, &record()); // never staged

    let request = NodeUnstageVolumeRequest {
        volume_id: VID.to_string(),
        staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
    };
    rig.service.node_unstage_volume(Request::new(request.clone())).await.unwrap();

    // Unknown volume entirely.
    let request = NodeUnstageVolumeRequest { volume_id: "ghost".to_string(), ..request };
    rig.service.node_unstage_volume(Request::new(request)).await.unwrap();
}

#[tokio::test]
async fn publish_links_the_staging_path_and_readonly_drops_write_bits() {
    use std::os::unix::fs::PermissionsExt;

    let rig = rig();
    place_device(&rig);
    let target = rig._dir.path().join("pods/pod-1/volumeDevices/dev");

    rig.service
        .node_publish_volume(Request::new(NodePublishVolumeRequest {
            volume_id: VID.to_string(),
            staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
            target_path: target.to_string_lossy().into_owned(),
            volume_capability: Some(block_capability(Mode::SingleNodeWriter)),
            readonly: false,
            ..Default::default()
        }))
        .await
        .unwrap();

    assert_eq!(std::fs::read_link(&target).unwrap(), rig.staging_path);

    // Republish read-only: the link is replaced and the staged node loses
    // its write bits.
    rig.service
        .node_publish_volume(Request::new(NodePublishVolumeRequest {
            volume_id: VID.to_string(),
            staging_target_path: rig.staging_path.to_string_lossy().into_owned(),
            target_path: target.to_string_lossy().into_owned(),
            volume_capability: Some(block_capability(Mode::SingleNodeWriter)),
            readonly: true,
            ..Default::default()
        }))
        .await
        .unwrap();

    let mode = std::fs::metadata(&rig.staging_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o222, 0);

    // Unpublish removes the link but not the staged device.
    rig.service
        .node_unpublish_volume(Request::new(NodeUnpublishVolumeRequest {
            volume_id: VID.to_string(),
            target_path: target.to_string_lossy().into_owned(),
        }))
        .await
        .unwrap();
    assert!(!target.exists());
    assert!(rig.staging_path.exists());

    // Idempotent.
    rig.service
        .node_unpublish_volume(Request::new(NodeUnpublishVolumeRequest {
            volume_id: VID.to_string(),
            target_path: target.to_string_lossy().into_owned(),
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn node_info_and_capabilities() {
    let rig = rig();
    let info = rig
        .service
        .node_get_info(Request::new(NodeGetInfoRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.node_id, "node-a");

    let caps = rig
        .service
        .node_get_capabilities(Request::new(NodeGetCapabilitiesRequest {}))
        .await
        .unwrap()
        .into_inner();
    let advertised: Vec<i32> = caps
        .capabilities
        .iter()
        .filter_map(|c| match &c.r#type {
            Some(node_service_capability::Type::Rpc(rpc)) => Some(rpc.r#type),
            None => None,
        })
        .collect();
    assert_eq!(
        advertised,
        vec![NodeCap::StageUnstageVolume as i32, NodeCap::SingleNodeMultiWriter as i32]
    );
}
