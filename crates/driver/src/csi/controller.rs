// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CSI controller service: volume and snapshot lifecycle.
//!
//! The flow for every mutating RPC is the same: vet the request, resolve
//! the affected claim/snapshot objects, apply the state transition through
//! the compare-and-set engine, and drive the image protocol. The finalizer
//! always lands before the first image job, so nothing this service does
//! can leak an image past the reaper.

use super::v1::controller_server::Controller;
use super::v1::controller_service_capability::rpc::Type as ControllerCap;
use super::v1::controller_service_capability::Rpc;
use super::v1::volume_content_source::Type as ContentSource;
use super::v1::{
    controller_service_capability, validate_volume_capabilities_response, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerGetCapabilitiesRequest,
    ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerServiceCapability, ControllerUnpublishVolumeRequest,
    ControllerUnpublishVolumeResponse, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest, DeleteSnapshotResponse,
    DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest, GetCapacityResponse,
    ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesRequest, ListVolumesResponse,
    Snapshot, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
};
use crate::csi::{
    now_timestamp, require_param, status_from, vet_capabilities, vet_capacity, volume_context,
    PARAM_BACKING_NAME, PARAM_BACKING_NAMESPACE, PARAM_BASE_PATH, PARAM_PVC_NAME,
    PARAM_PVC_NAMESPACE, PARAM_SNAPSHOT_NAME, PARAM_SNAPSHOT_NAMESPACE,
};
use crate::provision::{LocatedVolume, Provisioner};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use sp_cluster::snapshots::read_snapshot_record;
use sp_cluster::{claims, initialize_volume, ClaimStore, JobRunner, SnapshotStore};
use sp_core::{BackingRef, SnapshotId, VolumeId, VolumeRecord};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct ControllerService {
    claims: Arc<dyn ClaimStore>,
    snapshots: Arc<dyn SnapshotStore>,
    provisioner: Provisioner,
}

impl ControllerService {
    pub fn new(
        claims: Arc<dyn ClaimStore>,
        snapshots: Arc<dyn SnapshotStore>,
        jobs: Arc<dyn JobRunner>,
        image: String,
    ) -> Self {
        let provisioner = Provisioner {
            claims: Arc::clone(&claims),
            snapshots: Arc::clone(&snapshots),
            jobs,
            image,
        };
        Self { claims, snapshots, provisioner }
    }

    /// Resolve a volume by its id (uid label query across namespaces).
    async fn locate_volume(&self, volume_id: &str) -> Result<LocatedVolume, Status> {
        if volume_id.is_empty() {
            return Err(Status::invalid_argument("missing volume id"));
        }
        let claim = self
            .claims
            .find_by_uid(&VolumeId::new(volume_id))
            .await
            .map_err(status_from)?
            .ok_or_else(|| Status::not_found(format!("volume {volume_id} not found")))?;
        located(&claim)
    }
}

fn located(claim: &PersistentVolumeClaim) -> Result<LocatedVolume, Status> {
    let (namespace, name) = claims::locate(claim)
        .ok_or_else(|| Status::internal("claim object has no namespace/name"))?;
    let record = claims::read_record(claim).map_err(status_from)?;
    Ok(LocatedVolume { namespace, name, record })
}

fn backing_from_parameters(
    parameters: &std::collections::HashMap<String, String>,
) -> Result<BackingRef, Status> {
    Ok(BackingRef::new(
        require_param(parameters, PARAM_BACKING_NAME)?,
        require_param(parameters, PARAM_BACKING_NAMESPACE)?,
    )
    .with_base_path(parameters.get(PARAM_BASE_PATH).cloned().unwrap_or_default()))
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let req = request.into_inner();
        vet_capabilities(&req.volume_capabilities)?;
        let requested = vet_capacity(req.capacity_range.as_ref())?;

        let pvc_name = require_param(&req.parameters, PARAM_PVC_NAME)?.to_string();
        let pvc_namespace = require_param(&req.parameters, PARAM_PVC_NAMESPACE)?.to_string();
        let backing = backing_from_parameters(&req.parameters)?;

        let claim =
            self.claims.get(&pvc_namespace, &pvc_name).await.map_err(status_from)?;
        let vid = claim
            .metadata
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .map(VolumeId::new)
            .ok_or_else(|| Status::internal("claim object has no uid"))?;

        // Resolve the content source first: derived volumes never shrink
        // below their ancestor, so the recorded capacity must be known
        // before the claim is initialized.
        let source = req.volume_content_source.as_ref().and_then(|s| s.r#type.as_ref());
        match source {
            None => {
                let volume = VolumeRecord::new(vid.clone(), requested, backing.clone());
                initialize_volume(self.claims.as_ref(), &pvc_namespace, &pvc_name, &volume)
                    .await
                    .map_err(status_from)?;
                self.provisioner.create_blank(&volume).await.map_err(status_from)?;
                respond(volume, &pvc_name, &pvc_namespace, req.volume_content_source)
            }
            Some(ContentSource::Volume(src)) => {
                let source = self.locate_volume(&src.volume_id).await?;
                if source.record.backing != backing {
                    return Err(Status::invalid_argument(
                        "source volume uses a different backing claim",
                    ));
                }
                let capacity = requested.max(source.record.capacity);
                let volume = VolumeRecord::new(vid.clone(), capacity, backing.clone());
                initialize_volume(self.claims.as_ref(), &pvc_namespace, &pvc_name, &volume)
                    .await
                    .map_err(status_from)?;
                self.provisioner
                    .create_from_volume(&volume, &source)
                    .await
                    .map_err(status_from)?;
                respond(volume, &pvc_name, &pvc_namespace, req.volume_content_source)
            }
            Some(ContentSource::Snapshot(src)) => {
                if src.snapshot_id.is_empty() {
                    return Err(Status::invalid_argument("missing snapshot id"));
                }
                let object = self
                    .snapshots
                    .find_by_uid(&SnapshotId::new(src.snapshot_id.as_str()))
                    .await
                    .map_err(status_from)?
                    .ok_or_else(|| {
                        Status::not_found(format!("snapshot {} not found", src.snapshot_id))
                    })?;
                let snapshot = read_snapshot_record(&object).map_err(status_from)?;
                if snapshot.backing != backing {
                    return Err(Status::invalid_argument(
                        "source snapshot uses a different backing claim",
                    ));
                }
                let capacity = requested.max(snapshot.size);
                let volume = VolumeRecord::new(vid.clone(), capacity, backing.clone());
                initialize_volume(self.claims.as_ref(), &pvc_namespace, &pvc_name, &volume)
                    .await
                    .map_err(status_from)?;
                self.provisioner
                    .create_from_snapshot(&volume, &snapshot)
                    .await
                    .map_err(status_from)?;
                respond(volume, &pvc_name, &pvc_namespace, req.volume_content_source)
            }
        }
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        // Image removal and finalizer release belong to the deletion
        // reaper, which triggers on claim deletion rather than on this RPC
        // and also covers claims whose volume handle was lost.
        let req = request.into_inner();
        tracing::debug!(volume_id = %req.volume_id, "delete volume acknowledged, reaper owns cleanup");
        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented("controller publish is not supported"))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented("controller unpublish is not supported"))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let req = request.into_inner();
        self.locate_volume(&req.volume_id).await?;

        let response = match vet_capabilities(&req.volume_capabilities) {
            Ok(_) => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(validate_volume_capabilities_response::Confirmed {
                    volume_context: req.volume_context,
                    volume_capabilities: req.volume_capabilities,
                    parameters: req.parameters,
                }),
                message: String::new(),
            },
            Err(status) => ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: status.message().to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn list_volumes(
        &self,
        _request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        Err(Status::unimplemented("volume listing is not supported"))
    }

    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        Err(Status::unimplemented("capacity reporting is not supported"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        let capabilities = [
            ControllerCap::CreateDeleteVolume,
            ControllerCap::CreateDeleteSnapshot,
            ControllerCap::CloneVolume,
            ControllerCap::ExpandVolume,
            ControllerCap::SingleNodeMultiWriter,
        ]
        .into_iter()
        .map(|cap| ControllerServiceCapability {
            r#type: Some(controller_service_capability::Type::Rpc(Rpc { r#type: cap as i32 })),
        })
        .collect();
        Ok(Response::new(ControllerGetCapabilitiesResponse { capabilities }))
    }

    async fn create_snapshot(
        &self,
        request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        let req = request.into_inner();
        if req.name.is_empty() {
            return Err(Status::invalid_argument("missing snapshot name"));
        }
        let object_name = require_param(&req.parameters, PARAM_SNAPSHOT_NAME)?.to_string();
        let object_namespace =
            require_param(&req.parameters, PARAM_SNAPSHOT_NAMESPACE)?.to_string();

        let source = self.locate_volume(&req.source_volume_id).await?;

        let object =
            self.snapshots.get(&object_namespace, &object_name).await.map_err(status_from)?;
        let sid = object
            .metadata
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .map(SnapshotId::new)
            .ok_or_else(|| Status::internal("snapshot object has no uid"))?;

        let snapshot = self
            .provisioner
            .snapshot(&source, &object_namespace, &object_name, &sid)
            .await
            .map_err(status_from)?;

        Ok(Response::new(CreateSnapshotResponse {
            snapshot: Some(Snapshot {
                size_bytes: snapshot.size as i64,
                snapshot_id: sid.to_string(),
                source_volume_id: req.source_volume_id,
                creation_time: Some(now_timestamp()),
                ready_to_use: true,
            }),
        }))
    }

    async fn delete_snapshot(
        &self,
        request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        // The ancestor image stays: reclaiming unreferenced ancestors is an
        // explicit non-goal, and overlays may still be rooted at it.
        let req = request.into_inner();
        tracing::debug!(snapshot_id = %req.snapshot_id, "delete snapshot acknowledged");
        Ok(Response::new(DeleteSnapshotResponse {}))
    }

    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("snapshot listing is not supported"))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let target = vet_capacity(req.capacity_range.as_ref())?;
        if let Some(capability) = req.volume_capability.as_ref() {
            vet_capabilities(std::slice::from_ref(capability))?;
        }

        let volume = self.locate_volume(&req.volume_id).await?;
        let capacity = self
            .provisioner
            .expand(&volume.namespace, &volume.name, target)
            .await
            .map_err(status_from)?;

        Ok(Response::new(ControllerExpandVolumeResponse {
            capacity_bytes: capacity as i64,
            // The staging worker re-reads the image size on stage; there is
            // no per-node expansion step.
            node_expansion_required: false,
        }))
    }
}

fn respond(
    volume: VolumeRecord,
    pvc_name: &str,
    pvc_namespace: &str,
    content_source: Option<super::v1::VolumeContentSource>,
) -> Result<Response<CreateVolumeResponse>, Status> {
    let context = volume_context(pvc_name, pvc_namespace, &volume.backing);
    Ok(Response::new(CreateVolumeResponse {
        volume: Some(Volume {
            capacity_bytes: volume.capacity as i64,
            volume_id: volume.vid.to_string(),
            volume_context: context,
            content_source,
            accessible_topology: Vec::new(),
        }),
    }))
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
