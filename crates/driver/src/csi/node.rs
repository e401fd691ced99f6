// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CSI node service: staging pipeline and publish plumbing.
//!
//! Staging splits across two actors. This service performs the state
//! transition, launches the pinned staging worker, and waits for the block
//! special file to appear at the staging path; the worker (see
//! [`crate::staging`]) owns the NBD attachment for the lifetime of the
//! staging. Publish is a symlink from the pod-visible path to the staging
//! path.

use super::v1::node_server::Node;
use super::v1::node_service_capability::rpc::Type as NodeCap;
use super::v1::node_service_capability::Rpc;
use super::v1::{
    node_service_capability, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeServiceCapability,
    NodeStageVolumeRequest, NodeStageVolumeResponse, NodeUnpublishVolumeRequest,
    NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest, NodeUnstageVolumeResponse,
};
use crate::csi::{parse_volume_context, status_from, vet_capabilities};
use sp_cluster::{claims, mutate_volume, ClaimStore, StageWorker, WorkerRunner};
use sp_core::{names, NodeName};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tonic::{Request, Response, Status};

/// Cadence for the staged-device appearance poll. The loop is unbounded;
/// cancellation comes from the RPC context being dropped.
const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct NodeService {
    claims: Arc<dyn ClaimStore>,
    workers: Arc<dyn WorkerRunner>,
    node: NodeName,
    /// Driver image for staging workers.
    image: String,
}

impl NodeService {
    pub fn new(
        claims: Arc<dyn ClaimStore>,
        workers: Arc<dyn WorkerRunner>,
        node: NodeName,
        image: String,
    ) -> Self {
        Self { claims, workers, node, image }
    }
}

async fn wait_for_path(path: &Path) {
    loop {
        if tokio::fs::metadata(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
    }
}

async fn remove_if_present(path: &Path) -> Result<(), Status> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Status::internal(format!("failed to remove {}: {e}", path.display()))),
    }
}

/// Clear the write bits on the target (following the publish symlink down
/// to the staged device node).
async fn clear_write_bits(path: &Path) -> Result<(), Status> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Status::internal(format!("failed to stat {}: {e}", path.display())))?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() & !0o222);
    tokio::fs::set_permissions(path, permissions)
        .await
        .map_err(|e| Status::internal(format!("failed to chmod {}: {e}", path.display())))
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.volume_id.is_empty() || req.staging_target_path.is_empty() {
            return Err(Status::invalid_argument("missing volume id or staging path"));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing volume capability"))?;
        let profile = vet_capabilities(std::slice::from_ref(capability))?;
        let (namespace, name, _) = parse_volume_context(&req.volume_context)?;

        let claim = self.claims.get(&namespace, &name).await.map_err(status_from)?;
        let current = claims::read_record(&claim).map_err(status_from)?;
        if current.vid != req.volume_id.as_str() {
            return Err(Status::invalid_argument(format!(
                "volume id {} does not match claim {namespace}/{name}",
                req.volume_id
            )));
        }

        let node = self.node.clone();
        let record = mutate_volume(self.claims.as_ref(), &namespace, &name, move |r| {
            r.stage_on(&node)
        })
        .await
        .map_err(status_from)?;

        let worker = StageWorker {
            name: names::stage_worker(&record.vid, &self.node),
            uid: record.vid.to_string(),
            backing: record.backing.clone(),
            image: self.image.clone(),
            node: self.node.clone(),
            image_path: record.backing.image_path(&names::volume_image(&record.vid)),
            device_path: req.staging_target_path.clone(),
            writable: !profile.read_only,
        };
        self.workers.launch(&worker).await.map_err(status_from)?;

        tracing::info!(vid = %record.vid, path = %req.staging_target_path, "waiting for staged device");
        wait_for_path(Path::new(&req.staging_target_path)).await;
        tracing::info!(vid = %record.vid, "volume staged");
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.volume_id.is_empty() || req.staging_target_path.is_empty() {
            return Err(Status::invalid_argument("missing volume id or staging path"));
        }

        let found = self
            .claims
            .find_by_uid(&sp_core::VolumeId::new(req.volume_id.as_str()))
            .await
            .map_err(status_from)?;
        let Some(claim) = found else {
            // Claim already gone; nothing left to tear down but the path.
            tracing::warn!(volume_id = %req.volume_id, "unstage for unknown volume");
            remove_if_present(Path::new(&req.staging_target_path)).await?;
            return Ok(Response::new(NodeUnstageVolumeResponse {}));
        };

        let (namespace, name) = claims::locate(&claim)
            .ok_or_else(|| Status::internal("claim object has no namespace/name"))?;
        let record = claims::read_record(&claim).map_err(status_from)?;

        // Worker first: the device node must be gone before the claim says
        // the node no longer stages the volume.
        let worker_name = names::stage_worker(&record.vid, &self.node);
        self.workers
            .delete(&record.backing.namespace, &worker_name)
            .await
            .map_err(status_from)?;
        remove_if_present(Path::new(&req.staging_target_path)).await?;

        let node = self.node.clone();
        mutate_volume(self.claims.as_ref(), &namespace, &name, move |r| r.unstage_from(&node))
            .await
            .map_err(status_from)?;

        tracing::info!(vid = %record.vid, node = %self.node, "volume unstaged");
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.staging_target_path.is_empty() || req.target_path.is_empty() {
            return Err(Status::invalid_argument("missing staging or target path"));
        }
        let mut read_only = req.readonly;
        if let Some(capability) = req.volume_capability.as_ref() {
            read_only |= vet_capabilities(std::slice::from_ref(capability))?.read_only;
        }

        let target = Path::new(&req.target_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Status::internal(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        remove_if_present(target).await?;
        tokio::fs::symlink(&req.staging_target_path, target).await.map_err(|e| {
            Status::internal(format!("failed to link {}: {e}", target.display()))
        })?;

        if read_only {
            clear_write_bits(target).await?;
        }

        tracing::info!(volume_id = %req.volume_id, target = %req.target_path, "volume published");
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        if req.target_path.is_empty() {
            return Err(Status::invalid_argument("missing target path"));
        }
        remove_if_present(Path::new(&req.target_path)).await?;
        tracing::info!(volume_id = %req.volume_id, target = %req.target_path, "volume unpublished");
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("volume stats are not supported"))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("expansion happens offline at the controller"))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        let capabilities = [NodeCap::StageUnstageVolume, NodeCap::SingleNodeMultiWriter]
            .into_iter()
            .map(|cap| NodeServiceCapability {
                r#type: Some(node_service_capability::Type::Rpc(Rpc { r#type: cap as i32 })),
            })
            .collect();
        Ok(Response::new(NodeGetCapabilitiesResponse { capabilities }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node.to_string(),
            max_volumes_per_node: crate::staging::nbd::device_count("/dev") as i64,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
