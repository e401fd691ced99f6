// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CSI surface: generated protocol types, request vetting, and the mapping
//! from domain errors onto gRPC status codes.

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
pub mod v1 {
    tonic::include_proto!("csi.v1");
}

pub mod controller;
pub mod identity;
pub mod node;

use sp_core::{BackingRef, CapacityError, StateError};
use sp_cluster::ClusterError;
use std::collections::HashMap;
use tonic::Status;
use self::v1::volume_capability::access_mode::Mode;
use self::v1::volume_capability::AccessType;
use self::v1::{CapacityRange, VolumeCapability};

// StorageClass / sidecar parameters on CreateVolume and CreateSnapshot.
pub const PARAM_PVC_NAME: &str = "csi.storage.k8s.io/pvc/name";
pub const PARAM_PVC_NAMESPACE: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PARAM_SNAPSHOT_NAME: &str = "csi.storage.k8s.io/volumesnapshot/name";
pub const PARAM_SNAPSHOT_NAMESPACE: &str = "csi.storage.k8s.io/volumesnapshot/namespace";
pub const PARAM_BACKING_NAME: &str = "backingClaimName";
pub const PARAM_BACKING_NAMESPACE: &str = "backingClaimNamespace";
pub const PARAM_BASE_PATH: &str = "basePath";

// Volume context echoed back to the node RPCs.
pub const CTX_PVC_NAME: &str = "pvcName";
pub const CTX_PVC_NAMESPACE: &str = "pvcNamespace";
pub const CTX_BACKING_NAME: &str = "backingPvcName";
pub const CTX_BACKING_NAMESPACE: &str = "backingPvcNamespace";
pub const CTX_BACKING_BASE_PATH: &str = "backingPvcBasePath";

/// Fetch a required, non-empty string parameter.
pub fn require_param<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, Status> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Status::invalid_argument(format!("missing required parameter {key}")))
}

/// What the vetted capabilities allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessProfile {
    /// True when every requested mode is reader-only.
    pub read_only: bool,
}

fn vet_mode(mode: i32) -> Result<bool, Status> {
    match Mode::try_from(mode) {
        Ok(Mode::SingleNodeWriter)
        | Ok(Mode::SingleNodeSingleWriter)
        | Ok(Mode::SingleNodeMultiWriter) => Ok(false),
        Ok(Mode::SingleNodeReaderOnly) => Ok(true),
        Ok(other) => {
            Err(Status::invalid_argument(format!("unsupported access mode {}", other.as_str_name())))
        }
        Err(_) => Err(Status::invalid_argument(format!("unknown access mode {mode}"))),
    }
}

/// Vet a capability set: raw block only, single-node access modes only.
pub fn vet_capabilities(capabilities: &[VolumeCapability]) -> Result<AccessProfile, Status> {
    if capabilities.is_empty() {
        return Err(Status::invalid_argument("no volume capabilities provided"));
    }
    let mut read_only = true;
    for capability in capabilities {
        match capability.access_type {
            Some(AccessType::Block(_)) => {}
            Some(AccessType::Mount(_)) => {
                return Err(Status::invalid_argument(
                    "only raw block volumes are supported",
                ));
            }
            None => return Err(Status::invalid_argument("missing volume access type")),
        }
        let mode = capability
            .access_mode
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing volume access mode"))?;
        read_only &= vet_mode(mode.mode)?;
    }
    Ok(AccessProfile { read_only })
}

/// Validate the capacity range per the 512-byte sector rules.
pub fn vet_capacity(range: Option<&CapacityRange>) -> Result<u64, Status> {
    let range = range.ok_or_else(|| Status::invalid_argument("missing capacity range"))?;
    sp_core::validate_range(range.required_bytes, range.limit_bytes)
        .map_err(|e: CapacityError| Status::invalid_argument(e.to_string()))
}

/// Volume context carried from CreateVolume to the node RPCs.
pub fn volume_context(
    pvc_name: &str,
    pvc_namespace: &str,
    backing: &BackingRef,
) -> HashMap<String, String> {
    HashMap::from([
        (CTX_PVC_NAME.to_string(), pvc_name.to_string()),
        (CTX_PVC_NAMESPACE.to_string(), pvc_namespace.to_string()),
        (CTX_BACKING_NAME.to_string(), backing.claim.clone()),
        (CTX_BACKING_NAMESPACE.to_string(), backing.namespace.clone()),
        (
            CTX_BACKING_BASE_PATH.to_string(),
            backing.base_path.clone().unwrap_or_default(),
        ),
    ])
}

/// Recover the claim location and backing reference from a volume context.
pub fn parse_volume_context(
    context: &HashMap<String, String>,
) -> Result<(String, String, BackingRef), Status> {
    let pvc_name = require_param(context, CTX_PVC_NAME)?;
    let pvc_namespace = require_param(context, CTX_PVC_NAMESPACE)?;
    let backing = BackingRef::new(
        require_param(context, CTX_BACKING_NAME)?,
        require_param(context, CTX_BACKING_NAMESPACE)?,
    )
    .with_base_path(context.get(CTX_BACKING_BASE_PATH).cloned().unwrap_or_default());
    Ok((pvc_namespace.to_string(), pvc_name.to_string(), backing))
}

/// Map domain errors onto the gRPC taxonomy: busy/deleting volumes are
/// precondition failures the sidecars retry, lookups by id are NOT_FOUND,
/// external-task failures are opaque UNKNOWN, and a conflict that survived
/// the retry budget asks the caller to come back later.
pub fn status_from(err: ClusterError) -> Status {
    match err {
        ClusterError::State(e @ StateError::Busy { .. }) => {
            Status::failed_precondition(e.to_string())
        }
        ClusterError::State(e @ StateError::Deleting) => Status::failed_precondition(e.to_string()),
        ClusterError::State(e @ StateError::Unknown(_)) => Status::unknown(e.to_string()),
        ClusterError::NotFound { kind, name } => Status::not_found(format!("{kind} {name} not found")),
        ClusterError::Conflict => Status::unavailable("object store conflict, retry later"),
        ClusterError::Malformed { .. } => Status::unknown(err.to_string()),
        ClusterError::External { .. } => Status::unknown(err.to_string()),
        ClusterError::Api(_) => Status::internal(err.to_string()),
    }
}

/// Timestamp for snapshot creation times.
pub fn now_timestamp() -> prost_types::Timestamp {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    prost_types::Timestamp { seconds: elapsed.as_secs() as i64, nanos: elapsed.subsec_nanos() as i32 }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
