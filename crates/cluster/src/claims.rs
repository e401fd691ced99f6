// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Volume records as claim metadata.
//!
//! The claim object is the single source of truth for a volume: its uid
//! label, the `subprovisioner.gitlab.io/*` annotations, and the cleanup
//! finalizer together are the serialized [`VolumeRecord`]. The functions
//! here are pure metadata mapping; persistence and retry live in
//! [`crate::store`].

use crate::error::ClusterError;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use sp_core::{BackingRef, VolumeId, VolumeRecord, VolumeState};
use std::collections::BTreeMap;

pub const LABEL_UID: &str = "subprovisioner.gitlab.io/uid";
pub const FINALIZER_CLEANUP: &str = "subprovisioner.gitlab.io/cleanup";

pub const ANN_UID: &str = "subprovisioner.gitlab.io/uid";
pub const ANN_BACKING_NAME: &str = "subprovisioner.gitlab.io/backing-pvc-name";
pub const ANN_BACKING_NAMESPACE: &str = "subprovisioner.gitlab.io/backing-pvc-namespace";
pub const ANN_BACKING_BASE_PATH: &str = "subprovisioner.gitlab.io/backing-pvc-base-path";
pub const ANN_CAPACITY: &str = "subprovisioner.gitlab.io/capacity";
pub const ANN_STATE: &str = "subprovisioner.gitlab.io/state";
pub const ANN_STAGED_ON: &str = "subprovisioner.gitlab.io/staged-on-nodes";

fn annotation<'a>(claim: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    claim.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str)
}

fn required(claim: &PersistentVolumeClaim, key: &'static str) -> Result<String, ClusterError> {
    annotation(claim, key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ClusterError::Malformed { key, value: String::new() })
}

/// Parse the volume record off a claim's metadata.
pub fn read_record(claim: &PersistentVolumeClaim) -> Result<VolumeRecord, ClusterError> {
    let vid = annotation(claim, ANN_UID)
        .map(str::to_string)
        .or_else(|| claim.metadata.uid.clone())
        .filter(|v| !v.is_empty())
        .map(VolumeId::new)
        .ok_or(ClusterError::Malformed { key: ANN_UID, value: String::new() })?;

    let capacity_raw = required(claim, ANN_CAPACITY)?;
    let capacity = capacity_raw
        .parse::<u64>()
        .map_err(|_| ClusterError::Malformed { key: ANN_CAPACITY, value: capacity_raw })?;

    let backing = BackingRef::new(
        required(claim, ANN_BACKING_NAME)?,
        required(claim, ANN_BACKING_NAMESPACE)?,
    )
    .with_base_path(annotation(claim, ANN_BACKING_BASE_PATH).unwrap_or(""));

    let state_raw = annotation(claim, ANN_STATE).unwrap_or("");
    let state: VolumeState = state_raw
        .parse()
        .map_err(|_| ClusterError::Malformed { key: ANN_STATE, value: state_raw.to_string() })?;

    let staged_on = VolumeRecord::parse_staged_on(annotation(claim, ANN_STAGED_ON).unwrap_or(""));

    Ok(VolumeRecord {
        vid,
        capacity,
        backing,
        state,
        staged_on,
        deletion_pending: claim.metadata.deletion_timestamp.is_some(),
    })
}

/// Write the record back into the claim's annotations. Idle state and an
/// empty staged set clear their annotations rather than writing filler.
pub fn write_record(claim: &mut PersistentVolumeClaim, record: &VolumeRecord) {
    let annotations = claim.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(ANN_UID.to_string(), record.vid.to_string());
    annotations.insert(ANN_CAPACITY.to_string(), record.capacity.to_string());
    annotations.insert(ANN_BACKING_NAME.to_string(), record.backing.claim.clone());
    annotations.insert(ANN_BACKING_NAMESPACE.to_string(), record.backing.namespace.clone());
    annotations.insert(
        ANN_BACKING_BASE_PATH.to_string(),
        record.backing.base_path.clone().unwrap_or_default(),
    );
    match record.state.annotation_value() {
        Some(value) => annotations.insert(ANN_STATE.to_string(), value.to_string()),
        None => annotations.remove(ANN_STATE),
    };
    match record.staged_on_annotation() {
        Some(value) => annotations.insert(ANN_STAGED_ON.to_string(), value),
        None => annotations.remove(ANN_STAGED_ON),
    };
}

/// First-write initialization: uid label, cleanup finalizer, and the full
/// annotation set. Once the finalizer lands, the claim is reclaimable by the
/// reaper no matter how the creating RPC ends.
pub fn initialize(claim: &mut PersistentVolumeClaim, record: &VolumeRecord) {
    claim
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(LABEL_UID.to_string(), record.vid.to_string());

    let finalizers = claim.metadata.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == FINALIZER_CLEANUP) {
        finalizers.push(FINALIZER_CLEANUP.to_string());
    }

    write_record(claim, record);
}

pub fn has_cleanup_finalizer(claim: &PersistentVolumeClaim) -> bool {
    claim
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER_CLEANUP))
}

pub fn remove_cleanup_finalizer(claim: &mut PersistentVolumeClaim) {
    if let Some(finalizers) = claim.metadata.finalizers.as_mut() {
        finalizers.retain(|name| name != FINALIZER_CLEANUP);
    }
}

/// Namespace and name of a claim object, for re-fetching.
pub fn locate(claim: &PersistentVolumeClaim) -> Option<(String, String)> {
    match (&claim.metadata.namespace, &claim.metadata.name) {
        (Some(ns), Some(name)) => Some((ns.clone(), name.clone())),
        _ => None,
    }
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
