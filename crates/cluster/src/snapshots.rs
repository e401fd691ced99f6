// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot records as VolumeSnapshot metadata.
//!
//! `snapshot.storage.k8s.io/v1` has no typed binding in k8s-openapi, so the
//! snapshot object is handled as a `DynamicObject` with an explicit
//! `ApiResource`. Only metadata is touched; the spec belongs to the
//! snapshotter sidecar.

use crate::claims::{ANN_BACKING_BASE_PATH, ANN_BACKING_NAME, ANN_BACKING_NAMESPACE, ANN_UID, LABEL_UID};
use crate::error::ClusterError;
use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use sp_core::{BackingRef, SnapshotId, SnapshotRecord};
use std::collections::BTreeMap;

pub const ANN_SIZE: &str = "subprovisioner.gitlab.io/size";

/// VolumeSnapshot API resource for snapshot.storage.k8s.io/v1.
pub fn volume_snapshot_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.storage.k8s.io".to_string(),
        version: "v1".to_string(),
        api_version: "snapshot.storage.k8s.io/v1".to_string(),
        kind: "VolumeSnapshot".to_string(),
        plural: "volumesnapshots".to_string(),
    }
}

/// Labels + annotations that serialize a [`SnapshotRecord`].
pub fn snapshot_metadata(
    record: &SnapshotRecord,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_UID.to_string(), record.sid.to_string());

    let mut annotations = BTreeMap::new();
    annotations.insert(ANN_UID.to_string(), record.sid.to_string());
    annotations.insert(ANN_SIZE.to_string(), record.size.to_string());
    annotations.insert(ANN_BACKING_NAME.to_string(), record.backing.claim.clone());
    annotations.insert(ANN_BACKING_NAMESPACE.to_string(), record.backing.namespace.clone());
    annotations.insert(
        ANN_BACKING_BASE_PATH.to_string(),
        record.backing.base_path.clone().unwrap_or_default(),
    );
    (labels, annotations)
}

/// Parse the snapshot record off a snapshot object's metadata.
pub fn read_snapshot_record(obj: &DynamicObject) -> Result<SnapshotRecord, ClusterError> {
    let annotations = obj.metadata.annotations.clone().unwrap_or_default();
    let get = |key: &'static str| -> Result<String, ClusterError> {
        annotations
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(ClusterError::Malformed { key, value: String::new() })
    };

    let sid = annotations
        .get(ANN_UID)
        .cloned()
        .or_else(|| obj.metadata.uid.clone())
        .filter(|v| !v.is_empty())
        .map(SnapshotId::new)
        .ok_or(ClusterError::Malformed { key: ANN_UID, value: String::new() })?;

    let size_raw = get(ANN_SIZE)?;
    let size = size_raw
        .parse::<u64>()
        .map_err(|_| ClusterError::Malformed { key: ANN_SIZE, value: size_raw })?;

    let backing = BackingRef::new(get(ANN_BACKING_NAME)?, get(ANN_BACKING_NAMESPACE)?)
        .with_base_path(annotations.get(ANN_BACKING_BASE_PATH).cloned().unwrap_or_default());

    Ok(SnapshotRecord { sid, size, backing })
}

/// Narrow seam over the orchestrator's snapshot objects.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClusterError>;

    /// Look a snapshot up by its uid label, across all namespaces.
    async fn find_by_uid(&self, sid: &SnapshotId) -> Result<Option<DynamicObject>, ClusterError>;

    /// Merge-patch the record's labels and annotations onto the object.
    async fn record(
        &self,
        namespace: &str,
        name: &str,
        record: &SnapshotRecord,
    ) -> Result<(), ClusterError>;
}

/// Kubernetes-backed [`SnapshotStore`].
#[derive(Clone)]
pub struct KubeSnapshots {
    client: Client,
    resource: ApiResource,
}

impl KubeSnapshots {
    pub fn new(client: Client) -> Self {
        Self { client, resource: volume_snapshot_resource() }
    }

    fn namespaced(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl SnapshotStore for KubeSnapshots {
    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClusterError> {
        self.namespaced(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube_lookup(e, "snapshot", name))
    }

    async fn find_by_uid(&self, sid: &SnapshotId) -> Result<Option<DynamicObject>, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let selector = format!("{LABEL_UID}={sid}");
        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(list.items.into_iter().next())
    }

    async fn record(
        &self,
        namespace: &str,
        name: &str,
        record: &SnapshotRecord,
    ) -> Result<(), ClusterError> {
        let (labels, annotations) = snapshot_metadata(record);
        let patch = serde_json::json!({
            "metadata": { "labels": labels, "annotations": annotations }
        });
        self.namespaced(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube_lookup(e, "snapshot", name))
    }
}

#[cfg(test)]
#[path = "snapshots_tests.rs"]
mod tests;
