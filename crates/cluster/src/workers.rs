// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Staging workers: long-running per-(volume, node) tasks.
//!
//! A staging worker must run on the target node (it drives the kernel NBD
//! client) and must outlive node-driver restarts, so it is anchored in a
//! single-replica `apps/v1` ReplicaSet pinned to the node. The worker name
//! is deterministic per (volume, node), making node-stage retries
//! idempotent at dispatch level.

use crate::claims::LABEL_UID;
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use sp_core::backing::BACKING_MOUNT;
use sp_core::{BackingRef, NodeName};
use std::collections::BTreeMap;
use std::time::Duration;

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Label carrying a truncated node-name hash. Label values max out at 63
/// characters, one short of a full SHA-256 hex digest, so the selector uses
/// half the digest; the full digest stays in the object name.
const LABEL_NODE_HASH: &str = "subprovisioner.gitlab.io/node-hash";

/// A staging worker, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWorker {
    /// Deterministic name (see `sp_core::names::stage_worker`).
    pub name: String,
    /// Volume id, stamped into the uid label.
    pub uid: String,
    pub backing: BackingRef,
    /// The driver image; its entrypoint serves the `stage-worker` subcommand.
    pub image: String,
    pub node: NodeName,
    /// In-container path of the overlay image under `/var/backing`.
    pub image_path: String,
    /// Host path at which the worker publishes the block special file.
    pub device_path: String,
    pub writable: bool,
}

impl StageWorker {
    fn labels(&self) -> BTreeMap<String, String> {
        let node_hash = self.name.rsplit("-on-").next().unwrap_or_default();
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "subprovisioner-stage".to_string());
        labels.insert(LABEL_UID.to_string(), self.uid.clone());
        labels.insert(
            LABEL_NODE_HASH.to_string(),
            node_hash.chars().take(32).collect::<String>(),
        );
        labels
    }

    /// Build the single-replica ReplicaSet pinned to the target node.
    pub fn to_replica_set(&self) -> ReplicaSet {
        let labels = self.labels();

        let host_path = |name: &str, path: &str| Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource { path: path.to_string(), type_: None }),
            ..Default::default()
        };
        let mount = |name: &str, path: &str| VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        };

        ReplicaSet {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.backing.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ReplicaSetSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        node_name: Some(self.node.to_string()),
                        containers: vec![Container {
                            name: "stage".to_string(),
                            image: Some(self.image.clone()),
                            args: Some(vec![
                                "stage-worker".to_string(),
                                self.image_path.clone(),
                                self.device_path.clone(),
                                self.writable.to_string(),
                            ]),
                            security_context: Some(SecurityContext {
                                privileged: Some(true),
                                ..Default::default()
                            }),
                            volume_mounts: Some(vec![
                                VolumeMount {
                                    name: "backing".to_string(),
                                    mount_path: BACKING_MOUNT.to_string(),
                                    sub_path: self.backing.base_path.clone(),
                                    ..Default::default()
                                },
                                mount("dev", "/dev"),
                                mount("kubelet-plugins", "/var/lib/kubelet/plugins"),
                                mount("kubelet-pods", "/var/lib/kubelet/pods"),
                            ]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![
                            Volume {
                                name: "backing".to_string(),
                                persistent_volume_claim: Some(
                                    PersistentVolumeClaimVolumeSource {
                                        claim_name: self.backing.claim.clone(),
                                        ..Default::default()
                                    },
                                ),
                                ..Default::default()
                            },
                            host_path("dev", "/dev"),
                            host_path("kubelet-plugins", "/var/lib/kubelet/plugins"),
                            host_path("kubelet-pods", "/var/lib/kubelet/pods"),
                        ]),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Dispatch seam for staging workers.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    /// Create the worker, tolerating one that already exists.
    async fn launch(&self, worker: &StageWorker) -> Result<(), ClusterError>;

    /// Delete the worker and wait for it to be gone. Absent is success.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Kubernetes-backed [`WorkerRunner`].
#[derive(Clone)]
pub struct KubeWorkers {
    client: Client,
}

impl KubeWorkers {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WorkerRunner for KubeWorkers {
    async fn launch(&self, worker: &StageWorker) -> Result<(), ClusterError> {
        let api = self.api(&worker.backing.namespace);
        match api.create(&PostParams::default(), &worker.to_replica_set()).await {
            Ok(_) => {
                tracing::info!(worker = %worker.name, node = %worker.node, "staging worker created");
                Ok(())
            }
            Err(kube::Error::Api(ref ae)) if ae.code == 409 => {
                tracing::debug!(worker = %worker.name, "staging worker already exists");
                Ok(())
            }
            Err(e) => Err(ClusterError::Api(e)),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api = self.api(namespace);
        match api.delete(name, &DeleteParams::foreground()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ref ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(ClusterError::from_kube(e)),
        }

        loop {
            match api.get(name).await {
                Ok(_) => tokio::time::sleep(DELETE_POLL_INTERVAL).await,
                Err(kube::Error::Api(ref ae)) if ae.code == 404 => return Ok(()),
                Err(e) => return Err(ClusterError::from_kube(e)),
            }
        }
    }
}

#[cfg(test)]
#[path = "workers_tests.rs"]
mod tests;
