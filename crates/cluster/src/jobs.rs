// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image jobs: one-shot tasks running qemu tooling against the shared
//! directory.
//!
//! The shared directory is only reachable as an orchestrator volume, so all
//! image work is dispatched as a `batch/v1` Job in the backing claim's
//! namespace (a pod can only mount claims from its own namespace). Job
//! names are deterministic per record, which makes dispatch idempotent
//! under RPC retries: creating an already-existing job is success.

use crate::claims::LABEL_UID;
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::wait::{await_condition, Condition};
use kube::Client;
use sp_core::backing::BACKING_MOUNT;
use sp_core::BackingRef;
use std::collections::BTreeMap;
use std::time::Duration;

/// Jobs are retried by the orchestrator until they succeed; this is the
/// "very large" pod-failure budget before a job is marked Failed.
const JOB_BACKOFF_LIMIT: i32 = 6000;

/// Cadence for the synchronous-deletion poll.
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A one-shot image operation, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    /// Deterministic job name (see `sp_core::names`).
    pub name: String,
    /// Record id stamped into the uid label.
    pub uid: String,
    pub backing: BackingRef,
    /// Container image carrying the qemu tooling (the driver image).
    pub image: String,
    /// `sh -c` payload (see `sp_core::scripts`).
    pub script: String,
}

impl ImageJob {
    /// Build the `batch/v1` Job object.
    pub fn to_job(&self) -> Job {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "subprovisioner".to_string());
        labels.insert(LABEL_UID.to_string(), self.uid.clone());

        Job {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.backing.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(JOB_BACKOFF_LIMIT),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        restart_policy: Some("OnFailure".to_string()),
                        containers: vec![Container {
                            name: "image-op".to_string(),
                            image: Some(self.image.clone()),
                            command: Some(vec![
                                "sh".to_string(),
                                "-c".to_string(),
                                self.script.clone(),
                            ]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "backing".to_string(),
                                mount_path: BACKING_MOUNT.to_string(),
                                sub_path: self.backing.base_path.clone(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: "backing".to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: self.backing.claim.clone(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Dispatch seam for image jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Create the job (tolerating one that already exists) and wait until it
    /// succeeds. A terminally failed job surfaces as
    /// [`ClusterError::External`].
    async fn run_to_success(&self, job: &ImageJob) -> Result<(), ClusterError>;

    /// Delete a job and wait for it to be gone. Absent jobs are success.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

/// Kubernetes-backed [`JobRunner`].
#[derive(Clone)]
pub struct KubeJobs {
    client: Client,
}

impl KubeJobs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn job_succeeded(job: &Job) -> bool {
    job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0) > 0
}

fn job_failed(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds.iter().any(|c| c.type_ == "Failed" && c.status == "True")
        })
}

fn job_finished() -> impl Condition<Job> {
    |obj: Option<&Job>| obj.is_some_and(|job| job_succeeded(job) || job_failed(job))
}

#[async_trait]
impl JobRunner for KubeJobs {
    async fn run_to_success(&self, job: &ImageJob) -> Result<(), ClusterError> {
        let api = self.api(&job.backing.namespace);

        match api.create(&PostParams::default(), &job.to_job()).await {
            Ok(_) => {
                tracing::info!(job = %job.name, namespace = %job.backing.namespace, "image job created");
            }
            Err(kube::Error::Api(ref ae)) if ae.code == 409 => {
                tracing::debug!(job = %job.name, "image job already exists, awaiting it");
            }
            Err(e) => return Err(ClusterError::Api(e)),
        }

        let finished = await_condition(api, &job.name, job_finished()).await.map_err(|e| {
            ClusterError::External { what: format!("image job {}", job.name), detail: e.to_string() }
        })?;

        match finished {
            Some(ref observed) if job_succeeded(observed) => Ok(()),
            _ => Err(ClusterError::External {
                what: format!("image job {}", job.name),
                detail: "job did not succeed".to_string(),
            }),
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
#[path = "jobs_tests.rs"]
mod tests;
