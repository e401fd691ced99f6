// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The deletion reaper.
//!
//! Watches every claim carrying the driver's uid label and, once a claim is
//! marked for deletion with no node staging it and no operation in flight,
//! deletes the creation job, runs the deletion job, and releases the cleanup
//! finalizer. This is the only code path that removes the finalizer, which
//! is what makes half-created volumes reclaimable: the finalizer lands
//! before the image job runs, so anything holding it is covered here.

use crate::claims;
use crate::error::ClusterError;
use crate::jobs::{ImageJob, JobRunner};
use crate::store::{release_finalizer, ClaimStore};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use parking_lot::Mutex;
use sp_core::{names, scripts};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Claim key in the work queue.
type Key = (String, String);

const MAX_REQUEUE_BACKOFF: Duration = Duration::from_secs(300);

fn requeue_backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(16);
    Duration::from_secs(secs).min(MAX_REQUEUE_BACKOFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Deletion job succeeded and the finalizer was released.
    Released,
    /// Claim still staged, busy, or not yet marked for deletion; the next
    /// claim event re-enqueues it.
    NotReady,
    /// Claim or finalizer already gone.
    Gone,
}

pub struct Reaper {
    store: Arc<dyn ClaimStore>,
    jobs: Arc<dyn JobRunner>,
    /// Driver image used for the deletion job.
    image: String,
}

impl Reaper {
    pub fn new(store: Arc<dyn ClaimStore>, jobs: Arc<dyn JobRunner>, image: String) -> Self {
        Self { store, jobs, image }
    }

    /// Process one dequeued claim. Re-fetches before acting; the informer
    /// view is only a hint.
    pub async fn reap_one(&self, namespace: &str, name: &str) -> Result<ReapOutcome, ClusterError> {
        let claim = match self.store.get(namespace, name).await {
            Ok(claim) => claim,
            Err(e) if e.is_not_found() => return Ok(ReapOutcome::Gone),
            Err(e) => return Err(e),
        };
        if !claims::has_cleanup_finalizer(&claim) {
            return Ok(ReapOutcome::Gone);
        }

        let record = claims::read_record(&claim)?;
        if !record.reapable() {
            tracing::debug!(
                namespace,
                name,
                state = %record.state,
                staged_on = record.staged_on.len(),
                "claim not reapable yet"
            );
            return Ok(ReapOutcome::NotReady);
        }

        self.jobs.delete(&record.backing.namespace, &names::create_job(&record.vid)).await?;

        let image_path = record.backing.image_path(&names::volume_image(&record.vid));
        let deletion = ImageJob {
            name: names::delete_job(&record.vid),
            uid: record.vid.to_string(),
            backing: record.backing.clone(),
            image: self.image.clone(),
            script: scripts::delete_image(&image_path),
        };
        self.jobs.run_to_success(&deletion).await?;
        self.jobs.delete(&record.backing.namespace, &deletion.name).await?;

        release_finalizer(self.store.as_ref(), namespace, name).await?;
        tracing::info!(namespace, name, vid = %record.vid, "volume reaped, finalizer released");
        Ok(ReapOutcome::Released)
    }

    /// Run the informer + worker pool until the process exits.
    pub async fn run(self: Arc<Self>, client: Client, worker_count: usize) {
        let (tx, rx) = mpsc::unbounded_channel::<Key>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let attempts: Arc<Mutex<HashMap<Key, u32>>> = Arc::new(Mutex::new(HashMap::new()));

        for _ in 0..worker_count.max(1) {
            let reaper = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let tx = tx.clone();
            let attempts = Arc::clone(&attempts);
            tokio::spawn(async move {
                loop {
                    let key = { rx.lock().await.recv().await };
                    let Some(key) = key else { return };
                    match reaper.reap_one(&key.0, &key.1).await {
                        Ok(_) => {
                            attempts.lock().remove(&key);
                        }
                        Err(e) => {
                            let attempt = {
                                let mut map = attempts.lock();
                                let n = map.entry(key.clone()).or_insert(0);
                                *n += 1;
                                *n
                            };
                            let delay = requeue_backoff(attempt);
                            tracing::warn!(
                                namespace = %key.0,
                                name = %key.1,
                                error = %e,
                                attempt,
                                delay_secs = delay.as_secs(),
                                "reap failed, re-enqueueing"
                            );
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(key);
                            });
                        }
                    }
                }
            });
        }

        let api: Api<PersistentVolumeClaim> = Api::all(client);
        let stream = watcher(api, watcher::Config::default().labels(claims::LABEL_UID))
            .applied_objects();
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(claim) => {
                    if claim.metadata.deletion_timestamp.is_none() {
                        continue;
                    }
                    if let Some(key) = claims::locate(&claim) {
                        let _ = tx.send(key);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "claim watch error"),
            }
        }
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
