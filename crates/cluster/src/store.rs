// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claim persistence and the compare-and-set transition engine.
//!
//! The `state` annotation is conceptually a lock, implemented with
//! optimistic concurrency: read the claim, mutate the record, write it back
//! with the claim's resource version threaded through, and retry only on a
//! 409 conflict. Any other failure propagates.

use crate::claims;
use crate::error::ClusterError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use sp_core::{StateError, VolumeId, VolumeRecord};
use std::time::Duration;

/// Attempts before a persistent conflict is surfaced to the caller.
const MAX_CONFLICT_RETRIES: u32 = 16;

/// Conflict backoff: 50ms, 100ms, ... capped at one second.
fn conflict_backoff(attempt: u32) -> Duration {
    Duration::from_millis((50 * u64::from(attempt)).min(1_000))
}

/// Narrow seam over the orchestrator's claim objects.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str)
        -> Result<PersistentVolumeClaim, ClusterError>;

    /// Replace the claim, using its resource version for compare-and-set.
    /// Fails with [`ClusterError::Conflict`] when the version is stale.
    async fn update(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError>;

    /// Look a claim up by its uid label, across all namespaces.
    async fn find_by_uid(
        &self,
        vid: &VolumeId,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError>;
}

/// Kubernetes-backed [`ClaimStore`].
#[derive(Clone)]
pub struct KubeClaims {
    client: Client,
}

impl KubeClaims {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClaimStore for KubeClaims {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        self.namespaced(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube_lookup(e, "claim", name))
    }

    async fn update(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        let (namespace, name) = claims::locate(claim).ok_or(ClusterError::NotFound {
            kind: "claim",
            name: String::new(),
        })?;
        self.namespaced(&namespace)
            .replace(&name, &PostParams::default(), claim)
            .await
            .map(|_| ())
            .map_err(ClusterError::from_kube)
    }

    async fn find_by_uid(
        &self,
        vid: &VolumeId,
    ) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let selector = format!("{}={vid}", claims::LABEL_UID);
        let list = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(ClusterError::from_kube)?;
        Ok(list.items.into_iter().next())
    }
}

/// Read-modify-write a volume record with conflict retry.
///
/// `mutate` must be a pure function of the record: it may run several times.
/// When it leaves the record unchanged (an idempotent retry), no write is
/// issued at all, so the resource version stays put.
pub async fn mutate_volume<F>(
    store: &dyn ClaimStore,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<VolumeRecord, ClusterError>
where
    F: Fn(&mut VolumeRecord) -> Result<(), StateError> + Send + Sync,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut claim = store.get(namespace, name).await?;
        let before = claims::read_record(&claim)?;
        let mut record = before.clone();
        mutate(&mut record)?;

        if record == before {
            return Ok(record);
        }

        claims::write_record(&mut claim, &record);
        match store.update(&claim).await {
            Ok(()) => return Ok(record),
            Err(ClusterError::Conflict) => {
                tracing::debug!(namespace, name, attempt, "claim update conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(other) => return Err(other),
        }
    }
    Err(ClusterError::Conflict)
}

/// First write of a volume record: uid label, cleanup finalizer, and the
/// annotation set land in one update, before any image job runs. From that
/// point the claim is reclaimable by the reaper no matter how the creating
/// RPC ends. Idempotent when the claim already carries identical metadata.
pub async fn initialize_volume(
    store: &dyn ClaimStore,
    namespace: &str,
    name: &str,
    record: &VolumeRecord,
) -> Result<(), ClusterError> {
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let claim = store.get(namespace, name).await?;
        if claim.metadata.deletion_timestamp.is_some() {
            return Err(StateError::Deleting.into());
        }
        let mut updated = claim.clone();
        claims::initialize(&mut updated, record);
        if updated == claim {
            return Ok(());
        }
        match store.update(&updated).await {
            Ok(()) => return Ok(()),
            Err(ClusterError::Conflict) => {
                tracing::debug!(namespace, name, attempt, "claim init conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(other) => return Err(other),
        }
    }
    Err(ClusterError::Conflict)
}

/// Drop the cleanup finalizer, with the same conflict-retry discipline.
/// Succeeds if the claim or the finalizer is already gone.
pub async fn release_finalizer(
    store: &dyn ClaimStore,
    namespace: &str,
    name: &str,
) -> Result<(), ClusterError> {
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut claim = match store.get(namespace, name).await {
            Ok(claim) => claim,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if !claims::has_cleanup_finalizer(&claim) {
            return Ok(());
        }
        claims::remove_cleanup_finalizer(&mut claim);
        match store.update(&claim).await {
            Ok(()) => return Ok(()),
            Err(ClusterError::Conflict) => {
                tracing::debug!(namespace, name, attempt, "finalizer release conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(other) => return Err(other),
        }
    }
    Err(ClusterError::Conflict)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
