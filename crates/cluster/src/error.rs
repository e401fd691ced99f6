// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors from orchestrator mediation.
//!
//! `Conflict` is internal: the transition engine retries it and callers only
//! ever see one if the retry budget runs out. Everything else propagates to
//! the RPC layer, which maps it onto a gRPC status.

use sp_core::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object-store request failed for a reason other than 404/409.
    #[error("object store error: {0}")]
    Api(#[source] kube::Error),

    /// Compare-and-set collision that survived the bounded retry loop.
    #[error("compare-and-set conflict persisted past the retry budget")]
    Conflict,

    /// A record referenced by id does not exist (distinct from a conflict).
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The state machine rejected a transition.
    #[error(transparent)]
    State(#[from] StateError),

    /// A persisted annotation does not parse.
    #[error("malformed annotation {key}: {value:?}")]
    Malformed { key: &'static str, value: String },

    /// A dispatched external task ultimately did not succeed.
    #[error("{what} failed: {detail}")]
    External { what: String, detail: String },
}

impl ClusterError {
    /// Map a kube client error, folding 409 into [`ClusterError::Conflict`].
    pub fn from_kube(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 409 => ClusterError::Conflict,
            other => ClusterError::Api(other),
        }
    }

    /// Map a kube client error on a get/lookup path, folding 404 into
    /// [`ClusterError::NotFound`] for the given record.
    pub fn from_kube_lookup(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 404 => {
                ClusterError::NotFound { kind, name: name.to_string() }
            }
            other => ClusterError::from_kube(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}
