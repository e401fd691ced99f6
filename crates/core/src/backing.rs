// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reference to the shared backing claim every image lives on.

use serde::{Deserialize, Serialize};

/// Canonical mount point of the shared directory inside image jobs and
/// staging workers. The backing claim is mounted here with its base path
/// applied as a sub-path, so in-container image paths never mention it.
pub const BACKING_MOUNT: &str = "/var/backing";

/// Identifies the shared read-write-many claim (and optional sub-path)
/// backing a volume or snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingRef {
    /// Name of the backing claim object.
    pub claim: String,
    /// Namespace of the backing claim. Jobs and staging workers run here,
    /// since a pod can only mount claims from its own namespace.
    pub namespace: String,
    /// Sub-path within the backing claim under which images are kept.
    pub base_path: Option<String>,
}

impl BackingRef {
    pub fn new(claim: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { claim: claim.into(), namespace: namespace.into(), base_path: None }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let base_path = base_path.into();
        self.base_path = if base_path.is_empty() { None } else { Some(base_path) };
        self
    }

    /// In-container path of an image file, e.g. `/var/backing/pvc-<vid>.qcow2`.
    pub fn image_path(&self, file_name: &str) -> String {
        format!("{}/{}", BACKING_MOUNT, file_name)
    }
}

#[cfg(test)]
#[path = "backing_tests.rs"]
mod tests;
