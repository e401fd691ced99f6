// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers for volumes, snapshots, and nodes.
//!
//! `VolumeId` and `SnapshotId` are the orchestrator-assigned UIDs of the
//! claim and snapshot objects. The format is opaque to this crate; only
//! stability matters, since every image filename and job name is derived
//! from them.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Stable identifier of a volume, assigned by the orchestrator when the
    /// claim is created (the claim object's UID).
    VolumeId
}

string_id! {
    /// Stable identifier of a snapshot (the snapshot object's UID).
    SnapshotId
}

string_id! {
    /// A cluster node name. May be arbitrarily long; object names derived
    /// from it go through [`crate::names::stage_worker`], which hashes it.
    NodeName
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
