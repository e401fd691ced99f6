// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capacity-range validation.
//!
//! Every RPC that carries a capacity range goes through [`validate_range`]:
//! a non-zero minimum is required, the minimum is rounded up to the next
//! sector multiple, and the rounded value must still satisfy the limit.

use thiserror::Error;

/// Block volumes are sized in multiples of this.
pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("capacity range requires a positive minimum size")]
    MissingMinimum,

    #[error("capacity range minimum {required} exceeds limit {limit}")]
    Inverted { required: u64, limit: u64 },

    #[error("capacity {rounded} (minimum rounded up to a {SECTOR_SIZE}-byte multiple) exceeds limit {limit}")]
    Unsatisfiable { rounded: u64, limit: u64 },
}

/// Round `bytes` up to the next multiple of [`SECTOR_SIZE`].
pub fn round_up_to_sector(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

/// Validate a CSI capacity range and return the provisioned size in bytes.
///
/// `required` and `limit` arrive as the proto's int64 fields; zero means
/// unset. A missing limit is unbounded.
pub fn validate_range(required: i64, limit: i64) -> Result<u64, CapacityError> {
    if required <= 0 {
        return Err(CapacityError::MissingMinimum);
    }
    let required = required as u64;
    let limit = if limit <= 0 { None } else { Some(limit as u64) };

    if let Some(limit) = limit {
        if required > limit {
            return Err(CapacityError::Inverted { required, limit });
        }
    }

    let rounded = round_up_to_sector(required);
    if let Some(limit) = limit {
        if rounded > limit {
            return Err(CapacityError::Unsatisfiable { rounded, limit });
        }
    }
    Ok(rounded)
}

#[cfg(test)]
#[path = "capacity_tests.rs"]
mod tests;
