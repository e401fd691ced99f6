// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access.

/// Container image used for image jobs and staging workers (the driver's
/// own image; it carries the qemu tooling and this binary). Required for
/// the controller and node processes.
pub fn driver_image() -> Option<String> {
    std::env::var("SUBPROVISIONER_IMAGE").ok().filter(|s| !s.is_empty())
}
