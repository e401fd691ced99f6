// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell payloads for the one-shot image jobs.
//!
//! Jobs retry on failure, so every script must be re-entrant: hard-links are
//! guarded, renames use `mv -f` (atomic replace), and the write-bit clear is
//! idempotent. The overlay dance for clone and snapshot is identical in
//! shape — hard-link the live image to an immutable ancestor name, point a
//! fresh overlay at the ancestor, atomically rename it over the source —
//! differing only in whether a second (destination) overlay is created.

/// `qemu-img create` of an empty overlay of `bytes` at `image`.
pub fn create_blank(image: &str, bytes: u64) -> String {
    format!("qemu-img create -f qcow2 -- '{image}' {bytes}")
}

/// Clone protocol: seal the source behind a shared ancestor and create the
/// destination overlay on top of it.
pub fn clone_volume(source: &str, ancestor: &str, destination: &str, dest_bytes: u64) -> String {
    [
        format!("[ -e '{ancestor}' ] || ln -- '{source}' '{ancestor}'"),
        format!("qemu-img create -f qcow2 -b '{ancestor}' -F qcow2 -- '{destination}' {dest_bytes}"),
        format!("qemu-img create -f qcow2 -b '{ancestor}' -F qcow2 -- '{source}.new'"),
        format!("mv -f -- '{source}.new' '{source}'"),
        format!("chmod a-w -- '{ancestor}'"),
    ]
    .join(" && ")
}

/// Create a volume overlay rooted at an existing snapshot ancestor.
pub fn create_from_snapshot(snapshot: &str, destination: &str, dest_bytes: u64) -> String {
    format!("qemu-img create -f qcow2 -b '{snapshot}' -F qcow2 -- '{destination}' {dest_bytes}")
}

/// Snapshot protocol: same rebase dance as a clone, without a destination.
pub fn snapshot_volume(source: &str, snapshot: &str) -> String {
    [
        format!("[ -e '{snapshot}' ] || ln -- '{source}' '{snapshot}'"),
        format!("qemu-img create -f qcow2 -b '{snapshot}' -F qcow2 -- '{source}.new'"),
        format!("mv -f -- '{source}.new' '{source}'"),
        format!("chmod a-w -- '{snapshot}'"),
    ]
    .join(" && ")
}

/// Grow `image` to `bytes`, but only when it is currently smaller: an
/// expansion RPC may be retried with a target the image has already passed,
/// and `qemu-img resize` would refuse the implied shrink.
pub fn expand_volume(image: &str, bytes: u64) -> String {
    format!(
        "cur=$(qemu-img info --output=json -- '{image}' | \
         sed -n 's/.*\"virtual-size\": \\([0-9]*\\).*/\\1/p' | head -n 1) && \
         if [ \"$cur\" -lt {bytes} ]; then qemu-img resize -f qcow2 -- '{image}' {bytes}; fi"
    )
}

/// Remove the volume image. Ancestor images are left in place.
pub fn delete_image(image: &str) -> String {
    format!("rm -f -- '{image}'")
}

#[cfg(test)]
#[path = "scripts_tests.rs"]
mod tests;
