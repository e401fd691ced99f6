// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NBD plumbing: qemu-nbd export arguments, `/dev/nbd*` enumeration, and
//! the nbd-client attach/query/disconnect commands.

use rand::seq::SliceRandom;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Arguments for the user-space export daemon. The image path goes last.
pub fn export_args(image: &Path, socket: &Path, writable: bool, direct_io: bool) -> Vec<String> {
    let mut args = vec![
        "--format=qcow2".to_string(),
        "--persistent".to_string(),
        format!("--socket={}", socket.display()),
    ];
    if direct_io {
        args.push("--cache=none".to_string());
        args.push("--aio=native".to_string());
    }
    if !writable {
        args.push("--read-only".to_string());
    }
    args.push(image.display().to_string());
    args
}

fn is_nbd_name(name: &str) -> bool {
    name.strip_prefix("nbd")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Number of `/dev/nbd*` device nodes on this host.
pub fn device_count(dev_dir: &str) -> usize {
    let Ok(entries) = std::fs::read_dir(dev_dir) else { return 0 };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| is_nbd_name(&e.file_name().to_string_lossy()))
        .count()
}

/// All `/dev/nbd*` nodes in randomized order. The shuffle spreads
/// concurrent workers across the device space so they rarely contend for
/// the same free device.
pub fn candidate_devices(dev_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dev_dir) else { return Vec::new() };
    let mut devices: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| is_nbd_name(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    devices.shuffle(&mut rand::rng());
    devices
}

/// Ask the kernel whether a device is connected (`nbd-client -c` exits 0
/// when connected, 1 when free).
pub async fn is_connected(device: &Path) -> io::Result<bool> {
    let status = Command::new("nbd-client")
        .arg("-c")
        .arg(device)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

/// Attempt to attach the export behind `socket` to `device`. Racy: a
/// concurrent worker may win the same device, in which case this fails and
/// the caller moves on.
pub async fn attach(socket: &Path, device: &Path) -> io::Result<bool> {
    let status = Command::new("nbd-client")
        .arg("-unix")
        .arg(socket)
        .arg(device)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

pub async fn disconnect(device: &Path) -> io::Result<()> {
    let status = Command::new("nbd-client").arg("-d").arg(device).status().await?;
    if !status.success() {
        return Err(io::Error::other(format!("nbd-client -d {} failed: {status}", device.display())));
    }
    Ok(())
}

/// Device size in bytes, from the sysfs sector count.
pub fn device_size_bytes(sys_block: &Path, device: &Path) -> io::Result<u64> {
    let name = device
        .file_name()
        .ok_or_else(|| io::Error::other(format!("bad device path {}", device.display())))?;
    let raw = std::fs::read_to_string(sys_block.join(name).join("size"))?;
    let sectors: u64 = raw
        .trim()
        .parse()
        .map_err(|e| io::Error::other(format!("bad sector count {raw:?}: {e}")))?;
    Ok(sectors * 512)
}

#[cfg(test)]
#[path = "nbd_tests.rs"]
mod tests;
