// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The staging worker runtime.
//!
//! Launched by the node service as a privileged, node-pinned task with the
//! shared directory at `/var/backing` and the kubelet directories from the
//! host. It exports the overlay image over a unix-socket NBD endpoint,
//! binds a free `/dev/nbdX` to it, mirrors the device node to the staging
//! path, and then blocks until terminated, at which point it unwinds in
//! reverse order.

pub mod nbd;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};

/// How long the export daemon gets to create its socket before the launch
/// attempt is abandoned.
const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(10);
const DAEMON_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DAEMON_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("export daemon exited during startup with {0}")]
    DaemonExited(std::process::ExitStatus),

    #[error("export daemon did not create its socket within {DAEMON_START_TIMEOUT:?}")]
    DaemonTimeout,

    #[error("no /dev/nbd* device could be claimed")]
    NoFreeDevice,

    #[error("device {0} reports zero size")]
    EmptyDevice(PathBuf),

    #[error("device node operation failed: {0}")]
    DeviceNode(#[from] nix::Error),
}

/// Arguments of the `stage-worker` subcommand.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Overlay image under `/var/backing`.
    pub image: PathBuf,
    /// Where the block special file must appear (the staging path).
    pub device_out: PathBuf,
    pub writable: bool,
}

pub async fn run(request: StageRequest) -> Result<(), StageError> {
    let socket = std::env::temp_dir().join("subprovisioner-nbd.sock");

    let mut daemon = start_daemon(&request.image, &socket, request.writable).await?;
    let device = acquire_device(&socket).await?;

    let size = nbd::device_size_bytes(Path::new("/sys/block"), &device)?;
    if size == 0 {
        let _ = nbd::disconnect(&device).await;
        return Err(StageError::EmptyDevice(device));
    }

    copy_device_node(&device, &request.device_out, request.writable)?;
    tracing::info!(
        image = %request.image.display(),
        device = %device.display(),
        out = %request.device_out.display(),
        size,
        writable = request.writable,
        "volume exposed as local block device"
    );

    wait_for_termination().await?;

    tracing::info!(device = %device.display(), "tearing down staging");
    if let Err(e) = nbd::disconnect(&device).await {
        tracing::warn!(error = %e, "nbd disconnect failed");
    }
    stop_daemon(&mut daemon).await;
    let _ = std::fs::remove_file(&socket);
    Ok(())
}

/// Start qemu-nbd with direct I/O; if it dies during startup (the backing
/// file system may not support O_DIRECT), start it again without.
async fn start_daemon(image: &Path, socket: &Path, writable: bool) -> Result<Child, StageError> {
    match launch_daemon(image, socket, writable, true).await {
        Ok(child) => Ok(child),
        Err(StageError::DaemonExited(status)) => {
            tracing::info!(%status, "export daemon rejected direct I/O, retrying without");
            launch_daemon(image, socket, writable, false).await
        }
        Err(e) => Err(e),
    }
}

async fn launch_daemon(
    image: &Path,
    socket: &Path,
    writable: bool,
    direct_io: bool,
) -> Result<Child, StageError> {
    let _ = std::fs::remove_file(socket);
    let mut child = Command::new("qemu-nbd")
        .args(nbd::export_args(image, socket, writable, direct_io))
        .kill_on_drop(true)
        .spawn()?;

    let attempts = DAEMON_START_TIMEOUT.as_millis() / DAEMON_POLL_INTERVAL.as_millis();
    for _ in 0..attempts {
        if socket.exists() {
            return Ok(child);
        }
        if let Some(status) = child.try_wait()? {
            return Err(StageError::DaemonExited(status));
        }
        tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
    }
    Err(StageError::DaemonTimeout)
}

async fn stop_daemon(daemon: &mut Child) {
    if let Some(pid) = daemon.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            tracing::warn!(error = %e, "failed to signal export daemon");
        }
    }
    match tokio::time::timeout(DAEMON_STOP_TIMEOUT, daemon.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "export daemon stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "export daemon wait failed"),
        Err(_) => {
            tracing::warn!("export daemon ignored SIGTERM, killing it");
            let _ = daemon.kill().await;
        }
    }
}

/// Scan `/dev/nbd*` in randomized order for a free device and attach the
/// export to it. Attachment races with other workers on the node; the
/// re-query after attach is the whole arbitration — whoever observes their
/// own attach connected wins, the loser tries the next candidate.
async fn acquire_device(socket: &Path) -> Result<PathBuf, StageError> {
    for device in nbd::candidate_devices(Path::new("/dev")) {
        if nbd::is_connected(&device).await? {
            continue;
        }
        if !nbd::attach(socket, &device).await? {
            continue;
        }
        if nbd::is_connected(&device).await? {
            return Ok(device);
        }
        tracing::debug!(device = %device.display(), "lost attach race, trying next device");
    }
    Err(StageError::NoFreeDevice)
}

/// Permission bits for the published device node.
fn permission_bits(source_mode: u32, writable: bool) -> u32 {
    let bits = source_mode & 0o7777;
    if writable {
        bits
    } else {
        bits & !0o222
    }
}

/// Mirror the device special file to the staging path, preserving mode and
/// device numbers.
fn copy_device_node(device: &Path, out: &Path, writable: bool) -> Result<(), StageError> {
    use nix::sys::stat::{mknod, stat, Mode, SFlag};

    let info = stat(device)?;
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(out) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mode = Mode::from_bits_truncate(permission_bits(info.st_mode, writable));
    mknod(out, SFlag::S_IFBLK, mode, info.st_rdev)?;
    Ok(())
}

async fn wait_for_termination() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
