// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gRPC serving over the kubelet-visible unix socket.

use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::server::Router;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),

    #[error("grpc transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// CSI endpoints arrive as `unix:///csi/csi.sock` or a bare path.
pub fn socket_path(endpoint: &str) -> &Path {
    Path::new(endpoint.strip_prefix("unix://").unwrap_or(endpoint))
}

/// Bind the endpoint (replacing any stale socket) and serve until SIGTERM
/// or ctrl-c.
pub async fn serve_on_unix_socket(endpoint: &str, router: Router) -> Result<(), ServeError> {
    let path = socket_path(endpoint);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "serving CSI");
    router
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown_signal())
        .await?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "no SIGTERM handler, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
#[path = "serve_tests.rs"]
mod tests;
