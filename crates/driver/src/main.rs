// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! subprovisioner: CSI driver entry point.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sp_core::NodeName;
use sp_driver::csi::controller::ControllerService;
use sp_driver::csi::identity::IdentityService;
use sp_driver::csi::node::NodeService;
use sp_driver::csi::v1::controller_server::ControllerServer;
use sp_driver::csi::v1::identity_server::IdentityServer;
use sp_driver::csi::v1::node_server::NodeServer;
use sp_driver::staging::{self, StageRequest};
use sp_driver::serve;
use sp_cluster::{
    ClaimStore, JobRunner, KubeClaims, KubeJobs, KubeSnapshots, KubeWorkers, Reaper,
    SnapshotStore, WorkerRunner,
};
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server;

#[derive(Parser)]
#[command(name = "subprovisioner", version, about = "CSI driver for qcow2 volumes on a shared filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the CSI controller service and run the deletion reaper.
    Controller {
        #[arg(long, default_value = "unix:///csi/csi.sock")]
        csi_socket: String,
        /// Deletion reaper worker pool size.
        #[arg(long, default_value_t = 4)]
        reaper_workers: usize,
    },
    /// Serve the CSI node service.
    Node {
        #[arg(long, default_value = "unix:///csi/csi.sock")]
        csi_socket: String,
        /// This node's name (fed from the downward API).
        #[arg(long, env = "NODE_NAME")]
        node_name: String,
    },
    /// Staging worker: expose an overlay image as a local block device.
    /// Launched by the node service, not by hand.
    StageWorker {
        image: PathBuf,
        device_out: PathBuf,
        writable: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Controller { csi_socket, reaper_workers } => {
            run_controller(&csi_socket, reaper_workers).await
        }
        Command::Node { csi_socket, node_name } => run_node(&csi_socket, node_name).await,
        Command::StageWorker { image, device_out, writable } => {
            staging::run(StageRequest { image, device_out, writable })
                .await
                .context("staging worker failed")
        }
    }
}

fn driver_image() -> anyhow::Result<String> {
    sp_cluster::env::driver_image().context("SUBPROVISIONER_IMAGE must be set")
}

async fn run_controller(csi_socket: &str, reaper_workers: usize) -> anyhow::Result<()> {
    let image = driver_image()?;
    let client = kube::Client::try_default().await.context("kube client setup failed")?;

    let claims: Arc<dyn ClaimStore> = Arc::new(KubeClaims::new(client.clone()));
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(KubeSnapshots::new(client.clone()));
    let jobs: Arc<dyn JobRunner> = Arc::new(KubeJobs::new(client.clone()));

    let reaper =
        Arc::new(Reaper::new(Arc::clone(&claims), Arc::clone(&jobs), image.clone()));
    tokio::spawn(Arc::clone(&reaper).run(client, reaper_workers));

    let router = Server::builder()
        .add_service(IdentityServer::new(IdentityService))
        .add_service(ControllerServer::new(ControllerService::new(
            claims, snapshots, jobs, image,
        )));
    serve::serve_on_unix_socket(csi_socket, router).await?;
    Ok(())
}

async fn run_node(csi_socket: &str, node_name: String) -> anyhow::Result<()> {
    let image = driver_image()?;
    let client = kube::Client::try_default().await.context("kube client setup failed")?;

    let claims: Arc<dyn ClaimStore> = Arc::new(KubeClaims::new(client.clone()));
    let workers: Arc<dyn WorkerRunner> = Arc::new(KubeWorkers::new(client));

    let router = Server::builder()
        .add_service(IdentityServer::new(IdentityService))
        .add_service(NodeServer::new(NodeService::new(
            claims,
            workers,
            NodeName::new(node_name),
            image,
        )));
    serve::serve_on_unix_socket(csi_socket, router).await?;
    Ok(())
}
