// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use argocd_namespaces_generator_plugin::config::{ServerArgs, ServerConfig};
use argocd_namespaces_generator_plugin::kubernetes::KubeConnector;
use argocd_namespaces_generator_plugin::logging::{self, LogFormat};
use argocd_namespaces_generator_plugin::server::PluginServer;

/// ApplicationSet generator plugin listing the namespaces of a cluster
#[derive(Parser, Debug)]
#[command(name = "argocd-namespaces-generator-plugin", version, about, long_about = None)]
struct Cli {
    /// Set verbosity level (4 and up enables debug logging)
    #[arg(
        short,
        long,
        global = true,
        default_value_t = 0,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_VERBOSITY"
    )]
    verbosity: u8,

    /// Set log output
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogFormat::Json,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LOG_FORMAT"
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start plugin server
    Server(ServerArgs),
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Server(args) => {
            logging::init(cli.verbosity, cli.log_format);
            run_server(args).await
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    // Both the listener and the kube client use rustls
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the aws-lc-rs crypto provider"))?;

    let config = ServerConfig::from_args(&args).context("Invalid server configuration")?;
    debug!(?config, "Configuration loaded");
    info!(
        "Starting namespaces generator plugin {}",
        env!("CARGO_PKG_VERSION")
    );

    PluginServer::new(config, Arc::new(KubeConnector)).run().await
}
