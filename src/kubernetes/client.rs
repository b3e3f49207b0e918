// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Downstream cluster client creation

use crate::error::{PluginError, Result};
use crate::kubernetes::resolver::{ConnectionDescriptor, RemoteCluster, TrustAnchor};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::future::BoxFuture;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KConfig};
use std::path::Path;
use tracing::{debug, instrument};

/// Name used for the cluster, user and context of synthesized kubeconfigs
const TARGET_NAME: &str = "target";

/// Turns a resolved connection into a client for the downstream cluster.
///
/// A fresh client is built for every request; nothing is pooled or cached.
pub trait ClusterConnector: Send + Sync {
    fn connect<'a>(&'a self, descriptor: &'a ConnectionDescriptor) -> BoxFuture<'a, Result<Client>>;
}

/// Connector building real kube clients
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

impl ClusterConnector for KubeConnector {
    fn connect<'a>(&'a self, descriptor: &'a ConnectionDescriptor) -> BoxFuture<'a, Result<Client>> {
        Box::pin(create_cluster_client(descriptor))
    }
}

/// Create a Kubernetes client for the resolved connection
pub async fn create_cluster_client(descriptor: &ConnectionDescriptor) -> Result<Client> {
    let config = client_config(descriptor).await?;
    Client::try_from(config)
        .map_err(|e| PluginError::DownstreamConnection(format!("Failed to create client: {}", e)))
}

/// Build the client configuration for the resolved connection
#[instrument(skip_all)]
pub async fn client_config(descriptor: &ConnectionDescriptor) -> Result<KConfig> {
    match descriptor {
        ConnectionDescriptor::Kubeconfig(path) => local_config(path).await,
        ConnectionDescriptor::Remote(remote) => remote_config(remote).await,
    }
}

async fn local_config(path: &Path) -> Result<KConfig> {
    debug!(kubeconfig = %path.display(), "Loading local kubeconfig");
    // File IO and YAML parsing stay off the async workers
    let owned = path.to_path_buf();
    let kubeconfig = tokio::task::spawn_blocking(move || Kubeconfig::read_from(owned))
        .await
        .map_err(|e| PluginError::Configuration(format!("Kubeconfig loader task failed: {}", e)))?
        .map_err(|e| {
            PluginError::Configuration(format!(
                "Failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        })?;

    KConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| PluginError::Configuration(format!("Failed to create config: {}", e)))
}

async fn remote_config(remote: &RemoteCluster) -> Result<KConfig> {
    debug!(
        endpoint = %remote.endpoint,
        tls_server_name = %remote.tls_server_name,
        trust = ?remote.trust,
        "Building client for remote cluster"
    );
    let kubeconfig = remote_kubeconfig(remote)?;

    let mut config = KConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| PluginError::DownstreamConnection(format!("Failed to create config: {}", e)))?;

    if remote.trust == TrustAnchor::Empty {
        // An empty root store rejects every server certificate.
        config.root_cert = Some(Vec::new());
    }
    config.accept_invalid_certs = false;

    Ok(config)
}

/// Describe a remote cluster as a single-context kubeconfig
pub fn remote_kubeconfig(remote: &RemoteCluster) -> Result<Kubeconfig> {
    let mut cluster = serde_json::json!({
        "server": remote.endpoint.as_str().trim_end_matches('/'),
        "tls-server-name": remote.tls_server_name,
    });
    match &remote.trust {
        TrustAnchor::Inline(data) => {
            cluster["certificate-authority-data"] = STANDARD.encode(data).into();
        }
        TrustAnchor::FilePath(path) => {
            cluster["certificate-authority"] = path.to_string_lossy().into_owned().into();
        }
        TrustAnchor::Empty => {}
    }

    let kubeconfig = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": TARGET_NAME, "cluster": cluster }],
        "users": [{
            "name": TARGET_NAME,
            "user": { "tokenFile": remote.token_file.to_string_lossy() },
        }],
        "contexts": [{
            "name": TARGET_NAME,
            "context": { "cluster": TARGET_NAME, "user": TARGET_NAME },
        }],
        "current-context": TARGET_NAME,
    });

    serde_json::from_value(kubeconfig).map_err(|e| {
        PluginError::DownstreamConnection(format!("Failed to build kubeconfig: {}", e))
    })
}
