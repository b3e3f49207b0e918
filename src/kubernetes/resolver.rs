// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolution of request parameters into downstream cluster credentials
//!
//! Local mode ignores the request entirely and points at the ambient kubeconfig.
//! Remote mode takes the endpoint from the request, the bearer token file from the
//! per-cluster mapping and the trust anchor from the request or the server default.
//! Missing CA material produces an empty trust pool, never an unverified channel.

use crate::config::ServerConfig;
use crate::constants::KUBECONFIG_ENV;
use crate::error::{PluginError, Result};
use crate::types::PluginParameters;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, instrument};
use url::{Host, Url};

/// CA material used to verify a downstream API server
#[derive(Clone, PartialEq, Eq)]
pub enum TrustAnchor {
    /// Decoded PEM bundle
    Inline(Vec<u8>),
    /// PEM bundle on disk
    FilePath(PathBuf),
    /// No CA configured, every server certificate is rejected
    Empty,
}

impl TrustAnchor {
    /// Interpret a server-side CA setting: base64 when it decodes, a file path otherwise.
    pub fn from_config_value(value: &str) -> Self {
        if value.trim().is_empty() {
            return TrustAnchor::Empty;
        }
        match decode_base64(value) {
            Ok(data) if !data.is_empty() => TrustAnchor::Inline(data),
            _ => TrustAnchor::FilePath(PathBuf::from(value)),
        }
    }

    /// Interpret a caller-supplied CA, which must be base64.
    pub fn from_request_value(value: &str) -> Result<Self> {
        match decode_base64(value) {
            Ok(data) if !data.is_empty() => Ok(TrustAnchor::Inline(data)),
            Ok(_) => Err(PluginError::InvalidRequest(
                "clusterCA decodes to an empty bundle".to_string(),
            )),
            Err(e) => Err(PluginError::InvalidRequest(format!(
                "clusterCA is not valid base64: {}",
                e
            ))),
        }
    }
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustAnchor::Inline(data) => write!(f, "Inline({} bytes)", data.len()),
            TrustAnchor::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            TrustAnchor::Empty => f.write_str("Empty"),
        }
    }
}

/// Line breaks are tolerated so wrapped base64 from YAML still decodes.
fn decode_base64(value: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let compact: String = value.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    STANDARD.decode(compact)
}

/// Everything needed to reach a remote cluster API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCluster {
    pub endpoint: Url,
    /// Host name the server certificate is verified against
    pub tls_server_name: String,
    pub token_file: PathBuf,
    pub trust: TrustAnchor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionDescriptor {
    /// Local mode: the cluster and credentials of a kubeconfig file
    Kubeconfig(PathBuf),
    Remote(RemoteCluster),
}

/// Where local mode looks for a kubeconfig
#[derive(Debug, Clone, Default)]
pub struct KubeconfigLocator {
    pub env_path: Option<OsString>,
    pub home_dir: Option<PathBuf>,
}

impl KubeconfigLocator {
    /// Read `KUBECONFIG` and the home directory of the current process
    pub fn from_process() -> Self {
        KubeconfigLocator {
            env_path: std::env::var_os(KUBECONFIG_ENV),
            home_dir: dirs::home_dir(),
        }
    }

    /// `KUBECONFIG` wins, then `~/.kube/config`
    pub fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = self.env_path.as_ref().filter(|p| !p.is_empty()) {
            debug!(kubeconfig = ?path, "Found KUBECONFIG environment variable");
            return Ok(PathBuf::from(path));
        }
        if let Some(home) = self.home_dir.as_ref().filter(|h| !h.as_os_str().is_empty()) {
            debug!(home = %home.display(), "Falling back to kubeconfig in user home");
            return Ok(home.join(".kube").join("config"));
        }
        Err(PluginError::Configuration(
            "Cannot find KUBECONFIG or default kubeconfig file".to_string(),
        ))
    }
}

/// Resolve the connection for a request using the process environment for local mode
pub fn resolve(config: &ServerConfig, params: &PluginParameters) -> Result<ConnectionDescriptor> {
    resolve_with(config, params, &KubeconfigLocator::from_process())
}

#[instrument(skip_all, fields(cluster = ?params.cluster_name, local = config.local))]
pub fn resolve_with(
    config: &ServerConfig,
    params: &PluginParameters,
    locator: &KubeconfigLocator,
) -> Result<ConnectionDescriptor> {
    if config.local {
        debug!("Local mode, ignoring request endpoint and CA");
        return locator.locate().map(ConnectionDescriptor::Kubeconfig);
    }
    resolve_remote(config, params).map(ConnectionDescriptor::Remote)
}

fn resolve_remote(config: &ServerConfig, params: &PluginParameters) -> Result<RemoteCluster> {
    let raw_endpoint = params
        .cluster_endpoint
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| PluginError::InvalidRequest("clusterEndpoint is required".to_string()))?;

    let endpoint = Url::parse(raw_endpoint).map_err(|e| {
        PluginError::InvalidRequest(format!("Invalid clusterEndpoint '{}': {}", raw_endpoint, e))
    })?;
    if endpoint.scheme() != "https" {
        return Err(PluginError::InvalidRequest(format!(
            "clusterEndpoint '{}' must use https",
            raw_endpoint
        )));
    }
    let tls_server_name = match endpoint.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => {
            return Err(PluginError::InvalidRequest(format!(
                "clusterEndpoint '{}' has no host",
                raw_endpoint
            )))
        }
    };

    let cluster_name = params.cluster_name.as_deref();
    let token_file = config
        .token_paths
        .lookup(cluster_name)
        .ok_or_else(|| {
            PluginError::Configuration(format!(
                "No service account token path for cluster {:?} and no default",
                cluster_name
            ))
        })?
        .to_path_buf();
    debug!(token_path = %token_file.display(), "Resolved service account token path");

    let trust = match params.cluster_ca.as_deref().filter(|ca| !ca.is_empty()) {
        Some(ca) => {
            debug!("Using cluster CA from the request");
            TrustAnchor::from_request_value(ca)?
        }
        None => {
            debug!("Using cluster CA from the server configuration");
            TrustAnchor::from_config_value(&config.service_account_ca)
        }
    };

    Ok(RemoteCluster {
        endpoint,
        tls_server_name,
        token_file,
        trust,
    })
}
