// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{service_account, WILDCARD_CLUSTER};
use crate::error::{PluginError, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Command line flags of the `server` subcommand.
///
/// Every flag can also be provided through an environment variable with the
/// `ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_` prefix.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Local address to listen on
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LISTEN_ADDRESS",
        default_value = ":8080"
    )]
    pub listen_address: String,

    /// Bearer token to authenticate requests (if needed)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LISTEN_TOKEN",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub listen_token: String,

    /// TLS CA used to verify client certificates (if needed)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LISTEN_TLS_CA",
        default_value = ""
    )]
    pub listen_tls_ca: String,

    /// TLS cert for the server (if needed)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LISTEN_TLS_CRT",
        default_value = ""
    )]
    pub listen_tls_crt: String,

    /// TLS key for the server (if needed)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LISTEN_TLS_KEY",
        default_value = ""
    )]
    pub listen_tls_key: String,

    /// Use the local kubectl context instead of request parameters (for debugging)
    #[arg(long, env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_LOCAL")]
    pub local: bool,

    /// Path or base64 of the CA for cluster endpoints (ignored in --local mode)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_SERVICE_ACCOUNT_TLS_CA",
        default_value = service_account::CA_PATH
    )]
    pub service_account_tls_ca: String,

    /// Token file paths as `cluster=path`, comma separated or repeated (ignored in --local mode)
    #[arg(
        long,
        env = "ARGOCD_APPLICATIONSET_NAMESPACES_PLUGIN_SERVICE_ACCOUNT_TOKEN_PATHS",
        default_value = "*=/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    pub service_account_token_paths: Vec<String>,
}

/// TLS material for the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerTls {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// When set, clients must present a certificate signed by this CA
    pub client_ca_path: Option<PathBuf>,
}

/// Per-cluster service account token files, with a `"*"` fallback entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPaths(BTreeMap<String, PathBuf>);

impl TokenPaths {
    /// Parse `cluster=path` entries, each of which may itself be a comma separated list.
    /// Later entries for the same cluster replace earlier ones.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut paths = BTreeMap::new();
        for entry in entries.iter().flat_map(|e| e.as_ref().split(',')) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((cluster, path)) = entry.split_once('=') else {
                return Err(PluginError::Configuration(format!(
                    "Invalid service-account-token-paths entry '{}', expected cluster=path",
                    entry
                )));
            };
            if cluster.is_empty() || path.is_empty() {
                return Err(PluginError::Configuration(format!(
                    "Invalid service-account-token-paths entry '{}', cluster and path must not be empty",
                    entry
                )));
            }
            paths.insert(cluster.to_string(), PathBuf::from(path));
        }
        Ok(TokenPaths(paths))
    }

    pub fn insert(&mut self, cluster: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(cluster.into(), path.into());
    }

    /// Exact cluster name first, then the wildcard entry
    pub fn lookup(&self, cluster: Option<&str>) -> Option<&Path> {
        cluster
            .and_then(|name| self.0.get(name))
            .or_else(|| self.0.get(WILDCARD_CLUSTER))
            .map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Process-wide server configuration, immutable after startup
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Address handed to the TCP listener, `:port` already expanded
    pub listen_address: String,
    /// Bearer token callers must present, open access when unset
    pub listen_token: Option<String>,
    pub listener_tls: Option<ListenerTls>,
    /// Resolve every request against the local kubeconfig
    pub local: bool,
    /// Default CA for downstream clusters, base64 or a file path
    pub service_account_ca: String,
    pub token_paths: TokenPaths,
}

impl ServerConfig {
    pub fn from_args(args: &ServerArgs) -> Result<Self> {
        let listener_tls = match (args.listen_tls_crt.as_str(), args.listen_tls_key.as_str()) {
            ("", "") => None,
            ("", _) | (_, "") => {
                return Err(PluginError::Configuration(
                    "Both --listen-tls-crt and --listen-tls-key are required to enable TLS"
                        .to_string(),
                ))
            }
            (crt, key) => Some(ListenerTls {
                cert_path: PathBuf::from(crt),
                key_path: PathBuf::from(key),
                client_ca_path: non_empty(&args.listen_tls_ca).map(PathBuf::from),
            }),
        };

        Ok(ServerConfig {
            listen_address: normalize_listen_address(&args.listen_address),
            listen_token: non_empty(&args.listen_token).map(str::to_string),
            listener_tls,
            local: args.local,
            service_account_ca: args.service_account_tls_ca.clone(),
            token_paths: TokenPaths::parse(&args.service_account_token_paths)?,
        })
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_address", &self.listen_address)
            .field("listen_token", &self.listen_token.as_ref().map(|_| "<redacted>"))
            .field("listener_tls", &self.listener_tls)
            .field("local", &self.local)
            .field("token_paths", &self.token_paths)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// `:8080` means every interface, as it does for Go style listen addresses
fn normalize_listen_address(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => address.to_string(),
    }
}
