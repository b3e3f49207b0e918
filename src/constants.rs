// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Generator plugin protocol constants
pub mod plugin {
    /// The only path the plugin answers on
    pub const EXECUTE_PATH: &str = "/api/v1/getparams.execute";
    /// Required request media type, also used for the response
    pub const JSON_MEDIA_TYPE: &str = "application/json";
    /// Upper bound for request bodies in bytes
    pub const MAX_BODY_BYTES: usize = 1024 * 1024;
}

/// Service account material mounted into pods
pub mod service_account {
    pub const CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
    pub const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
}

/// Key of the fallback entry in the per-cluster token path mapping
pub const WILDCARD_CLUSTER: &str = "*";

/// Environment variable pointing at a kubeconfig file in local mode
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";
