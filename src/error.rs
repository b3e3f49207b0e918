// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    /// Caller-supplied input cannot be used (bad endpoint, bad CA encoding, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The server is missing something the caller cannot fix
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Downstream connection failed: {0}")]
    DownstreamConnection(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

impl PluginError {
    /// HTTP status reported to the caller for this error
    pub fn status(&self) -> StatusCode {
        match self {
            PluginError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PluginError::Configuration(_)
            | PluginError::DownstreamConnection(_)
            | PluginError::KubeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
