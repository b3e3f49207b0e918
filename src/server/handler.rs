// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! HTTP handler for the generator plugin protocol

use crate::config::ServerConfig;
use crate::constants::plugin::{EXECUTE_PATH, JSON_MEDIA_TYPE, MAX_BODY_BYTES};
use crate::error::PluginError;
use crate::kubernetes::{label_selector, list_namespace_names, resolve, ClusterConnector};
use crate::types::{PluginParameters, PluginRequest, PluginResponse};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Why a request was turned down, rendered as a plain-text response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    MethodNotAllowed,
    UnsupportedMediaType,
    Unauthorized,
    BadRequest,
    Internal,
}

impl Rejection {
    pub fn status(self) -> StatusCode {
        match self {
            Rejection::NotFound => StatusCode::NOT_FOUND,
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::BadRequest => StatusCode::BAD_REQUEST,
            Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Rejection::NotFound => "Not found",
            Rejection::MethodNotAllowed => "Method not allowed",
            Rejection::UnsupportedMediaType => "Unsupported media type",
            Rejection::Unauthorized => "Unauthorized",
            Rejection::BadRequest => "Bad request",
            Rejection::Internal => "Internal server error",
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        plain_response(self.status(), self.reason())
    }
}

impl From<&PluginError> for Rejection {
    fn from(err: &PluginError) -> Self {
        if err.status() == StatusCode::BAD_REQUEST {
            Rejection::BadRequest
        } else {
            Rejection::Internal
        }
    }
}

/// Serves `POST /api/v1/getparams.execute`
pub struct PluginHandler {
    config: Arc<ServerConfig>,
    connector: Arc<dyn ClusterConnector>,
}

impl PluginHandler {
    pub fn new(config: Arc<ServerConfig>, connector: Arc<dyn ClusterConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle one request. Every failure ends the request with a plain-text reason.
    #[instrument(skip_all, fields(address = %remote_addr))]
    pub async fn handle<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!(
            method = %req.method(),
            url = %req.uri(),
            content_type = ?req.headers().get(CONTENT_TYPE),
            "Received request"
        );

        match self.execute(req).await {
            Ok(response) => response,
            Err(rejection) => rejection.into_response(),
        }
    }

    async fn execute<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Rejection>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.uri().path() != EXECUTE_PATH {
            debug!(url = %req.uri(), "Not found");
            return Err(Rejection::NotFound);
        }
        if req.method() != Method::POST {
            debug!(method = %req.method(), url = %req.uri(), "Method not allowed");
            return Err(Rejection::MethodNotAllowed);
        }
        let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if content_type != Some(JSON_MEDIA_TYPE) {
            debug!(media_type = ?content_type, url = %req.uri(), "Unsupported media type");
            return Err(Rejection::UnsupportedMediaType);
        }
        if !self.is_authorized(&req) {
            debug!(url = %req.uri(), "Unauthorized");
            return Err(Rejection::Unauthorized);
        }

        let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
            .collect()
            .await
            .map_err(|e| {
                debug!(error = %e, "Unable to read request body");
                Rejection::BadRequest
            })?
            .to_bytes();
        let request: PluginRequest = serde_json::from_slice(&body).map_err(|e| {
            debug!(error = %e, "Unable to read input json");
            Rejection::BadRequest
        })?;
        let Some(params) = request.parameters() else {
            debug!("No input parameters provided");
            return Err(Rejection::BadRequest);
        };
        debug!(input = ?params, "Received input");

        let namespaces = self.list_namespaces(params).await.map_err(|e| {
            let rejection = Rejection::from(&e);
            if rejection == Rejection::BadRequest {
                debug!(
                    cluster_name = ?params.cluster_name,
                    cluster_endpoint = ?params.cluster_endpoint,
                    error = %e,
                    "Invalid request parameters"
                );
            } else {
                error!(
                    cluster_name = ?params.cluster_name,
                    cluster_endpoint = ?params.cluster_endpoint,
                    error = %e,
                    "Failed to list namespaces"
                );
            }
            rejection
        })?;

        let output = PluginResponse::from_namespaces(namespaces);
        debug!(
            cluster_name = ?params.cluster_name,
            count = output.output.parameters.len(),
            "Returning response"
        );
        let body = serde_json::to_vec(&output).map_err(|e| {
            error!(error = %e, "Failed to encode response");
            Rejection::Internal
        })?;

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| {
                error!(error = %e, "Failed to build response");
                Rejection::Internal
            })
    }

    /// Open access unless a listen token is configured
    fn is_authorized<B>(&self, req: &Request<B>) -> bool {
        let Some(token) = self.config.listen_token.as_deref() else {
            return true;
        };
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| token_matches(presented, token))
    }

    async fn list_namespaces(&self, params: &PluginParameters) -> crate::error::Result<Vec<String>> {
        let descriptor = resolve(&self.config, params)?;
        let client = self.connector.connect(&descriptor).await?;
        let selector = params.label_selector.as_ref().and_then(label_selector);
        if let Some(selector) = &selector {
            debug!(label_selector = %selector, "Using label selector");
        }
        list_namespace_names(&client, selector.as_deref()).await
    }
}

/// Compares digests, so timing does not depend on where the tokens differ
fn token_matches(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn plain_response(status: StatusCode, reason: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(reason.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
