// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace listing utilities

use crate::error::Result;
use k8s_openapi::api::core::v1::Namespace;
use kube::{api::ListParams, Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Serialize label requirements into a `key=value,...` selector.
/// All pairs must match; keys come out sorted.
pub fn label_selector(labels: &BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// List the names of all namespaces matching the selector
#[instrument(skip(client))]
pub async fn list_namespace_names(client: &Client, selector: Option<&str>) -> Result<Vec<String>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let mut params = ListParams::default();
    if let Some(selector) = selector {
        params = params.labels(selector);
    }

    let list = namespaces.list(&params).await?;
    debug!("Found {} namespace(s)", list.items.len());

    Ok(list.items.iter().map(|ns| ns.name_any()).collect())
}
