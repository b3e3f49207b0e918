// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Wire types of the ApplicationSet generator plugin protocol

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Body of a `getparams.execute` call
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PluginRequest {
    #[serde(default)]
    pub application_set_name: Option<String>,
    #[serde(default)]
    pub input: Option<PluginInput>,
}

impl PluginRequest {
    /// The generator parameters, if the caller sent any
    pub fn parameters(&self) -> Option<&PluginParameters> {
        self.input.as_ref().and_then(|i| i.parameters.as_ref())
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct PluginInput {
    #[serde(default)]
    pub parameters: Option<PluginParameters>,
}

/// Generator parameters as configured on the ApplicationSet
#[derive(Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginParameters {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub cluster_endpoint: Option<String>,
    /// Base64 encoded PEM bundle overriding the server's default CA
    #[serde(default, rename = "clusterCA")]
    pub cluster_ca: Option<String>,
    #[serde(default)]
    pub label_selector: Option<BTreeMap<String, String>>,
}

// The CA bundle is left out so request parameters can be logged as-is.
impl fmt::Debug for PluginParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginParameters")
            .field("cluster_name", &self.cluster_name)
            .field("cluster_endpoint", &self.cluster_endpoint)
            .field("cluster_ca", &self.cluster_ca.as_ref().map(|_| "<provided>"))
            .field("label_selector", &self.label_selector)
            .finish()
    }
}

/// Response envelope: `{"output":{"parameters":[{"namespace":"..."}]}}`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginResponse {
    pub output: PluginOutput,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginOutput {
    pub parameters: Vec<NamespaceParameters>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NamespaceParameters {
    pub namespace: String,
}

impl PluginResponse {
    pub fn from_namespaces<I>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        PluginResponse {
            output: PluginOutput {
                parameters: namespaces
                    .into_iter()
                    .map(|namespace| NamespaceParameters { namespace })
                    .collect(),
            },
        }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.output.parameters.iter().map(|p| p.namespace.as_str())
    }
}
