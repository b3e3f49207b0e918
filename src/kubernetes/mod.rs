// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for credential resolution, client creation, and namespace listing.

pub mod client;
pub mod namespaces;
pub mod resolver;

pub use client::{create_cluster_client, ClusterConnector, KubeConnector};
pub use namespaces::{label_selector, list_namespace_names};
pub use resolver::{resolve, ConnectionDescriptor, KubeconfigLocator, RemoteCluster, TrustAnchor};
