// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Request and response types of the plugin protocol.

pub mod plugin;

pub use plugin::{NamespaceParameters, PluginParameters, PluginRequest, PluginResponse};
