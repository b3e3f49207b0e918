// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Plugin HTTP server: request handling and the listener around it.

pub mod handler;
pub mod listener;

pub use handler::{PluginHandler, Rejection};
pub use listener::PluginServer;
