// SPDX-License-Identifier: Apache-2.0

//! `secrets-engine`: a local daemon that resolves named secrets on demand by
//! brokering requests to plugin processes, each responsible for a different
//! secret backend.
//!
//! The [`host`] module is the composition root: it owns the [`registry`] of
//! active plugins, drives the [`plugin::supervisor`] that keeps them alive,
//! and serves the public gRPC surface described in
//! `secrets-proto`'s `secrets_engine.v1` package. Everything under
//! [`plugin`] is concerned with getting one plugin process from "not yet
//! started" to "registered and answering calls"; [`resolver`] is what the
//! rest of the engine calls once that's true.

pub mod builtin;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod id;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod util;

pub use config::Config;
pub use error::{Error, ErrorKind};
pub use host::{EngineHost, EngineHostBuilder};
