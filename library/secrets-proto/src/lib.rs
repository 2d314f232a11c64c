// SPDX-License-Identifier: Apache-2.0

//! Wire protocol and private-session transport shared by the secrets engine
//! and its plugins.
//!
//! This crate is the one binary-compatibility point between the engine and
//! the plugin processes it runs: the generated [`proto`] types, the
//! [`mux`] session multiplexer, and the [`rpc`] call framing built on top of
//! it. Everything else about a plugin (how it is discovered, started,
//! retried) is the engine's business alone.

pub mod mux;
pub mod rpc;
pub mod wire_error;

/// Generated protobuf/gRPC types and service stubs.
///
/// `ListPluginsService`, `ResolverService`, and `HealthService` are real
/// tonic services served on the engine's public socket. The remaining
/// message types (`RegisterPluginRequest`, `GetSecretsRequest`, ...) are
/// reused as payloads of the lighter-weight [`rpc`] framing used on a
/// plugin's private multiplexed session.
pub mod proto {
	tonic::include_proto!("secrets_engine.v1");
}
