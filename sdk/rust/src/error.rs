// SPDX-License-Identifier: Apache-2.0

use secrets_proto::wire_error::{WireError, WireErrorCode};
use std::io;

/// Errors a plugin implementation built on this SDK can hit before or during
/// the engine/plugin session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("plugin was not launched by the engine (PLUGIN_LAUNCHED_BY_ENGINE_VAR is unset)")]
	MissingLaunchEnv,

	#[error("malformed PLUGIN_LAUNCHED_BY_ENGINE_VAR contents")]
	InvalidLaunchEnv(#[source] serde_json::Error),

	#[error("PLUGIN_LAUNCHED_BY_ENGINE_VAR named fd {0}, which is reserved for stdio")]
	ReservedFd(i32),

	#[error("i/o error on the engine session")]
	Io(#[from] io::Error),

	#[error("rpc error on the engine session")]
	Rpc(#[from] secrets_proto::rpc::RpcError),

	#[error("secret not found")]
	NotFound,

	#[error("{0}")]
	Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for WireError {
	fn from(value: Error) -> Self {
		match value {
			Error::NotFound => WireError::new(WireErrorCode::NotFound, "secret not found"),
			other => WireError::new(WireErrorCode::Internal, other.to_string()),
		}
	}
}
