// SPDX-License-Identifier: Apache-2.0

//! The engine's error kind taxonomy and its mapping onto the wire protocol.

use secrets_proto::wire_error::{WireError, WireErrorCode};
use std::fmt;

/// A stable, matchable error kind. Kept separate from [`Error`]'s
/// [`std::error::Error`]-flavored message so callers can branch on kind
/// without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	NotFound,
	InvalidPattern,
	InvalidId,
	InvalidName,
	InvalidVersion,
	RegistrationTimeout,
	RegistrationDuplicateName,
	PluginCrashed,
	PluginStoppedUnexpectedly,
	EngineUnavailable,
	IpcSetupFailed,
	Internal,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorKind::NotFound => "not-found",
			ErrorKind::InvalidPattern => "invalid-pattern",
			ErrorKind::InvalidId => "invalid-id",
			ErrorKind::InvalidName => "invalid-name",
			ErrorKind::InvalidVersion => "invalid-version",
			ErrorKind::RegistrationTimeout => "registration-timeout",
			ErrorKind::RegistrationDuplicateName => "registration-duplicate-name",
			ErrorKind::PluginCrashed => "plugin-crashed",
			ErrorKind::PluginStoppedUnexpectedly => "plugin-stopped-unexpectedly",
			ErrorKind::EngineUnavailable => "engine-unavailable",
			ErrorKind::IpcSetupFailed => "ipc-setup-failed",
			ErrorKind::Internal => "internal",
		};
		f.write_str(s)
	}
}

/// The engine's error type: a [`ErrorKind`] paired with a human-readable
/// reason. The reason is diagnostic text only; it is never part of the
/// wire contract (see [`WireError`]).
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
	pub kind: ErrorKind,
	pub message: String,
	#[source]
	pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Error {
			kind,
			message: message.into(),
			source: None,
		}
	}

	pub fn with_source(
		kind: ErrorKind,
		message: impl Into<String>,
		source: impl std::error::Error + Send + Sync + 'static,
	) -> Self {
		Error {
			kind,
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Error::new(ErrorKind::NotFound, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Error::new(ErrorKind::Internal, message)
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	/// Per-plugin errors are absorbed during fan-out rather than torn down;
	/// this distinguishes the handful of kinds the resolver still surfaces
	/// (currently only `NotFound`, the rest are logged).
	pub fn is_not_found(&self) -> bool {
		self.kind == ErrorKind::NotFound
	}
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for WireError {
	fn from(value: Error) -> Self {
		let code = match value.kind {
			ErrorKind::NotFound => WireErrorCode::NotFound,
			ErrorKind::InvalidPattern
			| ErrorKind::InvalidId
			| ErrorKind::InvalidName
			| ErrorKind::InvalidVersion => WireErrorCode::InvalidArgument,
			ErrorKind::EngineUnavailable => WireErrorCode::Unavailable,
			_ => WireErrorCode::Internal,
		};
		WireError::new(code, value.message)
	}
}

impl From<WireError> for Error {
	fn from(value: WireError) -> Self {
		let kind = match value.code {
			WireErrorCode::NotFound => ErrorKind::NotFound,
			WireErrorCode::InvalidArgument => ErrorKind::InvalidPattern,
			WireErrorCode::Unavailable => ErrorKind::EngineUnavailable,
			WireErrorCode::Internal => ErrorKind::Internal,
		};
		Error::new(kind, value.message)
	}
}

impl From<secrets_proto::rpc::RpcError> for Error {
	fn from(value: secrets_proto::rpc::RpcError) -> Self {
		match value {
			secrets_proto::rpc::RpcError::Remote(wire) => wire.into(),
			other => Error::with_source(ErrorKind::Internal, "rpc transport error", other),
		}
	}
}

impl From<Error> for tonic::Status {
	fn from(value: Error) -> Self {
		let code = match value.kind {
			ErrorKind::NotFound => tonic::Code::NotFound,
			ErrorKind::InvalidPattern
			| ErrorKind::InvalidId
			| ErrorKind::InvalidName
			| ErrorKind::InvalidVersion => tonic::Code::InvalidArgument,
			ErrorKind::EngineUnavailable => tonic::Code::Unavailable,
			ErrorKind::RegistrationTimeout => tonic::Code::DeadlineExceeded,
			_ => tonic::Code::Internal,
		};
		tonic::Status::new(code, value.message)
	}
}
