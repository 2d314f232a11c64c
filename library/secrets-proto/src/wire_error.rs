// SPDX-License-Identifier: Apache-2.0

//! The distinguishable error codes observable at either the public socket or
//! a plugin's private session, independent of which transport carried them.

use crate::proto::RpcStatus;

/// Mirrors the error kinds enumerated in the engine's error handling design:
/// a small, stable set of codes callers can match on, with the freeform
/// message reserved for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WireErrorCode {
	NotFound = 0,
	InvalidArgument = 1,
	Internal = 2,
	Unavailable = 3,
}

impl WireErrorCode {
	pub fn from_i32(value: i32) -> Self {
		match value {
			0 => WireErrorCode::NotFound,
			1 => WireErrorCode::InvalidArgument,
			3 => WireErrorCode::Unavailable,
			_ => WireErrorCode::Internal,
		}
	}
}

/// A (code, message) pair, the payload carried by an error-tagged `rpc`
/// frame and by the engine's public-facing `tonic::Status`.
#[derive(Debug, Clone)]
pub struct WireError {
	pub code: WireErrorCode,
	pub message: String,
}

impl WireError {
	pub fn new(code: WireErrorCode, message: impl Into<String>) -> Self {
		WireError {
			code,
			message: message.into(),
		}
	}
}

impl std::fmt::Display for WireError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message)
	}
}

impl std::error::Error for WireError {}

impl From<WireError> for RpcStatus {
	fn from(value: WireError) -> Self {
		RpcStatus {
			code: value.code as i32,
			message: value.message,
		}
	}
}

impl From<RpcStatus> for WireError {
	fn from(value: RpcStatus) -> Self {
		WireError {
			code: WireErrorCode::from_i32(value.code),
			message: value.message,
		}
	}
}

impl From<WireError> for tonic::Status {
	fn from(value: WireError) -> Self {
		let code = match value.code {
			WireErrorCode::NotFound => tonic::Code::NotFound,
			WireErrorCode::InvalidArgument => tonic::Code::InvalidArgument,
			WireErrorCode::Unavailable => tonic::Code::Unavailable,
			WireErrorCode::Internal => tonic::Code::Internal,
		};
		tonic::Status::new(code, value.message)
	}
}

impl From<tonic::Status> for WireError {
	fn from(value: tonic::Status) -> Self {
		let code = match value.code() {
			tonic::Code::NotFound => WireErrorCode::NotFound,
			tonic::Code::InvalidArgument => WireErrorCode::InvalidArgument,
			tonic::Code::Unavailable => WireErrorCode::Unavailable,
			_ => WireErrorCode::Internal,
		};
		WireError {
			code,
			message: value.message().to_owned(),
		}
	}
}
