// SPDX-License-Identifier: Apache-2.0

//! The one-shot registration handshake: after the multiplexed session is
//! up, the engine accepts exactly one registration call from the plugin,
//! validates it, and replies with the engine's own parameters.

use crate::error::{Error, ErrorKind};
use crate::plugin::config::{UnvalidatedPluginConfig, ValidatedPluginConfig};
use crate::registry::Registry;
use secrets_proto::{
	mux::MuxChannel,
	proto::RegisterPluginRequest,
	rpc::{self, METHOD_REGISTER_PLUGIN},
	wire_error::WireError,
};
use std::time::Duration;

/// Engine-side parameters handed back to every registering plugin.
#[derive(Debug, Clone)]
pub struct EngineParams {
	pub engine_name: String,
	pub engine_version: String,
	pub request_timeout: Duration,
}

async fn fail(channel: &mut MuxChannel, kind: ErrorKind, message: String) -> Error {
	let err = Error::new(kind, message.clone());
	let wire = WireError::from(Error::new(kind, message));
	let _ = rpc::respond_err(channel, wire).await;
	err
}

/// Drives the registration handshake to completion on `channel`. `name`,
/// if set, is the engine-assigned name for an engine-launched plugin and
/// overrides whatever the plugin reports (preventing a plugin from
/// squatting on another's name); `None` means the plugin's self-reported
/// name is authoritative (the externally-dialled case).
///
/// Callers apply the registration timeout around this future; a plugin
/// that never calls in simply leaves this future pending forever.
pub async fn accept(
	channel: &mut MuxChannel,
	name: Option<&str>,
	registry: &Registry,
	params: &EngineParams,
) -> Result<ValidatedPluginConfig, Error> {
	let (method, payload) = match rpc::read_call(channel).await {
		Ok(Some(call)) => call,
		Ok(None) => {
			return Err(Error::new(
				ErrorKind::Internal,
				"plugin closed the session before registering",
			))
		}
		Err(e) => return Err(Error::with_source(ErrorKind::Internal, "failed to read registration call", e)),
	};

	if method != METHOD_REGISTER_PLUGIN {
		return Err(fail(
			channel,
			ErrorKind::Internal,
			"expected RegisterPlugin as the first call on this session".to_owned(),
		)
		.await);
	}

	let req: RegisterPluginRequest = match prost::Message::decode(payload.as_slice()) {
		Ok(req) => req,
		Err(e) => {
			return Err(fail(
				channel,
				ErrorKind::Internal,
				format!("malformed RegisterPlugin payload: {e}"),
			)
			.await)
		}
	};

	let effective_name = name.map(str::to_owned).unwrap_or_else(|| req.name.clone());
	let unvalidated = UnvalidatedPluginConfig {
		name: effective_name,
		version: req.version,
		pattern: req.pattern,
	};

	let validated = match unvalidated.validate() {
		Ok(v) => v,
		Err(e) => return Err(fail(channel, e.kind(), e.message).await),
	};

	if registry.contains(&validated.name).await {
		return Err(fail(
			channel,
			ErrorKind::RegistrationDuplicateName,
			format!("plugin name '{}' is already registered", validated.name),
		)
		.await);
	}

	let resp = secrets_proto::proto::RegisterPluginResponse {
		engine_name: params.engine_name.clone(),
		engine_version: params.engine_version.clone(),
		request_timeout_millis: params.request_timeout.as_millis() as u64,
	};
	rpc::respond_ok(channel, &resp)
		.await
		.map_err(|e| Error::with_source(ErrorKind::Internal, "failed to send registration response", e))?;

	Ok(validated)
}
