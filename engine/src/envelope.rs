// SPDX-License-Identifier: Apache-2.0

//! The resolved-secret record returned to callers.

use crate::util::redacted::Redacted;
use std::collections::BTreeMap;

/// An immutable record describing one resolved secret.
///
/// `value` is wrapped in [`Redacted`] so that a stray `{:?}` in a log
/// statement can never leak secret material; marshalling `value` to a
/// generic text format (JSON, TOML, ...) is a programming error and is
/// intentionally not supported by this type.
#[derive(Debug, Clone)]
pub struct Envelope {
	pub id: String,
	pub value: Redacted<Vec<u8>>,
	pub metadata: BTreeMap<String, String>,
	pub provider: String,
	pub version: String,
	/// Zero means unset.
	pub created_at_unix_nanos: i64,
	/// Zero means unset; stamped by the resolver if still zero once a
	/// plugin's response has been processed.
	pub resolved_at_unix_nanos: i64,
	/// Zero means no expiry.
	pub expires_at_unix_nanos: i64,
}

impl Envelope {
	pub fn from_wire(wire: secrets_proto::proto::Envelope) -> Self {
		Envelope {
			id: wire.id,
			value: Redacted::new(wire.value),
			metadata: wire.metadata.into_iter().collect(),
			provider: wire.provider,
			version: wire.version,
			created_at_unix_nanos: wire.created_at_unix_nanos,
			resolved_at_unix_nanos: wire.resolved_at_unix_nanos,
			expires_at_unix_nanos: wire.expires_at_unix_nanos,
		}
	}

	pub fn into_wire(self) -> secrets_proto::proto::Envelope {
		secrets_proto::proto::Envelope {
			id: self.id,
			value: self.value.as_ref().clone(),
			metadata: self.metadata.into_iter().collect(),
			provider: self.provider,
			version: self.version,
			created_at_unix_nanos: self.created_at_unix_nanos,
			resolved_at_unix_nanos: self.resolved_at_unix_nanos,
			expires_at_unix_nanos: self.expires_at_unix_nanos,
		}
	}
}
