// SPDX-License-Identifier: Apache-2.0

//! A builtin plugin backed by a fixed in-memory map, handed to the engine
//! at construction time. Exists for deterministic end-to-end tests and as
//! a reference shape a "static secrets" deployment could model a real
//! backend on; it is not a production secret store.

use crate::builtin::BuiltinPlugin;
use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind};
use crate::id::{Identifier, Pattern};
use crate::util::redacted::Redacted;
use std::collections::BTreeMap;

pub struct StaticMapPlugin {
	name: String,
	version: String,
	secrets: BTreeMap<Identifier, Vec<u8>>,
}

impl StaticMapPlugin {
	pub fn new(secrets: BTreeMap<Identifier, Vec<u8>>) -> Self {
		StaticMapPlugin::named("static", "0.1.0", secrets)
	}

	pub fn named(name: impl Into<String>, version: impl Into<String>, secrets: BTreeMap<Identifier, Vec<u8>>) -> Self {
		StaticMapPlugin {
			name: name.into(),
			version: version.into(),
			secrets,
		}
	}
}

#[tonic::async_trait]
impl BuiltinPlugin for StaticMapPlugin {
	fn name(&self) -> &str {
		&self.name
	}

	fn version(&self) -> &str {
		&self.version
	}

	async fn get_secrets(&self, pattern: &Pattern) -> Result<Vec<Envelope>, Error> {
		let matches: Vec<Envelope> = self
			.secrets
			.iter()
			.filter(|(id, _)| pattern.matches(id))
			.map(|(id, value)| Envelope {
				id: id.string().to_owned(),
				value: Redacted::new(value.clone()),
				metadata: BTreeMap::new(),
				provider: self.name.clone(),
				version: self.version.clone(),
				created_at_unix_nanos: 0,
				resolved_at_unix_nanos: 0,
				expires_at_unix_nanos: 0,
			})
			.collect();

		if matches.is_empty() {
			return Err(Error::not_found(format!(
				"no secret in plugin '{}' matches '{}'",
				self.name,
				pattern.string()
			)));
		}
		Ok(matches)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn matching_secret_is_returned() {
		let mut secrets = BTreeMap::new();
		secrets.insert(Identifier::must_parse("foo"), b"bar".to_vec());
		let plugin = StaticMapPlugin::named("B1", "1.0.0", secrets);

		let results = plugin
			.get_secrets(&Pattern::must_parse("**"))
			.await
			.expect("match found");
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].id, "foo");
		assert_eq!(results[0].value.as_ref(), b"bar");
		assert_eq!(results[0].provider, "B1");
	}

	#[tokio::test]
	async fn no_match_is_not_found() {
		let plugin = StaticMapPlugin::new(BTreeMap::new());
		let err = plugin
			.get_secrets(&Pattern::must_parse("**"))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::NotFound);
	}
}
