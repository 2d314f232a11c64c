// SPDX-License-Identifier: Apache-2.0

//! A builtin plugin backed by the engine process's own environment:
//! variables named `SECRETSD_ENV_<COMPONENTS>` become secret identifiers,
//! with `<COMPONENTS>` lower-cased and `__` treated as a `/` separator.
//! A minimal but real example of a zero-dependency secret source, not a
//! recommendation for production credential handling.

use crate::builtin::BuiltinPlugin;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::id::{Identifier, Pattern};
use crate::util::redacted::Redacted;
use std::collections::BTreeMap;

const PREFIX: &str = "SECRETSD_ENV_";

pub struct EnvVarPlugin {
	name: String,
	version: String,
}

impl EnvVarPlugin {
	pub fn new() -> Self {
		EnvVarPlugin {
			name: "env".to_owned(),
			version: "0.1.0".to_owned(),
		}
	}

	fn identifier_for(key: &str) -> Option<Identifier> {
		let rest = key.strip_prefix(PREFIX)?;
		if rest.is_empty() {
			return None;
		}
		let path = rest.to_ascii_lowercase().replace("__", "/");
		Identifier::parse(&path).ok()
	}
}

impl Default for EnvVarPlugin {
	fn default() -> Self {
		EnvVarPlugin::new()
	}
}

#[tonic::async_trait]
impl BuiltinPlugin for EnvVarPlugin {
	fn name(&self) -> &str {
		&self.name
	}

	fn version(&self) -> &str {
		&self.version
	}

	async fn get_secrets(&self, pattern: &Pattern) -> Result<Vec<Envelope>, Error> {
		let matches: Vec<Envelope> = std::env::vars()
			.filter_map(|(key, value)| {
				let id = Self::identifier_for(&key)?;
				pattern.matches(&id).then_some((id, value))
			})
			.map(|(id, value)| Envelope {
				id: id.string().to_owned(),
				value: Redacted::new(value.into_bytes()),
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
				"no environment-backed secret matches '{}'",
				pattern.string()
			)));
		}
		Ok(matches)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identifier_for_lowercases_and_splits_on_double_underscore() {
		assert_eq!(
			EnvVarPlugin::identifier_for("SECRETSD_ENV_FOO__BAR").unwrap().string(),
			"foo/bar"
		);
		assert!(EnvVarPlugin::identifier_for("UNRELATED").is_none());
	}

	#[tokio::test]
	async fn reads_matching_env_var() {
		// SAFETY: test-local env mutation; no other test in this process
		// reads this specific key concurrently.
		unsafe {
			std::env::set_var("SECRETSD_ENV_TEST__TOKEN", "s3cr3t");
		}
		let plugin = EnvVarPlugin::new();
		let results = plugin
			.get_secrets(&Pattern::must_parse("test/token"))
			.await
			.expect("match found");
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].value.as_ref(), b"s3cr3t");
		unsafe {
			std::env::remove_var("SECRETSD_ENV_TEST__TOKEN");
		}
	}
}
