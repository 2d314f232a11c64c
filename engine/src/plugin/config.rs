// SPDX-License-Identifier: Apache-2.0

//! Plugin configuration in its unvalidated (text) and validated forms.

use crate::error::{Error, ErrorKind};
use crate::id::Pattern;

/// Plugin configuration as read from a launch plan or a registration
/// payload: three plain text fields, not yet checked for well-formedness.
#[derive(Debug, Clone)]
pub struct UnvalidatedPluginConfig {
	pub name: String,
	pub version: String,
	pub pattern: String,
}

/// A [`UnvalidatedPluginConfig`] that has passed validation: `name` and
/// `version` are non-empty and `pattern` parses.
#[derive(Debug, Clone)]
pub struct ValidatedPluginConfig {
	pub name: String,
	pub version: String,
	pub pattern: Pattern,
}

impl UnvalidatedPluginConfig {
	pub fn validate(self) -> Result<ValidatedPluginConfig, Error> {
		if self.name.is_empty() {
			return Err(Error::new(ErrorKind::InvalidName, "plugin name is empty"));
		}
		if self.version.is_empty() {
			return Err(Error::new(
				ErrorKind::InvalidVersion,
				format!("plugin '{}' has an empty version", self.name),
			));
		}
		let pattern = Pattern::parse(&self.pattern).map_err(|e| {
			Error::new(
				ErrorKind::InvalidPattern,
				format!("plugin '{}' has an invalid pattern: {e}", self.name),
			)
		})?;
		Ok(ValidatedPluginConfig {
			name: self.name,
			version: self.version,
			pattern,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_name() {
		let cfg = UnvalidatedPluginConfig {
			name: String::new(),
			version: "1.0".into(),
			pattern: "**".into(),
		};
		assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::InvalidName);
	}

	#[test]
	fn rejects_invalid_pattern() {
		let cfg = UnvalidatedPluginConfig {
			name: "bad".into(),
			version: "v1".into(),
			pattern: "a*a".into(),
		};
		assert_eq!(
			cfg.validate().unwrap_err().kind(),
			ErrorKind::InvalidPattern
		);
	}
}
