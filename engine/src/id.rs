// SPDX-License-Identifier: Apache-2.0

//! Secret identifiers and patterns.
//!
//! Out of the plugin runtime's scope per the architecture this engine
//! follows, but the runtime needs a concrete value type to compile against,
//! so this is the opaque-but-real implementation the rest of the crate
//! treats as a black box: components separated by `/`, patterns additionally
//! admitting `*` and `**` as whole components.

use crate::error::{Error, ErrorKind};
use std::fmt;

fn valid_component_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

fn split_components(s: &str) -> Result<Vec<&str>, Error> {
	if s.is_empty() {
		return Err(Error::new(ErrorKind::InvalidId, "identifier is empty"));
	}
	let parts: Vec<&str> = s.split('/').collect();
	if parts.iter().any(|p| p.is_empty()) {
		return Err(Error::new(
			ErrorKind::InvalidId,
			format!("identifier '{s}' has an empty component"),
		));
	}
	Ok(parts)
}

/// An immutable, validated secret identifier. Total order under its string
/// form; case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
	pub fn parse(s: &str) -> Result<Self, Error> {
		let parts = split_components(s)
			.map_err(|_| Error::new(ErrorKind::InvalidId, format!("invalid identifier '{s}'")))?;
		for part in &parts {
			if !part.chars().all(valid_component_char) {
				return Err(Error::new(
					ErrorKind::InvalidId,
					format!("invalid identifier '{s}': component '{part}' has disallowed characters"),
				));
			}
		}
		Ok(Identifier(s.to_owned()))
	}

	/// Parses `s`, panicking on failure. Reserved for test code and
	/// compile-time constants, never for runtime-supplied input.
	pub fn must_parse(s: &str) -> Self {
		Self::parse(s).unwrap_or_else(|e| panic!("must_parse: {e}"))
	}

	pub fn string(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentPattern<'a> {
	Literal(&'a str),
	Star,
	DoubleStar,
}

/// An immutable, validated secret pattern: an [`Identifier`] grammar plus
/// `*` (matches exactly one component) and `**` (matches zero or more
/// trailing components, only as the final component).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern(String);

impl Pattern {
	pub fn parse(s: &str) -> Result<Self, Error> {
		let parts = split_components(s)
			.map_err(|_| Error::new(ErrorKind::InvalidPattern, format!("invalid pattern '{s}'")))?;

		for (i, part) in parts.iter().enumerate() {
			if *part == "*" {
				continue;
			}
			if *part == "**" {
				if i != parts.len() - 1 {
					return Err(Error::new(
						ErrorKind::InvalidPattern,
						format!("invalid pattern '{s}': '**' must be the final component"),
					));
				}
				continue;
			}
			if part.contains('*') {
				return Err(Error::new(
					ErrorKind::InvalidPattern,
					format!(
						"invalid pattern '{s}': component '{part}' mixes '*' with other characters"
					),
				));
			}
			if !part.chars().all(valid_component_char) {
				return Err(Error::new(
					ErrorKind::InvalidPattern,
					format!("invalid pattern '{s}': component '{part}' has disallowed characters"),
				));
			}
		}

		Ok(Pattern(s.to_owned()))
	}

	pub fn must_parse(s: &str) -> Self {
		Self::parse(s).unwrap_or_else(|e| panic!("must_parse: {e}"))
	}

	pub fn string(&self) -> &str {
		&self.0
	}

	fn components(&self) -> Vec<ComponentPattern<'_>> {
		self.0
			.split('/')
			.map(|p| match p {
				"*" => ComponentPattern::Star,
				"**" => ComponentPattern::DoubleStar,
				other => ComponentPattern::Literal(other),
			})
			.collect()
	}

	/// Whether `id` is matched by this pattern.
	pub fn matches(&self, id: &Identifier) -> bool {
		let pattern = self.components();
		let target: Vec<&str> = id.string().split('/').collect();
		Self::match_components(&pattern, &target)
	}

	fn match_components(pattern: &[ComponentPattern<'_>], target: &[&str]) -> bool {
		match pattern.first() {
			None => target.is_empty(),
			Some(ComponentPattern::DoubleStar) => true,
			Some(ComponentPattern::Star) => {
				!target.is_empty() && Self::match_components(&pattern[1..], &target[1..])
			}
			Some(ComponentPattern::Literal(lit)) => {
				!target.is_empty()
					&& target[0] == *lit
					&& Self::match_components(&pattern[1..], &target[1..])
			}
		}
	}

	/// Whether every identifier matched by `other` is also matched by
	/// `self`; equivalently, `self` is at least as broad as `other`.
	pub fn includes(&self, other: &Pattern) -> bool {
		let a = self.components();
		let b = other.components();
		Self::includes_components(&a, &b)
	}

	fn includes_components(a: &[ComponentPattern<'_>], b: &[ComponentPattern<'_>]) -> bool {
		match (a.first(), b.first()) {
			(None, None) => true,
			(Some(ComponentPattern::DoubleStar), _) => true,
			(None, _) | (_, None) => false,
			(Some(ComponentPattern::Star), Some(ComponentPattern::DoubleStar)) => false,
			(Some(ComponentPattern::Star), _) => Self::includes_components(&a[1..], &b[1..]),
			(Some(ComponentPattern::Literal(_)), Some(ComponentPattern::Star))
			| (Some(ComponentPattern::Literal(_)), Some(ComponentPattern::DoubleStar)) => false,
			(Some(ComponentPattern::Literal(x)), Some(ComponentPattern::Literal(y))) => {
				x == y && Self::includes_components(&a[1..], &b[1..])
			}
		}
	}
}

impl fmt::Display for Pattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Narrows `a` and `b` to their common subset: if either includes the
/// other, returns the narrower of the two. Otherwise the two patterns are
/// disjoint and `None` is returned — callers (the resolver) treat that as
/// "skip this plugin" rather than an error.
pub fn filter(a: &Pattern, b: &Pattern) -> Option<Pattern> {
	if a.includes(b) {
		Some(b.clone())
	} else if b.includes(a) {
		Some(a.clone())
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pattern_round_trip() {
		for text in ["foo", "foo/bar", "*", "foo/*", "foo/**", "**"] {
			let pattern = Pattern::parse(text).expect("valid pattern");
			assert_eq!(pattern.string(), text);
		}
	}

	#[test]
	fn rejects_mixed_wildcard_component() {
		assert!(Pattern::parse("a*a").is_err());
	}

	#[test]
	fn rejects_double_star_not_final() {
		assert!(Pattern::parse("**/foo").is_err());
	}

	#[test]
	fn filter_idempotent() {
		for text in ["foo", "foo/*", "**"] {
			let p = Pattern::parse(text).unwrap();
			assert_eq!(filter(&p, &p).unwrap().string(), text);
		}
	}

	#[test]
	fn filter_symmetry_under_inclusion() {
		let broad = Pattern::parse("**").unwrap();
		let narrow = Pattern::parse("foo/bar").unwrap();
		assert_eq!(filter(&broad, &narrow).unwrap(), narrow);
		assert_eq!(filter(&narrow, &broad).unwrap(), narrow);
	}

	#[test]
	fn disjoint_patterns_have_no_filter() {
		let a = Pattern::parse("foo/bar").unwrap();
		let b = Pattern::parse("baz/qux").unwrap();
		assert!(filter(&a, &b).is_none());
	}

	#[test]
	fn matches_star_and_double_star() {
		let star = Pattern::parse("*/my-secret").unwrap();
		assert!(star.matches(&Identifier::must_parse("1password/my-secret")));
		assert!(!star.matches(&Identifier::must_parse("my-secret")));

		let double_star = Pattern::parse("**").unwrap();
		assert!(double_star.matches(&Identifier::must_parse("a/b/c")));
	}
}
