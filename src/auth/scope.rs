//! Normalized OAuth scope sets.

// std
use std::collections::BTreeSet;
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Deduplicated, sorted set of OAuth scopes.
///
/// Two sets requesting the same scopes in any order compare, hash, and fingerprint equally,
/// which is what makes them usable inside cache keys.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
			}

			set.insert(owned);
		}

		Ok(Self(set.into_iter().collect()))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are requested.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains `scope`.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Joins the scopes with `delimiter`, or `None` when the set is empty.
	pub fn join(&self, delimiter: char) -> Option<String> {
		if self.is_empty() {
			return None;
		}

		let mut buf = String::new();

		for (idx, value) in self.iter().enumerate() {
			if idx > 0 {
				buf.push(delimiter);
			}

			buf.push_str(value);
		}

		Some(buf)
	}

	/// Space-delimited representation, empty for an empty set.
	pub fn normalized(&self) -> String {
		self.join(' ').unwrap_or_default()
	}

	/// Short, stable digest of the normalized scopes, safe to put in logs and metric labels.
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(self.normalized().as_bytes());

		URL_SAFE_NO_PAD.encode(&digest[..12])
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_seq(self.iter())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ordering_and_duplicates_do_not_change_identity() {
		let lhs = ScopeSet::new(["archive.write", "archive.read", "archive.write"])
			.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new(["archive.read", "archive.write"])
			.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.normalized(), "archive.read archive.write");
		assert_eq!(lhs.fingerprint(), rhs.fingerprint());
		assert_eq!(lhs.len(), 2);
	}

	#[test]
	fn whitespace_and_empty_entries_are_rejected() {
		let err = ScopeSet::new([" profile"]).expect_err("Padded scopes must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsWhitespace { .. }));
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
		assert!(ScopeSet::from_str("").is_ok_and(|set| set.is_empty()));
		assert!(ScopeSet::from_str("  ").is_err());
	}

	#[test]
	fn join_honors_custom_delimiters() {
		let scope = ScopeSet::from_str("write read").expect("Scope string should parse.");

		assert!(scope.contains("read"));
		assert!(!scope.contains("admin"));
		assert_eq!(scope.join(','), Some("read,write".into()));
		assert_eq!(ScopeSet::default().join(' '), None);
	}

	#[test]
	fn deserialization_normalizes() {
		let scope: ScopeSet = serde_json::from_str("[\"b\",\"a\",\"b\"]")
			.expect("Scope array should deserialize.");

		assert_eq!(serde_json::to_string(&scope).expect("Scope should serialize."), "[\"a\",\"b\"]");
		assert!(serde_json::from_str::<ScopeSet>("[\"a b\"]").is_err());
	}
}
