//! Granted-authority mapping for validated bearer tokens.
//!
//! Authorities are flat `PREFIX_value` strings such as `ORG_ID_42` or `ROLE_ADMIN`. The
//! [`AuthorityResolver`] turns validated claims into an [`Authentication`] carrying them, and
//! the helpers on [`Authentication`] answer the authorization questions consumers ask.
//! [`AccessPolicy`] gates whole APIs on those authorities.

pub mod access;
pub mod client;
pub mod permission;
pub mod resolver;
pub mod role;

pub use access::*;
pub use client::*;
pub use permission::*;
pub use resolver::*;
pub use role::*;

// self
use crate::_prelude::*;

/// Separator between an authority prefix and its value.
pub const AUTHORITY_DELIMITER: char = '_';

/// Families of granted authorities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthorityPrefix {
	/// Organization the user belongs to.
	OrgId,
	/// User role after filtering and hierarchy expansion.
	Role,
	/// Source application the caller may act for.
	SourceApplicationId,
	/// Internal client identified by the token subject.
	ClientId,
}
impl AuthorityPrefix {
	/// Prefix text without the delimiter.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::OrgId => "ORG_ID",
			Self::Role => "ROLE",
			Self::SourceApplicationId => "SOURCE_APPLICATION_ID",
			Self::ClientId => "CLIENT_ID",
		}
	}

	/// Renders `value` as an authority of this family.
	pub fn authority(self, value: impl Display) -> String {
		format!("{}{AUTHORITY_DELIMITER}{value}", self.as_str())
	}

	/// Returns the value part when `authority` belongs to this family.
	pub fn strip(self, authority: &str) -> Option<&str> {
		authority.strip_prefix(self.as_str())?.strip_prefix(AUTHORITY_DELIMITER)
	}

	/// Values of every authority in this family.
	pub fn extract_strings<'a>(
		self,
		authorities: impl IntoIterator<Item = &'a str>,
	) -> BTreeSet<String> {
		authorities
			.into_iter()
			.filter_map(|authority| self.strip(authority))
			.map(ToOwned::to_owned)
			.collect()
	}

	/// Numeric values of every authority in this family; non-numeric values are ignored.
	pub fn extract_ids<'a>(self, authorities: impl IntoIterator<Item = &'a str>) -> BTreeSet<i64> {
		authorities
			.into_iter()
			.filter_map(|authority| self.strip(authority))
			.filter_map(|value| value.parse().ok())
			.collect()
	}
}
impl Display for AuthorityPrefix {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn authorities_round_trip_through_their_prefix() {
		let authority = AuthorityPrefix::SourceApplicationId.authority(7);

		assert_eq!(authority, "SOURCE_APPLICATION_ID_7");
		assert_eq!(AuthorityPrefix::SourceApplicationId.strip(&authority), Some("7"));
		assert_eq!(AuthorityPrefix::ClientId.strip(&authority), None);
	}

	#[test]
	fn extraction_filters_by_family() {
		let authorities =
			["ORG_ID_org-1", "ROLE_ADMIN", "SOURCE_APPLICATION_ID_2", "SOURCE_APPLICATION_ID_x"];

		assert_eq!(
			AuthorityPrefix::SourceApplicationId.extract_ids(authorities),
			BTreeSet::from([2])
		);
		assert_eq!(
			AuthorityPrefix::Role.extract_strings(authorities),
			BTreeSet::from(["ADMIN".to_owned()])
		);
		assert!(AuthorityPrefix::ClientId.extract_strings(authorities).is_empty());
	}

	#[test]
	fn prefixes_need_the_delimiter() {
		assert_eq!(AuthorityPrefix::Role.strip("ROLEADMIN"), None);
		assert_eq!(AuthorityPrefix::OrgId.strip("ORG_ID_"), Some(""));
	}
}
