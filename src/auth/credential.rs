//! Credential scope: the identity of a token request and the token cache key.

// self
use crate::{
	_prelude::*,
	auth::{Audience, ClientId, ScopeSet},
};

/// Identifies one client-credentials token request.
///
/// Two scopes are equal when they name the same client, audience, and normalized scope set,
/// so they share one cache entry and one in-flight refresh.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CredentialScope {
	/// Client the token is issued to.
	pub client_id: ClientId,
	/// Resource server the token targets, if the authorization server expects one.
	pub audience: Option<Audience>,
	/// Requested scopes.
	pub scopes: ScopeSet,
}
impl CredentialScope {
	/// Creates a scope without an audience.
	pub fn new(client_id: ClientId, scopes: ScopeSet) -> Self {
		Self { client_id, audience: None, scopes }
	}

	/// Targets the token at `audience`.
	pub fn with_audience(mut self, audience: Audience) -> Self {
		self.audience = Some(audience);

		self
	}

	/// Compact label for spans and log lines; never includes secrets.
	pub fn label(&self) -> String {
		match &self.audience {
			Some(audience) => format!("{}@{}#{}", self.client_id, audience, self.scopes.fingerprint()),
			None => format!("{}#{}", self.client_id, self.scopes.fingerprint()),
		}
	}
}
impl Display for CredentialScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.label())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn client() -> ClientId {
		ClientId::new("svc-archive").expect("Client fixture should be valid.")
	}

	#[test]
	fn equal_requests_share_a_key() {
		let lhs = CredentialScope::new(
			client(),
			ScopeSet::new(["write", "read"]).expect("Scope fixture should be valid."),
		);
		let rhs = CredentialScope::new(
			client(),
			ScopeSet::new(["read", "write"]).expect("Scope fixture should be valid."),
		);
		let map = HashMap::from([(lhs.clone(), 1_u8)]);

		assert_eq!(map.get(&rhs), Some(&1));
		assert_eq!(lhs.label(), rhs.label());
	}

	#[test]
	fn audience_separates_keys() {
		let scopes = ScopeSet::new(["read"]).expect("Scope fixture should be valid.");
		let plain = CredentialScope::new(client(), scopes.clone());
		let targeted = CredentialScope::new(client(), scopes)
			.with_audience(Audience::new("archive-api").expect("Audience should be valid."));

		assert_ne!(plain, targeted);
		assert!(targeted.label().starts_with("svc-archive@archive-api#"));
		assert!(plain.label().starts_with("svc-archive#"));
	}
}
