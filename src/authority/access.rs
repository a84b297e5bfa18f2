//! Per-API access gates over resolved authorities.

// self
use super::{AuthorityPrefix, Authentication, AuthorizationError, UserRole};
use crate::_prelude::*;

/// API surfaces a service exposes, each behind its own gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Api {
	/// Internal user API; requires the user role.
	Internal,
	/// Internal admin API; requires the admin role.
	InternalAdmin,
	/// API for internal clients; requires an allow-listed client id.
	InternalClient,
	/// API for external clients; requires an allow-listed source application.
	External,
}

/// Allow-lists behind the client-facing APIs.
///
/// An empty allow-list admits nobody.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessPolicy {
	/// Client ids admitted to [`Api::InternalClient`].
	pub authorized_client_ids: BTreeSet<String>,
	/// Source application ids admitted to [`Api::External`].
	pub authorized_source_application_ids: BTreeSet<i64>,
}
impl AccessPolicy {
	/// Admits `client_id` to the internal-client API.
	pub fn allow_client(mut self, client_id: impl Into<String>) -> Self {
		self.authorized_client_ids.insert(client_id.into());

		self
	}

	/// Admits `id` to the external API.
	pub fn allow_source_application(mut self, id: i64) -> Self {
		self.authorized_source_application_ids.insert(id);

		self
	}

	/// Authorities of which a caller of `api` needs at least one.
	pub fn required_authorities(&self, api: Api) -> BTreeSet<String> {
		match api {
			Api::Internal => BTreeSet::from([AuthorityPrefix::Role.authority(UserRole::User)]),
			Api::InternalAdmin =>
				BTreeSet::from([AuthorityPrefix::Role.authority(UserRole::Admin)]),
			Api::InternalClient => self
				.authorized_client_ids
				.iter()
				.map(|id| AuthorityPrefix::ClientId.authority(id))
				.collect(),
			Api::External => self
				.authorized_source_application_ids
				.iter()
				.map(|id| AuthorityPrefix::SourceApplicationId.authority(id))
				.collect(),
		}
	}

	/// Fails unless `authentication` passes the gate of `api`.
	pub fn authorize(
		&self,
		api: Api,
		authentication: &Authentication,
	) -> Result<(), AuthorizationError> {
		authentication.require_any_authority(&self.required_authorities(api))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn granted(authorities: &[String]) -> Authentication {
		Authentication {
			subject: Some("caller".into()),
			authorities: authorities.iter().cloned().collect(),
		}
	}

	#[test]
	fn user_apis_follow_the_role_hierarchy() {
		let policy = AccessPolicy::default();
		let admin = granted(&[
			AuthorityPrefix::Role.authority(UserRole::Admin),
			AuthorityPrefix::Role.authority(UserRole::User),
		]);
		let user = granted(&[AuthorityPrefix::Role.authority(UserRole::User)]);

		assert!(policy.authorize(Api::Internal, &admin).is_ok());
		assert!(policy.authorize(Api::InternalAdmin, &admin).is_ok());
		assert!(policy.authorize(Api::Internal, &user).is_ok());
		assert_eq!(
			policy.authorize(Api::InternalAdmin, &user),
			Err(AuthorizationError::MissingAuthority {
				required: BTreeSet::from(["ROLE_ADMIN".to_owned()]),
			})
		);
	}

	#[test]
	fn client_apis_admit_only_allow_listed_callers() {
		let policy =
			AccessPolicy::default().allow_client("svc-archive").allow_source_application(7);
		let internal = granted(&[AuthorityPrefix::ClientId.authority("svc-archive")]);
		let stranger = granted(&[AuthorityPrefix::ClientId.authority("svc-other")]);
		let external = granted(&[AuthorityPrefix::SourceApplicationId.authority(7)]);

		assert!(policy.authorize(Api::InternalClient, &internal).is_ok());
		assert!(policy.authorize(Api::InternalClient, &stranger).is_err());
		assert!(policy.authorize(Api::External, &external).is_ok());
		assert!(policy.authorize(Api::External, &internal).is_err());
		assert!(policy.authorize(Api::Internal, &internal).is_err(), "Clients are not users.");
	}

	#[test]
	fn empty_allow_lists_admit_nobody() {
		let policy = AccessPolicy::default();
		let external = granted(&[AuthorityPrefix::SourceApplicationId.authority(1)]);

		assert!(policy.required_authorities(Api::External).is_empty());
		assert_eq!(
			policy.authorize(Api::External, &external),
			Err(AuthorizationError::MissingAuthority { required: BTreeSet::new() })
		);
	}
}
