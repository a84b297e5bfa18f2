//! Turns validated claims into an [`Authentication`].

// self
use super::{AuthorityPrefix, RoleSettings, SourceApplicationLookup, UserPermissionCache, UserRole};
use crate::{_prelude::*, error::ValidationError, validator::ValidatedClaims};

/// Claim naming the user's organization.
pub const ORGANIZATION_ID_CLAIM: &str = "organizationid";
/// Claim naming the user's directory object.
pub const OBJECT_IDENTIFIER_CLAIM: &str = "objectidentifier";
/// Claim listing the user's raw role values.
pub const ROLES_CLAIM: &str = "roles";

/// Access checks that failed for an otherwise valid caller.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthorizationError {
	/// Caller is not linked to any source application.
	#[error("Caller is not authorized for any source application.")]
	NoSourceApplication,
	/// Caller is linked to several source applications where exactly one is expected.
	#[error("Caller is authorized for several source applications: {ids:?}.")]
	MultipleSourceApplications {
		/// Every granted id.
		ids: BTreeSet<i64>,
	},
	/// Caller may not access data of this source application.
	#[error("Caller may not access data related to source application {id}.")]
	SourceApplicationDenied {
		/// Requested source application id.
		id: i64,
	},
	/// Caller lacks the role.
	#[error("Caller lacks the {role} role.")]
	MissingRole {
		/// Required role.
		role: UserRole,
	},
	/// Caller holds none of the authorities the API admits.
	#[error("Caller holds none of the required authorities: {required:?}.")]
	MissingAuthority {
		/// Authorities that would have been accepted.
		required: BTreeSet<String>,
	},
}

/// Authenticated principal with its granted authorities.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authentication {
	/// Token subject.
	pub subject: Option<String>,
	/// Granted `PREFIX_value` authorities.
	pub authorities: BTreeSet<String>,
}
impl Authentication {
	/// Returns true if `authority` was granted.
	pub fn has_authority(&self, authority: &str) -> bool {
		self.authorities.contains(authority)
	}

	/// Values granted under `prefix`.
	pub fn values(&self, prefix: AuthorityPrefix) -> BTreeSet<String> {
		prefix.extract_strings(self.authorities.iter().map(String::as_str))
	}

	/// Source application ids the caller may act for.
	pub fn source_application_ids(&self) -> BTreeSet<i64> {
		AuthorityPrefix::SourceApplicationId
			.extract_ids(self.authorities.iter().map(String::as_str))
	}

	/// The single source application the caller acts for.
	pub fn source_application_id(&self) -> Result<i64, AuthorizationError> {
		let ids = self.source_application_ids();

		if ids.len() > 1 {
			return Err(AuthorizationError::MultipleSourceApplications { ids });
		}

		ids.first().copied().ok_or(AuthorizationError::NoSourceApplication)
	}

	/// Fails unless `id` is among the caller's source applications.
	pub fn require_source_application(&self, id: i64) -> Result<(), AuthorizationError> {
		if self.source_application_ids().contains(&id) {
			Ok(())
		} else {
			Err(AuthorizationError::SourceApplicationDenied { id })
		}
	}

	/// Returns true if `role` was granted, directly or through the hierarchy.
	pub fn has_role(&self, role: UserRole) -> bool {
		self.has_authority(&AuthorityPrefix::Role.authority(role))
	}

	/// Fails unless `role` was granted.
	pub fn require_role(&self, role: UserRole) -> Result<(), AuthorizationError> {
		if self.has_role(role) { Ok(()) } else { Err(AuthorizationError::MissingRole { role }) }
	}

	/// Fails unless at least one of `required` was granted; an empty set admits nobody.
	pub fn require_any_authority(
		&self,
		required: &BTreeSet<String>,
	) -> Result<(), AuthorizationError> {
		if required.iter().any(|authority| self.has_authority(authority)) {
			Ok(())
		} else {
			Err(AuthorizationError::MissingAuthority { required: required.clone() })
		}
	}

	/// Client id of an internal client token.
	pub fn client_id(&self) -> Option<String> {
		self.values(AuthorityPrefix::ClientId).into_iter().next()
	}
}

/// Maps validated claims to authorities.
///
/// User tokens carry `organizationid` and `objectidentifier`; they receive `ORG_ID_*`,
/// filtered and expanded `ROLE_*`, and the `SOURCE_APPLICATION_ID_*` grants recorded in the
/// [`UserPermissionCache`]. Any other token is a client token and receives `CLIENT_ID_<sub>`,
/// plus `SOURCE_APPLICATION_ID_*` when a [`SourceApplicationLookup`] knows the client.
#[derive(Clone, Default)]
pub struct AuthorityResolver {
	roles: RoleSettings,
	permissions: UserPermissionCache,
	source_applications: Option<Arc<dyn SourceApplicationLookup>>,
}
impl AuthorityResolver {
	/// Creates a resolver over the role settings and permission cache.
	pub fn new(roles: RoleSettings, permissions: UserPermissionCache) -> Self {
		Self { roles, permissions, source_applications: None }
	}

	/// Maps client token subjects to source applications through `lookup`.
	pub fn with_source_applications(mut self, lookup: Arc<dyn SourceApplicationLookup>) -> Self {
		self.source_applications = Some(lookup);

		self
	}

	/// Role settings in use.
	pub fn roles(&self) -> &RoleSettings {
		&self.roles
	}

	/// Permission cache consulted for user tokens.
	pub fn permissions(&self) -> &UserPermissionCache {
		&self.permissions
	}

	/// Resolves the authorities for `claims`.
	///
	/// A user token missing either user claim is rejected as
	/// [`ValidationError::InvalidToken`].
	pub fn resolve(&self, claims: &ValidatedClaims) -> Result<Authentication> {
		let organization_id = claims.string(ORGANIZATION_ID_CLAIM);
		let object_identifier = claims.string(OBJECT_IDENTIFIER_CLAIM);
		let mut authorities = BTreeSet::new();

		match (organization_id, object_identifier) {
			(None, None) =>
				if let Some(subject) = &claims.subject {
					authorities.insert(AuthorityPrefix::ClientId.authority(subject));

					if let Some(id) = self
						.source_applications
						.as_ref()
						.and_then(|lookup| lookup.source_application_id(subject))
					{
						authorities.insert(AuthorityPrefix::SourceApplicationId.authority(id));
					}
				},
			(Some(organization_id), Some(object_identifier)) => {
				authorities.insert(AuthorityPrefix::OrgId.authority(&organization_id));

				if let Some(ids) = self.permissions.source_application_ids(&object_identifier) {
					authorities.extend(
						ids.into_iter().map(|id| AuthorityPrefix::SourceApplicationId.authority(id)),
					);
				}

				let raw_roles = claims.string_list(ROLES_CLAIM);
				let granted = UserRole::expand(
					self.roles.filter(raw_roles.iter().map(String::as_str), &organization_id),
				);

				authorities
					.extend(granted.into_iter().map(|role| AuthorityPrefix::Role.authority(role)));
			},
			(None, Some(_)) =>
				return Err(ValidationError::invalid(format!(
					"missing `{ORGANIZATION_ID_CLAIM}` claim"
				))
				.into()),
			(Some(_), None) =>
				return Err(ValidationError::invalid(format!(
					"missing `{OBJECT_IDENTIFIER_CLAIM}` claim"
				))
				.into()),
		}

		Ok(Authentication { subject: claims.subject.clone(), authorities })
	}
}
impl Debug for AuthorityResolver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorityResolver")
			.field("roles", &self.roles)
			.field("permissions", &self.permissions.len())
			.field("source_applications", &self.source_applications.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::{Map, Value, json};
	// self
	use super::*;
	use crate::authority::ClientAuthorizationCache;

	fn claims(value: Value) -> ValidatedClaims {
		let Value::Object(claims) = value else { panic!("Fixture must be an object.") };

		ValidatedClaims {
			subject: claims.get("sub").and_then(Value::as_str).map(Into::into),
			issuer: None,
			audiences: Vec::new(),
			expires_at: OffsetDateTime::now_utc() + Duration::minutes(5),
			key_id: None,
			claims,
		}
	}

	fn resolver() -> AuthorityResolver {
		let permissions = UserPermissionCache::default();

		permissions.put("user-1", BTreeSet::from([11, 12]));

		AuthorityResolver::new(
			RoleSettings::default().allow("org-1", [UserRole::Developer, UserRole::User]),
			permissions,
		)
	}

	#[test]
	fn user_tokens_receive_org_role_and_source_application_authorities() {
		let auth = resolver()
			.resolve(&claims(json!({
				"sub": "someone",
				"organizationid": "org-1",
				"objectidentifier": "user-1",
				"roles": ["developer", "admin"],
			})))
			.expect("User token should resolve.");

		assert!(auth.has_authority("ORG_ID_org-1"));
		assert!(auth.has_role(UserRole::Developer));
		assert!(auth.has_role(UserRole::Admin), "Admin is implied by developer.");
		assert!(auth.has_role(UserRole::User));
		assert_eq!(auth.source_application_ids(), BTreeSet::from([11, 12]));
		assert!(auth.require_source_application(12).is_ok());
		assert_eq!(
			auth.require_source_application(13),
			Err(AuthorizationError::SourceApplicationDenied { id: 13 })
		);
		assert!(matches!(
			auth.source_application_id(),
			Err(AuthorizationError::MultipleSourceApplications { .. })
		));
		assert_eq!(auth.client_id(), None);
	}

	#[test]
	fn roles_outside_the_organization_filter_are_dropped() {
		let auth = resolver()
			.resolve(&claims(json!({
				"organizationid": "org-2",
				"objectidentifier": "user-2",
				"roles": "developer",
			})))
			.expect("User token should resolve.");

		assert_eq!(auth.authorities, BTreeSet::from(["ORG_ID_org-2".to_owned()]));
		assert_eq!(auth.source_application_id(), Err(AuthorizationError::NoSourceApplication));
		assert_eq!(
			auth.require_role(UserRole::User),
			Err(AuthorizationError::MissingRole { role: UserRole::User })
		);
	}

	#[test]
	fn client_tokens_receive_their_client_id() {
		let auth = resolver()
			.resolve(&claims(json!({ "sub": "svc-archive" })))
			.expect("Client token should resolve.");

		assert_eq!(auth.client_id().as_deref(), Some("svc-archive"));
		assert!(auth.source_application_ids().is_empty());

		let anonymous = resolver().resolve(&claims(Value::Object(Map::new()))).expect("Resolves.");

		assert!(anonymous.authorities.is_empty());
	}

	#[test]
	fn known_external_clients_act_for_their_source_application() {
		let clients = ClientAuthorizationCache::default();

		clients.put("svc-acos", 4);

		let resolver = resolver().with_source_applications(Arc::new(clients));
		let auth = resolver
			.resolve(&claims(json!({ "sub": "svc-acos" })))
			.expect("Client token should resolve.");

		assert_eq!(auth.client_id().as_deref(), Some("svc-acos"));
		assert_eq!(auth.source_application_id(), Ok(4));

		let unknown = resolver
			.resolve(&claims(json!({ "sub": "svc-unknown" })))
			.expect("Client token should resolve.");

		assert_eq!(unknown.source_application_id(), Err(AuthorizationError::NoSourceApplication));
	}

	#[test]
	fn any_of_several_authorities_is_enough() {
		let auth = resolver()
			.resolve(&claims(json!({ "sub": "svc-archive" })))
			.expect("Client token should resolve.");
		let required =
			BTreeSet::from(["CLIENT_ID_svc-other".to_owned(), "CLIENT_ID_svc-archive".to_owned()]);

		assert!(auth.require_any_authority(&required).is_ok());
		assert!(matches!(
			auth.require_any_authority(&BTreeSet::from(["ROLE_USER".to_owned()])),
			Err(AuthorizationError::MissingAuthority { .. })
		));
	}

	#[test]
	fn partial_user_tokens_are_rejected() {
		let err = resolver()
			.resolve(&claims(json!({ "organizationid": "org-1" })))
			.expect_err("Object identifier is required.");

		assert!(matches!(err, Error::Validation(ValidationError::InvalidToken { .. })));
		assert!(resolver().resolve(&claims(json!({ "objectidentifier": "user-1" }))).is_err());
	}
}
