//! User roles, their hierarchy, and the per-organization role filter.

// self
use crate::_prelude::*;

/// Roles a user token can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
	/// Regular user.
	User,
	/// Administrator; implies [`UserRole::User`].
	Admin,
	/// Developer; implies [`UserRole::Admin`].
	Developer,
}
impl UserRole {
	/// Every role, lowest first.
	pub const ALL: [Self; 3] = [Self::User, Self::Admin, Self::Developer];

	/// Authority value, e.g. `ADMIN`.
	pub const fn name(self) -> &'static str {
		match self {
			Self::User => "USER",
			Self::Admin => "ADMIN",
			Self::Developer => "DEVELOPER",
		}
	}

	/// Role directly implied by this one.
	pub const fn implies(self) -> Option<Self> {
		match self {
			Self::User => None,
			Self::Admin => Some(Self::User),
			Self::Developer => Some(Self::Admin),
		}
	}

	/// The given roles plus every role they imply.
	pub fn expand(roles: impl IntoIterator<Item = Self>) -> BTreeSet<Self> {
		let mut expanded = BTreeSet::new();

		for role in roles {
			let mut next = Some(role);

			while let Some(role) = next {
				expanded.insert(role);

				next = role.implies();
			}
		}

		expanded
	}
}
impl Display for UserRole {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.name())
	}
}

/// Role claim values and the roles each organization may use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
	/// Value of the `roles` claim that grants each role.
	pub claim_values: BTreeMap<UserRole, String>,
	/// Roles permitted per organization id; organizations without an entry get none.
	pub roles_per_org: BTreeMap<String, BTreeSet<UserRole>>,
}
impl RoleSettings {
	/// Maps a raw claim value to its role.
	pub fn role_for_claim(&self, value: &str) -> Option<UserRole> {
		self.claim_values
			.iter()
			.find(|(_, claim)| claim.as_str() == value)
			.map(|(role, _)| *role)
	}

	/// Allows `roles` for `organization_id`.
	pub fn allow(
		mut self,
		organization_id: impl Into<String>,
		roles: impl IntoIterator<Item = UserRole>,
	) -> Self {
		self.roles_per_org.entry(organization_id.into()).or_default().extend(roles);

		self
	}

	/// Roles from the raw claim values that `organization_id` permits, before expansion.
	pub fn filter<'a>(
		&self,
		claim_values: impl IntoIterator<Item = &'a str>,
		organization_id: &str,
	) -> BTreeSet<UserRole> {
		let Some(allowed) = self.roles_per_org.get(organization_id) else {
			return BTreeSet::new();
		};

		claim_values
			.into_iter()
			.filter_map(|value| self.role_for_claim(value))
			.filter(|role| allowed.contains(role))
			.collect()
	}
}
impl Default for RoleSettings {
	fn default() -> Self {
		Self {
			claim_values: UserRole::ALL
				.into_iter()
				.map(|role| (role, role.name().to_ascii_lowercase()))
				.collect(),
			roles_per_org: BTreeMap::new(),
		}
	}
}
