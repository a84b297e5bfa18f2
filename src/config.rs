//! Serde-deserializable courier configuration.
//!
//! Only the endpoints and the client id are required; every other field has a default. Parse
//! errors carry the path of the offending field.

// crates.io
use jsonwebtoken::Algorithm;
// self
use crate::{
	_prelude::*,
	auth::{Audience, ClientId, CredentialScope, ScopeSet, TokenSecret},
	authority::{AccessPolicy, RoleSettings},
	error::ConfigError,
	server::{ClientAuthMethod, ServerDescriptor},
	validator::ValidatorSettings,
};

const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Audience and scopes requested for one named use case.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScopeConfig {
	/// Target audience sent as the `audience` form parameter.
	pub audience: Option<Audience>,
	/// Requested scopes.
	pub scopes: ScopeSet,
}

/// Complete courier configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
	/// Token endpoint.
	pub token_uri: Url,
	/// JWKS endpoint.
	pub jwks_uri: Url,
	/// Required `iss` of inbound tokens.
	#[serde(default)]
	pub issuer: Option<String>,
	/// Accepted `aud` values of inbound tokens.
	#[serde(default)]
	pub audiences: Vec<String>,
	/// Client identifier used for outbound tokens.
	pub client_id: ClientId,
	/// Client secret used for outbound tokens.
	#[serde(default)]
	pub client_secret: Option<TokenSecret>,
	/// How the client authenticates at the token endpoint.
	#[serde(default)]
	pub client_auth_method: ClientAuthMethod,
	/// Named use cases and what they request.
	#[serde(default)]
	pub scopes: BTreeMap<String, ScopeConfig>,
	/// Remaining lifetime below which a cached token is refreshed.
	#[serde(default = "default_safety_margin_secs")]
	pub safety_margin_secs: u64,
	/// Minimum spacing of forced key set reloads.
	#[serde(default = "default_key_refresh_interval_secs")]
	pub key_refresh_interval_secs: u64,
	/// Age after which the key set is reloaded.
	#[serde(default = "default_key_set_ttl_secs")]
	pub key_set_ttl_secs: u64,
	/// Timeout of each token and key set request.
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
	/// Sends retried after an authentication rejection.
	#[serde(default = "default_max_auth_retries")]
	pub max_auth_retries: u32,
	/// Keep validating with the last-known keys when a reload fails.
	#[serde(default)]
	pub allow_stale_keys: bool,
	/// Clock skew tolerated for `exp` and `nbf`.
	#[serde(default = "default_leeway_secs")]
	pub leeway_secs: u64,
	/// Signature algorithms accepted on inbound tokens.
	#[serde(default = "default_algorithms")]
	pub algorithms: Vec<Algorithm>,
	/// Role claim values and per-organization role filter.
	#[serde(default)]
	pub authority: RoleSettings,
	/// Allow-lists of the client-facing APIs.
	#[serde(default)]
	pub access: AccessPolicy,
}
impl CourierConfig {
	/// Parses and validates a JSON document.
	pub fn from_json_str(document: &str) -> Result<Self> {
		let mut deserializer = serde_json::Deserializer::from_str(document);
		let config: Self = serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
			ConfigError::InvalidDocument {
				path: err.path().to_string(),
				message: err.inner().to_string(),
			}
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Checks cross-field constraints that serde cannot express.
	pub fn validate(&self) -> Result<()> {
		self.descriptor()?;

		if self.algorithms.is_empty() {
			return Err(invalid("algorithms", "at least one algorithm is required"));
		}
		if self.request_timeout_secs == 0 {
			return Err(invalid("request_timeout_secs", "must be positive"));
		}

		for (path, secs) in [
			("safety_margin_secs", self.safety_margin_secs),
			("key_refresh_interval_secs", self.key_refresh_interval_secs),
			("key_set_ttl_secs", self.key_set_ttl_secs),
			("request_timeout_secs", self.request_timeout_secs),
			("leeway_secs", self.leeway_secs),
		] {
			if secs > MAX_DURATION_SECS {
				return Err(invalid(path, "must not exceed one year"));
			}
		}

		Ok(())
	}

	/// Authorization-server descriptor for the configured endpoints.
	pub fn descriptor(&self) -> Result<ServerDescriptor> {
		let mut builder = ServerDescriptor::builder()
			.token_endpoint(self.token_uri.clone())
			.jwks_endpoint(self.jwks_uri.clone())
			.audiences(self.audiences.iter().cloned())
			.client_auth_method(self.client_auth_method);

		if let Some(issuer) = &self.issuer {
			builder = builder.issuer(issuer.clone());
		}

		builder.build().map_err(|err| ConfigError::from(err).into())
	}

	/// Validator settings derived from this configuration.
	pub fn validator_settings(&self) -> ValidatorSettings {
		ValidatorSettings {
			issuer: self.issuer.clone(),
			audiences: self.audiences.clone(),
			algorithms: self.algorithms.clone(),
			leeway: seconds(self.leeway_secs),
			key_set_ttl: seconds(self.key_set_ttl_secs),
			key_refresh_interval: seconds(self.key_refresh_interval_secs),
			allow_stale_keys: self.allow_stale_keys,
		}
	}

	/// Credential scope for the named use case.
	pub fn scope(&self, name: &str) -> Result<CredentialScope> {
		let config = self
			.scopes
			.get(name)
			.ok_or_else(|| ConfigError::UnknownScope { name: name.to_owned() })?;
		let scope = CredentialScope::new(self.client_id.clone(), config.scopes.clone());

		Ok(match &config.audience {
			Some(audience) => scope.with_audience(audience.clone()),
			None => scope,
		})
	}

	/// Token cache safety margin.
	pub fn safety_margin(&self) -> Duration {
		seconds(self.safety_margin_secs)
	}

	/// Per-request timeout.
	pub fn request_timeout(&self) -> Duration {
		seconds(self.request_timeout_secs)
	}
}

fn seconds(secs: u64) -> Duration {
	Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn invalid(path: &str, message: &str) -> Error {
	ConfigError::InvalidDocument { path: path.into(), message: message.into() }.into()
}

fn default_safety_margin_secs() -> u64 {
	30
}

fn default_key_refresh_interval_secs() -> u64 {
	60
}

fn default_key_set_ttl_secs() -> u64 {
	300
}

fn default_request_timeout_secs() -> u64 {
	10
}

fn default_max_auth_retries() -> u32 {
	1
}

fn default_leeway_secs() -> u64 {
	60
}

fn default_algorithms() -> Vec<Algorithm> {
	vec![Algorithm::RS256]
}
