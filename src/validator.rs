//! Resource-server validation of inbound bearer tokens.
//!
//! [`ResourceServerValidator`] checks signature, expiry, issuer, and audience against a cached
//! [`SigningKeySet`]. The set is reloaded once it is older than
//! [`ValidatorSettings::key_set_ttl`]. A token naming an unknown key triggers one forced
//! reload, and forced reloads are limited to one per
//! [`ValidatorSettings::key_refresh_interval`].

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	error::ValidationError,
	jwks::{KeySetFetcher, SigningKey, SigningKeySet},
	obs::{self, OpKind, OpOutcome, OpSpan},
	server::ServerDescriptor,
};

/// Tunables for [`ResourceServerValidator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSettings {
	/// Required `iss` claim; unchecked when `None`.
	pub issuer: Option<String>,
	/// Accepted `aud` values; unchecked when empty.
	pub audiences: Vec<String>,
	/// Signature algorithms tokens may declare.
	pub algorithms: Vec<Algorithm>,
	/// Clock skew tolerated for `exp` and `nbf`.
	pub leeway: Duration,
	/// Age after which the key set is reloaded.
	pub key_set_ttl: Duration,
	/// Minimum spacing between forced reloads triggered by unknown key ids.
	pub key_refresh_interval: Duration,
	/// Keep validating against the last-known keys when a reload fails transiently.
	pub allow_stale_keys: bool,
}
impl ValidatorSettings {
	/// Takes issuer and audiences from the authorization server descriptor.
	pub fn from_descriptor(descriptor: &ServerDescriptor) -> Self {
		Self {
			issuer: descriptor.issuer.clone(),
			audiences: descriptor.audiences.clone(),
			..Default::default()
		}
	}

	/// Replaces the algorithm allow-list.
	pub fn with_algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
		self.algorithms = algorithms.into_iter().collect();

		self
	}

	/// Sets the forced-reload interval.
	pub fn with_key_refresh_interval(mut self, interval: Duration) -> Self {
		self.key_refresh_interval = interval;

		self
	}

	/// Sets the key set time-to-live.
	pub fn with_key_set_ttl(mut self, ttl: Duration) -> Self {
		self.key_set_ttl = ttl;

		self
	}

	/// Enables or disables stale-key tolerance.
	pub fn with_stale_keys(mut self, allow: bool) -> Self {
		self.allow_stale_keys = allow;

		self
	}

	fn validation(&self, algorithm: Algorithm) -> Validation {
		let mut validation = Validation::new(algorithm);
		let mut required = vec!["exp"];

		validation.leeway = self.leeway.whole_seconds().max(0).unsigned_abs();
		validation.validate_nbf = true;

		if let Some(issuer) = &self.issuer {
			validation.set_issuer(&[issuer]);
			required.push("iss");
		}
		if self.audiences.is_empty() {
			validation.validate_aud = false;
		} else {
			validation.set_audience(self.audiences.as_slice());
			required.push("aud");
		}

		validation.set_required_spec_claims(required.as_slice());

		validation
	}
}
impl Default for ValidatorSettings {
	fn default() -> Self {
		Self {
			issuer: None,
			audiences: Vec::new(),
			algorithms: vec![Algorithm::RS256],
			leeway: Duration::seconds(60),
			key_set_ttl: Duration::seconds(300),
			key_refresh_interval: Duration::seconds(60),
			allow_stale_keys: false,
		}
	}
}

/// Claims of a token that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedClaims {
	/// `sub` claim.
	pub subject: Option<String>,
	/// `iss` claim.
	pub issuer: Option<String>,
	/// `aud` claim, normalized to a list.
	pub audiences: Vec<String>,
	/// `exp` claim.
	pub expires_at: OffsetDateTime,
	/// Key id that signed the token.
	pub key_id: Option<String>,
	/// Every claim in the payload, including the registered ones above.
	pub claims: Map<String, Value>,
}
impl ValidatedClaims {
	fn from_claims(claims: Map<String, Value>, key_id: Option<String>) -> Result<Self> {
		let expires_at = claims
			.get("exp")
			.and_then(Value::as_i64)
			.and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
			.ok_or_else(|| ValidationError::invalid("exp claim is not a valid timestamp"))?;
		let audiences = match claims.get("aud") {
			Some(Value::String(aud)) => vec![aud.clone()],
			Some(Value::Array(values)) =>
				values.iter().filter_map(Value::as_str).map(ToOwned::to_owned).collect(),
			_ => Vec::new(),
		};

		Ok(Self {
			subject: claims.get("sub").and_then(Value::as_str).map(ToOwned::to_owned),
			issuer: claims.get("iss").and_then(Value::as_str).map(ToOwned::to_owned),
			audiences,
			expires_at,
			key_id,
			claims,
		})
	}

	/// Raw claim value.
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.claims.get(name)
	}

	/// Claim as a string; numbers are rendered.
	pub fn string(&self, name: &str) -> Option<String> {
		match self.claims.get(name)? {
			Value::String(value) => Some(value.clone()),
			Value::Number(value) => Some(value.to_string()),
			_ => None,
		}
	}

	/// Claim as a list of strings; a single string is a one-element list.
	pub fn string_list(&self, name: &str) -> Vec<String> {
		match self.claims.get(name) {
			Some(Value::String(value)) => vec![value.clone()],
			Some(Value::Array(values)) => values
				.iter()
				.filter_map(|value| match value {
					Value::String(value) => Some(value.clone()),
					Value::Number(value) => Some(value.to_string()),
					_ => None,
				})
				.collect(),
			_ => Vec::new(),
		}
	}
}

/// Validates bearer tokens against the authorization server's signing keys.
pub struct ResourceServerValidator {
	fetcher: Arc<dyn KeySetFetcher>,
	settings: ValidatorSettings,
	keys: RwLock<Option<Arc<SigningKeySet>>>,
	last_forced_reload: Mutex<Option<OffsetDateTime>>,
	reload_lock: AsyncMutex<()>,
	reloads: AtomicU64,
}
impl ResourceServerValidator {
	/// Creates a validator; keys are downloaded on first use.
	pub fn new(fetcher: Arc<dyn KeySetFetcher>, settings: ValidatorSettings) -> Self {
		Self {
			fetcher,
			settings,
			keys: RwLock::new(None),
			last_forced_reload: Mutex::new(None),
			reload_lock: AsyncMutex::new(()),
			reloads: AtomicU64::new(0),
		}
	}

	/// Active settings.
	pub fn settings(&self) -> &ValidatorSettings {
		&self.settings
	}

	/// Currently cached key set, if one was loaded.
	pub fn key_set(&self) -> Option<Arc<SigningKeySet>> {
		self.keys.read().clone()
	}

	/// Number of key set downloads attempted so far.
	pub fn key_set_reloads(&self) -> u64 {
		self.reloads.load(Ordering::Relaxed)
	}

	/// Validates `token` and returns its claims.
	///
	/// Fails with [`ValidationError::ExpiredToken`] past `exp` plus leeway,
	/// [`ValidationError::UnknownSigner`] when the key id is absent even after the allowed
	/// reload, and [`ValidationError::InvalidToken`] for everything else wrong with the token.
	pub async fn validate(&self, token: &str) -> Result<ValidatedClaims> {
		const KIND: OpKind = OpKind::Validate;

		let span = OpSpan::new(KIND, "validate");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.validate_inner(token)).await;

		obs::record_result(KIND, result)
	}

	async fn validate_inner(&self, token: &str) -> Result<ValidatedClaims> {
		let header = jsonwebtoken::decode_header(token)
			.map_err(|err| ValidationError::invalid(format!("malformed token header: {err}")))?;

		if !self.settings.algorithms.contains(&header.alg) {
			return Err(
				ValidationError::invalid(format!("algorithm {:?} is not allowed", header.alg)).into()
			);
		}

		let kid = header.kid;
		let (keys, reloaded) = self.current_keys().await?;
		let key = match keys.select(kid.as_deref()) {
			Some(key) => key,
			// The download that just happened already counts as the forced reload.
			None if reloaded => {
				*self.last_forced_reload.lock() = Some(OffsetDateTime::now_utc());

				return Err(ValidationError::UnknownSigner { kid: kid.clone() }.into());
			},
			None => self.key_after_forced_reload(kid.as_deref()).await?,
		};

		if !key.allows(header.alg) {
			return Err(ValidationError::invalid(format!(
				"key {:?} is declared for {:?}, not {:?}",
				kid,
				key.algorithm(),
				header.alg
			))
			.into());
		}

		self.decode(token, header.alg, &key, kid)
	}

	fn decode(
		&self,
		token: &str,
		algorithm: Algorithm,
		key: &SigningKey,
		kid: Option<String>,
	) -> Result<ValidatedClaims> {
		let validation = self.settings.validation(algorithm);
		let data =
			jsonwebtoken::decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
				.map_err(|err| match err.kind() {
					ErrorKind::ExpiredSignature => ValidationError::ExpiredToken,
					ErrorKind::InvalidIssuer => ValidationError::invalid("issuer mismatch"),
					ErrorKind::InvalidAudience => ValidationError::invalid("audience mismatch"),
					ErrorKind::InvalidSignature => ValidationError::invalid("signature mismatch"),
					ErrorKind::ImmatureSignature =>
						ValidationError::invalid("token is not yet valid"),
					ErrorKind::MissingRequiredClaim(claim) =>
						ValidationError::invalid(format!("missing `{claim}` claim")),
					_ => ValidationError::invalid(err.to_string()),
				})?;

		ValidatedClaims::from_claims(data.claims, kid)
	}

	// Also reports whether this call downloaded the set (or tried to).
	async fn current_keys(&self) -> Result<(Arc<SigningKeySet>, bool)> {
		if let Some(keys) = self.fresh_keys() {
			return Ok((keys, false));
		}

		let _guard = self.reload_lock.lock().await;

		// Another caller may have reloaded while we waited for the lock.
		if let Some(keys) = self.fresh_keys() {
			return Ok((keys, false));
		}

		match self.reload().await {
			Ok(keys) => Ok((keys, true)),
			Err(err) if err.is_transient() && self.settings.allow_stale_keys =>
				match self.key_set() {
					Some(stale) => {
						obs::emit_event(
							OpKind::KeySetRefresh,
							OpOutcome::Failure,
							format_args!("serving stale key set: {err}"),
						);

						Ok((stale, true))
					},
					None => Err(err),
				},
			Err(err) => Err(err),
		}
	}

	fn fresh_keys(&self) -> Option<Arc<SigningKeySet>> {
		let now = OffsetDateTime::now_utc();

		self.key_set().filter(|keys| keys.age_at(now) < self.settings.key_set_ttl)
	}

	async fn key_after_forced_reload(&self, kid: Option<&str>) -> Result<Arc<SigningKey>> {
		let unknown = || Error::from(ValidationError::UnknownSigner { kid: kid.map(Into::into) });
		let _guard = self.reload_lock.lock().await;

		// A reload finished while we waited and may already carry the key.
		if let Some(key) = self.key_set().and_then(|keys| keys.select(kid)) {
			return Ok(key);
		}

		let now = OffsetDateTime::now_utc();

		{
			let mut last = self.last_forced_reload.lock();

			if last.is_some_and(|at| now - at < self.settings.key_refresh_interval) {
				obs::emit_event(
					OpKind::KeySetRefresh,
					OpOutcome::Failure,
					format_args!("forced reload suppressed for kid {kid:?}"),
				);

				return Err(unknown());
			}

			*last = Some(now);
		}

		self.reload().await?.select(kid).ok_or_else(unknown)
	}

	async fn reload(&self) -> Result<Arc<SigningKeySet>> {
		const KIND: OpKind = OpKind::KeySetRefresh;

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.reloads.fetch_add(1, Ordering::Relaxed);

		let result = <dyn KeySetFetcher>::fetch(self.fetcher.as_ref()).await.map(Arc::new);

		if let Ok(keys) = &result {
			*self.keys.write() = Some(keys.clone());

			obs::emit_event(KIND, OpOutcome::Success, format_args!("{} signing keys", keys.len()));
		}

		obs::record_result(KIND, result)
	}
}
impl Debug for ResourceServerValidator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResourceServerValidator")
			.field("settings", &self.settings)
			.field("keys", &self.key_set())
			.field("reloads", &self.key_set_reloads())
			.finish()
	}
}

/// Extracts the token from an `authorization` header value (`Bearer <token>`).
pub fn bearer_token(header: &str) -> Option<&str> {
	let (scheme, token) = header.trim().split_once(' ')?;
	let token = token.trim();

	(scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
