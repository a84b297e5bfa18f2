//! Signing key sets and the fetchers that download them.

// std
use std::time::Duration as StdDuration;
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
	Algorithm, DecodingKey,
	jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
// self
use crate::{
	_prelude::*,
	error::TransientError,
	obs::{self, OpKind, OpOutcome},
};

/// Future returned by [`KeySetFetcher`] implementations.
pub type KeySetFuture<'a> = Pin<Box<dyn Future<Output = Result<SigningKeySet>> + 'a + Send>>;

const ENDPOINT: &str = "jwks";

/// Downloads the authorization server's current signing keys.
pub trait KeySetFetcher: Send + Sync {
	/// Fetches and parses the key set; failures to reach the endpoint are transient.
	fn fetch(&self) -> KeySetFuture<'_>;
}

/// One verification key from a key set.
#[derive(Clone)]
pub struct SigningKey {
	kid: Option<String>,
	algorithm: Option<Algorithm>,
	key: DecodingKey,
}
impl SigningKey {
	/// Key id, absent when the server published the key without one.
	pub fn kid(&self) -> Option<&str> {
		self.kid.as_deref()
	}

	/// Algorithm the key is declared for; `None` when the JWK carries no `alg`.
	pub fn algorithm(&self) -> Option<Algorithm> {
		self.algorithm
	}

	/// Whether a token signed with `algorithm` may be verified by this key.
	pub fn allows(&self, algorithm: Algorithm) -> bool {
		self.algorithm.is_none_or(|declared| declared == algorithm)
	}

	/// Key material for signature verification.
	pub fn decoding_key(&self) -> &DecodingKey {
		&self.key
	}
}
impl Debug for SigningKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SigningKey")
			.field("kid", &self.kid)
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}

/// Immutable snapshot of signing keys indexed by key id.
///
/// The validator swaps whole snapshots, so readers never observe a half-updated set.
#[derive(Clone)]
pub struct SigningKeySet {
	keys: HashMap<String, Arc<SigningKey>>,
	unnamed: Vec<Arc<SigningKey>>,
	fetched_at: OffsetDateTime,
}
impl SigningKeySet {
	/// Builds a snapshot from a parsed JWKS document.
	///
	/// Encryption keys and keys with unsupported parameters are skipped.
	pub fn from_jwks(set: &JwkSet, fetched_at: OffsetDateTime) -> Self {
		let mut keys = HashMap::new();
		let mut unnamed = Vec::new();

		for jwk in &set.keys {
			match signing_key(jwk) {
				Ok(key) => match key.kid.clone() {
					Some(kid) => {
						keys.insert(kid, Arc::new(key));
					},
					None => unnamed.push(Arc::new(key)),
				},
				Err(reason) => obs::emit_event(
					OpKind::KeySetRefresh,
					OpOutcome::Failure,
					format!(
						"skipping key `{}`: {reason}",
						jwk.common.key_id.as_deref().unwrap_or("<no kid>")
					),
				),
			}
		}

		Self { keys, unnamed, fetched_at }
	}

	/// Parses a raw JWKS document.
	pub fn parse(body: &[u8], fetched_at: OffsetDateTime) -> Result<Self, serde_json::Error> {
		let set = serde_json::from_slice::<JwkSet>(body)?;

		Ok(Self::from_jwks(&set, fetched_at))
	}

	/// Picks the key for `kid`.
	///
	/// A token without `kid` matches the only key published without one, or else the only key
	/// of the set.
	pub fn select(&self, kid: Option<&str>) -> Option<Arc<SigningKey>> {
		match kid {
			Some(kid) => self.keys.get(kid).cloned(),
			None => match (self.unnamed.as_slice(), self.keys.len()) {
				([only], _) => Some(only.clone()),
				([], 1) => self.keys.values().next().cloned(),
				_ => None,
			},
		}
	}

	/// Returns true if `kid` is present.
	pub fn contains(&self, kid: &str) -> bool {
		self.keys.contains_key(kid)
	}

	/// Known key ids, unordered.
	pub fn kids(&self) -> impl Iterator<Item = &str> {
		self.keys.keys().map(String::as_str)
	}

	/// Number of usable keys, with or without a key id.
	pub fn len(&self) -> usize {
		self.keys.len() + self.unnamed.len()
	}

	/// Returns true when no usable key was published.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Instant the snapshot was downloaded.
	pub fn fetched_at(&self) -> OffsetDateTime {
		self.fetched_at
	}

	/// Age of the snapshot at `now`.
	pub fn age_at(&self, now: OffsetDateTime) -> Duration {
		now - self.fetched_at
	}
}
impl Debug for SigningKeySet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let mut kids = self.kids().collect::<Vec<_>>();

		kids.sort_unstable();

		f.debug_struct("SigningKeySet")
			.field("kids", &kids)
			.field("unnamed", &self.unnamed.len())
			.field("fetched_at", &self.fetched_at)
			.finish()
	}
}

fn signing_key(jwk: &Jwk) -> Result<SigningKey, String> {
	if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
		return Err("key is published for encryption".into());
	}

	let algorithm = match &jwk.common.key_algorithm {
		Some(declared) => Some(
			signature_algorithm(declared)
				.ok_or_else(|| format!("{declared:?} is not a signature algorithm"))?,
		),
		None => None,
	};
	let key = match &jwk.algorithm {
		AlgorithmParameters::OctetKey(params) => URL_SAFE_NO_PAD
			.decode(params.value.trim_end_matches('='))
			.map(|secret| DecodingKey::from_secret(&secret))
			.map_err(|err| err.to_string())?,
		_ => DecodingKey::from_jwk(jwk).map_err(|err| err.to_string())?,
	};

	Ok(SigningKey { kid: jwk.common.key_id.clone(), algorithm, key })
}

fn signature_algorithm(declared: &KeyAlgorithm) -> Option<Algorithm> {
	Some(match declared {
		KeyAlgorithm::HS256 => Algorithm::HS256,
		KeyAlgorithm::HS384 => Algorithm::HS384,
		KeyAlgorithm::HS512 => Algorithm::HS512,
		KeyAlgorithm::ES256 => Algorithm::ES256,
		KeyAlgorithm::ES384 => Algorithm::ES384,
		KeyAlgorithm::RS256 => Algorithm::RS256,
		KeyAlgorithm::RS384 => Algorithm::RS384,
		KeyAlgorithm::RS512 => Algorithm::RS512,
		KeyAlgorithm::PS256 => Algorithm::PS256,
		KeyAlgorithm::PS384 => Algorithm::PS384,
		KeyAlgorithm::PS512 => Algorithm::PS512,
		KeyAlgorithm::EdDSA => Algorithm::EdDSA,
		_ => return None,
	})
}

/// Reqwest-backed [`KeySetFetcher`] for a fixed JWKS URL.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestKeySetFetcher {
	client: ReqwestClient,
	url: Url,
	timeout: Option<StdDuration>,
}
#[cfg(feature = "reqwest")]
impl ReqwestKeySetFetcher {
	/// Fetches `url` through an existing client.
	pub fn with_client(client: ReqwestClient, url: Url) -> Self {
		Self { client, url, timeout: None }
	}

	/// Bounds every download.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout.unsigned_abs());

		self
	}

	/// JWKS endpoint being fetched.
	pub fn url(&self) -> &Url {
		&self.url
	}

	async fn download(&self) -> Result<SigningKeySet> {
		let mut request = self.client.get(self.url.clone());

		if let Some(timeout) = self.timeout {
			request = request.timeout(timeout);
		}

		let response = request.send().await.map_err(map_reqwest_error)?;
		let status = response.status();

		if !status.is_success() {
			return Err(TransientError::Endpoint {
				endpoint: ENDPOINT,
				message: format!("HTTP {status}"),
				status: Some(status.as_u16()),
				retry_after: crate::http::parse_retry_after(response.headers()),
			}
			.into());
		}

		let body = response.bytes().await.map_err(map_reqwest_error)?;

		SigningKeySet::parse(&body, OffsetDateTime::now_utc()).map_err(|err| {
			TransientError::ResponseParse {
				endpoint: ENDPOINT,
				source: Arc::new(err),
				status: Some(status.as_u16()),
			}
			.into()
		})
	}
}
#[cfg(feature = "reqwest")]
impl KeySetFetcher for ReqwestKeySetFetcher {
	fn fetch(&self) -> KeySetFuture<'_> {
		Box::pin(self.download())
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: ReqwestError) -> Error {
	if err.is_timeout() {
		TransientError::Timeout { endpoint: ENDPOINT }.into()
	} else {
		TransientError::network(ENDPOINT, err).into()
	}
}
