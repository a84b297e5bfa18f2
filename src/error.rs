//! Courier-level error types shared by the token cache, validator, and messaging client.
//!
//! Every error is `Clone` so a single failed refresh can be handed to all callers that were
//! waiting on it.

// self
use crate::_prelude::*;

/// Courier-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared, clonable error source.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical courier error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Cache backend failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// The authorization server could not be reached or answered with a retryable failure.
	#[error(transparent)]
	SourceUnavailable(#[from] TransientError),
	/// Inbound bearer token failed validation.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Broker transport failure unrelated to authentication.
	#[error(transparent)]
	Delivery(#[from] crate::messaging::DeliveryError),
	/// Authenticated caller lacks access to the requested resource.
	#[error(transparent)]
	Forbidden(#[from] crate::authority::AuthorizationError),

	/// Authorization server rejected the client credentials; not retryable.
	#[error("Authorization server rejected the client credentials: {reason}.")]
	InvalidCredentials {
		/// Server- or courier-supplied reason string.
		reason: String,
	},
	/// Credentials were rejected, or a retried operation was rejected again.
	#[error("Authentication failed: {reason}.")]
	AuthFailure {
		/// Server- or courier-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when the next natural call may succeed without operator action.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::SourceUnavailable(_) => true,
			Self::Delivery(err) => err.is_transient(),
			Self::Storage(crate::store::StoreError::Backend { .. }) => true,
			_ => false,
		}
	}
}

/// Configuration and validation failures raised by the courier.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	HttpRequest {
		/// Underlying request builder failure.
		#[source]
		source: SharedError,
	},
	/// Endpoint URL is invalid or not allowed.
	#[error("Authorization server descriptor is invalid.")]
	InvalidDescriptor(#[from] crate::server::ServerDescriptorError),
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	InvalidDocument {
		/// Path to the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Named scope is not declared in the configuration.
	#[error("Scope `{name}` is not configured.")]
	UnknownScope {
		/// Requested use-case name.
		name: String,
	},
	/// Identifier failed validation.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token builder validation failed.
	#[error("Unable to build access token.")]
	TokenBuild(#[from] crate::auth::AccessTokenBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token endpoint issued something other than a bearer token.
	#[error("Token endpoint issued an unsupported token type: {token_type}.")]
	UnsupportedTokenType {
		/// Token type reported by the server.
		token_type: String,
	},
	/// Authorization server changed scopes during the exchange.
	#[error("Token endpoint changed the granted scopes.")]
	ScopesChanged,
	/// Freshly issued token does not outlive the configured safety margin.
	#[error(
		"Issued token expires in {remaining_secs}s which does not exceed the {margin_secs}s safety margin."
	)]
	TokenLifetimeTooShort {
		/// Remaining lifetime of the fresh token, in seconds.
		remaining_secs: i64,
		/// Configured safety margin, in seconds.
		margin_secs: i64,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}

	/// Wraps a request construction failure inside [`ConfigError`].
	pub fn http_request(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpRequest { source: Arc::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry on the next call).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Endpoint returned an unexpected but non-fatal response.
	#[error("{endpoint} endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Which endpoint failed (`token` or `jwks`).
		endpoint: &'static str,
		/// Server- or courier-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Endpoint responded with a body that could not be parsed.
	#[error("{endpoint} endpoint returned a malformed body.")]
	ResponseParse {
		/// Which endpoint failed (`token` or `jwks`).
		endpoint: &'static str,
		/// Structured parsing failure.
		#[source]
		source: SharedError,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Request exceeded its timeout.
	#[error("Request to the {endpoint} endpoint timed out.")]
	Timeout {
		/// Which endpoint timed out (`token` or `jwks`).
		endpoint: &'static str,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the {endpoint} endpoint.")]
	Network {
		/// Which endpoint failed (`token` or `jwks`).
		endpoint: &'static str,
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
}
impl TransientError {
	/// Wraps a transport-specific network error.
	pub fn network(endpoint: &'static str, src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { endpoint, source: Arc::new(src) }
	}

	/// HTTP status attached to the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Endpoint { status, .. } | Self::ResponseParse { status, .. } => *status,
			_ => None,
		}
	}
}

/// Inbound bearer-token validation failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
	/// Token is malformed, badly signed, or carries wrong issuer/audience claims.
	#[error("Bearer token is invalid: {reason}.")]
	InvalidToken {
		/// Why the token was rejected.
		reason: String,
	},
	/// Token is past its expiry.
	#[error("Bearer token has expired.")]
	ExpiredToken,
	/// Token names a signing key that is not in the key set.
	#[error("Bearer token was signed by an unknown key{}.", kid_suffix(.kid))]
	UnknownSigner {
		/// Key id from the token header, if any.
		kid: Option<String>,
	},
}
impl ValidationError {
	pub(crate) fn invalid(reason: impl Into<String>) -> Self {
		Self::InvalidToken { reason: reason.into() }
	}
}

fn kid_suffix(kid: &Option<String>) -> String {
	kid.as_deref().map(|k| format!(" `{k}`")).unwrap_or_default()
}
