//! Authorization-server descriptor and its validating builder.

// self
use crate::_prelude::*;

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	#[default]
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
}

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ServerDescriptorError {
	/// Token endpoint is mandatory.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// JWKS endpoint is mandatory.
	#[error("Missing JWKS endpoint.")]
	MissingJwksEndpoint,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope delimiters must be printable.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Immutable description of the authorization server the courier talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
	/// Token endpoint used for the client-credentials grant.
	pub token_endpoint: Url,
	/// JSON Web Key Set endpoint publishing the signing keys.
	pub jwks_endpoint: Url,
	/// Expected `iss` claim of inbound tokens; unchecked when `None`.
	pub issuer: Option<String>,
	/// Accepted `aud` claim values of inbound tokens; unchecked when empty.
	pub audiences: Vec<String>,
	/// Client authentication mechanism for the token endpoint.
	pub client_auth_method: ClientAuthMethod,
	/// Character used to join scopes in the `scope` form parameter.
	pub scope_delimiter: char,
}
impl ServerDescriptor {
	/// Creates a new builder.
	pub fn builder() -> ServerDescriptorBuilder {
		ServerDescriptorBuilder::default()
	}

	fn validate(&self) -> Result<(), ServerDescriptorError> {
		validate_endpoint("token", &self.token_endpoint)?;
		validate_endpoint("jwks", &self.jwks_endpoint)?;

		if self.scope_delimiter.is_control() {
			return Err(ServerDescriptorError::InvalidScopeDelimiter {
				delimiter: self.scope_delimiter,
			});
		}

		Ok(())
	}
}

/// Builder for [`ServerDescriptor`] values.
#[derive(Debug)]
pub struct ServerDescriptorBuilder {
	token_endpoint: Option<Url>,
	jwks_endpoint: Option<Url>,
	issuer: Option<String>,
	audiences: Vec<String>,
	client_auth_method: ClientAuthMethod,
	scope_delimiter: char,
}
impl Default for ServerDescriptorBuilder {
	fn default() -> Self {
		Self {
			token_endpoint: None,
			jwks_endpoint: None,
			issuer: None,
			audiences: Vec::new(),
			client_auth_method: ClientAuthMethod::default(),
			scope_delimiter: ' ',
		}
	}
}
impl ServerDescriptorBuilder {
	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the JWKS endpoint.
	pub fn jwks_endpoint(mut self, url: Url) -> Self {
		self.jwks_endpoint = Some(url);

		self
	}

	/// Sets the expected issuer.
	pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
		self.issuer = Some(issuer.into());

		self
	}

	/// Adds an accepted audience.
	pub fn audience(mut self, audience: impl Into<String>) -> Self {
		self.audiences.push(audience.into());

		self
	}

	/// Adds several accepted audiences.
	pub fn audiences<I, S>(mut self, audiences: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.audiences.extend(audiences.into_iter().map(Into::into));

		self
	}

	/// Overrides the client authentication method.
	pub fn client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth_method = method;

		self
	}

	/// Overrides the scope delimiter.
	pub fn scope_delimiter(mut self, delimiter: char) -> Self {
		self.scope_delimiter = delimiter;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ServerDescriptor, ServerDescriptorError> {
		let descriptor = ServerDescriptor {
			token_endpoint: self
				.token_endpoint
				.ok_or(ServerDescriptorError::MissingTokenEndpoint)?,
			jwks_endpoint: self.jwks_endpoint.ok_or(ServerDescriptorError::MissingJwksEndpoint)?,
			issuer: self.issuer,
			audiences: self.audiences,
			client_auth_method: self.client_auth_method,
			scope_delimiter: self.scope_delimiter,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ServerDescriptorError> {
	let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

	if url.scheme() == "https" || (url.scheme() == "http" && loopback) {
		Ok(())
	} else {
		Err(ServerDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Fixture URL should parse.")
	}

	#[test]
	fn remote_endpoints_require_https() {
		let err = ServerDescriptor::builder()
			.token_endpoint(url("http://auth.example.com/token"))
			.jwks_endpoint(url("https://auth.example.com/jwks"))
			.build()
			.expect_err("Plain HTTP to a remote host must be rejected.");

		assert!(matches!(err, ServerDescriptorError::InsecureEndpoint { endpoint: "token", .. }));

		let descriptor = ServerDescriptor::builder()
			.token_endpoint(url("http://127.0.0.1:8080/token"))
			.jwks_endpoint(url("http://localhost:8080/jwks"))
			.build()
			.expect("Loopback endpoints may use plain HTTP.");

		assert_eq!(descriptor.client_auth_method, ClientAuthMethod::ClientSecretBasic);
		assert_eq!(descriptor.scope_delimiter, ' ');
	}

	#[test]
	fn missing_endpoints_are_reported() {
		assert_eq!(
			ServerDescriptor::builder().build(),
			Err(ServerDescriptorError::MissingTokenEndpoint)
		);
		assert_eq!(
			ServerDescriptor::builder().token_endpoint(url("https://a.example/token")).build(),
			Err(ServerDescriptorError::MissingJwksEndpoint)
		);
	}

	#[test]
	fn control_delimiters_are_rejected() {
		let err = ServerDescriptor::builder()
			.token_endpoint(url("https://a.example/token"))
			.jwks_endpoint(url("https://a.example/jwks"))
			.scope_delimiter('\n')
			.build()
			.expect_err("Control characters cannot delimit scopes.");

		assert_eq!(err, ServerDescriptorError::InvalidScopeDelimiter { delimiter: '\n' });
	}

	#[test]
	fn audiences_accumulate() {
		let descriptor = ServerDescriptor::builder()
			.token_endpoint(url("https://a.example/token"))
			.jwks_endpoint(url("https://a.example/jwks"))
			.issuer("https://a.example")
			.audience("archive")
			.audiences(["ledger", "search"])
			.build()
			.expect("Descriptor should build.");

		assert_eq!(descriptor.audiences, vec!["archive", "ledger", "search"]);
		assert_eq!(descriptor.issuer.as_deref(), Some("https://a.example"));
	}
}
