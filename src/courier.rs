//! Top-level assembly of the token cache, validator, authority mapping, and secured client.

// crates.io
use futures_util::stream::BoxStream;
// self
use crate::{
	_prelude::*,
	auth::CredentialScope,
	authority::{
		Api, Authentication, AuthorityResolver, ClientAuthorizationCache,
		ClientAuthorizationListener, PermissionListener, UserPermissionCache,
	},
	cache::TokenCache,
	config::CourierConfig,
	jwks::KeySetFetcher,
	messaging::{AuthorizedMessage, MessageTransport, OutboundMessage, SecuredClient},
	source::TokenSource,
	validator::ResourceServerValidator,
};
#[cfg(feature = "reqwest")]
use crate::{
	http::ReqwestHttpClient,
	jwks::ReqwestKeySetFetcher,
	source::{ReqwestTokenSource, ReqwestTransportErrorMapper},
};

/// Everything a service needs to send and receive secured messages, wired from one
/// [`CourierConfig`].
///
/// Named use cases from the configuration select the credential scope of each send. The
/// permission cache behind user-token authorities is shared with [`Courier::permission_listener`],
/// and the client authorization cache with [`Courier::client_authorization_listener`].
#[derive(Clone)]
pub struct Courier {
	config: Arc<CourierConfig>,
	transport: Arc<dyn MessageTransport>,
	client: SecuredClient,
	permissions: UserPermissionCache,
	client_authorizations: ClientAuthorizationCache,
}
impl Courier {
	/// Builds a courier talking to the configured endpoints over reqwest.
	///
	/// The HTTP client never follows redirects and bounds every request by
	/// `request_timeout_secs`.
	#[cfg(feature = "reqwest")]
	pub fn from_config(
		config: CourierConfig,
		transport: Arc<dyn MessageTransport>,
	) -> Result<Self> {
		config.validate()?;

		let descriptor = config.descriptor()?;
		let http = ReqwestHttpClient::without_redirects()?.with_timeout(config.request_timeout());
		let fetcher = ReqwestKeySetFetcher::with_client(
			http.as_ref().clone(),
			descriptor.jwks_endpoint.clone(),
		)
		.with_timeout(config.request_timeout());
		let mut source = ReqwestTokenSource::with_http_client(
			descriptor,
			http,
			Arc::new(ReqwestTransportErrorMapper),
		);

		if let Some(secret) = &config.client_secret {
			source = source.with_client_secret(secret.expose());
		}

		Ok(Self::assemble(config, Arc::new(source), Arc::new(fetcher), transport))
	}

	/// Wires a courier from caller-supplied collaborators.
	pub fn assemble(
		config: CourierConfig,
		source: Arc<dyn TokenSource>,
		fetcher: Arc<dyn KeySetFetcher>,
		transport: Arc<dyn MessageTransport>,
	) -> Self {
		let cache = TokenCache::in_memory(source).with_safety_margin(config.safety_margin());
		let validator =
			Arc::new(ResourceServerValidator::new(fetcher, config.validator_settings()));
		let permissions = UserPermissionCache::default();
		let client_authorizations = ClientAuthorizationCache::default();
		let resolver = AuthorityResolver::new(config.authority.clone(), permissions.clone())
			.with_source_applications(Arc::new(client_authorizations.clone()));
		let client = SecuredClient::new(transport.clone(), cache, validator)
			.with_resolver(resolver)
			.with_max_auth_retries(config.max_auth_retries);

		Self { config: Arc::new(config), transport, client, permissions, client_authorizations }
	}

	/// Configuration the courier was built from.
	pub fn config(&self) -> &CourierConfig {
		&self.config
	}

	/// Underlying secured client.
	pub fn client(&self) -> &SecuredClient {
		&self.client
	}

	/// Permission cache consulted when resolving user tokens.
	pub fn permissions(&self) -> &UserPermissionCache {
		&self.permissions
	}

	/// Client id to source application map consulted when resolving client tokens.
	pub fn client_authorizations(&self) -> &ClientAuthorizationCache {
		&self.client_authorizations
	}

	/// Credential scope of the named use case.
	pub fn scope(&self, use_case: &str) -> Result<CredentialScope> {
		self.config.scope(use_case)
	}

	/// Sends `message` with a token for the named use case.
	pub async fn send(&self, use_case: &str, message: OutboundMessage) -> Result<()> {
		let scope = self.scope(use_case)?;

		self.client.send(message, &scope).await
	}

	/// Subscribes to `topic`; see [`SecuredClient::receive`].
	pub fn receive(
		&self,
		topic: impl Into<String>,
	) -> BoxStream<'static, Result<AuthorizedMessage>> {
		self.client.receive(topic)
	}

	/// Checks a received caller against the configured gate of `api`.
	pub fn authorize(&self, api: Api, authentication: &Authentication) -> Result<()> {
		self.config.access.authorize(api, authentication).map_err(Into::into)
	}

	/// Listener that feeds the permission cache from the default permission topic.
	pub fn permission_listener(&self) -> PermissionListener {
		PermissionListener::new(self.transport.clone(), self.permissions.clone())
	}

	/// Listener that feeds the client authorization cache from its default topic.
	pub fn client_authorization_listener(&self) -> ClientAuthorizationListener {
		ClientAuthorizationListener::new(self.transport.clone(), self.client_authorizations.clone())
	}
}
impl Debug for Courier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Courier")
			.field("config", &self.config)
			.field("client", &self.client)
			.field("permissions", &self.permissions.len())
			.field("client_authorizations", &self.client_authorizations.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use futures_util::StreamExt;
	use jsonwebtoken::{Algorithm, EncodingKey, Header, jwk::JwkSet};
	// self
	use super::*;
	use crate::{
		auth::{AccessToken, TokenSecret},
		authority::{AuthorityPrefix, AuthorizationError, UserRole},
		error::ConfigError,
		jwks::{KeySetFuture, SigningKeySet},
		messaging::MemoryTransport,
		source::SourceFuture,
	};

	const SECRET: &[u8] = b"courier-unit-signing-secret";

	struct FixedSource;
	impl TokenSource for FixedSource {
		fn fetch<'a>(&'a self, scope: &'a CredentialScope) -> SourceFuture<'a, AccessToken> {
			Box::pin(async move {
				AccessToken::builder()
					.value(format!("token-for-{}", scope.scopes.normalized()))
					.expires_in(Duration::hours(1))
					.build()
					.map_err(|err| ConfigError::from(err).into())
			})
		}
	}

	struct OctKeys;
	impl KeySetFetcher for OctKeys {
		fn fetch(&self) -> KeySetFuture<'_> {
			Box::pin(async {
				use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

				let set: JwkSet = serde_json::from_value(serde_json::json!({
					"keys": [{
						"kty": "oct",
						"kid": "k1",
						"alg": "HS256",
						"k": URL_SAFE_NO_PAD.encode(SECRET),
					}]
				}))
				.expect("Key set fixture should parse.");

				Ok(SigningKeySet::from_jwks(&set, OffsetDateTime::now_utc()))
			})
		}
	}

	fn config() -> CourierConfig {
		CourierConfig::from_json_str(
			r#"{
				"token_uri": "https://auth.example.com/token",
				"jwks_uri": "https://auth.example.com/jwks",
				"client_id": "svc-orders",
				"algorithms": ["HS256"],
				"scopes": { "orders": { "scopes": ["orders.write"] } },
				"authority": { "roles_per_org": { "org-1": ["ADMIN"] } },
				"access": { "authorized_source_application_ids": [4] }
			}"#,
		)
		.expect("Config fixture should parse.")
	}

	fn mint(claims: serde_json::Value) -> String {
		let mut header = Header::new(Algorithm::HS256);

		header.kid = Some("k1".into());

		jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET))
			.expect("Token fixture should encode.")
	}

	fn exp() -> i64 {
		(OffsetDateTime::now_utc() + Duration::minutes(10)).unix_timestamp()
	}

	fn courier(transport: &MemoryTransport) -> Courier {
		Courier::assemble(
			config(),
			Arc::new(FixedSource),
			Arc::new(OctKeys),
			Arc::new(transport.clone()),
		)
	}

	#[tokio::test]
	async fn named_use_cases_select_the_token() {
		let transport = MemoryTransport::default();
		let courier = courier(&transport);

		courier
			.send("orders", OutboundMessage::new("orders", "{}"))
			.await
			.expect("Send should succeed.");

		assert_eq!(transport.messages("orders")[0].bearer(), Some("token-for-orders.write"));
		assert!(matches!(
			courier.send("billing", OutboundMessage::new("orders", "{}")).await,
			Err(Error::Config(ConfigError::UnknownScope { .. }))
		));
		assert_eq!(transport.messages("orders").len(), 1, "Unknown use cases stay local.");
	}

	#[tokio::test]
	async fn received_user_tokens_pick_up_streamed_permissions() {
		let transport = MemoryTransport::default();
		let courier = courier(&transport);
		let topic = PermissionListener::DEFAULT_TOPIC;

		transport
			.send(OutboundMessage::new(topic, r#"{"sourceApplicationIds":[7]}"#).with_key("user-1"))
			.await
			.expect("Permission record should publish.");

		let listener = courier.permission_listener();
		let applied =
			listener.consume(<dyn MessageTransport>::subscribe(&transport, topic).take(1)).await;

		assert_eq!(applied, 1);

		let token = mint(serde_json::json!({
			"sub": "user-1",
			"exp": exp(),
			"organizationid": "org-1",
			"objectidentifier": "user-1",
			"roles": ["admin", "developer"],
		}));

		transport
			.send(
				OutboundMessage::new("events", "hello")
					.with_header("authorization", format!("Bearer {token}")),
			)
			.await
			.expect("Event should publish.");

		let message = courier
			.receive("events")
			.next()
			.await
			.expect("Stream should yield.")
			.expect("Message should be authorized.");
		let authentication = &message.authentication;

		assert_eq!(authentication.source_application_id(), Ok(7));
		assert!(authentication.has_role(UserRole::Admin));
		assert!(authentication.has_role(UserRole::User));
		assert!(!authentication.has_role(UserRole::Developer), "Org filter drops DEVELOPER.");
		assert!(authentication.has_authority(&AuthorityPrefix::OrgId.authority("org-1")));
	}

	#[tokio::test]
	async fn external_clients_pass_the_gate_of_their_source_application() {
		let transport = MemoryTransport::default();
		let courier = courier(&transport);
		let topic = ClientAuthorizationListener::DEFAULT_TOPIC;

		for (client, id) in [("svc-acos", 4), ("svc-egrv", 5)] {
			transport
				.send(
					OutboundMessage::new(
						topic,
						format!(r#"{{"authorized":true,"sourceApplicationId":{id}}}"#),
					)
					.with_key(client),
				)
				.await
				.expect("Client authorization should publish.");
		}

		let applied = courier
			.client_authorization_listener()
			.consume(<dyn MessageTransport>::subscribe(&transport, topic).take(2))
			.await;

		assert_eq!(applied, 2);

		for client in ["svc-acos", "svc-egrv"] {
			let token = mint(serde_json::json!({ "sub": client, "exp": exp() }));

			transport
				.send(
					OutboundMessage::new("inbound", "{}")
						.with_header("authorization", format!("Bearer {token}")),
				)
				.await
				.expect("Event should publish.");
		}

		let received = courier.receive("inbound").take(2).collect::<Vec<_>>().await;
		let acos = &received[0].as_ref().expect("First client should be accepted.").authentication;
		let egrv = &received[1].as_ref().expect("Second client should be accepted.").authentication;

		assert_eq!(acos.source_application_id(), Ok(4));
		courier.authorize(Api::External, acos).expect("Allow-listed source application passes.");
		assert!(matches!(
			courier.authorize(Api::External, egrv),
			Err(Error::Forbidden(AuthorizationError::MissingAuthority { .. }))
		));
		assert!(courier.authorize(Api::InternalClient, acos).is_err());
	}

	#[test]
	fn debug_output_hides_the_secret() {
		let mut config = config();

		config.client_secret = Some(TokenSecret::new("hunter2"));

		let courier = Courier::assemble(
			config,
			Arc::new(FixedSource),
			Arc::new(OctKeys),
			Arc::new(MemoryTransport::default()),
		);

		assert!(!format!("{courier:?}").contains("hunter2"));
	}
}
