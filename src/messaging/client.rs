//! Broker client that authenticates every send and validates every receive.

// crates.io
use futures_util::{
	StreamExt,
	stream::{self, BoxStream},
};
// self
use super::{
	AUTHORIZATION_HEADER, AuthorizedMessage, ClientMetrics, DeliveryError, InboundMessage,
	MessageTransport, OutboundMessage,
};
use crate::{
	_prelude::*,
	auth::CredentialScope,
	authority::AuthorityResolver,
	cache::TokenCache,
	error::ValidationError,
	obs::{self, OpKind, OpOutcome, OpSpan},
	validator::ResourceServerValidator,
};

/// Secured wrapper around a [`MessageTransport`].
///
/// Sends carry `authorization: Bearer <token>` from the [`TokenCache`]. A broker rejection of
/// the credentials invalidates the cached token and retries with a fresh one, at most
/// `max_auth_retries` times. Receives validate the bearer token of every message.
#[derive(Clone)]
pub struct SecuredClient {
	transport: Arc<dyn MessageTransport>,
	cache: TokenCache,
	validator: Arc<ResourceServerValidator>,
	resolver: Arc<AuthorityResolver>,
	max_auth_retries: u32,
	metrics: Arc<ClientMetrics>,
}
impl SecuredClient {
	/// Retries after an authentication rejection unless configured otherwise.
	pub const DEFAULT_MAX_AUTH_RETRIES: u32 = 1;

	/// Creates a client with the default resolver and retry bound.
	pub fn new(
		transport: Arc<dyn MessageTransport>,
		cache: TokenCache,
		validator: Arc<ResourceServerValidator>,
	) -> Self {
		Self {
			transport,
			cache,
			validator,
			resolver: Default::default(),
			max_auth_retries: Self::DEFAULT_MAX_AUTH_RETRIES,
			metrics: Default::default(),
		}
	}

	/// Replaces the authority resolver used on receive.
	pub fn with_resolver(mut self, resolver: AuthorityResolver) -> Self {
		self.resolver = Arc::new(resolver);

		self
	}

	/// Sets how many times a rejected send is retried with a fresh token.
	pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
		self.max_auth_retries = retries;

		self
	}

	/// Token cache backing sends.
	pub fn cache(&self) -> &TokenCache {
		&self.cache
	}

	/// Validator backing receives.
	pub fn validator(&self) -> &Arc<ResourceServerValidator> {
		&self.validator
	}

	/// Shared counters for sends, retries, and receives.
	pub fn metrics(&self) -> &Arc<ClientMetrics> {
		&self.metrics
	}

	/// Publishes `message` with a token for `scope`.
	///
	/// Fails with [`Error::AuthFailure`] once the broker has rejected `max_auth_retries + 1`
	/// tokens in a row. Other broker failures are returned as [`Error::Delivery`] without a
	/// retry, and token acquisition failures are returned unchanged.
	pub async fn send(&self, message: OutboundMessage, scope: &CredentialScope) -> Result<()> {
		const KIND: OpKind = OpKind::Send;

		let span = OpSpan::new(KIND, "send");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.send_with_retries(message, scope)).await;

		obs::record_result(KIND, result)
	}

	async fn send_with_retries(
		&self,
		message: OutboundMessage,
		scope: &CredentialScope,
	) -> Result<()> {
		let mut retries = 0;

		loop {
			let token = self.cache.get_or_fetch(scope).await?;
			let attempt =
				message.clone().with_header(AUTHORIZATION_HEADER, token.secret().bearer());

			match <dyn MessageTransport>::send(self.transport.as_ref(), attempt).await {
				Ok(()) => {
					self.metrics.record_sent();

					return Ok(());
				},
				Err(DeliveryError::AuthenticationRejected { reason }) => {
					self.cache.invalidate(scope).await?;

					if retries >= self.max_auth_retries {
						self.metrics.record_auth_failure();

						return Err(Error::AuthFailure { reason });
					}

					retries += 1;

					self.metrics.record_auth_retry();
					obs::record_op_outcome(OpKind::Send, OpOutcome::Retry);
					obs::emit_event(
						OpKind::Send,
						OpOutcome::Retry,
						format_args!("broker rejected the token for {scope}: {reason}"),
					);
				},
				Err(err) => return Err(err.into()),
			}
		}
	}

	/// Lazily subscribes to `topic` and yields each message with its validated claims.
	///
	/// Every call opens a new subscription. A message that fails validation becomes an `Err`
	/// item and the stream carries on with the next one.
	pub fn receive(
		&self,
		topic: impl Into<String>,
	) -> BoxStream<'static, Result<AuthorizedMessage>> {
		let topic = topic.into();
		let transport = self.transport.clone();
		let client = self.clone();

		stream::once(async move { <dyn MessageTransport>::subscribe(transport.as_ref(), &topic) })
			.flatten()
			.then(move |item| {
				let client = client.clone();

				async move { client.authorize(item).await }
			})
			.boxed()
	}

	async fn authorize(
		&self,
		item: Result<InboundMessage, DeliveryError>,
	) -> Result<AuthorizedMessage> {
		const KIND: OpKind = OpKind::Receive;

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = self.authorize_message(item).await;

		match &result {
			Ok(_) => self.metrics.record_received(),
			Err(_) => self.metrics.record_rejected(),
		}

		obs::record_result(KIND, result)
	}

	async fn authorize_message(
		&self,
		item: Result<InboundMessage, DeliveryError>,
	) -> Result<AuthorizedMessage> {
		let message = item?;
		let token = message
			.bearer()
			.ok_or_else(|| ValidationError::invalid("message carries no bearer token"))?;
		let claims = self.validator.validate(token).await?;
		let authentication = self.resolver.resolve(&claims)?;

		Ok(AuthorizedMessage { message, claims, authentication })
	}
}
impl Debug for SecuredClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SecuredClient")
			.field("cache", &self.cache)
			.field("max_auth_retries", &self.max_auth_retries)
			.field("metrics", &self.metrics)
			.finish()
	}
}
