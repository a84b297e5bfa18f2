//! Token sources: the stateless I/O boundary between the cache and the authorization server.
//!
//! [`TokenSource`] is the seam the cache depends on. [`OAuth2TokenSource`] performs exactly one
//! `grant_type=client_credentials` exchange per call and never retries internally; retry
//! policy belongs to the callers.

mod oauth;

pub use oauth::*;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialScope},
	http::TokenHttpClient,
	obs::{self, OpKind, OpOutcome, OpSpan},
	server::{DefaultServerStrategy, ServerDescriptor, ServerStrategy},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Boxed future returned by [`TokenSource`] implementations.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Issues access tokens for a credential scope.
///
/// Implementations return [`Error::InvalidCredentials`] for permanent rejections and
/// [`Error::SourceUnavailable`] for failures the next call may not see again.
pub trait TokenSource: Send + Sync {
	/// Performs one token request for `scope`.
	fn fetch<'a>(&'a self, scope: &'a CredentialScope) -> SourceFuture<'a, AccessToken>;
}

#[cfg(feature = "reqwest")]
/// Token source specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenSource = OAuth2TokenSource<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Client-credentials token source backed by the `oauth2` crate.
pub struct OAuth2TokenSource<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	descriptor: ServerDescriptor,
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	strategy: Arc<dyn ServerStrategy>,
	client_secret: Option<String>,
}
impl<C, M> OAuth2TokenSource<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a source that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		descriptor: ServerDescriptor,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			descriptor,
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			strategy: Arc::new(DefaultServerStrategy),
			client_secret: None,
		}
	}

	/// Sets or replaces the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Replaces the error-classification and request-decoration strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ServerStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Descriptor this source talks to.
	pub fn descriptor(&self) -> &ServerDescriptor {
		&self.descriptor
	}

	fn extra_params(&self, scope: &CredentialScope) -> Vec<(String, String)> {
		let mut form = BTreeMap::new();

		if let Some(audience) = &scope.audience {
			form.insert("audience".to_owned(), audience.to_string());
		}

		<dyn ServerStrategy>::augment_token_request(self.strategy.as_ref(), scope, &mut form);

		form.into_iter().filter(|(key, _)| key != "grant_type").collect()
	}
}
#[cfg(feature = "reqwest")]
impl OAuth2TokenSource<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a source with its own redirect-free reqwest transport.
	pub fn new(descriptor: ServerDescriptor) -> Result<Self> {
		Ok(Self::with_http_client(
			descriptor,
			ReqwestHttpClient::without_redirects()?,
			Arc::new(ReqwestTransportErrorMapper),
		))
	}
}
impl<C, M> TokenSource for OAuth2TokenSource<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fetch<'a>(&'a self, scope: &'a CredentialScope) -> SourceFuture<'a, AccessToken> {
		const KIND: OpKind = OpKind::TokenFetch;

		Box::pin(async move {
			let span = OpSpan::new(KIND, "fetch");

			obs::record_op_outcome(KIND, OpOutcome::Attempt);

			let extra_params = self.extra_params(scope);
			let facade = BasicFacade::<C, M>::from_descriptor(
				&self.descriptor,
				&scope.client_id,
				self.client_secret.as_deref(),
				self.http_client.clone(),
				self.transport_mapper.clone(),
			);
			let result = span
				.instrument(facade.exchange_client_credentials(
					self.strategy.as_ref(),
					&scope.scopes,
					&extra_params,
				))
				.await;

			obs::record_result(KIND, result)
		})
	}
}
impl<C, M> Debug for OAuth2TokenSource<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2TokenSource")
			.field("descriptor", &self.descriptor)
			.field("client_secret_set", &self.client_secret.is_some())
			.finish()
	}
}
