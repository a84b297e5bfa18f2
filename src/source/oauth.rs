//! `oauth2` crate facade for the client-credentials exchange and its error mapping.

// crates.io
use oauth2::{
	AuthType, ClientId as OAuthClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenType},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AccessTokenBuilderError, ScopeSet},
	error::{ConfigError, TransientError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	server::{
		ClientAuthMethod, ServerDescriptor, ServerErrorContext, ServerErrorKind, ServerStrategy,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeTokenResponse = oauth2::basic::BasicTokenResponse;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

const ENDPOINT: &str = "token";

/// Maps HTTP transport failures into courier [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a courier error.
	fn map_transport_error(
		&self,
		strategy: &dyn ServerStrategy,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		strategy: &dyn ServerStrategy,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(strategy, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::http_request(inner).into(),
			HttpClientError::Io(inner) => TransientError::network(ENDPOINT, inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_generic_transport_error(meta, "unrecognized transport failure"),
		}
	}
}

pub(crate) struct BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	scope_delimiter: char,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ServerDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Self {
		let mut oauth_client = BasicClient::new(OAuthClientId::new(client_id.to_owned()))
			.set_token_uri(TokenUrl::from_url(descriptor.token_endpoint.clone()));

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}
		if matches!(descriptor.client_auth_method, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Self {
			oauth_client,
			scope_delimiter: descriptor.scope_delimiter,
			http_client,
			error_mapper,
		}
	}

	pub(crate) fn exchange_client_credentials<'a>(
		&'a self,
		strategy: &'a dyn ServerStrategy,
		scopes: &'a ScopeSet,
		extra_params: &'a [(String, String)],
	) -> FacadeFuture<'a, AccessToken> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut request = self.oauth_client.exchange_client_credentials();

			if self.scope_delimiter == ' ' {
				for scope in scopes.iter() {
					request = request.add_scope(Scope::new(scope.to_owned()));
				}
			} else if let Some(joined) = scopes.join(self.scope_delimiter) {
				request = request.add_extra_param("scope", joined);
			}
			for (key, value) in extra_params {
				request = request.add_extra_param(key.as_str(), value.as_str());
			}

			let response = request.request_async(&instrumented).await.map_err(|err| {
				map_request_error(strategy, meta.take(), err, self.error_mapper.as_ref())
			})?;

			map_token_response(scopes, response)
		})
	}
}

fn map_token_response(requested: &ScopeSet, response: FacadeTokenResponse) -> Result<AccessToken> {
	if !matches!(response.token_type(), BasicTokenType::Bearer) {
		return Err(ConfigError::UnsupportedTokenType {
			token_type: format!("{:?}", response.token_type()),
		}
		.into());
	}

	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	if let Some(scopes) = response.scopes()
		&& !requested.is_empty()
	{
		let returned =
			ScopeSet::new(scopes.iter().map(|scope| scope.as_str())).map_err(ConfigError::from)?;

		if returned != *requested {
			return Err(ConfigError::ScopesChanged.into());
		}
	}

	AccessToken::builder()
		.value(response.access_token().secret().to_owned())
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in))
		.build()
		.map_err(|err| match err {
			AccessTokenBuilderError::ExpiryOutOfRange => ConfigError::ExpiresInOutOfRange.into(),
			err => ConfigError::from(err).into(),
		})
}

fn map_request_error<E, M>(
	strategy: &dyn ServerStrategy,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(strategy, meta_ref, error),
		RequestTokenError::Parse(error, body) => {
			let ctx = unstructured_context(meta_ref, String::from_utf8_lossy(&body));

			match strategy.classify_token_error(&ctx) {
				ServerErrorKind::Transient => TransientError::ResponseParse {
					endpoint: ENDPOINT,
					source: Arc::new(error),
					status: meta_status(meta_ref),
				}
				.into(),
				_ => Error::InvalidCredentials { reason: ctx.reason() },
			}
		},
		RequestTokenError::Other(message) => {
			let ctx = unstructured_context(meta_ref, message.as_str());

			match strategy.classify_token_error(&ctx) {
				ServerErrorKind::Transient => map_generic_transport_error(meta_ref, message),
				_ => Error::InvalidCredentials { reason: ctx.reason() },
			}
		},
	}
}

// Failures without an OAuth error document still carry a status worth classifying.
fn unstructured_context(
	meta: Option<&ResponseMetadata>,
	body: impl Into<String>,
) -> ServerErrorContext {
	let ctx = ServerErrorContext::new().with_body_preview(body);

	match meta_status(meta) {
		Some(status) => ctx.with_http_status(status),
		None => ctx,
	}
}

fn map_server_response_error(
	strategy: &dyn ServerStrategy,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code: &str = response.error().as_ref();
	let mut ctx = ServerErrorContext::new().with_oauth_error(code);

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	match strategy.classify_token_error(&ctx) {
		ServerErrorKind::InvalidClient | ServerErrorKind::InvalidScope =>
			Error::InvalidCredentials { reason: ctx.reason() },
		ServerErrorKind::Transient => TransientError::Endpoint {
			endpoint: ENDPOINT,
			message: ctx.reason(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	strategy: &dyn ServerStrategy,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::http_request(err).into();
	}
	if err.is_timeout() {
		return TransientError::Timeout { endpoint: ENDPOINT }.into();
	}
	if let Some(status) = meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())) {
		let ctx = ServerErrorContext::new().with_http_status(status);

		if !strategy.classify_token_error(&ctx).is_transient() {
			return Error::InvalidCredentials { reason: ctx.reason() };
		}
	}

	TransientError::network(ENDPOINT, err).into()
}

fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::Endpoint {
		endpoint: ENDPOINT,
		message: format!("HTTP client error: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
