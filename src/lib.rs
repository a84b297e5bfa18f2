//! Credential-cached secured messaging: single-flight OAuth 2.0 client-credentials tokens on
//! every broker send, JWKS-validated bearer tokens on every receive.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod jwks;
pub mod messaging;
pub mod obs;
pub mod server;
pub mod source;
pub mod store;
pub mod validator;

mod courier;

pub use courier::*;

#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// crates.io
	use jsonwebtoken::{Algorithm, EncodingKey, Header};
	// self
	use crate::{
		auth::ClientId,
		http::ReqwestHttpClient,
		jwks::ReqwestKeySetFetcher,
		server::{ClientAuthMethod, ServerDescriptor},
		source::{OAuth2TokenSource, ReqwestTransportErrorMapper},
	};

	/// Token source type alias used by reqwest-backed integration tests.
	pub type ReqwestTestSource = OAuth2TokenSource<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Shared HMAC secret behind [`test_jwks_document`] and [`mint_test_token`].
	pub const TEST_SIGNING_SECRET: &[u8] = b"courier-test-signing-secret-0123456789";

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_client() -> ReqwestClient {
		ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.")
	}

	/// Builds a descriptor that points at a mock server's `/token` and `/jwks` paths.
	pub fn test_descriptor(base: &str) -> ServerDescriptor {
		let base = base.trim_end_matches('/');

		ServerDescriptor::builder()
			.token_endpoint(
				Url::parse(&format!("{base}/token")).expect("Mock token endpoint should parse."),
			)
			.jwks_endpoint(
				Url::parse(&format!("{base}/jwks")).expect("Mock JWKS endpoint should parse."),
			)
			.issuer("https://issuer.test")
			.audience("courier-tests")
			.client_auth_method(ClientAuthMethod::ClientSecretPost)
			.build()
			.expect("Mock descriptor should be valid.")
	}

	/// Constructs a token source backed by the insecure reqwest client used across tests.
	pub fn build_reqwest_test_source(
		descriptor: ServerDescriptor,
		client_secret: &str,
	) -> ReqwestTestSource {
		let http_client = ReqwestHttpClient::with_client(test_reqwest_client())
			.with_timeout(Duration::seconds(5));

		OAuth2TokenSource::with_http_client(
			descriptor,
			http_client,
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_client_secret(client_secret)
	}

	/// Constructs a key-set fetcher for the descriptor's JWKS endpoint.
	pub fn build_reqwest_test_fetcher(descriptor: &ServerDescriptor) -> ReqwestKeySetFetcher {
		ReqwestKeySetFetcher::with_client(test_reqwest_client(), descriptor.jwks_endpoint.clone())
			.with_timeout(Duration::seconds(5))
	}

	/// Renders a JWKS document exposing the test secret under each of the given key ids.
	pub fn test_jwks_document(kids: &[&str]) -> String {
		use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

		let secret = URL_SAFE_NO_PAD.encode(TEST_SIGNING_SECRET);
		let keys = kids
			.iter()
			.map(|kid| {
				serde_json::json!({ "kty": "oct", "kid": kid, "alg": "HS256", "k": secret })
			})
			.collect::<Vec<_>>();

		serde_json::json!({ "keys": keys }).to_string()
	}

	/// Signs a JWT with the test secret under `kid`, merging `claims` over sensible defaults.
	pub fn mint_test_token(kid: &str, claims: serde_json::Value) -> String {
		let now = OffsetDateTime::now_utc().unix_timestamp();
		let mut body = serde_json::json!({
			"iss": "https://issuer.test",
			"aud": "courier-tests",
			"sub": "client-under-test",
			"iat": now,
			"exp": now + 600,
		});

		if let (Some(base), serde_json::Value::Object(extra)) = (body.as_object_mut(), claims) {
			base.extend(extra);
		}

		let mut header = Header::new(Algorithm::HS256);

		header.kid = Some(kid.to_owned());

		jsonwebtoken::encode(&header, &body, &EncodingKey::from_secret(TEST_SIGNING_SECRET))
			.expect("Test token should encode.")
	}

	/// Client identifier fixture.
	pub fn test_client_id() -> ClientId {
		ClientId::new("courier-client").expect("Client identifier fixture should be valid.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap, HashSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _, tokio as _};
