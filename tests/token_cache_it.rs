// crates.io
use httpmock::prelude::*;
// self
use oauth2_courier::{
	_preludet::*,
	auth::{Audience, CredentialScope, ScopeSet},
	cache::TokenCache,
	error::{ConfigError, TransientError},
};

const CLIENT_SECRET: &str = "courier-secret";

fn build_cache(server: &MockServer) -> TokenCache {
	let source = build_reqwest_test_source(test_descriptor(&server.base_url()), CLIENT_SECRET);

	TokenCache::in_memory(Arc::new(source))
}

fn orders_scope() -> CredentialScope {
	CredentialScope::new(
		test_client_id(),
		ScopeSet::new(["orders.write", "orders.read"])
			.expect("Scope set should be valid for token cache tests."),
	)
	.with_audience(Audience::new("https://orders.test").expect("Audience should be valid."))
}

#[tokio::test]
async fn token_is_fetched_once_and_then_served_from_cache() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", "client_credentials")
				.form_urlencoded_tuple("client_id", "courier-client")
				.form_urlencoded_tuple("client_secret", CLIENT_SECRET)
				.form_urlencoded_tuple("scope", "orders.read orders.write")
				.form_urlencoded_tuple("audience", "https://orders.test");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"orders-token\",\"token_type\":\"bearer\",\"expires_in\":1800}",
			);
		})
		.await;
	let scope = orders_scope();
	let first = cache.get_or_fetch(&scope).await.expect("Initial fetch should succeed.");
	let second = cache.get_or_fetch(&scope).await.expect("Cached fetch should succeed.");

	assert_eq!(first.secret().expose(), "orders-token");
	assert_eq!(second.secret().expose(), "orders-token");
	assert_eq!(cache.metrics().hits(), 1);

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn concurrent_misses_share_one_request() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(200))
				.body("{\"access_token\":\"shared\",\"token_type\":\"bearer\",\"expires_in\":900}");
		})
		.await;
	let scope = orders_scope();
	let handles = (0..8)
		.map(|_| {
			let cache = cache.clone();
			let scope = scope.clone();

			tokio::spawn(async move { cache.get_or_fetch(&scope).await })
		})
		.collect::<Vec<_>>();

	for handle in handles {
		let token = handle
			.await
			.expect("Fetch task should join.")
			.expect("Every waiter should receive the shared token.");

		assert_eq!(token.secret().expose(), "shared");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(cache.metrics().refresh_attempts(), 1);
}

#[tokio::test]
async fn rejected_credentials_fail_and_are_not_cached() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_client\",\"error_description\":\"unknown client\"}");
		})
		.await;
	let scope = orders_scope();

	for _ in 0..2 {
		let err = cache.get_or_fetch(&scope).await.expect_err("Rejected credentials must fail.");

		assert!(matches!(err, Error::AuthFailure { .. }), "Unexpected error: {err:?}.");
		assert!(!err.is_transient());
	}

	mock.assert_calls_async(2).await;

	assert_eq!(cache.metrics().refresh_failures(), 2);
}

#[tokio::test]
async fn unavailable_server_is_reported_as_transient() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(503)
				.header("content-type", "application/json")
				.header("retry-after", "30")
				.body("{\"error\":\"temporarily_unavailable\"}");
		})
		.await;
	let err = cache.get_or_fetch(&orders_scope()).await.expect_err("Outage must fail the fetch.");

	assert!(err.is_transient());

	match err {
		Error::SourceUnavailable(TransientError::Endpoint {
			endpoint, status, retry_after, ..
		}) => {
			assert_eq!(endpoint, "token");
			assert_eq!(status, Some(503));
			assert_eq!(retry_after, Some(Duration::seconds(30)));
		},
		other => panic!("Unexpected error: {other:?}."),
	}

	mock.assert_async().await;
}

#[tokio::test]
async fn slow_server_times_out() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_secs(8))
				.body("{\"access_token\":\"late\",\"token_type\":\"bearer\",\"expires_in\":1800}");
		})
		.await;
	let err = cache.get_or_fetch(&orders_scope()).await.expect_err("Slow server must time out.");

	assert!(
		matches!(err, Error::SourceUnavailable(TransientError::Timeout { endpoint: "token" })),
		"Unexpected error: {err:?}."
	);
}

#[tokio::test]
async fn short_lived_tokens_are_refused() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server).with_safety_margin(Duration::minutes(5));
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"brief\",\"token_type\":\"bearer\",\"expires_in\":60}",
			);
		})
		.await;
	let err = cache.get_or_fetch(&orders_scope()).await.expect_err("Token inside the margin.");

	assert!(matches!(err, Error::Config(ConfigError::TokenLifetimeTooShort { .. })));
}

#[tokio::test]
async fn invalidation_forces_a_new_request() {
	let server = MockServer::start_async().await;
	let cache = build_cache(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"fresh\",\"token_type\":\"bearer\",\"expires_in\":1800}",
			);
		})
		.await;
	let scope = orders_scope();

	cache.get_or_fetch(&scope).await.expect("Initial fetch should succeed.");
	cache.invalidate(&scope).await.expect("Invalidation should succeed.");
	cache.get_or_fetch(&scope).await.expect("Refetch should succeed.");

	mock.assert_calls_async(2).await;
}
