//! Expiry-aware access-token cache with single-flight refresh per credential scope.
//!
//! [`TokenCache::get_or_fetch`] answers from the [`TokenStore`] while the cached token
//! outlives the safety margin. Otherwise the first caller for a scope starts a refresh and
//! every concurrent caller for that scope awaits the same shared future. Callers for other
//! scopes never wait on it.
//!
//! The in-flight map only holds a weak handle to each refresh. Waiters own the strong
//! handles, so one caller walking away leaves the refresh running for the rest, and the
//! refresh is dropped once nobody is left to receive its result. No lock is held while the
//! token source is called.

mod metrics;

pub use metrics::*;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialScope},
	error::ConfigError,
	obs::{self, OpKind, OpOutcome, OpSpan},
	source::TokenSource,
	store::{MemoryStore, TokenStore},
};

type RefreshFuture = BoxFuture<'static, Result<AccessToken>>;

struct InFlight {
	generation: u64,
	refresh: WeakShared<RefreshFuture>,
}

/// Owned, injectable token cache; clones share the same state.
#[derive(Clone)]
pub struct TokenCache {
	source: Arc<dyn TokenSource>,
	store: Arc<dyn TokenStore>,
	safety_margin: Duration,
	in_flight: Arc<Mutex<HashMap<CredentialScope, InFlight>>>,
	generation: Arc<AtomicU64>,
	metrics: Arc<CacheMetrics>,
}
impl TokenCache {
	/// Margin applied when none is configured.
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::seconds(30);

	/// Creates an empty cache over `store`, refreshing through `source`.
	pub fn new(source: Arc<dyn TokenSource>, store: Arc<dyn TokenStore>) -> Self {
		Self {
			source,
			store,
			safety_margin: Self::DEFAULT_SAFETY_MARGIN,
			in_flight: Default::default(),
			generation: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Creates a cache backed by a fresh [`MemoryStore`].
	pub fn in_memory(source: Arc<dyn TokenSource>) -> Self {
		Self::new(source, Arc::new(MemoryStore::default()))
	}

	/// Overrides the safety margin; negative values clamp to zero.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Configured safety margin.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Shared counters for hits, joins, and refreshes.
	pub fn metrics(&self) -> &Arc<CacheMetrics> {
		&self.metrics
	}

	/// Returns a token whose expiry lies beyond `now + safety_margin`, refreshing at most once
	/// per scope no matter how many callers arrive concurrently.
	///
	/// Credentials rejected by the authorization server surface as [`Error::AuthFailure`];
	/// transient source failures as [`Error::SourceUnavailable`]. Failures are never cached.
	pub async fn get_or_fetch(&self, scope: &CredentialScope) -> Result<AccessToken> {
		let span = OpSpan::new(OpKind::TokenRefresh, "get_or_fetch");

		span.instrument(async move {
			if let Some(token) = self.usable(scope).await? {
				self.metrics.record_hit();

				return Ok(token);
			}

			self.join_or_start(scope).await
		})
		.await
	}

	/// Forgets the cached token for `scope` so the next call refreshes.
	///
	/// A refresh already running for the scope is detached: current waiters still receive its
	/// result, but later callers start a new one and its token is not written back.
	pub async fn invalidate(&self, scope: &CredentialScope) -> Result<()> {
		self.in_flight.lock().remove(scope);

		<dyn TokenStore>::invalidate(self.store.as_ref(), scope).await?;
		obs::emit_event(OpKind::TokenRefresh, OpOutcome::Retry, format!("invalidated {scope}"));

		Ok(())
	}

	async fn usable(&self, scope: &CredentialScope) -> Result<Option<AccessToken>> {
		let now = OffsetDateTime::now_utc();
		let cached = <dyn TokenStore>::get(self.store.as_ref(), scope).await?;

		Ok(cached.filter(|token| token.is_usable_at(now, self.safety_margin)))
	}

	fn join_or_start(&self, scope: &CredentialScope) -> Shared<RefreshFuture> {
		let mut in_flight = self.in_flight.lock();

		if let Some(refresh) = in_flight.get(scope).and_then(|flight| flight.refresh.upgrade()) {
			self.metrics.record_join();

			return refresh;
		}

		let generation = self.generation.fetch_add(1, Ordering::Relaxed);
		let refresh = self.refresh_future(scope.clone(), generation).shared();

		if let Some(weak) = refresh.downgrade() {
			in_flight.insert(scope.clone(), InFlight { generation, refresh: weak });
		}

		refresh
	}

	fn refresh_future(&self, scope: CredentialScope, generation: u64) -> RefreshFuture {
		const KIND: OpKind = OpKind::TokenRefresh;

		let cache = self.clone();

		async move {
			obs::record_op_outcome(KIND, OpOutcome::Attempt);
			obs::emit_event(KIND, OpOutcome::Attempt, scope.label());
			cache.metrics.record_attempt();

			let result = cache.refresh(&scope, generation).await;

			cache.release(&scope, generation);

			match &result {
				Ok(_) => cache.metrics.record_success(),
				Err(_) => cache.metrics.record_failure(),
			}

			obs::record_result(KIND, result)
		}
		.boxed()
	}

	async fn refresh(&self, scope: &CredentialScope, generation: u64) -> Result<AccessToken> {
		// A refresh that finished between our store read and taking the slot already did the
		// work.
		if let Some(token) = self.usable(scope).await? {
			return Ok(token);
		}

		let token =
			<dyn TokenSource>::fetch(self.source.as_ref(), scope).await.map_err(|err| match err {
				Error::InvalidCredentials { reason } => Error::AuthFailure { reason },
				other => other,
			})?;
		let now = OffsetDateTime::now_utc();

		if !token.is_usable_at(now, self.safety_margin) {
			return Err(ConfigError::TokenLifetimeTooShort {
				remaining_secs: token.remaining_at(now).whole_seconds(),
				margin_secs: self.safety_margin.whole_seconds(),
			}
			.into());
		}
		if self.is_current(scope, generation) {
			let ttl = token.remaining_at(now) - self.safety_margin;

			if let Err(err) =
				<dyn TokenStore>::put(self.store.as_ref(), scope, token.clone(), ttl).await
			{
				obs::emit_event(OpKind::TokenRefresh, OpOutcome::Failure, &err);
			}
			// An invalidation that landed between the check and the write must still win.
			if !self.is_current(scope, generation) {
				self.evict_if_unchanged(scope, &token).await;
			}
		}

		Ok(token)
	}

	async fn evict_if_unchanged(&self, scope: &CredentialScope, token: &AccessToken) {
		let evicted = async {
			if <dyn TokenStore>::get(self.store.as_ref(), scope).await?.as_ref() == Some(token) {
				<dyn TokenStore>::invalidate(self.store.as_ref(), scope).await?;
			}

			Ok::<_, crate::store::StoreError>(())
		};

		if let Err(err) = evicted.await {
			obs::emit_event(OpKind::TokenRefresh, OpOutcome::Failure, &err);
		}
	}

	fn is_current(&self, scope: &CredentialScope, generation: u64) -> bool {
		self.in_flight.lock().get(scope).is_some_and(|flight| flight.generation == generation)
	}

	fn release(&self, scope: &CredentialScope, generation: u64) {
		let mut in_flight = self.in_flight.lock();

		if in_flight.get(scope).is_some_and(|flight| flight.generation == generation) {
			in_flight.remove(scope);
		}
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("safety_margin", &self.safety_margin)
			.field("in_flight", &self.in_flight.lock().len())
			.field("metrics", &self.metrics)
			.finish()
	}
}
