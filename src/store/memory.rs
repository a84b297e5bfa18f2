//! Thread-safe in-memory [`TokenStore`] with per-entry time-to-live.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialScope},
	store::{StoreError, StoreFuture, TokenStore},
};

type StoreMap = Arc<RwLock<HashMap<CredentialScope, Entry>>>;

#[derive(Clone, Debug)]
struct Entry {
	token: AccessToken,
	evict_at: OffsetDateTime,
}

/// In-process cache backend; entries vanish when their TTL elapses or the store is dropped.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of entries, including ones whose TTL elapsed but were not read since.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true when the store holds no entries.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.0.write().clear();
	}

	fn get_now(map: &StoreMap, scope: &CredentialScope, now: OffsetDateTime) -> Option<AccessToken> {
		{
			let guard = map.read();

			match guard.get(scope) {
				Some(entry) if entry.evict_at > now => return Some(entry.token.clone()),
				Some(_) => {},
				None => return None,
			}
		}

		let mut guard = map.write();

		// Another writer may have replaced the expired entry in between.
		if guard.get(scope).is_some_and(|entry| entry.evict_at <= now) {
			guard.remove(scope);
		}

		guard.get(scope).map(|entry| entry.token.clone())
	}

	fn put_now(
		map: &StoreMap,
		scope: &CredentialScope,
		token: AccessToken,
		ttl: Duration,
	) -> Result<(), StoreError> {
		if !ttl.is_positive() {
			map.write().remove(scope);

			return Ok(());
		}

		let entry = Entry { token, evict_at: OffsetDateTime::now_utc() + ttl };

		map.write().insert(scope.clone(), entry);

		Ok(())
	}
}
impl TokenStore for MemoryStore {
	fn get<'a>(&'a self, scope: &'a CredentialScope) -> StoreFuture<'a, Option<AccessToken>> {
		Box::pin(async move { Ok(Self::get_now(&self.0, scope, OffsetDateTime::now_utc())) })
	}

	fn put<'a>(
		&'a self,
		scope: &'a CredentialScope,
		token: AccessToken,
		ttl: Duration,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move { Self::put_now(&self.0, scope, token, ttl) })
	}

	fn invalidate<'a>(
		&'a self,
		scope: &'a CredentialScope,
	) -> StoreFuture<'a, Option<AccessToken>> {
		Box::pin(async move { Ok(self.0.write().remove(scope).map(|entry| entry.token)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::{ClientId, ScopeSet};

	fn scope(name: &str) -> CredentialScope {
		CredentialScope::new(
			ClientId::new(name).expect("Client fixture should be valid."),
			ScopeSet::new(["read"]).expect("Scope fixture should be valid."),
		)
	}

	fn token(value: &str) -> AccessToken {
		AccessToken::builder()
			.value(value)
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Token fixture should build.")
	}

	#[test]
	fn elapsed_entries_read_as_absent_and_are_evicted() {
		let store = MemoryStore::default();
		let key = scope("svc-a");

		MemoryStore::put_now(&store.0, &key, token("a"), Duration::seconds(30))
			.expect("Put should succeed.");

		let now = OffsetDateTime::now_utc();

		assert!(MemoryStore::get_now(&store.0, &key, now).is_some());
		assert!(MemoryStore::get_now(&store.0, &key, now + Duration::seconds(31)).is_none());
		assert!(store.is_empty());
	}

	#[test]
	fn non_positive_ttl_removes_the_entry() {
		let store = MemoryStore::default();
		let key = scope("svc-a");

		MemoryStore::put_now(&store.0, &key, token("a"), Duration::minutes(1))
			.expect("Put should succeed.");
		MemoryStore::put_now(&store.0, &key, token("b"), Duration::ZERO)
			.expect("Put should succeed.");

		assert_eq!(store.len(), 0);
	}

	#[test]
	fn entries_are_isolated_per_scope() {
		let store = MemoryStore::default();

		MemoryStore::put_now(&store.0, &scope("svc-a"), token("a"), Duration::minutes(1))
			.expect("Put should succeed.");
		MemoryStore::put_now(&store.0, &scope("svc-b"), token("b"), Duration::minutes(1))
			.expect("Put should succeed.");

		let now = OffsetDateTime::now_utc();
		let a = MemoryStore::get_now(&store.0, &scope("svc-a"), now).expect("Entry a should exist.");

		assert_eq!(a.secret().expose(), "a");
		assert_eq!(store.len(), 2);

		store.clear();

		assert!(store.is_empty());
	}
}
