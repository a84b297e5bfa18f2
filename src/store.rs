//! Cache backend contract and the built-in in-memory implementation.
//!
//! The token cache talks to its backend only through [`TokenStore`]: keyed get, put with a
//! time-to-live, and invalidate. Entries are whole [`AccessToken`] values, so a reader either
//! sees the previous token or its full replacement.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, CredentialScope},
};

/// Future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Key-value cache backend holding one access token per credential scope.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Returns the live entry for `scope`, if any; expired entries read as absent.
	fn get<'a>(&'a self, scope: &'a CredentialScope) -> StoreFuture<'a, Option<AccessToken>>;

	/// Stores or replaces the entry for `scope`, evicting it after `ttl`.
	fn put<'a>(
		&'a self,
		scope: &'a CredentialScope,
		token: AccessToken,
		ttl: Duration,
	) -> StoreFuture<'a, ()>;

	/// Removes the entry for `scope`, returning the evicted token.
	fn invalidate<'a>(&'a self, scope: &'a CredentialScope)
	-> StoreFuture<'a, Option<AccessToken>>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
