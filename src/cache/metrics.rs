// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for token cache activity.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	joins: AtomicU64,
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl CacheMetrics {
	/// Requests answered from the store without contacting the source.
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Requests that awaited a refresh another caller had already started.
	pub fn joins(&self) -> u64 {
		self.joins.load(Ordering::Relaxed)
	}

	/// Refreshes started, one per single-flight leader.
	pub fn refresh_attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Refreshes that produced a usable token.
	pub fn refresh_successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Refreshes that ended in an error.
	pub fn refresh_failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	pub(crate) fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_join(&self) {
		self.joins.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}
