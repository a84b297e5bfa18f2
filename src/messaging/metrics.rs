// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for secured messaging activity.
#[derive(Debug, Default)]
pub struct ClientMetrics {
	sent: AtomicU64,
	auth_retries: AtomicU64,
	auth_failures: AtomicU64,
	received: AtomicU64,
	rejected: AtomicU64,
}
impl ClientMetrics {
	/// Messages the broker accepted.
	pub fn sent(&self) -> u64 {
		self.sent.load(Ordering::Relaxed)
	}

	/// Sends repeated with a fresh token after an authentication rejection.
	pub fn auth_retries(&self) -> u64 {
		self.auth_retries.load(Ordering::Relaxed)
	}

	/// Sends abandoned after exhausting the authentication retries.
	pub fn auth_failures(&self) -> u64 {
		self.auth_failures.load(Ordering::Relaxed)
	}

	/// Inbound messages that passed validation.
	pub fn received(&self) -> u64 {
		self.received.load(Ordering::Relaxed)
	}

	/// Inbound items that ended in an error.
	pub fn rejected(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	pub(crate) fn record_sent(&self) {
		self.sent.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_auth_retry(&self) {
		self.auth_retries.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_auth_failure(&self) {
		self.auth_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_received(&self) {
		self.received.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rejected(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}
}
