//! Optional observability helpers for courier operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oauth2_courier.op` with the `op` and
//!   `stage` (call site) fields, plus events for refreshes, retries, and rejected messages.
//! - Enable `metrics` to increment the `oauth2_courier_op_total` counter for every
//!   attempt/success/failure/retry, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the courier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Single client-credentials exchange against the token endpoint.
	TokenFetch,
	/// Cache-driven refresh shared by all waiters of one scope.
	TokenRefresh,
	/// Signing key set download.
	KeySetRefresh,
	/// Inbound bearer-token validation.
	Validate,
	/// Authenticated broker send.
	Send,
	/// Inbound message authorization.
	Receive,
	/// User-permission cache update from the broker.
	PermissionUpdate,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::TokenFetch => "token_fetch",
			OpKind::TokenRefresh => "token_refresh",
			OpKind::KeySetRefresh => "key_set_refresh",
			OpKind::Validate => "validate",
			OpKind::Send => "send",
			OpKind::Receive => "receive",
			OpKind::PermissionUpdate => "permission_update",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a courier operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Operation is being attempted again after a rejection.
	Retry,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Retry => "retry",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records the terminal outcome of `result` for `kind` and hands the result back.
pub fn record_result<T>(kind: OpKind, result: Result<T>) -> Result<T> {
	match &result {
		Ok(_) => record_op_outcome(kind, OpOutcome::Success),
		Err(err) => {
			record_op_outcome(kind, OpOutcome::Failure);
			emit_event(kind, OpOutcome::Failure, err);
		},
	}

	result
}
