//! Cached access-token model and its builder.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Errors produced by [`AccessTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum AccessTokenBuilderError {
	/// No token value was provided.
	#[error("Access token value is required.")]
	MissingValue,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Expiry does not come after issuance.
	#[error("Token expiry must be after its issued-at instant.")]
	ExpiryBeforeIssue,
	/// Relative expiry lands outside the representable calendar range.
	#[error("Token expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Access token issued by the authorization server.
///
/// Values are immutable once built; the cache replaces whole tokens rather than editing them,
/// and hands out clones.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
	value: TokenSecret,
	issued_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}
impl AccessToken {
	/// Returns a builder.
	pub fn builder() -> AccessTokenBuilder {
		AccessTokenBuilder::default()
	}

	/// The bearer token value.
	pub fn secret(&self) -> &TokenSecret {
		&self.value
	}

	/// Instant the server issued the token (as observed locally).
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Instant after which the token must not be presented.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Lifetime left at `now`; negative once expired.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}

	/// Whether the token outlives `now + margin` strictly; an unrepresentable limit never is.
	pub fn is_usable_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		now.checked_add(margin).is_some_and(|limit| self.expires_at > limit)
	}

	/// Whether the token has expired at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("value", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`AccessToken`].
#[derive(Clone, Debug, Default)]
pub struct AccessTokenBuilder {
	value: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl AccessTokenBuilder {
	/// Provides the token value.
	pub fn value(mut self, token: impl Into<String>) -> Self {
		self.value = Some(TokenSecret::new(token));

		self
	}

	/// Sets the issued-at instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant; wins over [`expires_in`](Self::expires_in).
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a lifetime relative to the issued-at instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`AccessToken`].
	pub fn build(self) -> Result<AccessToken, AccessTokenBuilderError> {
		let value = self.value.ok_or(AccessTokenBuilderError::MissingValue)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(AccessTokenBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(AccessTokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(AccessTokenBuilderError::ExpiryBeforeIssue);
		}

		Ok(AccessToken { value, issued_at, expires_at })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn relative_expiry_is_anchored_on_issue_time() {
		let token = AccessToken::builder()
			.value("abc")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::minutes(30))
			.build()
			.expect("Relative expiry should build.");

		assert_eq!(token.expires_at(), macros::datetime!(2025-01-01 00:30 UTC));
		assert_eq!(
			token.remaining_at(macros::datetime!(2025-01-01 00:20 UTC)),
			Duration::minutes(10)
		);
	}

	#[test]
	fn usability_respects_the_margin_strictly() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let token = AccessToken::builder()
			.value("abc")
			.issued_at(issued)
			.expires_at(issued + Duration::seconds(60))
			.build()
			.expect("Absolute expiry should build.");

		assert!(token.is_usable_at(issued, Duration::seconds(30)));
		assert!(!token.is_usable_at(issued + Duration::seconds(30), Duration::seconds(30)));
		assert!(!token.is_expired_at(issued + Duration::seconds(59)));
		assert!(token.is_expired_at(issued + Duration::seconds(60)));
	}

	#[test]
	fn builder_rejects_incomplete_input() {
		assert_eq!(
			AccessToken::builder().expires_in(Duration::minutes(1)).build(),
			Err(AccessTokenBuilderError::MissingValue)
		);
		assert_eq!(
			AccessToken::builder().value("abc").build(),
			Err(AccessTokenBuilderError::MissingExpiry)
		);
		assert_eq!(
			AccessToken::builder().value("abc").expires_in(Duration::ZERO).build(),
			Err(AccessTokenBuilderError::ExpiryBeforeIssue)
		);
	}

	#[test]
	fn far_future_expiry_and_margin_do_not_overflow() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(
			AccessToken::builder()
				.value("abc")
				.issued_at(issued)
				.expires_in(Duration::seconds(999_999_999_999))
				.build(),
			Err(AccessTokenBuilderError::ExpiryOutOfRange)
		);

		let token = AccessToken::builder()
			.value("abc")
			.issued_at(issued)
			.expires_in(Duration::hours(1))
			.build()
			.expect("Regular expiry should build.");

		assert!(!token.is_usable_at(issued, Duration::seconds(i64::MAX)));
		assert!(!token.is_usable_at(issued, Duration::MAX));
	}

	#[test]
	fn debug_output_redacts_value() {
		let token = AccessToken::builder()
			.value("do-not-print")
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Token should build.");

		assert!(!format!("{token:?}").contains("do-not-print"));
	}
}
