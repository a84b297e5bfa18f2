//! Broker message envelopes.

// self
use crate::{
	_prelude::*,
	authority::Authentication,
	validator::{self, ValidatedClaims},
};

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Message handed to the broker.
///
/// Header names are stored lower-cased.
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundMessage {
	/// Destination topic.
	pub topic: String,
	/// Partitioning key.
	pub key: Option<String>,
	/// Message headers.
	pub headers: BTreeMap<String, String>,
	/// Opaque payload.
	pub payload: Vec<u8>,
}
impl OutboundMessage {
	/// Creates a message without key or headers.
	pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
		Self { topic: topic.into(), key: None, headers: BTreeMap::new(), payload: payload.into() }
	}

	/// Sets the partitioning key.
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());

		self
	}

	/// Sets a header, replacing any previous value.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Bearer token from the `authorization` header.
	pub fn bearer(&self) -> Option<&str> {
		self.header(AUTHORIZATION_HEADER).and_then(validator::bearer_token)
	}
}
impl Debug for OutboundMessage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OutboundMessage")
			.field("topic", &self.topic)
			.field("key", &self.key)
			.field("headers", &redacted(&self.headers))
			.field("payload_len", &self.payload.len())
			.finish()
	}
}

/// Message delivered by the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMessage {
	/// Source topic.
	pub topic: String,
	/// Partitioning key.
	pub key: Option<String>,
	/// Message headers, lower-cased names.
	pub headers: BTreeMap<String, String>,
	/// Opaque payload.
	pub payload: Vec<u8>,
	/// Position in the topic.
	pub offset: u64,
}
impl InboundMessage {
	/// Header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Bearer token from the `authorization` header.
	pub fn bearer(&self) -> Option<&str> {
		self.header(AUTHORIZATION_HEADER).and_then(validator::bearer_token)
	}
}
impl From<(OutboundMessage, u64)> for InboundMessage {
	fn from((message, offset): (OutboundMessage, u64)) -> Self {
		let OutboundMessage { topic, key, headers, payload } = message;

		Self { topic, key, headers, payload, offset }
	}
}
impl Debug for InboundMessage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InboundMessage")
			.field("topic", &self.topic)
			.field("offset", &self.offset)
			.field("key", &self.key)
			.field("headers", &redacted(&self.headers))
			.field("payload_len", &self.payload.len())
			.finish()
	}
}

/// Inbound message whose bearer token validated.
#[derive(Clone, Debug)]
pub struct AuthorizedMessage {
	/// Original message.
	pub message: InboundMessage,
	/// Claims of the sender's token.
	pub claims: ValidatedClaims,
	/// Authorities resolved from the claims.
	pub authentication: Authentication,
}

fn redacted(headers: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
	headers
		.iter()
		.map(|(name, value)| {
			let value = if name == AUTHORIZATION_HEADER { "<redacted>" } else { value.as_str() };

			(name.as_str(), value)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn headers_are_case_insensitive() {
		let message = OutboundMessage::new("orders", "{}").with_header("Authorization", "Bearer t-1");

		assert_eq!(message.header("AUTHORIZATION"), Some("Bearer t-1"));
		assert_eq!(message.bearer(), Some("t-1"));
	}

	#[test]
	fn debug_redacts_the_token() {
		let message = OutboundMessage::new("orders", "{}").with_header("authorization", "Bearer t-1");
		let inbound = InboundMessage::from((message.clone(), 3));

		assert!(!format!("{message:?}").contains("t-1"));
		assert!(!format!("{inbound:?}").contains("t-1"));
		assert_eq!(inbound.bearer(), Some("t-1"));
		assert_eq!(inbound.offset, 3);
	}
}
