//! Server strategy hooks that customize token requests and classify failures.
//!
//! Implementations decorate outgoing client-credentials requests and normalize error mapping
//! without tying the token source to any particular HTTP client.

// self
use crate::{_prelude::*, auth::CredentialScope};

/// Strategy hook that lets deployments decorate requests and classify errors.
///
/// Hooks use crate-owned data types so downstream crates never depend on reqwest-specific
/// structures. Only [`classify_token_error`](Self::classify_token_error) is required.
pub trait ServerStrategy: Send + Sync {
	/// Maps low-level HTTP/JSON errors into the courier taxonomy.
	fn classify_token_error(&self, ctx: &ServerErrorContext) -> ServerErrorKind;

	/// Adds custom form parameters before the request is dispatched.
	///
	/// The default does nothing. Override it when a server wants fields beyond `audience`,
	/// such as `resource`.
	fn augment_token_request(
		&self,
		_scope: &CredentialScope,
		_form: &mut BTreeMap<String, String>,
	) {
	}
}

/// Canonical server error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerErrorKind {
	/// Client authentication failed; retrying with the same secret cannot help.
	InvalidClient,
	/// Server refused to grant the requested scopes or audience.
	InvalidScope,
	/// Failure is temporary; the next call should try again.
	Transient,
}
impl ServerErrorKind {
	/// Whether the failure may clear up without operator action.
	pub fn is_transient(self) -> bool {
		matches!(self, Self::Transient)
	}
}

/// Context passed to strategies when classifying token errors.
///
/// Only primitive data is kept (status codes, OAuth fields, body preview) so strategies stay
/// decoupled from the HTTP client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerErrorContext {
	/// HTTP status code returned by the server, when available.
	pub http_status: Option<u16>,
	/// Server-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Server-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Whether the failure originated in the network/transport layer.
	pub network_error: bool,
}
impl ServerErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Convenience constructor for transport-level failures.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Self::default() }
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the server.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a truncated body preview for servers that answer with non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Best human-readable reason available in the context.
	pub fn reason(&self) -> String {
		match (&self.oauth_error, &self.error_description) {
			(Some(code), Some(description)) => format!("{code}: {description}"),
			(Some(code), None) => code.clone(),
			(None, Some(description)) => description.clone(),
			(None, None) => match (self.http_status, &self.body_preview) {
				(Some(status), Some(body)) => format!("HTTP {status}: {body}"),
				(Some(status), None) => format!("HTTP {status}"),
				(None, Some(body)) => body.clone(),
				(None, None) => "unspecified failure".into(),
			},
		}
	}
}

/// Default strategy applying RFC 6749 heuristics.
///
/// Structured OAuth fields win, then body text hints, then the HTTP status code. Network
/// failures are always transient.
#[derive(Debug, Default)]
pub struct DefaultServerStrategy;
impl Display for DefaultServerStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-server-strategy")
	}
}
impl ServerStrategy for DefaultServerStrategy {
	fn classify_token_error(&self, ctx: &ServerErrorContext) -> ServerErrorKind {
		if ctx.network_error {
			return ServerErrorKind::Transient;
		}

		if let Some(kind) = ctx.oauth_error.as_deref().and_then(match_exact_value) {
			return kind;
		}
		if let Some(kind) = classify_body(ctx.error_description.as_deref())
			.or_else(|| classify_body(ctx.body_preview.as_deref()))
		{
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ServerErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ServerErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn match_exact_value(value: &str) -> Option<ServerErrorKind> {
	if value.eq_ignore_ascii_case("invalid_client")
		|| value.eq_ignore_ascii_case("unauthorized_client")
		|| value.eq_ignore_ascii_case("invalid_grant")
		|| value.eq_ignore_ascii_case("access_denied")
	{
		Some(ServerErrorKind::InvalidClient)
	} else if value.eq_ignore_ascii_case("invalid_scope")
		|| value.eq_ignore_ascii_case("invalid_target")
	{
		Some(ServerErrorKind::InvalidScope)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable")
		|| value.eq_ignore_ascii_case("server_error")
		|| value.eq_ignore_ascii_case("slow_down")
	{
		Some(ServerErrorKind::Transient)
	} else {
		None
	}
}

fn classify_body(body: Option<&str>) -> Option<ServerErrorKind> {
	let lowered = body?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_client") || text.contains("unauthorized_client") =>
			Some(ServerErrorKind::InvalidClient),
		text if text.contains("invalid_scope") => Some(ServerErrorKind::InvalidScope),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(ServerErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ServerErrorKind {
	match status {
		Some(401 | 403) => ServerErrorKind::InvalidClient,
		Some(400) => ServerErrorKind::InvalidScope,
		_ => ServerErrorKind::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth_codes_take_priority_over_status() {
		let strategy = DefaultServerStrategy;
		let ctx = ServerErrorContext::new().with_http_status(400).with_oauth_error("invalid_client");

		assert_eq!(strategy.classify_token_error(&ctx), ServerErrorKind::InvalidClient);

		let ctx = ServerErrorContext::new()
			.with_http_status(400)
			.with_oauth_error("temporarily_unavailable");

		assert_eq!(strategy.classify_token_error(&ctx), ServerErrorKind::Transient);
	}

	#[test]
	fn status_fallbacks_split_permanent_from_transient() {
		let strategy = DefaultServerStrategy;

		for (status, expected) in [
			(401, ServerErrorKind::InvalidClient),
			(403, ServerErrorKind::InvalidClient),
			(400, ServerErrorKind::InvalidScope),
			(429, ServerErrorKind::Transient),
			(503, ServerErrorKind::Transient),
		] {
			let ctx = ServerErrorContext::new().with_http_status(status);

			assert_eq!(strategy.classify_token_error(&ctx), expected, "status {status}");
		}

		assert!(strategy.classify_token_error(&ServerErrorContext::network_failure()).is_transient());
	}

	#[test]
	fn body_hints_are_used_without_structured_fields() {
		let ctx = ServerErrorContext::new()
			.with_http_status(500)
			.with_body_preview("upstream said: unauthorized_client");

		assert_eq!(DefaultServerStrategy.classify_token_error(&ctx), ServerErrorKind::InvalidClient);
	}

	#[test]
	fn previews_are_truncated() {
		let ctx = ServerErrorContext::new().with_body_preview("x".repeat(300));
		let preview = ctx.body_preview.expect("Preview should be recorded.");

		assert_eq!(preview.chars().count(), ServerErrorContext::BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}

	#[test]
	fn reason_prefers_oauth_fields() {
		let ctx = ServerErrorContext::new()
			.with_http_status(401)
			.with_oauth_error("invalid_client")
			.with_error_description("client secret mismatch");

		assert_eq!(ctx.reason(), "invalid_client: client secret mismatch");
		assert_eq!(ServerErrorContext::new().with_http_status(502).reason(), "HTTP 502");
	}
}
