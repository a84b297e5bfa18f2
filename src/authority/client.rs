//! Source applications of external client tokens, fed from the client authorization topic.

// crates.io
use futures_util::Stream;
// self
use super::{
	PermissionRecordError,
	permission::{consume_records, decode_record},
};
use crate::{
	_prelude::*,
	messaging::{DeliveryError, InboundMessage, MessageTransport},
};

/// Authorization the platform records for one external client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceApplicationAuthorization {
	/// Whether the client may act for its source application.
	#[serde(default)]
	pub authorized: bool,
	/// Client the record is about.
	#[serde(default)]
	pub client_id: Option<String>,
	/// Source application the client acts for.
	#[serde(default)]
	pub source_application_id: Option<i64>,
}

/// Finds the source application an external client acts for.
pub trait SourceApplicationLookup: Send + Sync {
	/// Source application of `client_id`; `None` when unknown or not authorized.
	fn source_application_id(&self, client_id: &str) -> Option<i64>;
}

/// Shared map from client id to source application id.
#[derive(Clone, Debug, Default)]
pub struct ClientAuthorizationCache(Arc<RwLock<HashMap<String, i64>>>);
impl ClientAuthorizationCache {
	/// Records that `client_id` acts for `source_application_id`.
	pub fn put(&self, client_id: impl Into<String>, source_application_id: i64) {
		self.0.write().insert(client_id.into(), source_application_id);
	}

	/// Forgets `client_id`.
	pub fn remove(&self, client_id: &str) -> Option<i64> {
		self.0.write().remove(client_id)
	}

	/// Number of authorized clients.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true if no client is authorized.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl SourceApplicationLookup for ClientAuthorizationCache {
	fn source_application_id(&self, client_id: &str) -> Option<i64> {
		self.0.read().get(client_id).copied()
	}
}

/// Keeps a [`ClientAuthorizationCache`] in sync with the client authorization topic.
///
/// Records are keyed by client id and carry a JSON [`SourceApplicationAuthorization`]. A record
/// that is not authorized, or names no source application, revokes the client.
pub struct ClientAuthorizationListener {
	transport: Arc<dyn MessageTransport>,
	topic: String,
	cache: ClientAuthorizationCache,
}
impl ClientAuthorizationListener {
	/// Topic consumed unless overridden.
	pub const DEFAULT_TOPIC: &'static str = "authorization";

	/// Creates a listener on [`Self::DEFAULT_TOPIC`].
	pub fn new(transport: Arc<dyn MessageTransport>, cache: ClientAuthorizationCache) -> Self {
		Self { transport, topic: Self::DEFAULT_TOPIC.into(), cache }
	}

	/// Consumes `topic` instead.
	pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
		self.topic = topic.into();

		self
	}

	/// Cache being populated.
	pub fn cache(&self) -> &ClientAuthorizationCache {
		&self.cache
	}

	/// Parses one record and stores or revokes it.
	pub fn apply(&self, message: &InboundMessage) -> Result<String, PermissionRecordError> {
		let authorization: SourceApplicationAuthorization = decode_record(message)?;
		let client_id = message
			.key
			.clone()
			.or(authorization.client_id)
			.filter(|id| !id.trim().is_empty())
			.ok_or(PermissionRecordError::MissingClientId)?;

		match authorization.source_application_id.filter(|_| authorization.authorized) {
			Some(id) => self.cache.put(client_id.clone(), id),
			None => {
				self.cache.remove(&client_id);
			},
		}

		Ok(client_id)
	}

	/// Applies every record from `records` until the stream ends; returns how many were applied.
	pub async fn consume<S>(&self, records: S) -> usize
	where
		S: Stream<Item = Result<InboundMessage, DeliveryError>>,
	{
		consume_records(records, |message| self.apply(message)).await
	}

	/// Subscribes to the topic and consumes it until the subscription ends.
	pub async fn run(&self) -> usize {
		self.consume(<dyn MessageTransport>::subscribe(self.transport.as_ref(), &self.topic)).await
	}
}
impl Debug for ClientAuthorizationListener {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientAuthorizationListener")
			.field("topic", &self.topic)
			.field("cached", &self.cache.len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use futures_util::stream;
	// self
	use super::*;
	use crate::messaging::MemoryTransport;

	fn record(key: Option<&str>, payload: &str) -> Result<InboundMessage, DeliveryError> {
		Ok(InboundMessage {
			topic: ClientAuthorizationListener::DEFAULT_TOPIC.into(),
			key: key.map(Into::into),
			headers: BTreeMap::new(),
			payload: payload.as_bytes().to_vec(),
			offset: 0,
		})
	}

	fn listener() -> ClientAuthorizationListener {
		ClientAuthorizationListener::new(Arc::new(MemoryTransport::default()), Default::default())
	}

	#[tokio::test]
	async fn authorized_clients_map_to_their_source_application() {
		let listener = listener();
		let records = stream::iter(vec![
			record(Some("svc-acos"), r#"{"authorized":true,"sourceApplicationId":1}"#),
			record(None, r#"{"authorized":true,"clientId":"svc-egrv","sourceApplicationId":2}"#),
			record(None, r#"{"authorized":true,"sourceApplicationId":3}"#),
			record(Some("svc-bad"), r#"{"authorized":"yes"}"#),
		]);

		assert_eq!(listener.consume(records).await, 2);

		let cache = listener.cache();

		assert_eq!(cache.source_application_id("svc-acos"), Some(1));
		assert_eq!(cache.source_application_id("svc-egrv"), Some(2));
		assert_eq!(cache.source_application_id("svc-bad"), None);
	}

	#[test]
	fn unauthorized_records_revoke_the_client() {
		let listener = listener();

		for payload in [
			r#"{"authorized":true,"sourceApplicationId":4}"#,
			r#"{"authorized":false,"sourceApplicationId":4}"#,
		] {
			let message = record(Some("svc-acos"), payload).expect("Fixture is a message.");

			listener.apply(&message).expect("Record should apply.");
		}

		assert_eq!(listener.cache().source_application_id("svc-acos"), None);
		assert!(listener.cache().is_empty());

		let message = record(None, r#"{"authorized":true}"#).expect("Fixture is a message.");

		assert_eq!(listener.apply(&message), Err(PermissionRecordError::MissingClientId));
	}
}
