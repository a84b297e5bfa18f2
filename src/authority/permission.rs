//! User-permission cache fed from a broker topic.

// crates.io
use futures_util::{Stream, StreamExt};
// self
use crate::{
	_prelude::*,
	messaging::{DeliveryError, InboundMessage, MessageTransport},
	obs::{self, OpKind, OpOutcome},
};

/// Source applications a user may act for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermission {
	/// Directory object identifier of the user.
	#[serde(default)]
	pub object_identifier: Option<String>,
	/// Granted source application ids.
	#[serde(default)]
	pub source_application_ids: BTreeSet<i64>,
}

/// Why a permission record was skipped.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PermissionRecordError {
	/// Neither the record key nor the payload names the user.
	#[error("Permission record does not name an object identifier.")]
	MissingObjectIdentifier,
	/// Neither the record key nor the payload names the client.
	#[error("Client authorization record does not name a client id.")]
	MissingClientId,
	/// Payload is not a permission document.
	#[error("Permission record is invalid at `{path}`: {message}.")]
	InvalidPayload {
		/// Path to the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
}

/// Shared map from object identifier to granted source application ids.
#[derive(Clone, Debug, Default)]
pub struct UserPermissionCache(Arc<RwLock<HashMap<String, BTreeSet<i64>>>>);
impl UserPermissionCache {
	/// Replaces the grants for `object_identifier`.
	pub fn put(&self, object_identifier: impl Into<String>, ids: BTreeSet<i64>) {
		self.0.write().insert(object_identifier.into(), ids);
	}

	/// Grants recorded for `object_identifier`.
	pub fn source_application_ids(&self, object_identifier: &str) -> Option<BTreeSet<i64>> {
		self.0.read().get(object_identifier).cloned()
	}

	/// Drops the grants for `object_identifier`.
	pub fn remove(&self, object_identifier: &str) -> Option<BTreeSet<i64>> {
		self.0.write().remove(object_identifier)
	}

	/// Number of users with recorded grants.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true if nothing has been recorded.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}

/// Keeps a [`UserPermissionCache`] in sync with a permission topic.
///
/// Records are keyed by object identifier and carry a JSON [`UserPermission`]. Bad records are
/// logged and skipped; they are never retried.
pub struct PermissionListener {
	transport: Arc<dyn MessageTransport>,
	topic: String,
	cache: UserPermissionCache,
}
impl PermissionListener {
	/// Topic consumed unless overridden.
	pub const DEFAULT_TOPIC: &'static str = "userpermission";

	/// Creates a listener on [`Self::DEFAULT_TOPIC`].
	pub fn new(transport: Arc<dyn MessageTransport>, cache: UserPermissionCache) -> Self {
		Self { transport, topic: Self::DEFAULT_TOPIC.into(), cache }
	}

	/// Consumes `topic` instead.
	pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
		self.topic = topic.into();

		self
	}

	/// Cache being populated.
	pub fn cache(&self) -> &UserPermissionCache {
		&self.cache
	}

	/// Parses one record and stores it.
	pub fn apply(&self, message: &InboundMessage) -> Result<String, PermissionRecordError> {
		let permission: UserPermission = decode_record(message)?;
		let object_identifier = message
			.key
			.clone()
			.or(permission.object_identifier)
			.filter(|id| !id.trim().is_empty())
			.ok_or(PermissionRecordError::MissingObjectIdentifier)?;

		self.cache.put(object_identifier.clone(), permission.source_application_ids);

		Ok(object_identifier)
	}

	/// Applies every record from `records` until the stream ends; returns how many were stored.
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
impl Debug for PermissionListener {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PermissionListener")
			.field("topic", &self.topic)
			.field("cached", &self.cache.len())
			.finish()
	}
}

pub(crate) fn decode_record<T>(message: &InboundMessage) -> Result<T, PermissionRecordError>
where
	T: for<'de> Deserialize<'de>,
{
	let mut deserializer = serde_json::Deserializer::from_slice(&message.payload);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
		PermissionRecordError::InvalidPayload {
			path: err.path().to_string(),
			message: err.inner().to_string(),
		}
	})
}

// Bad records are logged and skipped; the loop ends with the stream.
pub(crate) async fn consume_records<S, F>(records: S, mut apply: F) -> usize
where
	S: Stream<Item = Result<InboundMessage, DeliveryError>>,
	F: FnMut(&InboundMessage) -> Result<String, PermissionRecordError>,
{
	const KIND: OpKind = OpKind::PermissionUpdate;

	let mut records = std::pin::pin!(records);
	let mut applied = 0;

	while let Some(record) = records.next().await {
		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let outcome = match record {
			Ok(message) => apply(&message).map_err(|err| err.to_string()),
			Err(err) => Err(err.to_string()),
		};

		match outcome {
			Ok(key) => {
				applied += 1;

				obs::record_op_outcome(KIND, OpOutcome::Success);
				obs::emit_event(KIND, OpOutcome::Success, key);
			},
			Err(reason) => {
				obs::record_op_outcome(KIND, OpOutcome::Failure);
				obs::emit_event(KIND, OpOutcome::Failure, format_args!("skipped: {reason}"));
			},
		}
	}

	applied
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
			topic: PermissionListener::DEFAULT_TOPIC.into(),
			key: key.map(Into::into),
			headers: BTreeMap::new(),
			payload: payload.as_bytes().to_vec(),
			offset: 0,
		})
	}

	#[tokio::test]
	async fn invalid_records_are_skipped() {
		let cache = UserPermissionCache::default();
		let listener = PermissionListener::new(Arc::new(MemoryTransport::default()), cache.clone());
		let records = stream::iter(vec![
			record(Some("user-1"), r#"{"sourceApplicationIds":[1,2]}"#),
			record(Some("user-2"), "not json"),
			record(None, r#"{"sourceApplicationIds":[3]}"#),
			record(Some("user-3"), r#"{"sourceApplicationIds":["x"]}"#),
			Err(DeliveryError::Unavailable { reason: "partition moved".into() }),
			record(None, r#"{"objectIdentifier":"user-4","sourceApplicationIds":[4]}"#),
		]);

		assert_eq!(listener.consume(records).await, 2);
		assert_eq!(cache.source_application_ids("user-1"), Some(BTreeSet::from([1, 2])));
		assert_eq!(cache.source_application_ids("user-4"), Some(BTreeSet::from([4])));
		assert_eq!(cache.len(), 2);
	}

	#[test]
	fn payload_errors_name_the_field() {
		let listener =
			PermissionListener::new(Arc::new(MemoryTransport::default()), Default::default());
		let message = record(Some("user-1"), r#"{"sourceApplicationIds":[1,"two"]}"#)
			.expect("Fixture is a message.");
		let err = listener.apply(&message).expect_err("String ids are invalid.");

		assert!(matches!(
			err,
			PermissionRecordError::InvalidPayload { ref path, .. }
				if path.starts_with("sourceApplicationIds")
		));
	}

	#[test]
	fn later_records_replace_earlier_grants() {
		let listener =
			PermissionListener::new(Arc::new(MemoryTransport::default()), Default::default());

		for payload in [r#"{"sourceApplicationIds":[1,2]}"#, r#"{"sourceApplicationIds":[5]}"#] {
			let message = record(Some("user-1"), payload).expect("Fixture is a message.");

			listener.apply(&message).expect("Record should apply.");
		}

		assert_eq!(listener.cache().source_application_ids("user-1"), Some(BTreeSet::from([5])));
	}
}
