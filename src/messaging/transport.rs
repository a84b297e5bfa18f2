//! Broker transport seam and the in-process topic broker.

// std
use std::task::{Context, Poll, Waker};
// crates.io
use futures_util::{Stream, stream::BoxStream};
// self
use super::{InboundMessage, OutboundMessage};
use crate::_prelude::*;

/// Future returned by [`MessageTransport::send`].
pub type TransportFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, DeliveryError>> + 'a + Send>>;

/// Broker delivery failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum DeliveryError {
	/// Broker refused the message because of its credentials.
	#[error("Broker rejected the message credentials: {reason}.")]
	AuthenticationRejected {
		/// Broker-supplied reason.
		reason: String,
	},
	/// Broker could not be reached or is temporarily refusing work.
	#[error("Broker is unavailable: {reason}.")]
	Unavailable {
		/// Broker-supplied reason.
		reason: String,
	},
	/// Broker refused the message for a reason unrelated to authentication.
	#[error("Broker refused the message: {reason}.")]
	Refused {
		/// Broker-supplied reason.
		reason: String,
	},
}
impl DeliveryError {
	/// Whether a later attempt may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Unavailable { .. })
	}
}

/// Produce/consume operations of a message broker.
pub trait MessageTransport: Send + Sync {
	/// Publishes one message.
	fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()>;

	/// Opens a fresh subscription to `topic`.
	fn subscribe(&self, topic: &str) -> BoxStream<'static, Result<InboundMessage, DeliveryError>>;
}

type Authenticator = dyn Fn(&OutboundMessage) -> Result<(), DeliveryError> + Send + Sync;

#[derive(Default)]
struct Topic {
	log: Vec<InboundMessage>,
	// One slot per subscription waiting for the next append.
	wakers: HashMap<u64, Waker>,
	next_subscriber: u64,
}

/// In-process broker keeping every topic as an append-only log.
///
/// Each subscription replays its topic from the first message and then follows new ones.
/// An optional authenticator inspects every send and can reject it.
#[derive(Clone, Default)]
pub struct MemoryTransport {
	topics: Arc<Mutex<HashMap<String, Arc<Mutex<Topic>>>>>,
	authenticator: Option<Arc<Authenticator>>,
}
impl MemoryTransport {
	/// Runs `check` against every message before it is appended.
	pub fn with_authenticator<F>(mut self, check: F) -> Self
	where
		F: 'static + Fn(&OutboundMessage) -> Result<(), DeliveryError> + Send + Sync,
	{
		self.authenticator = Some(Arc::new(check));

		self
	}

	/// Messages appended to `topic` so far.
	pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
		self.topics.lock().get(topic).map(|topic| topic.lock().log.clone()).unwrap_or_default()
	}

	fn topic(&self, name: &str) -> Arc<Mutex<Topic>> {
		self.topics.lock().entry(name.to_owned()).or_default().clone()
	}

	#[cfg(test)]
	fn waiting(&self, topic: &str) -> usize {
		self.topics.lock().get(topic).map(|topic| topic.lock().wakers.len()).unwrap_or_default()
	}

	fn append(&self, message: OutboundMessage) -> Result<(), DeliveryError> {
		if let Some(check) = &self.authenticator {
			check(&message)?;
		}

		let topic = self.topic(&message.topic);
		let mut topic = topic.lock();
		let offset = topic.log.len() as u64;

		topic.log.push(InboundMessage::from((message, offset)));

		for (_, waker) in topic.wakers.drain() {
			waker.wake();
		}

		Ok(())
	}
}
impl MessageTransport for MemoryTransport {
	fn send(&self, message: OutboundMessage) -> TransportFuture<'_, ()> {
		let result = self.append(message);

		Box::pin(async move { result })
	}

	fn subscribe(&self, topic: &str) -> BoxStream<'static, Result<InboundMessage, DeliveryError>> {
		let topic = self.topic(topic);
		let id = {
			let mut topic = topic.lock();
			let id = topic.next_subscriber;

			topic.next_subscriber += 1;

			id
		};

		Box::pin(Subscription { topic, id, position: 0 })
	}
}
impl Debug for MemoryTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryTransport")
			.field("topics", &self.topics.lock().keys().collect::<Vec<_>>())
			.field("authenticated", &self.authenticator.is_some())
			.finish()
	}
}

struct Subscription {
	topic: Arc<Mutex<Topic>>,
	id: u64,
	position: usize,
}
impl Stream for Subscription {
	type Item = Result<InboundMessage, DeliveryError>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let next = {
			let mut topic = self.topic.lock();

			match topic.log.get(self.position) {
				Some(message) => Some(message.clone()),
				None => {
					topic.wakers.insert(self.id, cx.waker().clone());

					None
				},
			}
		};

		match next {
			Some(message) => {
				self.position += 1;

				Poll::Ready(Some(Ok(message)))
			},
			None => Poll::Pending,
		}
	}
}
impl Drop for Subscription {
	fn drop(&mut self) {
		self.topic.lock().wakers.remove(&self.id);
	}
}
