//! Fake transport for unit testing request correlation and lifecycle hooks.
//!
//! Provides an in-memory transport so the correlation layer can be exercised
//! without a worker process.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let client = Client::connect(parts, ClientConfig::default());
//!
//! let id = CorrelationId::new();
//! let handle = client.send_request(id, Envelope::new(id, json!({})), handler).await?;
//! controller.inject(Envelope::new(id, json!({"done": true})));
//! handle.wait().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use workerlink_protocol::CorrelationId;

use crate::error::{Error, Result};
use crate::transport::{BoxFuture, ChannelEvent, Transport, TransportParts};

/// Builder for creating fake transport instances.
pub struct FakeTransportBuilder {
	close_on_disconnect: bool,
	fail_sends: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self {
			close_on_disconnect: true,
			fail_sends: false,
		}
	}

	/// Whether `Transport::disconnect` emits a [`ChannelEvent::Closed`], as
	/// a real channel would. On by default.
	pub fn close_on_disconnect(mut self, enabled: bool) -> Self {
		self.close_on_disconnect = enabled;
		self
	}

	/// Makes every send fail until [`FakeTransportController::set_fail_sends`]
	/// says otherwise.
	pub fn fail_sends(mut self) -> Self {
		self.fail_sends = true;
		self
	}

	/// Build the fake transport and return both parts and a controller.
	///
	/// Returns [`TransportParts`] for creating a [`Client`] and a
	/// [`FakeTransportController`] for injecting events and inspecting sent
	/// messages.
	///
	/// [`Client`]: crate::Client
	pub fn build<M>(self) -> (TransportParts<M>, FakeTransportController<M>)
	where
		M: Send + 'static,
	{
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			sent: Mutex::new(Vec::new()),
			disconnects: AtomicUsize::new(0),
			fail_sends: AtomicBool::new(self.fail_sends),
		});

		let sender = FakeTransportSender {
			shared: Arc::clone(&shared),
			close_tx: self.close_on_disconnect.then(|| events_tx.clone()),
		};

		let controller = FakeTransportController {
			events_tx: Mutex::new(Some(events_tx)),
			shared,
		};

		let parts = TransportParts {
			sender: Box::new(sender),
			events: events_rx,
		};

		(parts, controller)
	}
}

impl Default for FakeTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct Shared<M> {
	sent: Mutex<Vec<(CorrelationId, M)>>,
	disconnects: AtomicUsize,
	fail_sends: AtomicBool,
}

/// Controller for injecting channel events and inspecting sent messages.
pub struct FakeTransportController<M> {
	events_tx: Mutex<Option<mpsc::UnboundedSender<ChannelEvent<M>>>>,
	shared: Arc<Shared<M>>,
}

impl<M> FakeTransportController<M>
where
	M: Send + 'static,
{
	fn emit(&self, event: ChannelEvent<M>) {
		if let Some(tx) = self.events_tx.lock().as_ref() {
			let _ = tx.send(event);
		}
	}

	/// Simulate receiving a message from the worker.
	pub fn inject(&self, message: M) {
		self.emit(ChannelEvent::Message(message));
	}

	/// Simulate the channel closing.
	pub fn close(&self) {
		self.emit(ChannelEvent::Closed);
	}

	/// Simulate the transport noticing a dead peer.
	pub fn disconnect(&self) {
		self.emit(ChannelEvent::Disconnected);
	}

	/// Drop the controller's event sender, ending the stream once the
	/// transport's own sender is gone too.
	pub fn end_stream(&self) {
		self.events_tx.lock().take();
	}

	pub fn set_fail_sends(&self, fail: bool) {
		self.shared.fail_sends.store(fail, Ordering::SeqCst);
	}

	/// Take all sent messages, clearing the buffer.
	pub fn take_sent(&self) -> Vec<(CorrelationId, M)> {
		std::mem::take(&mut *self.shared.sent.lock())
	}

	pub fn sent_ids(&self) -> Vec<CorrelationId> {
		self.shared.sent.lock().iter().map(|(id, _)| *id).collect()
	}

	/// Number of times `Transport::disconnect` was called.
	pub fn disconnect_calls(&self) -> usize {
		self.shared.disconnects.load(Ordering::SeqCst)
	}
}

struct FakeTransportSender<M> {
	shared: Arc<Shared<M>>,
	close_tx: Option<mpsc::UnboundedSender<ChannelEvent<M>>>,
}

impl<M> Transport<M> for FakeTransportSender<M>
where
	M: Send + 'static,
{
	fn send(&mut self, id: CorrelationId, message: M) -> BoxFuture<'_, Result<()>> {
		let shared = Arc::clone(&self.shared);
		Box::pin(async move {
			if shared.fail_sends.load(Ordering::SeqCst) {
				return Err(Error::Transport("fake transport refused send".to_string()));
			}
			shared.sent.lock().push((id, message));
			Ok(())
		})
	}

	fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
			if let Some(tx) = self.close_tx.take() {
				let _ = tx.send(ChannelEvent::Closed);
			}
			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn sends_are_captured_in_order() {
		let (mut parts, controller) = FakeTransportBuilder::new().build::<u32>();
		let a = CorrelationId::from_u128(1);
		let b = CorrelationId::from_u128(2);

		parts.sender.send(a, 10).await.unwrap();
		parts.sender.send(b, 20).await.unwrap();

		assert_eq!(controller.sent_ids(), vec![a, b]);
		assert_eq!(controller.take_sent(), vec![(a, 10), (b, 20)]);
		assert!(controller.take_sent().is_empty());
	}

	#[tokio::test]
	async fn failing_sends_are_not_captured() {
		let (mut parts, controller) = FakeTransportBuilder::new().fail_sends().build::<u32>();

		let err = parts.sender.send(CorrelationId::new(), 1).await.unwrap_err();
		assert!(matches!(err, Error::Transport(_)));
		assert!(controller.take_sent().is_empty());

		controller.set_fail_sends(false);
		parts.sender.send(CorrelationId::new(), 2).await.unwrap();
		assert_eq!(controller.take_sent().len(), 1);
	}

	#[tokio::test]
	async fn disconnect_emits_a_single_close() {
		let (mut parts, controller) = FakeTransportBuilder::new().build::<u32>();

		parts.sender.disconnect().await.unwrap();
		parts.sender.disconnect().await.unwrap();
		controller.end_stream();
		drop(parts.sender);

		assert!(matches!(parts.events.recv().await, Some(ChannelEvent::Closed)));
		assert!(parts.events.recv().await.is_none());
		assert_eq!(controller.disconnect_calls(), 2);
	}

	#[tokio::test]
	async fn injected_events_arrive_in_order() {
		let (mut parts, controller) = FakeTransportBuilder::new().build::<u32>();

		controller.inject(1);
		controller.disconnect();
		controller.inject(2);
		controller.close();

		assert!(matches!(parts.events.recv().await, Some(ChannelEvent::Message(1))));
		assert!(matches!(parts.events.recv().await, Some(ChannelEvent::Disconnected)));
		assert!(matches!(parts.events.recv().await, Some(ChannelEvent::Message(2))));
		assert!(matches!(parts.events.recv().await, Some(ChannelEvent::Closed)));
	}
}
