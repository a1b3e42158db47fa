//! Client owning a channel to an out-of-process worker.
//!
//! The client ties the pieces together: it owns the outbound [`Transport`],
//! spawns the [`Dispatcher`] event loop over the inbound events, and is the
//! object the dispatcher disconnects when the transport reports that the
//! peer went away.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::connect(parts, ClientConfig::default());
//!
//! let id = CorrelationId::new();
//! let request = Envelope::new(id, json!({"kind": "build", "target": "all"}));
//! let reason = client
//!     .request(id, request, |msg: Envelope| -> Result<bool, HandlerError> {
//!         println!("progress: {}", msg.payload);
//!         Ok(msg.payload["kind"] == "buildFinished")
//!     })
//!     .await?;
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use workerlink_protocol::{Correlated, CorrelationId};

use crate::config::ClientConfig;
use crate::dispatcher::{DisconnectTarget, Dispatcher};
use crate::error::{Error, Result};
use crate::pending::{MessageHandler, PendingRequest, TerminationReason};
use crate::transport::{BoxFuture, Transport, TransportParts};

/// Connection state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Connected,
	Disconnecting,
	Disconnected,
}

pub struct Client<M> {
	dispatcher: Arc<Dispatcher<M>>,
	transport: Arc<tokio::sync::Mutex<Box<dyn Transport<M>>>>,
	state: Arc<watch::Sender<ConnectionState>>,
	config: ClientConfig,
	event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<M> Client<M>
where
	M: Correlated + Send + 'static,
{
	/// Wires a client to a connected transport and starts its event loop.
	///
	/// Must be called from within a tokio runtime; the event loop and
	/// disconnect work are spawned onto it.
	pub fn connect(parts: TransportParts<M>, config: ClientConfig) -> Arc<Self> {
		let TransportParts { sender, events } = parts;
		let dispatcher = Arc::new(Dispatcher::new().close_on_stream_end(config.close_on_stream_end));

		let client = Arc::new(Self {
			dispatcher: Arc::clone(&dispatcher),
			transport: Arc::new(tokio::sync::Mutex::new(sender)),
			state: Arc::new(watch::channel(ConnectionState::Connected).0),
			config,
			event_loop: Mutex::new(None),
		});

		let target: Weak<dyn DisconnectTarget> = Arc::downgrade(&client) as Weak<dyn DisconnectTarget>;
		dispatcher.set_disconnect_target(target);

		let event_loop = tokio::spawn(async move { dispatcher.run(events).await });
		*client.event_loop.lock() = Some(event_loop);

		debug!("client connected");
		client
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}

	pub fn is_connected(&self) -> bool {
		self.state() == ConnectionState::Connected && !self.dispatcher.is_closed()
	}

	pub fn pending_count(&self) -> usize {
		self.dispatcher.pending_count()
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn dispatcher(&self) -> &Arc<Dispatcher<M>> {
		&self.dispatcher
	}

	/// Registers a pending request for `id` without sending anything.
	///
	/// Use this when the request goes out by some other path; otherwise
	/// prefer [`send_request`](Self::send_request).
	pub fn register<H>(&self, id: CorrelationId, handler: H) -> Result<Arc<PendingRequest<M>>>
	where
		H: MessageHandler<M> + 'static,
	{
		self.register_handle(Arc::new(PendingRequest::new(id, handler)))
	}

	fn register_handle(&self, handle: Arc<PendingRequest<M>>) -> Result<Arc<PendingRequest<M>>> {
		if !self.is_connected() {
			return Err(Error::NotConnected);
		}
		self.dispatcher.register(Arc::clone(&handle)).map_err(|e| match e {
			Error::ChannelClosed => Error::NotConnected,
			other => other,
		})?;
		Ok(handle)
	}

	/// Registers `handler` under `id`, then sends `message`.
	///
	/// If the send fails the session is terminated with
	/// [`TerminationReason::SendFailed`] and the transport error returned.
	pub async fn send_request<H>(&self, id: CorrelationId, message: M, handler: H) -> Result<Arc<PendingRequest<M>>>
	where
		H: MessageHandler<M> + 'static,
	{
		let handle = self.register(id, handler)?;
		self.send_registered(handle, message).await
	}

	/// Sends a request whose replies need no handling, only completion
	/// tracking.
	pub async fn send_detached(&self, id: CorrelationId, message: M) -> Result<Arc<PendingRequest<M>>> {
		let handle = self.register_handle(Arc::new(PendingRequest::detached(id)))?;
		self.send_registered(handle, message).await
	}

	async fn send_registered(&self, handle: Arc<PendingRequest<M>>, message: M) -> Result<Arc<PendingRequest<M>>> {
		let id = handle.id();
		debug!(id = %id, "sending request");

		let sent = self.transport.lock().await.send(id, message).await;
		if let Err(e) = sent {
			self.dispatcher
				.terminate(&id, TerminationReason::SendFailed { message: e.to_string() });
			return Err(e);
		}
		Ok(handle)
	}

	/// Sends a request and waits for its session to end.
	///
	/// Honours [`ClientConfig::request_timeout_ms`]. On timeout the request
	/// stays registered; late messages still reach the handler.
	pub async fn request<H>(&self, id: CorrelationId, message: M, handler: H) -> Result<TerminationReason>
	where
		H: MessageHandler<M> + 'static,
	{
		let handle = self.send_request(id, message, handler).await?;
		match self.config.request_timeout() {
			Some(timeout) => handle.wait_timeout(timeout).await,
			None => Ok(handle.wait().await),
		}
	}

	/// Moves the client to the disconnected state and closes the transport.
	///
	/// Idempotent. Every request still outstanding afterwards is completed
	/// with [`TerminationReason::ChannelClosed`].
	///
	/// The teardown runs on its own task, so dropping this future does not
	/// abandon it; a later call waits for the same teardown to finish. Only
	/// the call that started the teardown sees a transport error.
	pub async fn disconnect(&self) -> Result<()> {
		let started = self.state.send_if_modified(|state| {
			if *state != ConnectionState::Connected {
				return false;
			}
			*state = ConnectionState::Disconnecting;
			true
		});

		if !started {
			let mut state = self.state.subscribe();
			let _ = state.wait_for(|s| *s == ConnectionState::Disconnected).await;
			return Ok(());
		}
		debug!("disconnecting client");

		let transport = Arc::clone(&self.transport);
		let dispatcher = Arc::clone(&self.dispatcher);
		let state = Arc::clone(&self.state);
		let teardown = tokio::spawn(async move {
			let result = transport.lock().await.disconnect().await;
			dispatcher.on_channel_closed();
			state.send_replace(ConnectionState::Disconnected);
			if let Err(e) = &result {
				warn!(error = %e, "transport disconnect failed");
			}
			result
		});

		teardown
			.await
			.map_err(|e| Error::Transport(format!("disconnect task failed: {e}")))?
	}

	/// Waits for the event loop to finish (the inbound stream has ended).
	pub async fn closed(&self) {
		let event_loop = self.event_loop.lock().take();
		if let Some(event_loop) = event_loop {
			if let Err(e) = event_loop.await {
				warn!(error = %e, "event loop task failed");
			}
		}
	}
}

impl<M> DisconnectTarget for Client<M>
where
	M: Correlated + Send + 'static,
{
	fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(Client::disconnect(self))
	}
}

impl<M> fmt::Debug for Client<M>
where
	M: Correlated + Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client")
			.field("state", &self.state())
			.field("pending", &self.dispatcher.pending_count())
			.field("config", &self.config)
			.finish()
	}
}
