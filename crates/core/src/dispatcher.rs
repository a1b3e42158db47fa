//! Inbound message routing and channel lifecycle handling.
//!
//! The dispatcher is the single consumer of a channel's events. For every
//! inbound message it:
//! 1. Extracts the correlation id
//! 2. Looks up the pending request in the [`CorrelationTable`]
//! 3. Feeds the message to the request's handler
//! 4. Ends the session when the handler says so, fails, or is missing
//!
//! # Message Flow
//!
//! ```text
//! transport ── ChannelEvent ──▶ run() ──▶ on_message() ──▶ handler
//!                                  │                         │ true / Err
//!                                  │                         ▼
//!                                  ├──▶ on_channel_closed()  terminate_session()
//!                                  └──▶ on_channel_disconnected() ─▶ executor ─▶ client.disconnect()
//! ```
//!
//! Cleanup always finishes before a handler error is handed back, so a
//! caller waiting on the request is released before the error surfaces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use workerlink_protocol::{Correlated, CorrelationId};

use crate::correlation::CorrelationTable;
use crate::error::{Error, Result};
use crate::pending::{Delivery, PendingRequest, TerminationReason};
use crate::terminator::terminate_session;
use crate::transport::{BoxFuture, ChannelEvent};

/// Object that owns the channel and can tear it down.
///
/// The dispatcher calls it from a separate task when the transport reports a
/// disconnect, never from inside the event callback itself.
pub trait DisconnectTarget: Send + Sync {
	fn disconnect(&self) -> BoxFuture<'_, Result<()>>;
}

pub struct Dispatcher<M> {
	table: CorrelationTable<M>,
	closed: AtomicBool,
	close_on_stream_end: bool,
	disconnect_target: Mutex<Option<Weak<dyn DisconnectTarget>>>,
	executor: Option<Handle>,
}

impl<M> Dispatcher<M>
where
	M: Correlated + Send + 'static,
{
	/// Creates a dispatcher that posts disconnect work onto the current tokio
	/// runtime, if there is one.
	///
	/// Built outside a runtime it has no executor, and the disconnected hook
	/// only logs a warning until one is supplied with
	/// [`with_executor`](Self::with_executor).
	pub fn new() -> Self {
		Self {
			table: CorrelationTable::new(),
			closed: AtomicBool::new(false),
			close_on_stream_end: true,
			disconnect_target: Mutex::new(None),
			executor: Handle::try_current().ok(),
		}
	}

	pub fn with_executor(mut self, executor: Handle) -> Self {
		self.executor = Some(executor);
		self
	}

	/// Runtime the disconnected hook posts onto, if any.
	pub fn executor(&self) -> Option<&Handle> {
		self.executor.as_ref()
	}

	pub fn close_on_stream_end(mut self, enabled: bool) -> Self {
		self.close_on_stream_end = enabled;
		self
	}

	/// Sets the object told to disconnect when the channel drops.
	///
	/// Held weakly; a target that has been dropped is skipped.
	pub fn set_disconnect_target(&self, target: Weak<dyn DisconnectTarget>) {
		*self.disconnect_target.lock() = Some(target);
	}

	pub fn table(&self) -> &CorrelationTable<M> {
		&self.table
	}

	pub fn pending_count(&self) -> usize {
		self.table.len()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Indexes a pending request ahead of sending it.
	///
	/// Refused once the channel has closed. A registration that races with a
	/// close is terminated right away rather than left pending.
	pub fn register(&self, handle: Arc<PendingRequest<M>>) -> Result<()> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = handle.id();
		self.table.register(id, handle)?;

		if self.is_closed() {
			terminate_session(&self.table, &id, TerminationReason::ChannelClosed);
			return Err(Error::ChannelClosed);
		}
		Ok(())
	}

	/// Ends the session for `id`. No-op when nothing is registered.
	pub fn terminate(&self, id: &CorrelationId, reason: TerminationReason) -> bool {
		terminate_session(&self.table, id, reason)
	}

	/// Routes one inbound message to its pending request.
	///
	/// # Errors
	///
	/// Returns the handler's error (or panic) after the session has been
	/// terminated and completed.
	pub fn on_message(&self, message: M) -> Result<()> {
		let Some(id) = message.correlation_id() else {
			warn!("dropping inbound message without a correlation id");
			return Ok(());
		};

		let Some(handle) = self.table.get(&id) else {
			debug!(id = %id, "no pending request for inbound message");
			self.terminate(&id, TerminationReason::NoHandler);
			return Ok(());
		};

		match handle.handle_message(message) {
			Delivery::Continue => Ok(()),
			Delivery::Terminate => {
				self.terminate(&id, TerminationReason::Completed);
				Ok(())
			}
			Delivery::NoHandler => {
				warn!(id = %id, "pending request has no handler; terminating");
				self.terminate(&id, TerminationReason::NoHandler);
				Ok(())
			}
			Delivery::AlreadyTerminated => {
				debug!(id = %id, "message arrived after session terminated");
				Ok(())
			}
			Delivery::Busy => {
				warn!(id = %id, "handler still running a previous message; dropping message");
				Ok(())
			}
			Delivery::Failed(err) => {
				self.terminate(&id, TerminationReason::HandlerFailed { message: err.to_string() });
				Err(err)
			}
		}
	}

	/// Terminates every outstanding request. Safe to call repeatedly.
	pub fn on_channel_closed(&self) {
		let first = !self.closed.swap(true, Ordering::SeqCst);

		let ids = self.table.snapshot_ids();
		let terminated = ids
			.iter()
			.filter(|id| self.terminate(id, TerminationReason::ChannelClosed))
			.count();

		if first {
			info!(terminated, "channel closed");
		} else {
			debug!(terminated, "channel closed again");
		}
	}

	/// Posts a disconnect of the owning client onto the executor.
	pub fn on_channel_disconnected(&self) {
		let Some(target) = self.disconnect_target.lock().clone() else {
			debug!("channel disconnected; no disconnect target set");
			return;
		};
		let Some(executor) = self.executor.as_ref() else {
			warn!("channel disconnected but no executor was configured; client left connected");
			return;
		};

		debug!("channel disconnected; scheduling client disconnect");
		executor.spawn(async move {
			let Some(target) = target.upgrade() else {
				return;
			};
			if let Err(e) = target.disconnect().await {
				warn!(error = %e, "client disconnect failed");
			}
		});
	}

	/// Runs the event loop until the event stream ends.
	///
	/// Dispatch errors are logged and the loop keeps going; they only
	/// concern one request.
	pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChannelEvent<M>>) {
		while let Some(event) = events.recv().await {
			match event {
				ChannelEvent::Message(message) => {
					if let Err(e) = self.on_message(message) {
						error!(id = ?e.correlation_id(), error = %e, "error dispatching message");
					}
				}
				ChannelEvent::Closed => self.on_channel_closed(),
				ChannelEvent::Disconnected => self.on_channel_disconnected(),
			}
		}

		debug!("event loop ended (transport closed)");
		if self.close_on_stream_end {
			self.on_channel_closed();
		}
	}
}

impl<M> Default for Dispatcher<M>
where
	M: Correlated + Send + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
