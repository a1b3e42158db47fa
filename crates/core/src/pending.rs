//! Pending request handles and the handler contract.
//!
//! A [`PendingRequest`] is created for every outbound request that expects
//! correlated messages back. It is shared between the caller (who may wait
//! on it) and the [`CorrelationTable`](crate::CorrelationTable) (which
//! indexes it until the session ends).
//!
//! # Lifecycle
//!
//! 1. Caller registers the handle, then sends the request
//! 2. Dispatcher feeds each matching inbound message to the handler
//! 3. Handler returns `true` (or fails, or the channel goes away)
//! 4. Terminator removes the handle, calls `session_terminated`, completes it
//!    (after the running callback returns, if one is in flight)
//! 5. Caller's `wait()` resolves with the [`TerminationReason`]

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};
use workerlink_protocol::CorrelationId;

use crate::error::{Error, HandlerError, Result, panic_message};

/// Consumer of the messages correlated to one request.
///
/// Callbacks always run on the dispatcher's event loop and never
/// concurrently for the same request, so implementations may keep plain
/// mutable state.
pub trait MessageHandler<M>: Send {
	/// Consumes one inbound message.
	///
	/// Returns `true` when the session is over and no more messages are
	/// expected. An error also ends the session; it is handed back to whoever
	/// drove the dispatch once cleanup has run.
	fn handle_message(&mut self, message: M) -> std::result::Result<bool, HandlerError>;

	/// Called exactly once after the session ended, whatever the cause.
	///
	/// Failures here are logged and otherwise ignored.
	fn session_terminated(&mut self) -> std::result::Result<(), HandlerError> {
		Ok(())
	}
}

impl<M, F> MessageHandler<M> for F
where
	F: FnMut(M) -> std::result::Result<bool, HandlerError> + Send,
{
	fn handle_message(&mut self, message: M) -> std::result::Result<bool, HandlerError> {
		self(message)
	}
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
	/// The handler reported the session complete.
	Completed,
	/// The handler returned an error or panicked.
	HandlerFailed { message: String },
	/// A message arrived for a request registered without a handler.
	NoHandler,
	/// The channel closed while the request was outstanding.
	ChannelClosed,
	/// The request never made it onto the wire.
	SendFailed { message: String },
}

impl TerminationReason {
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Completed)
	}
}

impl fmt::Display for TerminationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Completed => f.write_str("completed"),
			Self::HandlerFailed { message } => write!(f, "handler failed: {message}"),
			Self::NoHandler => f.write_str("no handler registered"),
			Self::ChannelClosed => f.write_str("channel closed"),
			Self::SendFailed { message } => write!(f, "send failed: {message}"),
		}
	}
}

/// Outcome of delivering one message to a handle.
pub(crate) enum Delivery {
	Continue,
	Terminate,
	/// The handle was registered without a handler.
	NoHandler,
	/// The handler was already released by a termination.
	AlreadyTerminated,
	/// The handler is still running a previous message, e.g. a handler
	/// that dispatches to its own id from inside its callback.
	Busy,
	Failed(Error),
}

/// Result of taking a handle out of service.
pub(crate) enum Release<M> {
	/// The session can be finished right away. Carries the handler, if the
	/// handle had one, for its termination callback.
	Now {
		handler: Option<Box<dyn MessageHandler<M>>>,
		reason: TerminationReason,
	},
	/// A callback is running; the delivering thread finishes the session
	/// once it returns.
	Deferred,
}

enum HandlerSlot<M> {
	Idle(Box<dyn MessageHandler<M>>),
	/// Handler checked out by `handle_message`. A termination that lands
	/// meanwhile parks its reason here.
	Dispatching { deferred: Option<TerminationReason> },
	Released,
}

/// Completes the request on drop, so a panicking termination callback can't
/// leave a waiter hanging.
struct CompleteOnDrop<'a, M> {
	request: &'a PendingRequest<M>,
	reason: Option<TerminationReason>,
}

impl<M> Drop for CompleteOnDrop<'_, M> {
	fn drop(&mut self) {
		if let Some(reason) = self.reason.take() {
			self.request.complete(reason);
		}
	}
}

/// One outstanding request and its completion signal.
pub struct PendingRequest<M> {
	id: CorrelationId,
	slot: Mutex<HandlerSlot<M>>,
	has_handler: bool,
	completion: watch::Sender<Option<TerminationReason>>,
}

impl<M> PendingRequest<M> {
	/// Creates a handle whose inbound messages go to `handler`.
	pub fn new<H>(id: CorrelationId, handler: H) -> Self
	where
		H: MessageHandler<M> + 'static,
	{
		Self::with_slot(id, HandlerSlot::Idle(Box::new(handler)), true)
	}

	/// Creates a handle that only tracks completion.
	///
	/// Any message matched to it terminates the session with
	/// [`TerminationReason::NoHandler`].
	pub fn detached(id: CorrelationId) -> Self {
		Self::with_slot(id, HandlerSlot::Released, false)
	}

	fn with_slot(id: CorrelationId, slot: HandlerSlot<M>, has_handler: bool) -> Self {
		let (completion, _) = watch::channel(None);
		Self {
			id,
			slot: Mutex::new(slot),
			has_handler,
			completion,
		}
	}

	pub fn id(&self) -> CorrelationId {
		self.id
	}

	pub fn is_done(&self) -> bool {
		self.completion.borrow().is_some()
	}

	/// The termination reason, once completed.
	pub fn reason(&self) -> Option<TerminationReason> {
		(*self.completion.borrow()).clone()
	}

	/// Waits until the session has ended.
	///
	/// Holds no lock shared with the dispatcher while suspended.
	pub async fn wait(&self) -> TerminationReason {
		let mut rx = self.completion.subscribe();
		let reason = rx.wait_for(Option::is_some).await.ok().and_then(|slot| (*slot).clone());
		reason.unwrap_or(TerminationReason::ChannelClosed)
	}

	/// Like [`wait`](Self::wait) but gives up after `timeout`.
	///
	/// Timing out does not end the session; the handle stays registered.
	pub async fn wait_timeout(&self, timeout: Duration) -> Result<TerminationReason> {
		tokio::time::timeout(timeout, self.wait())
			.await
			.map_err(|_| Error::Timeout { id: self.id, timeout })
	}

	/// Runs the handler on `message`.
	///
	/// The handler is checked out of its slot for the duration of the call,
	/// so the callback may re-enter the dispatcher (close the channel,
	/// terminate its own id) without deadlocking. A termination that arrives
	/// meanwhile is finished here, after the callback has returned.
	pub(crate) fn handle_message(&self, message: M) -> Delivery {
		let mut handler = {
			let mut slot = self.slot.lock();
			match std::mem::replace(&mut *slot, HandlerSlot::Dispatching { deferred: None }) {
				HandlerSlot::Idle(handler) => handler,
				other => {
					let delivery = match other {
						HandlerSlot::Dispatching { .. } => Delivery::Busy,
						_ if self.has_handler => Delivery::AlreadyTerminated,
						_ => Delivery::NoHandler,
					};
					*slot = other;
					return delivery;
				}
			}
		};

		let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_message(message)));

		let deferred = {
			let mut slot = self.slot.lock();
			let parked = match &mut *slot {
				HandlerSlot::Dispatching { deferred } => deferred.take(),
				_ => None,
			};
			match parked {
				Some(reason) => {
					*slot = HandlerSlot::Released;
					Some((reason, handler))
				}
				None => {
					*slot = HandlerSlot::Idle(handler);
					None
				}
			}
		};
		if let Some((reason, handler)) = deferred {
			debug!(id = %self.id, %reason, "finishing termination deferred behind handler callback");
			self.finish(Some(handler), reason);
		}

		match outcome {
			Ok(Ok(false)) => Delivery::Continue,
			Ok(Ok(true)) => Delivery::Terminate,
			Ok(Err(source)) => Delivery::Failed(Error::Handler { id: self.id, source }),
			Err(payload) => Delivery::Failed(Error::HandlerPanicked {
				id: self.id,
				message: panic_message(payload.as_ref()),
			}),
		}
	}

	/// Takes the handle out of service with `reason`.
	///
	/// Never blocks on a running callback. When one is in flight the reason
	/// is parked and [`Release::Deferred`] returned.
	pub(crate) fn release(&self, reason: TerminationReason) -> Release<M> {
		let mut slot = self.slot.lock();
		match std::mem::replace(&mut *slot, HandlerSlot::Released) {
			HandlerSlot::Idle(handler) => Release::Now {
				handler: Some(handler),
				reason,
			},
			HandlerSlot::Released => Release::Now { handler: None, reason },
			HandlerSlot::Dispatching { deferred } => {
				if deferred.is_some() {
					warn!(id = %self.id, "pending request released twice while dispatching");
				}
				*slot = HandlerSlot::Dispatching {
					deferred: deferred.or(Some(reason)),
				};
				Release::Deferred
			}
		}
	}

	/// Runs the termination callback, then completes the handle.
	pub(crate) fn finish(&self, handler: Option<Box<dyn MessageHandler<M>>>, reason: TerminationReason) {
		let _complete = CompleteOnDrop {
			request: self,
			reason: Some(reason),
		};
		if let Some(handler) = handler {
			self.notify_terminated(handler);
		}
	}

	fn notify_terminated(&self, mut handler: Box<dyn MessageHandler<M>>) {
		match catch_unwind(AssertUnwindSafe(|| handler.session_terminated())) {
			Ok(Ok(())) => {}
			Ok(Err(error)) => {
				warn!(id = %self.id, %error, "session termination callback failed");
			}
			Err(payload) => {
				warn!(
					id = %self.id,
					panic = %panic_message(payload.as_ref()),
					"session termination callback panicked"
				);
			}
		}
	}

	/// Marks the handle finished and wakes every waiter.
	pub(crate) fn complete(&self, reason: TerminationReason) {
		debug!(id = %self.id, %reason, "completing pending request");
		let first = self.completion.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(reason);
			true
		});

		if !first {
			warn!(id = %self.id, "pending request completed twice");
		}
		debug_assert!(first, "pending request {} completed twice", self.id);
	}
}

impl<M> fmt::Debug for PendingRequest<M> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingRequest")
			.field("id", &self.id)
			.field("has_handler", &self.has_handler)
			.field("reason", &*self.completion.borrow())
			.finish()
	}
}
