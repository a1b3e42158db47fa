//! Seam between the correlation layer and a concrete channel.
//!
//! A transport is split in two halves, as in [`TransportParts`]:
//! - the outbound [`Transport`] used by the client to send requests and to
//!   tear the channel down
//! - the inbound stream of [`ChannelEvent`]s consumed by the dispatcher's
//!   event loop
//!
//! Framing, sockets and decoding live behind this seam and are not part of
//! this crate.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use workerlink_protocol::CorrelationId;

use crate::error::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound half of a channel to the worker.
pub trait Transport<M>: Send + Sync {
	/// Writes one request tagged with `id`.
	fn send(&mut self, id: CorrelationId, message: M) -> BoxFuture<'_, Result<()>>;

	/// Closes the channel. Should be safe to call more than once.
	fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Notification from the inbound half of a channel.
#[derive(Debug)]
pub enum ChannelEvent<M> {
	/// A decoded message arrived.
	Message(M),
	/// The channel has been closed.
	Closed,
	/// The peer went away, possibly before an explicit close.
	Disconnected,
}

/// Both halves of a connected transport.
pub struct TransportParts<M> {
	pub sender: Box<dyn Transport<M>>,
	pub events: mpsc::UnboundedReceiver<ChannelEvent<M>>,
}
