//! Error types for the correlation layer.

use std::time::Duration;

use thiserror::Error;
use workerlink_protocol::CorrelationId;

/// Error a user handler may return from its callbacks.
///
/// Boxed so handlers can surface any error type, `anyhow::Error` included.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// An id was registered while a previous request with the same id was
	/// still in flight.
	#[error("correlation id {id} is already registered")]
	DuplicateCorrelation { id: CorrelationId },

	#[error("handler for {id} failed: {source}")]
	Handler {
		id: CorrelationId,
		#[source]
		source: HandlerError,
	},

	#[error("handler for {id} panicked: {message}")]
	HandlerPanicked { id: CorrelationId, message: String },

	#[error("transport error: {0}")]
	Transport(String),

	#[error("client is not connected")]
	NotConnected,

	#[error("channel closed before the session completed")]
	ChannelClosed,

	#[error("session {id} did not complete within {timeout:?}")]
	Timeout { id: CorrelationId, timeout: Duration },

	#[error("codec error: {0}")]
	Codec(#[from] serde_json::Error),
}

impl Error {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}

	/// True when the error means the channel to the worker is gone.
	pub fn is_closed(&self) -> bool {
		matches!(self, Self::ChannelClosed | Self::NotConnected)
	}

	/// The correlation id this error is scoped to, if any.
	pub fn correlation_id(&self) -> Option<CorrelationId> {
		match self {
			Self::DuplicateCorrelation { id }
			| Self::Handler { id, .. }
			| Self::HandlerPanicked { id, .. }
			| Self::Timeout { id, .. } => Some(*id),
			_ => None,
		}
	}
}

/// Renders a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_and_closed_helpers() {
		let id = CorrelationId::from_u128(1);
		assert!(Error::Timeout { id, timeout: Duration::from_millis(5) }.is_timeout());
		assert!(Error::ChannelClosed.is_closed());
		assert!(Error::NotConnected.is_closed());
		assert!(!Error::Transport("broken pipe".to_string()).is_closed());
	}

	#[test]
	fn handler_error_keeps_source_and_id() {
		let id = CorrelationId::from_u128(2);
		let err = Error::Handler {
			id,
			source: "bad payload".into(),
		};

		assert_eq!(err.correlation_id(), Some(id));
		assert!(err.to_string().contains("bad payload"));
		assert!(std::error::Error::source(&err).is_some());
	}

	#[test]
	fn panic_message_reads_str_and_string_payloads() {
		let payload: Box<dyn std::any::Any + Send> = Box::new("static boom");
		assert_eq!(panic_message(payload.as_ref()), "static boom");

		let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
		assert_eq!(panic_message(payload.as_ref()), "owned boom");

		let payload: Box<dyn std::any::Any + Send> = Box::new(17_u8);
		assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
	}
}
