//! Client configuration.
//!
//! ```json
//! { "requestTimeoutMs": 30000, "closeOnStreamEnd": true }
//! ```
//!
//! Every field is optional when deserializing; missing fields take the
//! defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for [`Client::request`](crate::Client::request) in
/// milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Upper bound on how long `request` waits for a session to end.
	/// `None` waits indefinitely.
	pub request_timeout_ms: Option<u64>,
	/// Treat the end of the inbound event stream as a channel close.
	pub close_on_stream_end: bool,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
			close_on_stream_end: true,
		}
	}
}

impl ClientConfig {
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
		self
	}

	pub fn without_request_timeout(mut self) -> Self {
		self.request_timeout_ms = None;
		self
	}

	pub fn close_on_stream_end(mut self, enabled: bool) -> Self {
		self.close_on_stream_end = enabled;
		self
	}

	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_ms.map(Duration::from_millis)
	}

	pub fn from_json(json: &str) -> serde_json::Result<Self> {
		serde_json::from_str(json)
	}
}
