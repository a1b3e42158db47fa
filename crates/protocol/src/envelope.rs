//! JSON envelope carrying a correlation id and an opaque payload.
//!
//! Format:
//! ```json
//! {
//!   "sessionId": "5b0d6a8e-0d3c-4f8f-9a57-2b1e1c7b3f10",
//!   "payload": { "kind": "buildProgress", "done": 3, "total": 10 }
//! }
//! ```
//!
//! Workers may emit envelopes without a `sessionId` (for example broadcast
//! notices); those decode with `session_id: None`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::correlation_id::{Correlated, CorrelationId};

/// A message framed for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<CorrelationId>,
	#[serde(default)]
	pub payload: Value,
}

impl Envelope {
	pub fn new(session_id: CorrelationId, payload: Value) -> Self {
		Self {
			session_id: Some(session_id),
			payload,
		}
	}

	/// Builds an envelope that is not tied to any request.
	pub fn uncorrelated(payload: Value) -> Self {
		Self { session_id: None, payload }
	}

	pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(self)
	}

	pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
		serde_json::from_slice(bytes)
	}
}

impl Correlated for Envelope {
	fn correlation_id(&self) -> Option<CorrelationId> {
		self.session_id
	}
}
