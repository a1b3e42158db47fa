//! Correlation identifiers linking requests to their responses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit key linking an outbound request to its inbound messages.
///
/// Serializes transparently as a hyphenated UUID string:
/// ```json
/// "5b0d6a8e-0d3c-4f8f-9a57-2b1e1c7b3f10"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
	/// Generates a fresh random (v4) identifier.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	/// Builds an identifier from a raw 128-bit value.
	///
	/// Handy for tests and for workers that mint their own ids.
	pub const fn from_u128(value: u128) -> Self {
		Self(Uuid::from_u128(value))
	}

	pub const fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl Default for CorrelationId {
	fn default() -> Self {
		Self::new()
	}
}

impl From<Uuid> for CorrelationId {
	fn from(value: Uuid) -> Self {
		Self(value)
	}
}

impl From<CorrelationId> for Uuid {
	fn from(value: CorrelationId) -> Self {
		value.0
	}
}

impl fmt::Display for CorrelationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl FromStr for CorrelationId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s).map(Self)
	}
}

/// A decoded message that can name the request it belongs to.
///
/// Returns `None` for messages that carry no identifier at all; the
/// dispatcher logs and drops those.
pub trait Correlated {
	fn correlation_id(&self) -> Option<CorrelationId>;
}
