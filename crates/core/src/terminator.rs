//! Session termination: exactly-once cleanup of a pending request.

use tracing::debug;
use workerlink_protocol::CorrelationId;

use crate::correlation::CorrelationTable;
use crate::pending::{Release, TerminationReason};

/// Ends the session for `id`.
///
/// Removes the handle from `table`, notifies its handler and completes it.
/// Returns `false` (and does nothing) when no handle is registered, which
/// makes racing terminations from the dispatcher and the lifecycle hooks
/// harmless.
///
/// If the handler is running a callback at that moment, the notification
/// and completion happen on the delivering thread once it returns; this
/// call does not wait for it.
pub fn terminate_session<M>(table: &CorrelationTable<M>, id: &CorrelationId, reason: TerminationReason) -> bool {
	let Some(handle) = table.remove(id) else {
		debug!(id = %id, "terminate: no pending request");
		return false;
	};

	debug!(id = %id, %reason, "terminating session");
	match handle.release(reason) {
		Release::Now { handler, reason } => handle.finish(handler, reason),
		Release::Deferred => debug!(id = %id, "handler busy; termination deferred"),
	}
	true
}
