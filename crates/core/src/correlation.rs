//! Concurrent table of outstanding requests keyed by correlation id.
//!
//! Request senders insert from arbitrary tasks while the dispatcher and the
//! lifecycle hooks remove. The table lock is held only for the map operation
//! itself, never while a handler callback runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use workerlink_protocol::CorrelationId;

use crate::error::{Error, Result};
use crate::pending::PendingRequest;

pub struct CorrelationTable<M> {
	entries: Mutex<HashMap<CorrelationId, Arc<PendingRequest<M>>>>,
}

impl<M> CorrelationTable<M> {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Indexes `handle` under `id`.
	///
	/// Fails without touching the existing entry when `id` is already in
	/// flight.
	pub fn register(&self, id: CorrelationId, handle: Arc<PendingRequest<M>>) -> Result<()> {
		use std::collections::hash_map::Entry;

		match self.entries.lock().entry(id) {
			Entry::Occupied(_) => Err(Error::DuplicateCorrelation { id }),
			Entry::Vacant(slot) => {
				slot.insert(handle);
				Ok(())
			}
		}
	}

	/// Removes and returns the handle for `id`.
	///
	/// Of several racing callers exactly one receives the handle.
	pub fn remove(&self, id: &CorrelationId) -> Option<Arc<PendingRequest<M>>> {
		self.entries.lock().remove(id)
	}

	pub fn get(&self, id: &CorrelationId) -> Option<Arc<PendingRequest<M>>> {
		self.entries.lock().get(id).cloned()
	}

	pub fn contains(&self, id: &CorrelationId) -> bool {
		self.entries.lock().contains_key(id)
	}

	/// Point-in-time copy of every registered id.
	pub fn snapshot_ids(&self) -> Vec<CorrelationId> {
		self.entries.lock().keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

impl<M> Default for CorrelationTable<M> {
	fn default() -> Self {
		Self::new()
	}
}
