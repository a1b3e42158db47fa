// Shared helpers for workerlink integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use workerlink::{Envelope, HandlerError, MessageHandler};

pub const WAIT: Duration = Duration::from_secs(2);

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
	TRACING.call_once(|| {
		let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
	});
}

/// Handler driven by the payload:
/// - `{"done": true}` ends the session
/// - `{"fail": "<why>"}` returns an error
/// - `{"panic": true}` panics
///
/// Every payload is forwarded to the test before the outcome is decided.
pub struct ScriptedHandler {
	seen: mpsc::UnboundedSender<Value>,
	terminated: Arc<AtomicUsize>,
}

pub struct HandlerProbe {
	pub seen: mpsc::UnboundedReceiver<Value>,
	terminated: Arc<AtomicUsize>,
}

impl HandlerProbe {
	pub fn terminated(&self) -> usize {
		self.terminated.load(Ordering::SeqCst)
	}

	pub async fn next_seen(&mut self) -> Value {
		tokio::time::timeout(WAIT, self.seen.recv())
			.await
			.expect("handler did not see a message in time")
			.expect("handler dropped")
	}
}

pub fn scripted() -> (ScriptedHandler, HandlerProbe) {
	let (tx, rx) = mpsc::unbounded_channel();
	let terminated = Arc::new(AtomicUsize::new(0));
	(
		ScriptedHandler {
			seen: tx,
			terminated: Arc::clone(&terminated),
		},
		HandlerProbe { seen: rx, terminated },
	)
}

impl MessageHandler<Envelope> for ScriptedHandler {
	fn handle_message(&mut self, message: Envelope) -> Result<bool, HandlerError> {
		let payload = message.payload;
		let _ = self.seen.send(payload.clone());

		if let Some(why) = payload.get("fail").and_then(Value::as_str) {
			return Err(anyhow::anyhow!("worker rejected request: {why}").into());
		}
		if payload["panic"] == true {
			panic!("scripted handler panic");
		}
		Ok(payload["done"] == true)
	}

	fn session_terminated(&mut self) -> Result<(), HandlerError> {
		self.terminated.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}
