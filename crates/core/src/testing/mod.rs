//! In-memory doubles for exercising the correlation layer without a worker.

mod fake_transport;

pub use fake_transport::{FakeTransportBuilder, FakeTransportController};
