// workerlink: request/response correlation for out-of-process workers
//
// Matches inbound messages to outstanding requests, hands them to
// request-specific handlers, and makes sure every request completes exactly
// once, including when the channel goes away underneath it.

pub mod client;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod terminator;
pub mod testing;
pub mod transport;

pub use client::{Client, ConnectionState};
pub use config::{ClientConfig, DEFAULT_REQUEST_TIMEOUT_MS};
pub use correlation::CorrelationTable;
pub use dispatcher::{DisconnectTarget, Dispatcher};
pub use error::{Error, HandlerError, Result};
pub use pending::{MessageHandler, PendingRequest, TerminationReason};
pub use terminator::terminate_session;
pub use transport::{BoxFuture, ChannelEvent, Transport, TransportParts};
pub use workerlink_protocol::{Correlated, CorrelationId, Envelope};
