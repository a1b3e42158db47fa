//! Wire types for workerlink request correlation.
//!
//! This crate holds the serde-serializable shapes that travel between a
//! client and its out-of-process worker. The correlation layer in
//! `workerlink` only needs one thing from a decoded message: the identifier
//! that ties it to an outstanding request. That contract is the
//! [`Correlated`] trait.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Opaque payloads: The envelope never interprets what it carries
//! * Stable: Changes only when the wire format changes

pub mod correlation_id;
pub mod envelope;

pub use correlation_id::*;
pub use envelope::*;
