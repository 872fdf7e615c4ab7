//! Wire types for the IRMA session server protocol.
//!
//! This crate contains the serde-serializable types exchanged with an IRMA
//! session server: the envelope returned when a session is started, the
//! session pointer derived from it, and the status tokens reported while the
//! session runs.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and parsing
//! * 1:1 with the server: Field names match the server's JSON
//! * Stable: Changes only when the wire protocol changes
//!
//! Session orchestration is built on top of these types in `irma-rs`.

pub mod pointer;
pub mod status;

pub use pointer::*;
pub use status::*;
