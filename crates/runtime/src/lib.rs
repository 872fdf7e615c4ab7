//! HTTP transport for IRMA session servers.
//!
//! The session engine never talks to `reqwest` directly. It goes through the
//! [`Transport`] seam, which offers exactly two primitives:
//!
//! - [`Transport::fetch`]: one request, one buffered response
//! - [`Transport::open_event_stream`]: a long-lived server-sent-events stream
//!   whose connection progress (open, messages, errors) is delivered as
//!   [`StreamEvent`]s
//!
//! [`HttpTransport`] is the production implementation. [`FakeTransport`]
//! replays scripted responses and lets tests drive event streams by hand.

pub mod error;
pub mod fake;
pub mod http;
pub mod sse;
pub mod transport;

pub use error::{Result, TransportError};
pub use fake::{FakeTransport, FakeTransportController, ReplyGate};
pub use http::HttpTransport;
pub use transport::{BoxFuture, EventStream, HttpRequest, HttpResponse, Method, StreamEvent, Transport};
