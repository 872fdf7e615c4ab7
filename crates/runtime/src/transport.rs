//! Transport abstraction shared by the real HTTP client and the test fake.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Boxed future returned by [`Transport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP method of a request descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	#[default]
	Get,
	Post,
	Put,
	Delete,
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		})
	}
}

/// Fully rendered request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
	pub method: Method,
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<String>,
}

impl HttpRequest {
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: Vec::new(),
			body: None,
		}
	}

	pub fn get(url: impl Into<String>) -> Self {
		Self::new(Method::Get, url)
	}

	pub fn delete(url: impl Into<String>) -> Self {
		Self::new(Method::Delete, url)
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn with_body(mut self, body: impl Into<String>) -> Self {
		self.body = Some(body.into());
		self
	}

	/// Looks up a header value, case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Buffered response to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
	pub status: u16,
	pub body: String,
}

impl HttpResponse {
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self { status, body: body.into() }
	}

	pub fn ok(body: impl Into<String>) -> Self {
		Self::new(200, body)
	}

	/// Any 2xx status.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Progress of a server-sent-events connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
	/// The server accepted the stream.
	Open,
	/// One `message` event; the payload is the event's `data` field.
	Message(String),
	/// The connection failed or was closed by the server.
	Error(String),
}

/// Receiving half of a server-sent-events connection.
///
/// Dropping the stream tears the connection down; the background task that
/// feeds it is aborted and never awaited.
pub struct EventStream {
	rx: mpsc::UnboundedReceiver<StreamEvent>,
	task: Option<JoinHandle<()>>,
}

impl EventStream {
	/// Wraps a receiver fed by `task`.
	pub fn new(rx: mpsc::UnboundedReceiver<StreamEvent>, task: JoinHandle<()>) -> Self {
		Self { rx, task: Some(task) }
	}

	/// Wraps a receiver that is fed from elsewhere.
	pub fn from_receiver(rx: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
		Self { rx, task: None }
	}

	/// Waits for the next event. `None` once the feeding side is gone.
	pub async fn next(&mut self) -> Option<StreamEvent> {
		self.rx.recv().await
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		self.rx.close();
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

impl fmt::Debug for EventStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventStream").field("owns_task", &self.task.is_some()).finish()
	}
}

/// Request primitives used to talk to a session server.
pub trait Transport: Send + Sync {
	/// Sends `request` and buffers the response, whatever its status.
	fn fetch(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;

	/// Starts connecting an event stream to `url` and returns immediately.
	///
	/// Connection progress is reported through the returned stream.
	fn open_event_stream(&self, url: &str) -> EventStream;

	/// Whether this transport can hold event streams at all.
	fn supports_event_stream(&self) -> bool {
		true
	}
}
