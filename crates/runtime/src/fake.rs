//! Fake transport for testing session orchestration without a server.
//!
//! Responses are scripted per `(method, url)`; each request consumes the next
//! scripted reply and the last reply repeats forever, which is what a polled
//! status endpoint looks like. Event streams are driven by hand through the
//! controller.
//!
//! # Example
//!
//! ```ignore
//! let (transport, controller) = FakeTransport::new();
//! controller.respond(Method::Get, "https://s/session/1/status", 200, "CONNECTED");
//!
//! let response = transport.fetch(HttpRequest::get("https://s/session/1/status")).await?;
//! assert_eq!(response.body, "CONNECTED");
//! assert_eq!(controller.request_count(Method::Get, "https://s/session/1/status"), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, TransportError};
use crate::transport::{BoxFuture, EventStream, HttpRequest, HttpResponse, Method, StreamEvent, Transport};

enum Reply {
	Respond(HttpResponse),
	Fail(String),
	Gated(oneshot::Receiver<HttpResponse>),
}

#[derive(Default)]
struct Script {
	replies: VecDeque<Reply>,
	last: Option<HttpResponse>,
}

#[derive(Default)]
struct FakeState {
	scripts: HashMap<(Method, String), Script>,
	requests: Vec<HttpRequest>,
	streams: Vec<(String, mpsc::UnboundedSender<StreamEvent>)>,
}

/// In-memory [`Transport`].
#[derive(Clone)]
pub struct FakeTransport {
	state: Arc<Mutex<FakeState>>,
	event_streams: Arc<AtomicBool>,
}

impl FakeTransport {
	/// Creates the transport and the controller that scripts it.
	pub fn new() -> (Self, FakeTransportController) {
		let state = Arc::new(Mutex::new(FakeState::default()));
		let event_streams = Arc::new(AtomicBool::new(true));
		let transport = Self {
			state: Arc::clone(&state),
			event_streams: Arc::clone(&event_streams),
		};
		(transport, FakeTransportController { state, event_streams })
	}
}

impl Transport for FakeTransport {
	fn fetch(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
		let reply = {
			let mut state = self.state.lock();
			state.requests.push(request.clone());
			let script = state.scripts.entry((request.method, request.url.clone())).or_default();
			match script.replies.pop_front() {
				Some(Reply::Respond(response)) => {
					script.last = Some(response.clone());
					Reply::Respond(response)
				}
				Some(other) => other,
				None => Reply::Respond(script.last.clone().unwrap_or_else(|| HttpResponse::new(404, ""))),
			}
		};

		Box::pin(async move {
			match reply {
				Reply::Respond(response) => Ok(response),
				Reply::Fail(reason) => Err(TransportError::Unreachable(reason)),
				Reply::Gated(gate) => gate.await.map_err(|_| TransportError::Closed),
			}
		})
	}

	fn open_event_stream(&self, url: &str) -> EventStream {
		let (tx, rx) = mpsc::unbounded_channel();
		self.state.lock().streams.push((url.to_string(), tx));
		EventStream::from_receiver(rx)
	}

	fn supports_event_stream(&self) -> bool {
		self.event_streams.load(Ordering::SeqCst)
	}
}

/// Releases a gated response scripted with [`FakeTransportController::gate`].
pub struct ReplyGate {
	tx: oneshot::Sender<HttpResponse>,
}

impl ReplyGate {
	pub fn release(self, response: HttpResponse) {
		let _ = self.tx.send(response);
	}
}

/// Scripts responses and inspects traffic of a [`FakeTransport`].
#[derive(Clone)]
pub struct FakeTransportController {
	state: Arc<Mutex<FakeState>>,
	event_streams: Arc<AtomicBool>,
}

impl FakeTransportController {
	fn push(&self, method: Method, url: &str, reply: Reply) {
		self.state
			.lock()
			.scripts
			.entry((method, url.to_string()))
			.or_default()
			.replies
			.push_back(reply);
	}

	/// Queues a response for the next matching request.
	pub fn respond(&self, method: Method, url: &str, status: u16, body: &str) {
		self.push(method, url, Reply::Respond(HttpResponse::new(status, body)));
	}

	/// Queues a 200 response for each body, in order.
	pub fn respond_sequence(&self, method: Method, url: &str, bodies: &[&str]) {
		for body in bodies {
			self.respond(method, url, 200, body);
		}
	}

	/// Queues a network-level failure.
	pub fn fail(&self, method: Method, url: &str, reason: &str) {
		self.push(method, url, Reply::Fail(reason.to_string()));
	}

	/// Queues a response that is held back until the gate is released.
	pub fn gate(&self, method: Method, url: &str) -> ReplyGate {
		let (tx, rx) = oneshot::channel();
		self.push(method, url, Reply::Gated(rx));
		ReplyGate { tx }
	}

	/// Every request seen so far, in order.
	pub fn requests(&self) -> Vec<HttpRequest> {
		self.state.lock().requests.clone()
	}

	pub fn request_count(&self, method: Method, url: &str) -> usize {
		self.state
			.lock()
			.requests
			.iter()
			.filter(|request| request.method == method && request.url == url)
			.count()
	}

	/// Toggles [`Transport::supports_event_stream`].
	pub fn set_event_stream_support(&self, supported: bool) {
		self.event_streams.store(supported, Ordering::SeqCst);
	}

	/// Number of event streams ever opened to `url`.
	pub fn stream_count(&self, url: &str) -> usize {
		self.state.lock().streams.iter().filter(|(stream_url, _)| stream_url == url).count()
	}

	/// Number of event streams to `url` whose receiving side is still alive.
	pub fn live_stream_count(&self, url: &str) -> usize {
		self.state
			.lock()
			.streams
			.iter()
			.filter(|(stream_url, tx)| stream_url == url && !tx.is_closed())
			.count()
	}

	fn emit(&self, url: &str, event: StreamEvent) {
		let state = self.state.lock();
		if let Some((_, tx)) = state.streams.iter().rev().find(|(stream_url, _)| stream_url == url) {
			let _ = tx.send(event);
		}
	}

	/// Signals that the latest stream to `url` connected.
	pub fn stream_open(&self, url: &str) {
		self.emit(url, StreamEvent::Open);
	}

	/// Delivers a `message` event on the latest stream to `url`.
	pub fn stream_message(&self, url: &str, data: &str) {
		self.emit(url, StreamEvent::Message(data.to_string()));
	}

	/// Fails the latest stream to `url`.
	pub fn stream_error(&self, url: &str, reason: &str) {
		self.emit(url, StreamEvent::Error(reason.to_string()));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const STATUS: &str = "https://s/irma/session/1/status";

	#[tokio::test]
	async fn replays_script_and_repeats_last_reply() {
		let (transport, controller) = FakeTransport::new();
		controller.respond_sequence(Method::Get, STATUS, &["INITIALIZED", "CONNECTED"]);

		let mut bodies = Vec::new();
		for _ in 0..3 {
			bodies.push(transport.fetch(HttpRequest::get(STATUS)).await.unwrap().body);
		}

		assert_eq!(bodies, ["INITIALIZED", "CONNECTED", "CONNECTED"]);
		assert_eq!(controller.request_count(Method::Get, STATUS), 3);
	}

	#[tokio::test]
	async fn unscripted_requests_get_404() {
		let (transport, controller) = FakeTransport::new();
		let response = transport.fetch(HttpRequest::delete("https://s/irma/session/1")).await.unwrap();

		assert_eq!(response.status, 404);
		assert_eq!(controller.requests()[0].method, Method::Delete);
	}

	#[tokio::test]
	async fn failures_surface_as_errors() {
		let (transport, controller) = FakeTransport::new();
		controller.fail(Method::Get, STATUS, "connection refused");

		let err = transport.fetch(HttpRequest::get(STATUS)).await.unwrap_err();
		assert!(matches!(err, TransportError::Unreachable(reason) if reason == "connection refused"));
	}

	#[tokio::test]
	async fn gated_reply_waits_for_release() {
		let (transport, controller) = FakeTransport::new();
		let gate = controller.gate(Method::Post, "https://s/session");

		let pending = tokio::spawn(async move { transport.fetch(HttpRequest::new(Method::Post, "https://s/session")).await });
		tokio::task::yield_now().await;
		assert!(!pending.is_finished());

		gate.release(HttpResponse::ok("{}"));
		assert_eq!(pending.await.unwrap().unwrap().body, "{}");
	}

	#[tokio::test]
	async fn streams_are_driven_by_controller() {
		let (transport, controller) = FakeTransport::new();
		let url = "https://s/irma/session/1/statusevents";
		let mut stream = transport.open_event_stream(url);

		controller.stream_open(url);
		controller.stream_message(url, "\"CONNECTED\"");

		assert_eq!(stream.next().await, Some(StreamEvent::Open));
		assert_eq!(stream.next().await, Some(StreamEvent::Message("\"CONNECTED\"".into())));
		assert_eq!(controller.live_stream_count(url), 1);

		drop(stream);
		assert_eq!(controller.live_stream_count(url), 0);
		assert_eq!(controller.stream_count(url), 1);
	}
}
