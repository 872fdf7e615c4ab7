//! Observation of one remote session's status.
//!
//! A [`StatusChannel`] is bound to a single session pointer and observes it
//! at most once. It prefers a server-sent-events stream and falls back to
//! polling when the stream does not open in time or fails:
//!
//! ```text
//! NotStarted ──observe──▶ Pushing ──timeout / stream error──▶ Pulling
//!      │                     │                                  │
//!      └──observe (no push)──┼─────────────────────────────────▶│
//!                            └──────────── close ───────────────┴──▶ Stopped
//! ```
//!
//! Every phase change goes through the phase lock, so the fallback can only
//! start one polling loop, and `close` only reports `true` once.

use std::sync::Arc;
use std::time::Duration;

use irma_protocol::{RemoteStatus, SessionPointer};
use irma_runtime::{EventStream, HttpRequest, StreamEvent, Transport};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::config::ObservationConfig;
use crate::error::{Error, Result};
use crate::pairing::PairingController;
use crate::template::TemplateVars;

/// Observation lifecycle of a [`StatusChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	NotStarted,
	Pushing,
	Pulling,
	Stopped,
}

impl Phase {
	pub fn is_running(&self) -> bool {
		matches!(self, Self::Pushing | Self::Pulling)
	}
}

/// Receives what a [`StatusChannel`] observes.
pub trait StatusSubscriber: Send + Sync + 'static {
	fn on_status(&self, status: RemoteStatus);

	/// Observation failed for good; no further calls follow.
	fn on_error(&self, error: Error);
}

/// Observation output as a value, for channel-based subscribers.
#[derive(Debug)]
pub enum ChannelUpdate {
	Status(RemoteStatus),
	Error(Error),
}

impl StatusSubscriber for mpsc::UnboundedSender<ChannelUpdate> {
	fn on_status(&self, status: RemoteStatus) {
		let _ = self.send(ChannelUpdate::Status(status));
	}

	fn on_error(&self, error: Error) {
		let _ = self.send(ChannelUpdate::Error(error));
	}
}

/// Single-use status observer for one session.
pub struct StatusChannel {
	pointer: Arc<SessionPointer>,
	config: Arc<ObservationConfig>,
	transport: Arc<dyn Transport>,
	phase: Arc<Mutex<Phase>>,
	stop_tx: watch::Sender<bool>,
}

impl StatusChannel {
	pub fn new(pointer: Arc<SessionPointer>, config: Arc<ObservationConfig>, transport: Arc<dyn Transport>) -> Self {
		let (stop_tx, _) = watch::channel(false);
		Self {
			pointer,
			config,
			transport,
			phase: Arc::new(Mutex::new(Phase::NotStarted)),
			stop_tx,
		}
	}

	pub fn pointer(&self) -> &SessionPointer {
		&self.pointer
	}

	pub fn phase(&self) -> Phase {
		*self.phase.lock()
	}

	pub fn is_running(&self) -> bool {
		self.phase().is_running()
	}

	/// Pairing controller sharing this channel's session and transport.
	pub fn pairing(&self) -> PairingController {
		PairingController::new(Arc::clone(&self.pointer), Arc::clone(&self.config), Arc::clone(&self.transport))
	}

	/// Starts observing; statuses and the terminal error go to `subscriber`.
	///
	/// Fails synchronously when the channel was already started or no
	/// usable transport is configured. Must be called within a tokio runtime.
	pub fn observe(&self, subscriber: impl StatusSubscriber) -> Result<()> {
		let mut phase = self.phase.lock();
		if *phase != Phase::NotStarted {
			return Err(Error::AlreadyObserving);
		}

		let vars = TemplateVars::for_pointer(&self.pointer);
		let observer = Observer {
			config: Arc::clone(&self.config),
			transport: Arc::clone(&self.transport),
			phase: Arc::clone(&self.phase),
			stop_rx: self.stop_tx.subscribe(),
			subscriber: Arc::new(subscriber),
			poll_request: match &self.config.polling {
				Some(polling) => Some(HttpRequest::get(polling.url.render(&vars)?)),
				None => None,
			},
		};

		let push = self.config.server_sent_events.as_ref().filter(|_| self.transport.supports_event_stream());
		if let Some(push) = push {
			let url = push.url.render(&vars)?;
			*phase = Phase::Pushing;
			debug!(target = "irma.channel", %url, "using event stream for status updates");
			let stream = self.transport.open_event_stream(&url);
			tokio::spawn(observer.push(url, stream, push.timeout()));
		} else if observer.poll_request.is_some() {
			*phase = Phase::Pulling;
			tokio::spawn(observer.pull());
		} else {
			return Err(Error::NoStatusTransport);
		}
		Ok(())
	}

	/// Stops observing. Returns `true` only if observation was running.
	pub fn close(&self) -> bool {
		let mut phase = self.phase.lock();
		if !phase.is_running() {
			return false;
		}
		*phase = Phase::Stopped;
		self.stop_tx.send_replace(true);
		debug!(target = "irma.channel", url = %self.pointer.url, "closed status channel");
		true
	}

	/// Asks the server to cancel the session, if a cancel URL is configured.
	pub async fn cancel(&self) -> Result<()> {
		let Some(cancel) = &self.config.cancel else {
			return Ok(());
		};
		let url = cancel.url.render(&TemplateVars::for_pointer(&self.pointer))?;
		let response = self.transport.fetch(HttpRequest::delete(url.clone())).await?;
		if !response.is_success() {
			return Err(Error::UnexpectedStatus { url, status: response.status });
		}
		Ok(())
	}
}

impl Drop for StatusChannel {
	fn drop(&mut self) {
		self.close();
	}
}

/// State moved into the observation task.
struct Observer {
	config: Arc<ObservationConfig>,
	transport: Arc<dyn Transport>,
	phase: Arc<Mutex<Phase>>,
	stop_rx: watch::Receiver<bool>,
	subscriber: Arc<dyn StatusSubscriber>,
	poll_request: Option<HttpRequest>,
}

impl Observer {
	fn in_phase(&self, expected: Phase) -> bool {
		*self.phase.lock() == expected
	}

	async fn push(mut self, url: String, mut stream: EventStream, timeout: Duration) {
		let deadline = tokio::time::sleep(timeout);
		tokio::pin!(deadline);
		let mut connected = false;

		let reason = loop {
			tokio::select! {
				_ = &mut deadline, if !connected => {
					break format!("event stream could not connect within {}ms", timeout.as_millis());
				}
				_ = self.stop_rx.wait_for(|stopped| *stopped) => return,
				event = stream.next() => match event {
					Some(StreamEvent::Open) => connected = true,
					Some(StreamEvent::Message(data)) => {
						connected = true;
						if *self.phase.lock() != Phase::Pushing {
							return;
						}
						let status = RemoteStatus::parse(&data);
						debug!(target = "irma.channel", %status, "server event: remote state changed");
						self.subscriber.on_status(status);
					}
					Some(StreamEvent::Error(reason)) => break reason,
					None => break "event stream ended".to_string(),
				},
			}
		};

		// Teardown happens in the background; never wait for it.
		drop(stream);
		warn!(target = "irma.channel", %url, %reason, "event stream failed");
		self.fall_back(reason).await;
	}

	async fn fall_back(self, reason: String) {
		{
			let mut phase = self.phase.lock();
			if *phase != Phase::Pushing {
				return;
			}
			if self.poll_request.is_none() {
				drop(phase);
				self.subscriber.on_error(Error::PushUnavailable(reason));
				return;
			}
			*phase = Phase::Pulling;
		}
		self.pull().await;
	}

	async fn pull(mut self) {
		let (Some(request), Some(polling)) = (self.poll_request.take(), self.config.polling.clone()) else {
			return;
		};
		debug!(target = "irma.channel", url = %request.url, interval_ms = polling.interval_ms, "using polling for status updates");

		let mut current = polling.start_state.clone();
		loop {
			if !self.in_phase(Phase::Pulling) {
				break;
			}

			let response = tokio::select! {
				response = self.transport.fetch(request.clone()) => response,
				_ = self.stop_rx.wait_for(|stopped| *stopped) => break,
			};
			// The channel may have been closed while the request was in flight.
			if !self.in_phase(Phase::Pulling) {
				break;
			}

			let response = match response {
				Ok(response) if response.status == 200 => response,
				Ok(response) => {
					self.fail(Error::UnexpectedStatus {
						url: request.url.clone(),
						status: response.status,
					});
					return;
				}
				Err(e) => {
					self.fail(e.into());
					return;
				}
			};

			let status = RemoteStatus::parse(&response.body);
			if status != current {
				debug!(target = "irma.channel", %status, "polling: remote state changed");
				current = status.clone();
				self.subscriber.on_status(status);
			}

			tokio::select! {
				_ = tokio::time::sleep(polling.interval()) => {}
				_ = self.stop_rx.wait_for(|stopped| *stopped) => break,
			}
		}
		debug!(target = "irma.channel", "stopped polling");
	}

	fn fail(&self, error: Error) {
		error!(target = "irma.channel", error = %error, "error while polling");
		self.subscriber.on_error(error);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use irma_runtime::{FakeTransport, FakeTransportController, Method};

	const SESSION: &str = "https://irma.example.com/irma/session/abc";
	const STATUS: &str = "https://irma.example.com/irma/session/abc/status";
	const EVENTS: &str = "https://irma.example.com/irma/session/abc/statusevents";

	fn channel_with(config: ObservationConfig) -> (StatusChannel, FakeTransportController) {
		let (transport, controller) = FakeTransport::new();
		let channel = StatusChannel::new(Arc::new(SessionPointer::new(SESSION)), Arc::new(config), Arc::new(transport));
		(channel, controller)
	}

	fn polling_only() -> ObservationConfig {
		ObservationConfig {
			server_sent_events: None,
			..ObservationConfig::default()
		}
	}

	async fn drain(rx: &mut mpsc::UnboundedReceiver<ChannelUpdate>) -> Vec<String> {
		let mut seen = Vec::new();
		while let Ok(update) = rx.try_recv() {
			match update {
				ChannelUpdate::Status(status) => seen.push(status.to_string()),
				ChannelUpdate::Error(error) => seen.push(format!("error: {error}")),
			}
		}
		seen
	}

	#[tokio::test(start_paused = true)]
	async fn polling_reports_only_changes() {
		let (channel, controller) = channel_with(polling_only());
		controller.respond_sequence(Method::Get, STATUS, &["\"INITIALIZED\"", "A", "A", "B", "B", "C"]);
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		tokio::time::sleep(Duration::from_millis(500 * 8)).await;

		assert_eq!(drain(&mut rx).await, ["A", "B", "C"]);
		assert!(channel.close());
	}

	#[tokio::test(start_paused = true)]
	async fn polling_compares_against_start_state() {
		let mut config = polling_only();
		if let Some(polling) = config.polling.as_mut() {
			polling.start_state = RemoteStatus::Connected;
		}
		let (channel, controller) = channel_with(config);
		controller.respond_sequence(Method::Get, STATUS, &["INITIALIZED", "CONNECTED"]);
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		tokio::time::sleep(Duration::from_millis(2_000)).await;

		assert_eq!(drain(&mut rx).await, ["INITIALIZED", "CONNECTED"]);
	}

	#[tokio::test(start_paused = true)]
	async fn polling_non_200_is_fatal() {
		let (channel, controller) = channel_with(polling_only());
		controller.respond(Method::Get, STATUS, 200, "CONNECTED");
		controller.respond(Method::Get, STATUS, 500, "boom");
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		tokio::time::sleep(Duration::from_millis(5_000)).await;

		let seen = drain(&mut rx).await;
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0], "CONNECTED");
		assert!(seen[1].starts_with("error:") && seen[1].contains("500"), "{seen:?}");
		assert_eq!(controller.request_count(Method::Get, STATUS), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn close_stops_polling_and_is_idempotent() {
		let (channel, controller) = channel_with(polling_only());
		controller.respond(Method::Get, STATUS, 200, "INITIALIZED");
		let (tx, _rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		tokio::time::sleep(Duration::from_millis(1_200)).await;
		let polled = controller.request_count(Method::Get, STATUS);
		assert!(polled >= 2);

		assert!(channel.close());
		assert!(!channel.close());
		assert_eq!(channel.phase(), Phase::Stopped);

		tokio::time::sleep(Duration::from_millis(5_000)).await;
		assert_eq!(controller.request_count(Method::Get, STATUS), polled);
	}

	#[tokio::test]
	async fn close_before_observe_is_a_no_op() {
		let (channel, _controller) = channel_with(polling_only());
		assert!(!channel.close());
		assert_eq!(channel.phase(), Phase::NotStarted);
	}

	#[tokio::test(start_paused = true)]
	async fn observe_twice_is_rejected() {
		let (channel, controller) = channel_with(polling_only());
		controller.respond(Method::Get, STATUS, 200, "INITIALIZED");
		let (tx, _rx) = mpsc::unbounded_channel();

		channel.observe(tx.clone()).unwrap();
		assert!(matches!(channel.observe(tx), Err(Error::AlreadyObserving)));
	}

	#[tokio::test]
	async fn observe_without_any_transport_fails() {
		let (channel, _controller) = channel_with(ObservationConfig {
			server_sent_events: None,
			polling: None,
			..ObservationConfig::default()
		});
		let (tx, _rx) = mpsc::unbounded_channel();
		assert!(matches!(channel.observe(tx), Err(Error::NoStatusTransport)));
		assert_eq!(channel.phase(), Phase::NotStarted);
	}

	#[tokio::test(start_paused = true)]
	async fn push_forwards_every_message() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		assert_eq!(channel.phase(), Phase::Pushing);

		controller.stream_open(EVENTS);
		controller.stream_message(EVENTS, "\"CONNECTED\"");
		controller.stream_message(EVENTS, "\"CONNECTED\"");
		controller.stream_message(EVENTS, "\"DONE\"");
		tokio::time::sleep(Duration::from_millis(10_000)).await;

		assert_eq!(drain(&mut rx).await, ["CONNECTED", "CONNECTED", "DONE"]);
		assert_eq!(channel.phase(), Phase::Pushing);
		assert_eq!(controller.request_count(Method::Get, STATUS), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn push_timeout_falls_back_to_polling_once() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		controller.respond(Method::Get, STATUS, 200, "CONNECTED");
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		tokio::time::sleep(Duration::from_millis(1_999)).await;
		assert_eq!(channel.phase(), Phase::Pushing);
		assert_eq!(controller.request_count(Method::Get, STATUS), 0);

		tokio::time::sleep(Duration::from_millis(2)).await;
		assert_eq!(channel.phase(), Phase::Pulling);
		assert_eq!(controller.live_stream_count(EVENTS), 0);

		// A late stream error must not start a second loop.
		controller.stream_error(EVENTS, "late");
		tokio::time::sleep(Duration::from_millis(1_000)).await;

		assert_eq!(drain(&mut rx).await, ["CONNECTED"]);
		assert_eq!(controller.request_count(Method::Get, STATUS), 3);
		assert_eq!(controller.stream_count(EVENTS), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn push_error_after_open_falls_back() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		controller.respond(Method::Get, STATUS, 200, "DONE");
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		controller.stream_open(EVENTS);
		controller.stream_message(EVENTS, "\"CONNECTED\"");
		tokio::time::sleep(Duration::from_millis(5_000)).await;
		assert_eq!(channel.phase(), Phase::Pushing);

		controller.stream_error(EVENTS, "connection reset");
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert_eq!(channel.phase(), Phase::Pulling);
		assert_eq!(drain(&mut rx).await, ["CONNECTED", "DONE"]);
	}

	#[tokio::test(start_paused = true)]
	async fn push_failure_without_polling_is_reported() {
		let (channel, controller) = channel_with(ObservationConfig {
			polling: None,
			..ObservationConfig::default()
		});
		let (tx, mut rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		controller.stream_error(EVENTS, "refused");
		tokio::time::sleep(Duration::from_millis(10)).await;

		let seen = drain(&mut rx).await;
		assert_eq!(seen.len(), 1);
		assert!(seen[0].contains("refused"));
	}

	#[tokio::test(start_paused = true)]
	async fn unsupported_event_streams_go_straight_to_polling() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		controller.set_event_stream_support(false);
		controller.respond(Method::Get, STATUS, 200, "INITIALIZED");
		let (tx, _rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		assert_eq!(channel.phase(), Phase::Pulling);
		tokio::time::sleep(Duration::from_millis(10)).await;

		assert_eq!(controller.stream_count(EVENTS), 0);
		assert_eq!(controller.request_count(Method::Get, STATUS), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn close_tears_down_event_stream() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		let (tx, _rx) = mpsc::unbounded_channel();

		channel.observe(tx).unwrap();
		controller.stream_open(EVENTS);
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(controller.live_stream_count(EVENTS), 1);

		assert!(channel.close());
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(controller.live_stream_count(EVENTS), 0);

		tokio::time::sleep(Duration::from_millis(5_000)).await;
		assert_eq!(controller.request_count(Method::Get, STATUS), 0);
	}

	#[tokio::test]
	async fn cancel_sends_delete_when_configured() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		controller.respond(Method::Delete, SESSION, 204, "");

		channel.cancel().await.unwrap();
		assert_eq!(controller.request_count(Method::Delete, SESSION), 1);
	}

	#[tokio::test]
	async fn cancel_without_config_does_nothing() {
		let (channel, controller) = channel_with(ObservationConfig {
			cancel: None,
			..ObservationConfig::default()
		});

		channel.cancel().await.unwrap();
		assert!(controller.requests().is_empty());
	}

	#[tokio::test]
	async fn cancel_reports_server_rejection() {
		let (channel, controller) = channel_with(ObservationConfig::default());
		controller.respond(Method::Delete, SESSION, 403, "");

		assert!(matches!(channel.cancel().await, Err(Error::UnexpectedStatus { status: 403, .. })));
	}
}
