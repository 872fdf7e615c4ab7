//! The session client: glue between the state machine and the remote session.
//!
//! All client state is owned by one task that handles [`ClientEvent`]s in
//! arrival order. State machine transitions, observed statuses and finished
//! network requests all arrive as events, so a handler never runs while
//! another one is half done. Network requests run in their own tasks and post
//! their completion back as a new event.
//!
//! Completions can outlive the situation they were started for. Session starts
//! and status channels are therefore numbered; a completion carrying an
//! outdated number is ignored (a late start is cancelled on the server).

use std::sync::Arc;

use irma_protocol::{RemoteStatus, SessionPointer};
use irma_runtime::{HttpTransport, Transport};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelUpdate, StatusChannel, StatusSubscriber};
use crate::config::{ClientOptions, ObservationConfig};
use crate::error::{Error, Result};
use crate::fsm::{FsmController, FsmEvent, State, Transition};
use crate::pairing::{PairingController, PairingUpdate};
use crate::session::{HttpSessionStarter, SessionStarter};

enum ClientEvent {
	Start,
	Fsm(FsmEvent),
	Channel { generation: u64, update: ChannelUpdate },
	Started { generation: u64, result: Result<SessionPointer> },
	ResultFetched { generation: u64, result: Result<Option<Value>> },
	PairingUpdated { request: u64, result: Result<Option<String>> },
	Close(oneshot::Sender<Option<Value>>),
}

/// Handle through which the state machine reports its transitions.
///
/// Reporting only enqueues, so it is safe to call from inside
/// [`FsmController::transition`].
#[derive(Clone)]
pub struct TransitionSink {
	tx: mpsc::UnboundedSender<ClientEvent>,
}

impl TransitionSink {
	pub fn on_fsm_transition(&self, event: FsmEvent) {
		let _ = self.tx.send(ClientEvent::Fsm(event));
	}
}

/// Drives one remote session on behalf of a state machine.
pub struct SessionClient {
	tx: mpsc::UnboundedSender<ClientEvent>,
	task: JoinHandle<()>,
}

impl SessionClient {
	/// Client talking HTTP to the servers named in `options`.
	///
	/// Must be called within a tokio runtime.
	pub fn new(fsm: Arc<dyn FsmController>, options: ClientOptions) -> Result<Self> {
		let transport = HttpTransport::new()?;
		Self::with_transport(fsm, options, Arc::new(transport))
	}

	pub fn with_transport(fsm: Arc<dyn FsmController>, options: ClientOptions, transport: Arc<dyn Transport>) -> Result<Self> {
		options.validate()?;
		let starter = options
			.session
			.map(|session| Arc::new(HttpSessionStarter::new(session, Arc::clone(&transport))) as Arc<dyn SessionStarter>);
		Ok(Self::with_parts(fsm, options.state, transport, starter))
	}

	/// Client with a custom session source; without one, sessions can only be
	/// observed, not started.
	pub fn with_parts(
		fsm: Arc<dyn FsmController>,
		config: ObservationConfig,
		transport: Arc<dyn Transport>,
		starter: Option<Arc<dyn SessionStarter>>,
	) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let actor = Actor {
			fsm,
			config: Arc::new(config),
			transport,
			starter,
			tx: tx.clone(),
			can_restart: false,
			start_generation: 0,
			channel_generation: 0,
			channel: None,
			pairing: None,
			pairing_code: PairingCode::Idle,
			pairing_request: 0,
			awaiting_code: false,
			success_payload: None,
		};
		let task = tokio::spawn(actor.run(rx));
		Self { tx, task }
	}

	/// Handle to give to the state machine.
	pub fn sink(&self) -> TransitionSink {
		TransitionSink { tx: self.tx.clone() }
	}

	/// Kicks off the state machine if a session source is configured.
	pub fn start(&self) {
		let _ = self.tx.send(ClientEvent::Start);
	}

	pub fn on_fsm_transition(&self, event: FsmEvent) {
		let _ = self.tx.send(ClientEvent::Fsm(event));
	}

	/// Result payload of the session if it ended in success.
	pub async fn close(&self) -> Option<Value> {
		let (reply, rx) = oneshot::channel();
		self.tx.send(ClientEvent::Close(reply)).ok()?;
		rx.await.ok().flatten()
	}
}

impl Drop for SessionClient {
	fn drop(&mut self) {
		self.task.abort();
	}
}

enum PairingCode {
	Idle,
	Pending,
	Ready(Option<String>),
	Failed,
}

struct ChannelForwarder {
	generation: u64,
	tx: mpsc::UnboundedSender<ClientEvent>,
}

impl StatusSubscriber for ChannelForwarder {
	fn on_status(&self, status: RemoteStatus) {
		let _ = self.tx.send(ClientEvent::Channel {
			generation: self.generation,
			update: ChannelUpdate::Status(status),
		});
	}

	fn on_error(&self, error: Error) {
		let _ = self.tx.send(ClientEvent::Channel {
			generation: self.generation,
			update: ChannelUpdate::Error(error),
		});
	}
}

struct Actor {
	fsm: Arc<dyn FsmController>,
	config: Arc<ObservationConfig>,
	transport: Arc<dyn Transport>,
	starter: Option<Arc<dyn SessionStarter>>,
	tx: mpsc::UnboundedSender<ClientEvent>,
	can_restart: bool,
	start_generation: u64,
	channel_generation: u64,
	channel: Option<StatusChannel>,
	pairing: Option<Arc<PairingController>>,
	pairing_code: PairingCode,
	pairing_request: u64,
	/// A pairing status arrived before the pairing code did.
	awaiting_code: bool,
	success_payload: Option<Value>,
}

impl Actor {
	async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ClientEvent>) {
		while let Some(event) = rx.recv().await {
			match event {
				ClientEvent::Start => self.start(),
				ClientEvent::Fsm(event) => self.on_fsm_transition(event),
				ClientEvent::Channel { generation, update } => self.on_channel_update(generation, update),
				ClientEvent::Started { generation, result } => self.on_started(generation, result),
				ClientEvent::ResultFetched { generation, result } => self.on_result(generation, result),
				ClientEvent::PairingUpdated { request, result } => self.on_pairing_updated(request, result),
				ClientEvent::Close(reply) => {
					let payload = if self.fsm.current_state() == State::Success {
						self.success_payload.clone()
					} else {
						None
					};
					let _ = reply.send(payload);
				}
			}
		}
	}

	fn start(&self) {
		if let Some(starter) = &self.starter {
			self.fsm.transition(Transition::Initialize, Some(json!({ "canRestart": starter.can_restart() })));
		}
	}

	fn on_fsm_transition(&mut self, event: FsmEvent) {
		debug!(target = "irma.client", state = %event.new_state, transition = ?event.transition, "state machine transition");
		match event.new_state {
			State::Loading => {
				if let Some(flag) = event.payload.as_ref().and_then(|p| p.get("canRestart")).and_then(Value::as_bool) {
					self.can_restart = flag;
				}
				self.start_session();
			}
			State::MediumContemplation => self.observe(event.payload),
			State::ShowingQRCode | State::ShowingQRCodeInstead => self.update_pairing(true),
			State::ShowingIrmaButton => self.update_pairing(false),
			State::ContinueOn2ndDevice if event.transition == Some(Transition::PairingCompleted) => self.pairing_completed(),
			state if state.ends_session() => {
				if state == State::Success {
					self.success_payload = event.payload;
				}
				self.close_session();
			}
			_ => {}
		}
	}

	fn start_session(&mut self) {
		self.start_generation += 1;
		let Some(starter) = self.starter.clone() else {
			self.no_success(Transition::Fail, Some(Error::NoSessionPointer));
			return;
		};
		let generation = self.start_generation;
		let tx = self.tx.clone();
		tokio::spawn(async move {
			let result = starter.start().await;
			let _ = tx.send(ClientEvent::Started { generation, result });
		});
	}

	fn on_started(&mut self, generation: u64, result: Result<SessionPointer>) {
		let pointer = match result {
			Ok(pointer) => pointer,
			Err(e) if generation == self.start_generation => {
				error!(target = "irma.client", error = %e, "error starting a new session on the server");
				self.no_success(Transition::Fail, Some(e));
				return;
			}
			Err(e) => {
				debug!(target = "irma.client", error = %e, "superseded session start failed");
				return;
			}
		};

		if generation != self.start_generation || self.fsm.current_state() != State::Loading {
			info!(target = "irma.client", url = %pointer.url, "state changed while loading, cancelling session");
			self.cancel_detached(StatusChannel::new(Arc::new(pointer), Arc::clone(&self.config), Arc::clone(&self.transport)));
			return;
		}

		match serde_json::to_value(&pointer) {
			Ok(payload) => self.fsm.transition(Transition::Loaded, Some(payload)),
			Err(e) => self.no_success(Transition::Fail, Some(e.into())),
		}
	}

	fn observe(&mut self, payload: Option<Value>) {
		let pointer = match payload.map(serde_json::from_value::<SessionPointer>) {
			Some(Ok(pointer)) => pointer,
			Some(Err(e)) => return self.no_success(Transition::Fail, Some(Error::InvalidPointer(e.to_string()))),
			None => return self.no_success(Transition::Fail, Some(Error::InvalidPointer("missing from transition".into()))),
		};

		self.close_session();
		self.channel_generation += 1;
		let channel = StatusChannel::new(Arc::new(pointer), Arc::clone(&self.config), Arc::clone(&self.transport));
		self.pairing = Some(Arc::new(channel.pairing()));
		self.pairing_code = PairingCode::Idle;
		self.awaiting_code = false;

		let forwarder = ChannelForwarder {
			generation: self.channel_generation,
			tx: self.tx.clone(),
		};
		let observed = channel.observe(forwarder);
		info!(target = "irma.client", url = %channel.pointer().url, "observing session status");
		self.channel = Some(channel);
		if let Err(e) = observed {
			error!(target = "irma.client", error = %e, "observing server state could not be started");
			self.no_success(Transition::Fail, Some(e));
		}
	}

	fn update_pairing(&mut self, continue_on_second_device: bool) {
		let Some(pairing) = self.pairing.clone() else {
			return;
		};
		match pairing.prepare(continue_on_second_device) {
			Ok(None) => {}
			Ok(Some(PairingUpdate::Unchanged(code))) => {
				if !matches!(self.pairing_code, PairingCode::Pending) {
					self.pairing_code = PairingCode::Ready(code);
				}
			}
			Ok(Some(PairingUpdate::Request { enable, request })) => {
				self.pairing_request += 1;
				self.pairing_code = PairingCode::Pending;
				let id = self.pairing_request;
				let tx = self.tx.clone();
				tokio::spawn(async move {
					let result = pairing.send(enable, request).await;
					let _ = tx.send(ClientEvent::PairingUpdated { request: id, result });
				});
			}
			Err(e) => {
				warn!(target = "irma.pairing", error = %e, "pairing state could not be updated");
				self.pairing_code = PairingCode::Failed;
			}
		}
	}

	fn on_pairing_updated(&mut self, request: u64, result: Result<Option<String>>) {
		if let Err(e) = &result {
			warn!(target = "irma.pairing", error = %e, "pairing state could not be updated");
		}
		if request != self.pairing_request {
			return;
		}
		self.pairing_code = match result {
			Ok(code) => PairingCode::Ready(code),
			Err(_) => PairingCode::Failed,
		};
		if self.awaiting_code {
			self.awaiting_code = false;
			self.app_pairing();
		}
	}

	fn app_pairing(&mut self) {
		match &self.pairing_code {
			PairingCode::Ready(Some(code)) => {
				let payload = json!({ "pairingCode": code });
				self.fsm.transition(Transition::AppPairing, Some(payload));
			}
			PairingCode::Pending => self.awaiting_code = true,
			PairingCode::Ready(None) | PairingCode::Failed => warn!(target = "irma.pairing", "pairing requested by app, but pairing code is unavailable"),
			PairingCode::Idle => warn!(target = "irma.pairing", "pairing requested by app, but pairing was never enabled"),
		}
	}

	fn pairing_completed(&self) {
		let Some(pairing) = self.pairing.clone() else {
			return;
		};
		tokio::spawn(async move {
			match pairing.pairing_completed().await {
				Ok(response) if response.is_success() => debug!(target = "irma.pairing", "pairing completed"),
				Ok(response) => warn!(target = "irma.pairing", status = response.status, "pairing completion rejected"),
				Err(e) => warn!(target = "irma.pairing", error = %e, "pairing completion failed"),
			}
		});
	}

	fn on_channel_update(&mut self, generation: u64, update: ChannelUpdate) {
		let current = generation == self.channel_generation && self.channel.as_ref().is_some_and(StatusChannel::is_running);
		if !current {
			debug!(target = "irma.client", generation, "dropping update from closed status channel");
			return;
		}
		match update {
			ChannelUpdate::Status(status) => self.on_remote_status(status),
			ChannelUpdate::Error(e) => {
				error!(target = "irma.client", error = %e, "error while observing server state");
				self.no_success(Transition::Fail, Some(e));
			}
		}
	}

	fn on_remote_status(&mut self, status: RemoteStatus) {
		info!(target = "irma.client", %status, "remote status");
		match status {
			RemoteStatus::Initialized => {}
			RemoteStatus::Connected => {
				if self.fsm.is_valid_transition(Transition::AppConnected) {
					self.fsm.transition(Transition::AppConnected, None);
				}
			}
			RemoteStatus::Pairing => self.app_pairing(),
			RemoteStatus::Done => {
				self.close_channel();
				self.fetch_result();
			}
			RemoteStatus::Cancelled => {
				self.close_channel();
				self.no_success(Transition::Cancel, None);
			}
			RemoteStatus::Timeout => {
				self.close_channel();
				self.no_success(Transition::Timeout, None);
			}
			RemoteStatus::Unknown(token) => {
				self.close_channel();
				error!(target = "irma.client", %token, "unknown state received from server");
				self.no_success(Transition::Fail, Some(Error::UnknownStatus(token)));
			}
		}
	}

	fn fetch_result(&mut self) {
		let Some(starter) = self.starter.clone() else {
			self.fsm.transition(Transition::Succeed, None);
			return;
		};
		let generation = self.channel_generation;
		let tx = self.tx.clone();
		tokio::spawn(async move {
			let result = starter.result().await;
			let _ = tx.send(ClientEvent::ResultFetched { generation, result });
		});
	}

	fn on_result(&mut self, generation: u64, result: Result<Option<Value>>) {
		if generation != self.channel_generation {
			return;
		}
		match result {
			Ok(payload) => self.fsm.transition(Transition::Succeed, payload),
			Err(e) => {
				error!(target = "irma.client", error = %e, "error fetching session result from the server");
				self.no_success(Transition::Fail, Some(e));
			}
		}
	}

	fn close_channel(&self) {
		if let Some(channel) = &self.channel {
			channel.close();
		}
	}

	/// Stops observing; a session that was still being observed is cancelled.
	fn close_session(&mut self) {
		let Some(channel) = self.channel.take() else {
			return;
		};
		if channel.close() {
			self.cancel_detached(channel);
		}
	}

	fn cancel_detached(&self, channel: StatusChannel) {
		tokio::spawn(async move {
			if let Err(e) = channel.cancel().await {
				warn!(target = "irma.client", url = %channel.pointer().url, error = %e, "session could not be cancelled");
			}
		});
	}

	fn no_success(&mut self, transition: Transition, error: Option<Error>) {
		let payload = error.map(|e| Value::String(e.to_string()));
		if self.can_restart {
			self.fsm.transition(transition, payload);
		} else {
			self.fsm.final_transition(transition, payload);
		}
	}
}
