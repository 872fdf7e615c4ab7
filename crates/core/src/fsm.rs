//! Contract with the externally owned state machine.
//!
//! The client both drives the state machine (through [`FsmController`]) and
//! is driven by it: the state machine reports every state change back as an
//! [`FsmEvent`] through a [`TransitionSink`](crate::TransitionSink).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// States of the frontend state machine that the client reacts to or checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
	Uninitialized,
	Loading,
	CheckingUserAgent,
	/// The session is running; status observation begins here.
	MediumContemplation,
	ShowingQRCode,
	ShowingQRCodeInstead,
	ShowingIrmaButton,
	/// The app asked for a pairing code; waiting for the user to confirm it.
	Pairing,
	ContinueOn2ndDevice,
	ContinueInIrmaApp,
	Cancelled,
	TimedOut,
	Error,
	BrowserNotSupported,
	Success,
	Aborted,
}

impl State {
	/// States in which the remote session is over from the client's view.
	pub fn ends_session(&self) -> bool {
		matches!(self, Self::Success | Self::Cancelled | Self::TimedOut | Self::Error | Self::Aborted)
	}
}

impl fmt::Display for State {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Transition names exchanged with the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
	Initialize,
	Loaded,
	ChooseQR,
	ShowIrmaButton,
	AppConnected,
	AppPairing,
	PairingCompleted,
	Succeed,
	Cancel,
	Timeout,
	Fail,
	Restart,
	Abort,
}

impl Transition {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Initialize => "initialize",
			Self::Loaded => "loaded",
			Self::ChooseQR => "chooseQR",
			Self::ShowIrmaButton => "showIrmaButton",
			Self::AppConnected => "appConnected",
			Self::AppPairing => "appPairing",
			Self::PairingCompleted => "pairingCompleted",
			Self::Succeed => "succeed",
			Self::Cancel => "cancel",
			Self::Timeout => "timeout",
			Self::Fail => "fail",
			Self::Restart => "restart",
			Self::Abort => "abort",
		}
	}
}

impl fmt::Display for Transition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One state change reported by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsmEvent {
	pub new_state: State,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transition: Option<Transition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
}

impl FsmEvent {
	pub fn new(new_state: State) -> Self {
		Self {
			new_state,
			transition: None,
			payload: None,
		}
	}

	pub fn with_transition(mut self, transition: Transition) -> Self {
		self.transition = Some(transition);
		self
	}

	pub fn with_payload(mut self, payload: Value) -> Self {
		self.payload = Some(payload);
		self
	}
}

/// Capabilities the client needs from the state machine.
///
/// Implementations must not call back into the client synchronously in a way
/// that waits for it; forwarding the resulting [`FsmEvent`] to a
/// [`TransitionSink`](crate::TransitionSink) only enqueues and is always safe.
pub trait FsmController: Send + Sync {
	fn transition(&self, transition: Transition, payload: Option<Value>);

	/// A transition after which the state machine accepts nothing else.
	fn final_transition(&self, transition: Transition, payload: Option<Value>);

	fn current_state(&self) -> State;

	fn is_valid_transition(&self, transition: Transition) -> bool;
}
