//! Test doubles for driving a [`SessionClient`](crate::SessionClient).
//!
//! [`RecordingFsm`] is a small table-driven state machine that records every
//! transition the client asks for and reports accepted ones back through a
//! [`TransitionSink`], the way a real frontend state machine would.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::client::TransitionSink;
use crate::fsm::{FsmController, FsmEvent, State, Transition};

/// One call made on a [`RecordingFsm`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
	pub transition: Transition,
	pub payload: Option<Value>,
	pub is_final: bool,
}

struct Inner {
	state: State,
	routes: HashMap<(State, Transition), State>,
	recorded: Vec<Recorded>,
	finalized: bool,
	sink: Option<TransitionSink>,
}

pub struct RecordingFsm {
	inner: Mutex<Inner>,
}

impl Default for RecordingFsm {
	fn default() -> Self {
		Self::new()
	}
}

impl RecordingFsm {
	/// State machine with the usual frontend routes, starting `Uninitialized`.
	pub fn new() -> Self {
		Self::with_routes(standard_routes())
	}

	pub fn with_routes(routes: impl IntoIterator<Item = ((State, Transition), State)>) -> Self {
		Self {
			inner: Mutex::new(Inner {
				state: State::Uninitialized,
				routes: routes.into_iter().collect(),
				recorded: Vec::new(),
				finalized: false,
				sink: None,
			}),
		}
	}

	/// Reports accepted transitions to `sink` from now on.
	pub fn attach(&self, sink: TransitionSink) {
		self.inner.lock().sink = Some(sink);
	}

	/// Moves to `state` without reporting it.
	pub fn set_state(&self, state: State) {
		self.inner.lock().state = state;
	}

	/// Moves to `state` and reports it, as if driven by the user interface.
	pub fn enter(&self, state: State, transition: Option<Transition>, payload: Option<Value>) {
		let sink = {
			let mut inner = self.inner.lock();
			inner.state = state;
			inner.sink.clone()
		};
		if let Some(sink) = sink {
			sink.on_fsm_transition(FsmEvent {
				new_state: state,
				transition,
				payload,
			});
		}
	}

	/// Every transition requested so far, accepted or not.
	pub fn recorded(&self) -> Vec<Recorded> {
		self.inner.lock().recorded.clone()
	}

	pub fn transitions(&self) -> Vec<Transition> {
		self.inner.lock().recorded.iter().map(|r| r.transition).collect()
	}

	/// The most recent request for `transition`.
	pub fn last(&self, transition: Transition) -> Option<Recorded> {
		self.inner.lock().recorded.iter().rev().find(|r| r.transition == transition).cloned()
	}

	pub fn is_finalized(&self) -> bool {
		self.inner.lock().finalized
	}

	fn apply(&self, transition: Transition, payload: Option<Value>, is_final: bool) {
		let forward = {
			let mut inner = self.inner.lock();
			inner.recorded.push(Recorded {
				transition,
				payload: payload.clone(),
				is_final,
			});
			if inner.finalized {
				return;
			}
			let Some(next) = inner.routes.get(&(inner.state, transition)).copied() else {
				return;
			};
			inner.state = next;
			inner.finalized = is_final;
			inner.sink.clone().map(|sink| {
				(
					sink,
					FsmEvent {
						new_state: next,
						transition: Some(transition),
						payload,
					},
				)
			})
		};
		if let Some((sink, event)) = forward {
			sink.on_fsm_transition(event);
		}
	}
}

impl FsmController for RecordingFsm {
	fn transition(&self, transition: Transition, payload: Option<Value>) {
		self.apply(transition, payload, false);
	}

	fn final_transition(&self, transition: Transition, payload: Option<Value>) {
		self.apply(transition, payload, true);
	}

	fn current_state(&self) -> State {
		self.inner.lock().state
	}

	fn is_valid_transition(&self, transition: Transition) -> bool {
		let inner = self.inner.lock();
		!inner.finalized && inner.routes.contains_key(&(inner.state, transition))
	}
}

fn standard_routes() -> Vec<((State, Transition), State)> {
	use State::*;
	use Transition as T;

	let mut routes = vec![
		((Uninitialized, T::Initialize), Loading),
		((Loading, T::Loaded), MediumContemplation),
		((MediumContemplation, T::ChooseQR), ShowingQRCode),
		((MediumContemplation, T::ShowIrmaButton), ShowingIrmaButton),
		((ShowingIrmaButton, T::ChooseQR), ShowingQRCodeInstead),
		((ShowingQRCode, T::AppConnected), ContinueOn2ndDevice),
		((ShowingQRCodeInstead, T::AppConnected), ContinueOn2ndDevice),
		((ShowingQRCode, T::AppPairing), Pairing),
		((ShowingQRCodeInstead, T::AppPairing), Pairing),
		((Pairing, T::PairingCompleted), ContinueOn2ndDevice),
		((ShowingIrmaButton, T::AppConnected), ContinueInIrmaApp),
	];

	let active = [
		Loading,
		MediumContemplation,
		ShowingQRCode,
		ShowingQRCodeInstead,
		ShowingIrmaButton,
		Pairing,
		ContinueOn2ndDevice,
		ContinueInIrmaApp,
	];
	for state in active {
		routes.push(((state, T::Succeed), Success));
		routes.push(((state, T::Cancel), Cancelled));
		routes.push(((state, T::Timeout), TimedOut));
		routes.push(((state, T::Fail), Error));
		routes.push(((state, T::Abort), Aborted));
	}
	for state in [Cancelled, TimedOut, Error] {
		routes.push(((state, T::Restart), Loading));
	}
	routes
}
