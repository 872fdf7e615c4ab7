//! Device pairing for sessions continued on a second device.
//!
//! When the session is shown as a QR code, the server can be asked to require
//! a pairing code before the app may continue; when the user switches to the
//! app on the same device, pairing is switched off again. The controller keeps
//! its own belief of what the server has been told so that repeated requests
//! for the same state are not sent twice.

use std::sync::Arc;

use irma_protocol::SessionPointer;
use irma_runtime::{HttpRequest, HttpResponse, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::config::{ObservationConfig, PairingConfig};
use crate::error::{Error, Result};
use crate::template::TemplateVars;

#[derive(Debug, Default)]
struct Belief {
	enabled: bool,
	code: Option<String>,
}

/// What [`PairingController::prepare`] decided.
#[derive(Debug)]
pub enum PairingUpdate {
	/// The server already has the requested state.
	Unchanged(Option<String>),
	/// This request must be sent to reach the requested state.
	Request { enable: bool, request: HttpRequest },
}

pub struct PairingController {
	pointer: Arc<SessionPointer>,
	config: Arc<ObservationConfig>,
	transport: Arc<dyn Transport>,
	belief: Mutex<Belief>,
}

impl PairingController {
	pub fn new(pointer: Arc<SessionPointer>, config: Arc<ObservationConfig>, transport: Arc<dyn Transport>) -> Self {
		Self {
			pointer,
			config,
			transport,
			belief: Mutex::default(),
		}
	}

	fn pairing_config(&self) -> Option<&PairingConfig> {
		self.config.pairing.as_ref()
	}

	/// Whether pairing is switched on as far as this controller knows.
	pub fn is_enabled(&self) -> bool {
		self.belief.lock().enabled
	}

	/// Decides which request, if any, brings the server into the wanted state.
	///
	/// The belief is updated immediately, so two calls in a row for the same
	/// state produce only one request even if the first has not completed.
	/// Returns `Ok(None)` when pairing is not configured.
	pub fn prepare(&self, continue_on_second_device: bool) -> Result<Option<PairingUpdate>> {
		let Some(pairing) = self.pairing_config() else {
			return Ok(None);
		};
		let enable = continue_on_second_device && pairing.only_enable_if.holds(&self.pointer);

		let mut belief = self.belief.lock();
		if belief.enabled == enable {
			return Ok(Some(PairingUpdate::Unchanged(belief.code.clone().filter(|_| enable))));
		}

		let template = if enable { &pairing.enable } else { &pairing.disable };
		let request = template.render(&TemplateVars::for_pointer(&self.pointer))?;
		belief.enabled = enable;
		Ok(Some(PairingUpdate::Request { enable, request }))
	}

	/// Sends a request produced by [`prepare`](Self::prepare) and returns the
	/// pairing code when pairing was enabled.
	///
	/// When the request fails the belief falls back to the previous state, so
	/// a later call for the same state tries again.
	pub async fn send(&self, enable: bool, request: HttpRequest) -> Result<Option<String>> {
		let url = request.url.clone();
		let response = match self.transport.fetch(request).await {
			Ok(response) if response.is_success() => response,
			Ok(response) => {
				self.revert(enable);
				return Err(Error::UnexpectedStatus { url, status: response.status });
			}
			Err(e) => {
				self.revert(enable);
				return Err(e.into());
			}
		};
		if !enable {
			self.belief.lock().code = None;
			debug!(target = "irma.pairing", "pairing disabled");
			return Ok(None);
		}

		let code = self.pairing_config().and_then(|pairing| extract_code(&response.body, &pairing.code_field));
		debug!(target = "irma.pairing", has_code = code.is_some(), "pairing enabled");
		self.belief.lock().code = code.clone();
		Ok(code)
	}

	fn revert(&self, attempted: bool) {
		let mut belief = self.belief.lock();
		// A newer request for the opposite state owns the belief now.
		if belief.enabled == attempted {
			belief.enabled = !attempted;
			belief.code = None;
		}
	}

	/// Brings the server's pairing state in line with how the session is shown.
	///
	/// Resolves to the pairing code when pairing is (already) enabled, and to
	/// `None` when it is disabled or not configured.
	pub async fn update_pairing_state(&self, continue_on_second_device: bool) -> Result<Option<String>> {
		match self.prepare(continue_on_second_device)? {
			None => Ok(None),
			Some(PairingUpdate::Unchanged(code)) => Ok(code),
			Some(PairingUpdate::Request { enable, request }) => self.send(enable, request).await,
		}
	}

	/// Tells the server that the user confirmed the pairing code.
	pub async fn pairing_completed(&self) -> Result<HttpResponse> {
		let pairing = self.pairing_config().ok_or(Error::PairingNotConfigured)?;
		let request = pairing.completed.render(&TemplateVars::for_pointer(&self.pointer))?;
		Ok(self.transport.fetch(request).await?)
	}
}

fn extract_code(body: &str, field: &str) -> Option<String> {
	let value: Value = serde_json::from_str(body).ok()?;
	match value.get(field)? {
		Value::String(code) => Some(code.clone()),
		Value::Number(code) => Some(code.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::PairingCondition;
	use irma_runtime::{FakeTransport, FakeTransportController, Method};

	const SESSION: &str = "https://irma.example.com/irma/session/abc";
	const OPTIONS: &str = "https://irma.example.com/irma/session/abc/frontend/options";
	const COMPLETED: &str = "https://irma.example.com/irma/session/abc/frontend/pairingcompleted";

	fn controller_for(pointer: SessionPointer, config: ObservationConfig) -> (PairingController, FakeTransportController) {
		let (transport, fake) = FakeTransport::new();
		(PairingController::new(Arc::new(pointer), Arc::new(config), Arc::new(transport)), fake)
	}

	fn hinted() -> SessionPointer {
		SessionPointer::new(SESSION).with_frontend_auth("front").with_pairing_hint(true)
	}

	#[tokio::test]
	async fn enabling_twice_sends_one_request() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.respond(Method::Post, OPTIONS, 200, r#"{"pairingCode":"1234"}"#);

		assert_eq!(pairing.update_pairing_state(true).await.unwrap().as_deref(), Some("1234"));
		assert_eq!(pairing.update_pairing_state(true).await.unwrap().as_deref(), Some("1234"));
		assert_eq!(fake.request_count(Method::Post, OPTIONS), 1);
		assert!(pairing.is_enabled());

		let sent = &fake.requests()[0];
		assert_eq!(sent.header("Authorization"), Some("front"));
		let body: Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
		assert_eq!(body["pairingMethod"], "pin");
	}

	#[tokio::test]
	async fn disabling_when_never_enabled_sends_nothing() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());

		assert_eq!(pairing.update_pairing_state(false).await.unwrap(), None);
		assert!(fake.requests().is_empty());
	}

	#[tokio::test]
	async fn switching_off_after_enable_disables_on_server() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.respond(Method::Post, OPTIONS, 200, r#"{"pairingCode":"1234"}"#);
		fake.respond(Method::Post, OPTIONS, 200, r#"{}"#);

		pairing.update_pairing_state(true).await.unwrap();
		assert_eq!(pairing.update_pairing_state(false).await.unwrap(), None);

		let requests = fake.requests();
		assert_eq!(requests.len(), 2);
		let body: Value = serde_json::from_str(requests[1].body.as_deref().unwrap()).unwrap();
		assert_eq!(body["pairingMethod"], "none");
		assert!(!pairing.is_enabled());
	}

	#[tokio::test]
	async fn condition_blocks_enabling_without_hint() {
		let (pairing, fake) = controller_for(SessionPointer::new(SESSION), ObservationConfig::default());

		assert_eq!(pairing.update_pairing_state(true).await.unwrap(), None);
		assert!(fake.requests().is_empty());
	}

	#[tokio::test]
	async fn condition_always_ignores_hint() {
		let mut config = ObservationConfig::default();
		if let Some(pairing) = config.pairing.as_mut() {
			pairing.only_enable_if = PairingCondition::Always;
		}
		let (pairing, fake) = controller_for(SessionPointer::new(SESSION).with_frontend_auth("front"), config);
		fake.respond(Method::Post, OPTIONS, 200, r#"{"pairingCode":5678}"#);

		assert_eq!(pairing.update_pairing_state(true).await.unwrap().as_deref(), Some("5678"));
	}

	#[tokio::test]
	async fn unconfigured_pairing_is_inert() {
		let (pairing, fake) = controller_for(
			hinted(),
			ObservationConfig {
				pairing: None,
				..ObservationConfig::default()
			},
		);

		assert_eq!(pairing.update_pairing_state(true).await.unwrap(), None);
		assert!(matches!(pairing.pairing_completed().await, Err(Error::PairingNotConfigured)));
		assert!(fake.requests().is_empty());
	}

	#[tokio::test]
	async fn failed_enable_is_retried_by_next_call() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.respond(Method::Post, OPTIONS, 403, "");
		fake.respond(Method::Post, OPTIONS, 200, r#"{"pairingCode":"1234"}"#);

		assert!(matches!(
			pairing.update_pairing_state(true).await,
			Err(Error::UnexpectedStatus { status: 403, .. })
		));
		assert!(!pairing.is_enabled());

		assert_eq!(pairing.update_pairing_state(true).await.unwrap().as_deref(), Some("1234"));
		assert_eq!(pairing.update_pairing_state(true).await.unwrap().as_deref(), Some("1234"));
		assert_eq!(fake.request_count(Method::Post, OPTIONS), 2);
		assert!(pairing.is_enabled());
	}

	#[tokio::test]
	async fn unreachable_server_reverts_enable() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.fail(Method::Post, OPTIONS, "connection refused");

		assert!(matches!(pairing.update_pairing_state(true).await, Err(Error::Transport(_))));
		assert!(!pairing.is_enabled());
	}

	#[tokio::test]
	async fn second_enable_while_first_in_flight_is_skipped() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.respond(Method::Post, OPTIONS, 200, r#"{"pairingCode":"1234"}"#);

		let Some(PairingUpdate::Request { enable, request }) = pairing.prepare(true).unwrap() else {
			panic!("first enable must produce a request");
		};
		assert!(matches!(pairing.prepare(true).unwrap(), Some(PairingUpdate::Unchanged(None))));

		assert_eq!(pairing.send(enable, request).await.unwrap().as_deref(), Some("1234"));
		assert_eq!(fake.request_count(Method::Post, OPTIONS), 1);
	}

	#[tokio::test]
	async fn pairing_completed_posts_with_frontend_auth() {
		let (pairing, fake) = controller_for(hinted(), ObservationConfig::default());
		fake.respond(Method::Post, COMPLETED, 204, "");

		let response = pairing.pairing_completed().await.unwrap();
		assert_eq!(response.status, 204);
		assert_eq!(fake.requests()[0].header("Authorization"), Some("front"));
	}

	#[test]
	fn code_extraction_accepts_strings_and_numbers() {
		assert_eq!(extract_code(r#"{"pairingCode":"0042"}"#, "pairingCode").as_deref(), Some("0042"));
		assert_eq!(extract_code(r#"{"code":17}"#, "code").as_deref(), Some("17"));
		assert_eq!(extract_code(r#"{"pairingCode":null}"#, "pairingCode"), None);
		assert_eq!(extract_code("not json", "pairingCode"), None);
	}
}
