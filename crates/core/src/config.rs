//! Client configuration.
//!
//! Everything is declarative: each capability (start, result, push, pull,
//! cancel, pairing) is described by URL and request templates rendered
//! against the session pointer. A missing capability disables it.
//!
//! The JSON shape mirrors the options object of the browser client:
//!
//! ```json
//! {
//!   "session": { "url": "https://backend.example.com" },
//!   "state": {
//!     "serverSentEvents": { "url": "{{url}}/statusevents", "timeout": 2000 },
//!     "polling": { "url": "{{url}}/status", "interval": 500, "startState": "INITIALIZED" },
//!     "cancel": { "url": "{{url}}" },
//!     "pairing": null
//!   }
//! }
//! ```
//!
//! Omitted sections take their defaults; an explicit `null` disables them.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use irma_protocol::{RemoteStatus, SessionPointer};
use irma_runtime::{HttpRequest, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::{Template, TemplateVars};

const DEFAULT_PUSH_TIMEOUT_MS: u64 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// How a response body is turned into a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
	#[default]
	Json,
	Text,
}

impl ResponseFormat {
	pub fn parse(&self, body: &str) -> Result<Value> {
		match self {
			Self::Json => Ok(serde_json::from_str(body)?),
			Self::Text => Ok(Value::String(body.to_string())),
		}
	}
}

/// Declarative request descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTemplate {
	pub url: Template,
	#[serde(default)]
	pub method: Method,
	#[serde(default)]
	pub headers: BTreeMap<String, Template>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<Template>,
	#[serde(default)]
	pub response: ResponseFormat,
}

impl RequestTemplate {
	pub fn new(method: Method, url: &str) -> Self {
		Self {
			url: Template::new(url),
			method,
			headers: BTreeMap::new(),
			body: None,
			response: ResponseFormat::Json,
		}
	}

	pub fn get(url: &str) -> Self {
		Self::new(Method::Get, url)
	}

	pub fn post(url: &str) -> Self {
		Self::new(Method::Post, url)
	}

	pub fn with_header(mut self, name: &str, value: &str) -> Self {
		self.headers.insert(name.to_string(), Template::new(value));
		self
	}

	pub fn with_body(mut self, body: &str) -> Self {
		self.body = Some(Template::new(body));
		self
	}

	pub fn with_response(mut self, response: ResponseFormat) -> Self {
		self.response = response;
		self
	}

	pub fn render(&self, vars: &TemplateVars<'_>) -> Result<HttpRequest> {
		let mut request = HttpRequest::new(self.method, self.url.render(vars)?);
		for (name, value) in &self.headers {
			request = request.with_header(name.clone(), value.render(vars)?);
		}
		if let Some(body) = &self.body {
			request = request.with_body(body.render(vars)?);
		}
		Ok(request)
	}

	pub fn validate(&self) -> Result<()> {
		self.url.validate()?;
		for value in self.headers.values() {
			value.validate()?;
		}
		if let Some(body) = &self.body {
			body.validate()?;
		}
		Ok(())
	}
}

/// Server-sent events (push) capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConfig {
	pub url: Template,
	/// Milliseconds to wait for the stream to open before polling instead.
	#[serde(rename = "timeout", default = "default_push_timeout")]
	pub timeout_ms: u64,
}

impl PushConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

impl Default for PushConfig {
	fn default() -> Self {
		Self {
			url: Template::new("{{url}}/statusevents"),
			timeout_ms: DEFAULT_PUSH_TIMEOUT_MS,
		}
	}
}

/// Polling (pull) capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
	pub url: Template,
	#[serde(rename = "interval", default = "default_poll_interval")]
	pub interval_ms: u64,
	/// Status assumed before the first poll; only changes from it are reported.
	#[serde(default)]
	pub start_state: RemoteStatus,
}

impl PollingConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self {
			url: Template::new("{{url}}/status"),
			interval_ms: DEFAULT_POLL_INTERVAL_MS,
			start_state: RemoteStatus::Initialized,
		}
	}
}

/// Cancel capability; always sent as `DELETE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelConfig {
	pub url: Template,
}

impl Default for CancelConfig {
	fn default() -> Self {
		Self { url: Template::new("{{url}}") }
	}
}

/// When pairing may be enabled for a session shown on a second device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingCondition {
	Always,
	Never,
	/// Only when the server hinted at pairing in its frontend request.
	#[default]
	PairingHint,
}

impl PairingCondition {
	pub fn holds(&self, pointer: &SessionPointer) -> bool {
		match self {
			Self::Always => true,
			Self::Never => false,
			Self::PairingHint => pointer.pairing_hint,
		}
	}
}

/// Device pairing capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingConfig {
	#[serde(default)]
	pub only_enable_if: PairingCondition,
	pub enable: RequestTemplate,
	pub disable: RequestTemplate,
	pub completed: RequestTemplate,
	/// Field of the enable response holding the pairing code.
	#[serde(default = "default_code_field")]
	pub code_field: String,
}

impl Default for PairingConfig {
	fn default() -> Self {
		let options = |method: &str| {
			RequestTemplate::post("{{url}}/frontend/options")
				.with_header("Authorization", "{{frontendAuth}}")
				.with_header("Content-Type", "application/json")
				.with_body(&format!(
					r#"{{"@context":"https://irma.app/ld/request/frontendoptions/v1","pairingMethod":"{method}"}}"#
				))
		};
		Self {
			only_enable_if: PairingCondition::PairingHint,
			enable: options("pin"),
			disable: options("none"),
			completed: RequestTemplate::post("{{url}}/frontend/pairingcompleted")
				.with_header("Authorization", "{{frontendAuth}}"),
			code_field: default_code_field(),
		}
	}
}

/// How remote status is observed and which session-scoped requests exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationConfig {
	#[serde(default = "default_push")]
	pub server_sent_events: Option<PushConfig>,
	#[serde(default = "default_polling")]
	pub polling: Option<PollingConfig>,
	#[serde(default = "default_cancel")]
	pub cancel: Option<CancelConfig>,
	#[serde(default = "default_pairing")]
	pub pairing: Option<PairingConfig>,
}

impl Default for ObservationConfig {
	fn default() -> Self {
		Self {
			server_sent_events: default_push(),
			polling: default_polling(),
			cancel: default_cancel(),
			pairing: default_pairing(),
		}
	}
}

impl ObservationConfig {
	/// Reads and validates a JSON file holding just the `state` section.
	pub fn from_json_file(path: &Path) -> Result<Self> {
		let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_json::from_str(&source)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if let Some(push) = &self.server_sent_events {
			push.url.validate()?;
			if push.timeout_ms == 0 {
				return Err(Error::Config("serverSentEvents.timeout must be positive".into()));
			}
		}
		if let Some(polling) = &self.polling {
			polling.url.validate()?;
			if polling.interval_ms == 0 {
				return Err(Error::Config("polling.interval must be positive".into()));
			}
		}
		if let Some(cancel) = &self.cancel {
			cancel.url.validate()?;
		}
		if let Some(pairing) = &self.pairing {
			pairing.enable.validate()?;
			pairing.disable.validate()?;
			pairing.completed.validate()?;
		}
		Ok(())
	}
}

/// Where sessions come from and where their results are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	/// Base URL of the requestor backend (`{{base}}`).
	pub url: String,
	/// Start request. Without it, `pointer` is used and restarting is not possible.
	#[serde(default = "default_start")]
	pub start: Option<RequestTemplate>,
	/// Pointer to a session started elsewhere.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pointer: Option<SessionPointer>,
	#[serde(default = "default_result")]
	pub result: Option<RequestTemplate>,
}

impl SessionConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			start: default_start(),
			pointer: None,
			result: default_result(),
		}
	}

	/// Configuration for a session whose pointer is already known.
	pub fn with_pointer(url: impl Into<String>, pointer: SessionPointer) -> Self {
		Self {
			url: url.into(),
			start: None,
			pointer: Some(pointer),
			result: default_result(),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.start.is_some() || self.result.is_some() {
			let parsed = url::Url::parse(&self.url).map_err(|e| Error::Config(format!("session.url '{}': {e}", self.url)))?;
			if parsed.cannot_be_a_base() {
				return Err(Error::Config(format!("session.url '{}' is not a base URL", self.url)));
			}
		}
		match (&self.start, &self.pointer) {
			(Some(start), _) => start.validate()?,
			(None, None) => return Err(Error::NoSessionPointer),
			(None, Some(_)) => {}
		}
		if let Some(result) = &self.result {
			result.validate()?;
		}
		Ok(())
	}
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
	#[serde(default)]
	pub session: Option<SessionConfig>,
	#[serde(default)]
	pub state: ObservationConfig,
}

impl ClientOptions {
	pub fn from_json_str(source: &str) -> Result<Self> {
		let options: Self = serde_json::from_str(source)?;
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<()> {
		if let Some(session) = &self.session {
			session.validate()?;
		}
		self.state.validate()
	}
}

fn default_push_timeout() -> u64 {
	DEFAULT_PUSH_TIMEOUT_MS
}

fn default_poll_interval() -> u64 {
	DEFAULT_POLL_INTERVAL_MS
}

fn default_code_field() -> String {
	"pairingCode".to_string()
}

fn default_push() -> Option<PushConfig> {
	Some(PushConfig::default())
}

fn default_polling() -> Option<PollingConfig> {
	Some(PollingConfig::default())
}

fn default_cancel() -> Option<CancelConfig> {
	Some(CancelConfig::default())
}

fn default_pairing() -> Option<PairingConfig> {
	Some(PairingConfig::default())
}

fn default_start() -> Option<RequestTemplate> {
	Some(RequestTemplate::get("{{base}}/session"))
}

fn default_result() -> Option<RequestTemplate> {
	Some(RequestTemplate::get("{{base}}/session/{{token}}/result"))
}
