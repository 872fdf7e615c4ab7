//! Session start envelope and the session pointer derived from it.

use serde::{Deserialize, Serialize};

/// QR payload identifying a session to the IRMA app.
///
/// ```json
/// { "u": "https://irma.example.com/irma/session/abc", "irmaqr": "disclosing" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPointer {
	/// Session URL on the session server.
	pub u: String,
	/// Session type (`disclosing`, `signing`, `issuing`, ...).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub irmaqr: Option<String>,
}

/// Frontend options negotiated when a session is started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendRequest {
	/// Token authorizing frontend-only endpoints (pairing options, completion).
	#[serde(default)]
	pub authorization: Option<String>,
	/// Server suggestion to enable device pairing for this session.
	#[serde(default)]
	pub pairing_hint: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_protocol_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_protocol_version: Option<String>,
}

/// Response body of a successful session start request.
///
/// ```json
/// {
///   "sessionPtr": { "u": "https://.../irma/session/abc", "irmaqr": "disclosing" },
///   "token": "KzxuWKwL5KGLKr4uerws",
///   "frontendRequest": { "authorization": "qGrMmL8UZwZ88Sq8gobV", "pairingHint": true }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
	pub session_ptr: QrPointer,
	#[serde(default)]
	pub token: Option<String>,
	#[serde(default)]
	pub frontend_request: Option<FrontendRequest>,
}

impl StartResponse {
	/// Flattens the envelope into the handle used for the rest of the session.
	pub fn into_pointer(self) -> SessionPointer {
		let frontend = self.frontend_request.unwrap_or_default();
		SessionPointer {
			url: self.session_ptr.u,
			session_type: self.session_ptr.irmaqr,
			token: self.token,
			frontend_auth: frontend.authorization,
			pairing_hint: frontend.pairing_hint,
		}
	}
}

/// Server-issued handle identifying one remote session.
///
/// Immutable once received. Serialized as the payload of the `loaded`
/// transition and read back when observation begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPointer {
	/// Session URL; status, cancel and frontend endpoints hang off it.
	#[serde(alias = "u")]
	pub url: String,
	#[serde(default, alias = "irmaqr", skip_serializing_if = "Option::is_none")]
	pub session_type: Option<String>,
	/// Requestor token, used to fetch the session result.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// Frontend authorization token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frontend_auth: Option<String>,
	#[serde(default)]
	pub pairing_hint: bool,
}

impl SessionPointer {
	/// Creates a pointer that only knows its session URL.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			session_type: None,
			token: None,
			frontend_auth: None,
			pairing_hint: false,
		}
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	pub fn with_frontend_auth(mut self, authorization: impl Into<String>) -> Self {
		self.frontend_auth = Some(authorization.into());
		self
	}

	pub fn with_pairing_hint(mut self, hint: bool) -> Self {
		self.pairing_hint = hint;
		self
	}
}
