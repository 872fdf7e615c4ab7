//! Remote session status tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a session as reported by the session server.
///
/// The server sends bare tokens (`DONE`) from the polling endpoint and
/// JSON-encoded tokens (`"DONE"`) over the event stream; [`RemoteStatus::parse`]
/// accepts both. Tokens this crate does not know are kept verbatim in
/// [`RemoteStatus::Unknown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
	#[default]
	Initialized,
	Connected,
	Pairing,
	Done,
	Cancelled,
	Timeout,
	Unknown(String),
}

impl RemoteStatus {
	/// Parses a status body, JSON-encoded or bare.
	pub fn parse(raw: &str) -> Self {
		let trimmed = raw.trim();
		if trimmed.starts_with('"') {
			if let Ok(token) = serde_json::from_str::<String>(trimmed) {
				return Self::from_token(&token);
			}
		}
		Self::from_token(trimmed)
	}

	/// Maps a single token onto a status.
	pub fn from_token(token: &str) -> Self {
		match token {
			"INITIALIZED" => Self::Initialized,
			"CONNECTED" => Self::Connected,
			"PAIRING" => Self::Pairing,
			"DONE" => Self::Done,
			"CANCELLED" => Self::Cancelled,
			"TIMEOUT" => Self::Timeout,
			other => Self::Unknown(other.to_string()),
		}
	}

	/// Returns the wire token.
	pub fn as_str(&self) -> &str {
		match self {
			Self::Initialized => "INITIALIZED",
			Self::Connected => "CONNECTED",
			Self::Pairing => "PAIRING",
			Self::Done => "DONE",
			Self::Cancelled => "CANCELLED",
			Self::Timeout => "TIMEOUT",
			Self::Unknown(token) => token,
		}
	}

	/// Whether the server will report no further changes for this session.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Done | Self::Cancelled | Self::Timeout)
	}
}

impl From<String> for RemoteStatus {
	fn from(token: String) -> Self {
		Self::from_token(&token)
	}
}

impl From<RemoteStatus> for String {
	fn from(status: RemoteStatus) -> Self {
		match status {
			RemoteStatus::Unknown(token) => token,
			known => known.as_str().to_string(),
		}
	}
}

impl fmt::Display for RemoteStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_and_json_tokens() {
		assert_eq!(RemoteStatus::parse("DONE"), RemoteStatus::Done);
		assert_eq!(RemoteStatus::parse("\"CONNECTED\""), RemoteStatus::Connected);
		assert_eq!(RemoteStatus::parse("  \"PAIRING\"\n"), RemoteStatus::Pairing);
		assert_eq!(RemoteStatus::parse("TIMEOUT\n"), RemoteStatus::Timeout);
	}

	#[test]
	fn unknown_tokens_are_preserved() {
		let status = RemoteStatus::parse("\"EXPLODED\"");
		assert_eq!(status, RemoteStatus::Unknown("EXPLODED".into()));
		assert_eq!(status.to_string(), "EXPLODED");
		assert!(!status.is_terminal());
	}

	#[test]
	fn malformed_json_falls_back_to_raw_token() {
		assert_eq!(RemoteStatus::parse("\"DONE"), RemoteStatus::Unknown("\"DONE".into()));
	}

	#[test]
	fn serde_uses_wire_tokens() {
		assert_eq!(serde_json::to_string(&RemoteStatus::Cancelled).unwrap(), "\"CANCELLED\"");
		let status: RemoteStatus = serde_json::from_str("\"INITIALIZED\"").unwrap();
		assert_eq!(status, RemoteStatus::Initialized);
	}

	#[test]
	fn terminal_statuses() {
		assert!(RemoteStatus::Done.is_terminal());
		assert!(RemoteStatus::Cancelled.is_terminal());
		assert!(RemoteStatus::Timeout.is_terminal());
		assert!(!RemoteStatus::Connected.is_terminal());
		assert!(!RemoteStatus::Pairing.is_terminal());
	}
}
