use std::path::PathBuf;

use irma_runtime::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Failed to read config file {path}: {source}")]
	ConfigFile {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Template '{template}' references unknown placeholder '{name}'")]
	UnknownPlaceholder { template: String, name: String },

	#[error("Template '{template}' needs '{name}', which is not known for this session")]
	MissingValue { template: String, name: String },

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Endpoint {url} returned status other than 200 OK: {status}")]
	UnexpectedStatus { url: String, status: u16 },

	#[error("Status channel was already started")]
	AlreadyObserving,

	#[error("Neither server-sent events nor polling is configured")]
	NoStatusTransport,

	#[error("Event stream unavailable and polling is not configured: {0}")]
	PushUnavailable(String),

	#[error("Pairing was not enabled")]
	PairingNotConfigured,

	#[error("Unknown state received from server: {0}")]
	UnknownStatus(String),

	#[error("Invalid session pointer: {0}")]
	InvalidPointer(String),

	#[error("No session pointer: session start is not configured and no pointer was given")]
	NoSessionPointer,
}
