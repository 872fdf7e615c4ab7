use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("Invalid header '{name}': {reason}")]
	InvalidHeader { name: String, reason: String },

	#[error("Server unreachable: {0}")]
	Unreachable(String),

	#[error("Transport closed before a response arrived")]
	Closed,
}
