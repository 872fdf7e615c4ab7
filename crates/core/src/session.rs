//! Starting sessions and fetching their results.

use std::sync::Arc;

use irma_protocol::{SessionPointer, StartResponse};
use irma_runtime::{BoxFuture, HttpRequest, HttpResponse, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{RequestTemplate, SessionConfig};
use crate::error::{Error, Result};
use crate::template::TemplateVars;

/// Source of sessions for a [`SessionClient`](crate::SessionClient).
pub trait SessionStarter: Send + Sync {
	/// Starts a new session and returns the pointer to it.
	fn start(&self) -> BoxFuture<'_, Result<SessionPointer>>;

	/// Fetches the result of the most recently started session, if the
	/// starter knows where to find one.
	fn result(&self) -> BoxFuture<'_, Result<Option<Value>>>;

	/// Whether [`start`](Self::start) can be called again after a failure.
	fn can_restart(&self) -> bool;
}

/// [`SessionStarter`] talking to a requestor backend over HTTP.
pub struct HttpSessionStarter {
	config: SessionConfig,
	transport: Arc<dyn Transport>,
	last: Mutex<Option<SessionPointer>>,
}

impl HttpSessionStarter {
	pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
		Self {
			config,
			transport,
			last: Mutex::new(None),
		}
	}

	/// Pointer of the session started last.
	pub fn last_pointer(&self) -> Option<SessionPointer> {
		self.last.lock().clone()
	}

	async fn send(&self, template: &RequestTemplate, pointer: Option<&SessionPointer>) -> Result<HttpResponse> {
		let vars = TemplateVars {
			base: Some(&self.config.url),
			pointer,
		};
		let request: HttpRequest = template.render(&vars)?;
		let url = request.url.clone();
		let response = self.transport.fetch(request).await?;
		if !response.is_success() {
			return Err(Error::UnexpectedStatus { url, status: response.status });
		}
		Ok(response)
	}

	async fn start_session(&self) -> Result<SessionPointer> {
		let pointer = match &self.config.start {
			Some(start) => {
				let response = self.send(start, None).await?;
				let started: StartResponse = serde_json::from_str(&response.body)?;
				started.into_pointer()
			}
			None => self.config.pointer.clone().ok_or(Error::NoSessionPointer)?,
		};
		info!(target = "irma.session", url = %pointer.url, "session started");
		*self.last.lock() = Some(pointer.clone());
		Ok(pointer)
	}

	async fn fetch_result(&self) -> Result<Option<Value>> {
		let Some(result) = &self.config.result else {
			return Ok(None);
		};
		let pointer = self.last_pointer();
		let response = self.send(result, pointer.as_ref()).await?;
		debug!(target = "irma.session", "fetched session result");
		Ok(Some(result.response.parse(&response.body)?))
	}
}

impl SessionStarter for HttpSessionStarter {
	fn start(&self) -> BoxFuture<'_, Result<SessionPointer>> {
		Box::pin(self.start_session())
	}

	fn result(&self) -> BoxFuture<'_, Result<Option<Value>>> {
		Box::pin(self.fetch_result())
	}

	fn can_restart(&self) -> bool {
		self.config.start.is_some()
	}
}
