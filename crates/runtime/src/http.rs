//! `reqwest`-backed transport.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::sse::SseDecoder;
use crate::transport::{BoxFuture, EventStream, HttpRequest, HttpResponse, Method, StreamEvent, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport that talks to a real session server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	/// Builds a transport with its own connection pool.
	pub fn new() -> Result<Self> {
		let client = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
		Ok(Self { client })
	}

	fn build(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
		let method = match request.method {
			Method::Get => reqwest::Method::GET,
			Method::Post => reqwest::Method::POST,
			Method::Put => reqwest::Method::PUT,
			Method::Delete => reqwest::Method::DELETE,
		};

		let mut builder = self.client.request(method, &request.url);
		for (name, value) in &request.headers {
			let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
				name: name.clone(),
				reason: e.to_string(),
			})?;
			let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
				name: name.clone(),
				reason: e.to_string(),
			})?;
			builder = builder.header(header_name, header_value);
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}
		Ok(builder)
	}
}

impl Transport for HttpTransport {
	fn fetch(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
		Box::pin(async move {
			debug!(target = "irma.transport", method = %request.method, url = %request.url, "fetch");
			let response = self.build(request)?.send().await?;
			let status = response.status().as_u16();
			let body = response.text().await?;
			Ok(HttpResponse { status, body })
		})
	}

	fn open_event_stream(&self, url: &str) -> EventStream {
		let (tx, rx) = mpsc::unbounded_channel();
		let client = self.client.clone();
		let url = url.to_string();
		let task = tokio::spawn(async move {
			let reason = run_event_stream(&client, &url, &tx).await;
			debug!(target = "irma.transport", %url, %reason, "event stream ended");
			let _ = tx.send(StreamEvent::Error(reason));
		});
		EventStream::new(rx, task)
	}
}

/// Pumps one event stream into `tx`; returns why it stopped.
async fn run_event_stream(client: &reqwest::Client, url: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> String {
	let response = match client
		.get(url)
		.header(ACCEPT, "text/event-stream")
		.header(CACHE_CONTROL, "no-cache")
		.send()
		.await
	{
		Ok(response) => response,
		Err(e) => return format!("connect failed: {e}"),
	};

	if !response.status().is_success() {
		return format!("unexpected status {}", response.status());
	}
	if tx.send(StreamEvent::Open).is_err() {
		return "receiver dropped".to_string();
	}

	let mut decoder = SseDecoder::new();
	let mut body = response.bytes_stream();
	while let Some(chunk) = body.next().await {
		let chunk = match chunk {
			Ok(chunk) => chunk,
			Err(e) => {
				warn!(target = "irma.transport", %url, error = %e, "event stream read failed");
				return format!("read failed: {e}");
			}
		};
		for event in decoder.feed(&chunk) {
			if !event.is_message() {
				continue;
			}
			if tx.send(StreamEvent::Message(event.data)).is_err() {
				return "receiver dropped".to_string();
			}
		}
	}

	"closed by server".to_string()
}
