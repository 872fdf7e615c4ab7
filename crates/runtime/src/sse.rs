//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; lines may be split across chunks and may
//! end in `\n` or `\r\n`. An event is dispatched on the blank line that
//! terminates it.

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
	/// Value of the `event:` field, if any.
	pub event: Option<String>,
	/// `data:` lines joined with `\n`.
	pub data: String,
}

impl SseEvent {
	/// Whether an `EventSource` would deliver this to its `message` listener.
	pub fn is_message(&self) -> bool {
		matches!(self.event.as_deref(), None | Some("message"))
	}
}

#[derive(Debug, Default)]
pub struct SseDecoder {
	pending: Vec<u8>,
	event: Option<String>,
	data: Vec<String>,
}

impl SseDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds a chunk and returns every event it completed.
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
		self.pending.extend_from_slice(chunk);

		let mut events = Vec::new();
		while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
			let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
			line.pop();
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			let line = String::from_utf8_lossy(&line);
			if let Some(event) = self.process_line(&line) {
				events.push(event);
			}
		}
		events
	}

	fn process_line(&mut self, line: &str) -> Option<SseEvent> {
		if line.is_empty() {
			return self.dispatch();
		}
		if line.starts_with(':') {
			return None;
		}

		let (field, value) = match line.split_once(':') {
			Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
			None => (line, ""),
		};

		match field {
			"data" => self.data.push(value.to_string()),
			"event" => self.event = Some(value.to_string()),
			_ => {}
		}
		None
	}

	fn dispatch(&mut self) -> Option<SseEvent> {
		let event = self.event.take();
		if self.data.is_empty() {
			return None;
		}
		let data = std::mem::take(&mut self.data).join("\n");
		Some(SseEvent { event, data })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_single_event() {
		let mut decoder = SseDecoder::new();
		let events = decoder.feed(b"data: \"CONNECTED\"\n\n");
		assert_eq!(
			events,
			vec![SseEvent {
				event: None,
				data: "\"CONNECTED\"".into()
			}]
		);
	}

	#[test]
	fn joins_lines_split_across_chunks() {
		let mut decoder = SseDecoder::new();
		assert!(decoder.feed(b"da").is_empty());
		assert!(decoder.feed(b"ta: \"DO").is_empty());
		assert!(decoder.feed(b"NE\"\r\n").is_empty());
		let events = decoder.feed(b"\r\n");
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].data, "\"DONE\"");
	}

	#[test]
	fn multi_line_data_and_comments() {
		let mut decoder = SseDecoder::new();
		let events = decoder.feed(b": keepalive\n\ndata: first\ndata:second\n\nevent: ping\ndata: x\n\n");
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].data, "first\nsecond");
		assert!(events[0].is_message());
		assert_eq!(events[1].event.as_deref(), Some("ping"));
		assert!(!events[1].is_message());
	}

	#[test]
	fn blank_lines_without_data_dispatch_nothing() {
		let mut decoder = SseDecoder::new();
		assert!(decoder.feed(b"\n\nretry: 1000\n\n").is_empty());
	}
}
