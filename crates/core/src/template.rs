//! `{{placeholder}}` templates for request descriptors.
//!
//! Request URLs, header values and bodies are configured as plain strings
//! with placeholders that are filled in from the session pointer:
//!
//! | placeholder        | value                                  |
//! |--------------------|----------------------------------------|
//! | `{{base}}`         | base URL of the requestor backend      |
//! | `{{url}}`          | session URL (`sessionPtr.u`)           |
//! | `{{token}}`        | requestor token                        |
//! | `{{frontendAuth}}` | frontend authorization token           |
//! | `{{sessionType}}`  | session type (`irmaqr`)                |
//!
//! Placeholders are recognised anywhere in the string, including inside JSON
//! string values; single braces pass through untouched.

use std::fmt;

use irma_protocol::SessionPointer;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PLACEHOLDERS: [&str; 5] = ["base", "url", "token", "frontendAuth", "sessionType"];

/// Values available while rendering a [`Template`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
	pub base: Option<&'a str>,
	pub pointer: Option<&'a SessionPointer>,
}

impl<'a> TemplateVars<'a> {
	pub fn for_pointer(pointer: &'a SessionPointer) -> Self {
		Self { base: None, pointer: Some(pointer) }
	}

	pub fn with_base(mut self, base: &'a str) -> Self {
		self.base = Some(base);
		self
	}

	fn lookup(&self, name: &str) -> Option<&'a str> {
		match name {
			"base" => self.base,
			"url" => self.pointer.map(|p| p.url.as_str()),
			"token" => self.pointer.and_then(|p| p.token.as_deref()),
			"frontendAuth" => self.pointer.and_then(|p| p.frontend_auth.as_deref()),
			"sessionType" => self.pointer.and_then(|p| p.session_type.as_deref()),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
	pub fn new(source: impl Into<String>) -> Self {
		Self(source.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Splits the template into literal text and placeholder names.
	fn segments(&self) -> Result<Vec<Segment<'_>>> {
		let mut segments = Vec::new();
		let mut rest = self.0.as_str();
		while let Some(start) = rest.find("{{") {
			if start > 0 {
				segments.push(Segment::Text(&rest[..start]));
			}
			let after = &rest[start + 2..];
			let Some(end) = after.find("}}") else {
				return Err(Error::Config(format!("unterminated placeholder in template '{}'", self.0)));
			};
			segments.push(Segment::Placeholder(after[..end].trim()));
			rest = &after[end + 2..];
		}
		if !rest.is_empty() {
			segments.push(Segment::Text(rest));
		}
		Ok(segments)
	}

	/// Checks that the template parses and only uses known placeholders.
	pub fn validate(&self) -> Result<()> {
		for segment in self.segments()? {
			if let Segment::Placeholder(name) = segment {
				if !PLACEHOLDERS.contains(&name) {
					return Err(Error::UnknownPlaceholder {
						template: self.0.clone(),
						name: name.to_string(),
					});
				}
			}
		}
		Ok(())
	}

	pub fn render(&self, vars: &TemplateVars<'_>) -> Result<String> {
		let mut out = String::with_capacity(self.0.len());
		for segment in self.segments()? {
			match segment {
				Segment::Text(text) => out.push_str(text),
				Segment::Placeholder(name) => {
					if !PLACEHOLDERS.contains(&name) {
						return Err(Error::UnknownPlaceholder {
							template: self.0.clone(),
							name: name.to_string(),
						});
					}
					let value = vars.lookup(name).ok_or_else(|| Error::MissingValue {
						template: self.0.clone(),
						name: name.to_string(),
					})?;
					out.push_str(value);
				}
			}
		}
		Ok(out)
	}
}

impl From<&str> for Template {
	fn from(source: &str) -> Self {
		Self::new(source)
	}
}

impl fmt::Display for Template {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

enum Segment<'a> {
	Text(&'a str),
	Placeholder(&'a str),
}
