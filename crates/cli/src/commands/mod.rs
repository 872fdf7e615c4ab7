mod cancel;
mod watch;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use irma::{HttpTransport, ObservationConfig, SessionPointer, StatusChannel};

use crate::cli::{Commands, ObserveArgs};

pub async fn dispatch(command: Commands, args: &ObserveArgs) -> Result<()> {
	match command {
		Commands::Watch {
			session_url,
			timeout,
			cancel_on_exit,
		} => {
			let channel = open_channel(&session_url, args)?;
			watch::execute(channel, timeout, cancel_on_exit).await
		}
		Commands::Cancel { session_url } => cancel::execute(open_channel(&session_url, args)?).await,
	}
}

/// Observation config from `--config` (or the defaults) with flag overrides.
pub fn observation_config(args: &ObserveArgs) -> Result<ObservationConfig> {
	let mut config = match &args.config {
		Some(path) => ObservationConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
		None => ObservationConfig::default(),
	};

	if args.no_push {
		config.server_sent_events = None;
	}
	if let Some(interval) = args.interval {
		match config.polling.as_mut() {
			Some(polling) => polling.interval_ms = interval,
			None => bail!("--interval given, but polling is disabled in the config"),
		}
	}
	config.validate()?;
	Ok(config)
}

fn open_channel(session_url: &str, args: &ObserveArgs) -> Result<StatusChannel> {
	let parsed = url::Url::parse(session_url).with_context(|| format!("invalid session URL '{session_url}'"))?;
	if parsed.cannot_be_a_base() {
		bail!("invalid session URL '{session_url}'");
	}
	let pointer = SessionPointer::new(session_url.trim_end_matches('/'));
	let config = observation_config(args)?;
	let transport = HttpTransport::new()?;
	Ok(StatusChannel::new(Arc::new(pointer), Arc::new(config), Arc::new(transport)))
}
