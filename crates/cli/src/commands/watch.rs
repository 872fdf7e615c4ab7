use std::time::Duration;

use anyhow::{Context, Result, bail};
use irma::{ChannelUpdate, Error, RemoteStatus, StatusChannel};
use tokio::sync::mpsc;
use tracing::info;

enum Outcome {
	Ended(RemoteStatus),
	Failed(Error),
	GaveUp(&'static str),
}

pub async fn execute(channel: StatusChannel, timeout: Option<u64>, cancel_on_exit: bool) -> Result<()> {
	info!(target = "irma", url = %channel.pointer().url, "watching session");

	let (tx, mut rx) = mpsc::unbounded_channel();
	channel.observe(tx)?;

	let deadline = async {
		match timeout {
			Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
			None => std::future::pending::<()>().await,
		}
	};
	tokio::pin!(deadline);

	let outcome = loop {
		tokio::select! {
			update = rx.recv() => match update {
				Some(ChannelUpdate::Status(status)) => {
					println!("{status}");
					if status.is_terminal() || matches!(status, RemoteStatus::Unknown(_)) {
						break Outcome::Ended(status);
					}
				}
				Some(ChannelUpdate::Error(e)) => break Outcome::Failed(e),
				None => break Outcome::GaveUp("status channel stopped"),
			},
			_ = &mut deadline => break Outcome::GaveUp("timed out"),
			_ = tokio::signal::ctrl_c() => break Outcome::GaveUp("interrupted"),
		}
	};

	let was_running = channel.close();
	match outcome {
		Outcome::Ended(RemoteStatus::Done) => Ok(()),
		Outcome::Ended(status) => bail!("session ended with status {status}"),
		Outcome::Failed(e) => Err(e).context("observing session status"),
		Outcome::GaveUp(reason) => {
			if cancel_on_exit && was_running {
				channel.cancel().await.context("cancelling session")?;
				println!("cancelled {}", channel.pointer().url);
			}
			bail!("{reason}")
		}
	}
}
