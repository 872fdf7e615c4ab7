use anyhow::{Context, Result};
use irma::StatusChannel;
use tracing::info;

pub async fn execute(channel: StatusChannel) -> Result<()> {
	let url = channel.pointer().url.clone();
	info!(target = "irma", %url, "cancelling session");

	channel.cancel().await.with_context(|| format!("cancelling {url}"))?;
	println!("cancelled {url}");
	Ok(())
}
