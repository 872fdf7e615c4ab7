use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "irma")]
#[command(about = "Observe and cancel IRMA sessions from the command line")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(flatten)]
	pub observe: ObserveArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// How the session server is reached.
#[derive(Args, Debug, Clone, Default)]
pub struct ObserveArgs {
	/// Observation config (JSON, same shape as the client's `state` options)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Never use server-sent events; poll right away
	#[arg(long, global = true)]
	pub no_push: bool,

	/// Polling interval in milliseconds
	#[arg(long, global = true, value_name = "MS")]
	pub interval: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Print status changes of a session until it ends
	Watch {
		/// Session URL (`sessionPtr.u`)
		session_url: String,
		/// Give up after this many seconds
		#[arg(long, value_name = "SECS")]
		timeout: Option<u64>,
		/// Cancel the session when giving up or interrupted
		#[arg(long)]
		cancel_on_exit: bool,
	},

	/// Ask the server to cancel a session
	Cancel {
		/// Session URL (`sessionPtr.u`)
		session_url: String,
	},
}
