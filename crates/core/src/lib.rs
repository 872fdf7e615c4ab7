// irma-rs: session-state synchronization engine for IRMA sessions
//
// A session is started on a remote session server, its status is observed
// (server-sent events with a polling fallback) until it reaches a terminal
// state, and every observed change is relayed as a transition into an
// externally owned state machine.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod fsm;
pub mod pairing;
pub mod session;
pub mod template;
pub mod testing;

pub use channel::{ChannelUpdate, Phase, StatusChannel, StatusSubscriber};
pub use client::{SessionClient, TransitionSink};
pub use config::{
	CancelConfig, ClientOptions, ObservationConfig, PairingCondition, PairingConfig, PollingConfig, PushConfig, RequestTemplate, ResponseFormat,
	SessionConfig,
};
pub use error::{Error, Result};
pub use fsm::{FsmController, FsmEvent, State, Transition};
pub use irma_protocol::{RemoteStatus, SessionPointer, StartResponse};
pub use irma_runtime::{HttpTransport, Method, Transport};
pub use pairing::{PairingController, PairingUpdate};
pub use session::{HttpSessionStarter, SessionStarter};
pub use template::{Template, TemplateVars};
