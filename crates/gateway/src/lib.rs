pub mod client;
pub mod error;
pub mod protocol;
pub mod session;

pub use client::{endpoint, GatewayClient, GatewayEvent};
pub use error::{GatewayError, GatewayResult};
pub use protocol::{now_ms, parse_inbound, Envelope, Inbound, Outbound, SyncCommand};
pub use session::{ConnectionState, GatewaySession, HEARTBEAT_DELAY, RECONNECT_DELAY};
