use anyhow::Result;
use cadence_gateway::{GatewayClient, Outbound};

pub mod bridge;
pub mod session;

pub use bridge::SyncBridge;
pub use session::Session;

pub trait MessageSink {
    fn send_message(&self, message: Outbound) -> Result<()>;
}

impl MessageSink for GatewayClient {
    fn send_message(&self, message: Outbound) -> Result<()> {
        self.send(message)?;
        Ok(())
    }
}
