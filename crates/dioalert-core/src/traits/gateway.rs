// # Messaging Gateway Trait
//
// Defines the interface to the external messaging service that delivers
// alert text to people and carries operator commands back in.
//
// ## Implementations
//
// - HTTP messaging bridge: `dioalert-gateway-http` crate
// - Future: direct protocol clients, SMS gateways, etc.
//
// ## Usage
//
// ```rust,ignore
// use dioalert_core::MessagingGateway;
// use dioalert_core::traits::GatewayEvent;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let gateway = /* MessagingGateway implementation */;
//
//     let mut events = gateway.events();
//     gateway.connect().await?;
//
//     while let Some(event) = events.next().await {
//         if let GatewayEvent::Message(msg) = event {
//             gateway.send(&msg.sender, "received").await?;
//         }
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A text message received through the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Full gateway address of the sender
    pub sender: String,
    /// Message body
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Why a gateway connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The session was logged out; reconnecting requires re-authorization
    LoggedOut,
    /// Any other loss (network, server restart, timeout)
    Lost(String),
}

/// Connection lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// The connection is open and can send/receive
    Open,
    /// The connection closed
    Closed(DisconnectReason),
}

/// Everything a gateway reports asynchronously
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Connection(ConnectionUpdate),
    Message(InboundMessage),
}

/// Trait for messaging gateway implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks:
/// `send()` is called concurrently by alert broadcasts and command replies.
///
/// # Responsibilities
///
/// - `connect()` opens (or reopens) a session; the outcome is also reported
///   as a [`ConnectionUpdate`] on the event stream
/// - `send()` delivers one message to one address, single-shot
/// - The event stream survives reconnects
///
/// Gateways do not retry sends and do not schedule reconnects: the
/// dispatcher isolates send failures and the gateway supervisor owns the
/// reconnect policy.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Open a session with the messaging service
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Connection attempt started or completed
    /// - `Err(Error::Authentication)`: The session is logged out
    /// - `Err(Error)`: Any other failure (caller may retry)
    async fn connect(&self) -> Result<(), crate::Error>;

    /// Send `text` to `address`
    async fn send(&self, address: &str, text: &str) -> Result<(), crate::Error>;

    /// Stream of connection updates and inbound messages
    ///
    /// Called once by the engine. The stream must not end when the
    /// connection drops; it ends only when the gateway is dropped or closed.
    fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>>;

    /// Close the session
    async fn close(&self) -> Result<(), crate::Error>;

    /// Get the gateway name (for logging/debugging)
    fn gateway_name(&self) -> &'static str;
}

/// Helper trait for constructing gateways from configuration
pub trait MessagingGatewayFactory: Send + Sync {
    /// Create a MessagingGateway instance from configuration
    fn create(
        &self,
        config: &crate::config::GatewayProviderConfig,
    ) -> Result<Box<dyn MessagingGateway>, crate::Error>;
}
