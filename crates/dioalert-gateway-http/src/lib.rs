// # HTTP Messaging Bridge Gateway
//
// This crate provides a MessagingGateway that talks to a REST messaging
// bridge (a sidecar that owns the actual chat session).
//
// ## Bridge API
//
// - `GET  {base}/session`               -> `{"status": "open" | "connecting" | "logged_out"}`
// - `POST {base}/messages`              <- `{"to": "...", "text": "..."}`
// - `GET  {base}/messages?after=<cursor>` -> `{"messages": [{"id", "from", "text"}], "cursor": "..."}`
//
// ## Connection Lifecycle
//
// `connect()` checks the session. When it is open, the current message
// backlog is skipped, `Open` is emitted and a poll task starts. A failed
// poll emits `Closed(Lost)` (or `Closed(LoggedOut)` on 401/403) and stops
// polling until the supervisor calls `connect()` again. A batch that carries
// messages but no cursor fails `connect()`, or ends polling with
// `Closed(Lost)` once its messages are delivered.
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - HTTP 401/403 is reported as an authentication error (logged out)

use async_trait::async_trait;
use dioalert_core::config::GatewayProviderConfig;
use dioalert_core::registry::GatewayRegistry;
use dioalert_core::traits::{
    ConnectionUpdate, DisconnectReason, GatewayEvent, InboundMessage, MessagingGateway,
    MessagingGatewayFactory,
};
use dioalert_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Gateway type name used in configuration and errors
pub const GATEWAY_NAME: &str = "http";

/// Request timeout for bridge calls (long-running sends included)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connect timeout for the bridge
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct SessionStatus {
    status: String,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BridgeMessage {
    #[serde(default)]
    id: String,
    from: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessageBatch {
    #[serde(default)]
    messages: Vec<BridgeMessage>,
    #[serde(default)]
    cursor: Option<String>,
}

impl MessageBatch {
    /// Cursor to poll from after this batch
    ///
    /// A batch that carries messages must move the cursor; polling again
    /// from the old position would deliver the same messages twice.
    fn next_cursor(&self, current: Option<String>) -> Result<Option<String>> {
        match (&self.cursor, self.messages.is_empty()) {
            (Some(cursor), _) => Ok(Some(cursor.clone())),
            (None, true) => Ok(current),
            (None, false) => Err(Error::provider(
                GATEWAY_NAME,
                format!("Bridge returned {} messages without a cursor", self.messages.len()),
            )),
        }
    }
}

/// Thin REST client for the bridge
#[derive(Clone)]
struct BridgeClient {
    base_url: Arc<str>,
    /// ⚠️ NEVER log this value
    api_token: Arc<str>,
    client: reqwest::Client,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url)
            .field("api_token", &"<REDACTED>")
            .finish()
    }
}

impl BridgeClient {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if self.api_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&*self.api_token)
        }
    }

    async fn session(&self) -> Result<String> {
        let response = self
            .request(reqwest::Method::GET, "/session")
            .send()
            .await
            .map_err(|e| Error::http(format!("Session request failed: {}", e)))?;
        let response = check_status(response, "Session check").await?;

        let session: SessionStatus = response
            .json()
            .await
            .map_err(|e| Error::provider(GATEWAY_NAME, format!("Failed to parse session: {}", e)))?;
        Ok(session.status)
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/messages")
            .json(&OutboundMessage { to, text })
            .send()
            .await
            .map_err(|e| Error::http(format!("Send request failed: {}", e)))?;
        check_status(response, "Send").await?;
        Ok(())
    }

    async fn messages(&self, after: Option<&str>) -> Result<MessageBatch> {
        let mut request = self.request(reqwest::Method::GET, "/messages");
        if let Some(cursor) = after {
            request = request.query(&[("after", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("Poll request failed: {}", e)))?;
        let response = check_status(response, "Poll").await?;

        response
            .json()
            .await
            .map_err(|e| Error::provider(GATEWAY_NAME, format!("Failed to parse messages: {}", e)))
    }
}

/// Map a non-success bridge response to an error
async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    match status.as_u16() {
        401 | 403 => Err(Error::auth(format!(
            "Bridge session rejected the request. Status: {}",
            status
        ))),
        429 => Err(Error::provider(
            GATEWAY_NAME,
            format!("Rate limit exceeded. Status: {}", status),
        )),
        500..=599 => Err(Error::provider(
            GATEWAY_NAME,
            format!("Bridge server error (transient): {} - {}", status, error_text),
        )),
        _ => Err(Error::provider(
            GATEWAY_NAME,
            format!("{} failed: {} - {}", action, status, error_text),
        )),
    }
}

/// Messaging gateway backed by an HTTP bridge
pub struct HttpGateway {
    bridge: BridgeClient,
    poll_interval: Duration,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.bridge.base_url)
            .field("api_token", &"<REDACTED>")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl HttpGateway {
    /// Create a new HTTP bridge gateway
    ///
    /// # Parameters
    ///
    /// - `base_url`: Bridge base URL (trailing `/` is ignored)
    /// - `api_token`: Bearer token; empty disables the Authorization header
    /// - `poll_interval`: Delay between inbound message polls
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            bridge: BridgeClient {
                base_url: Arc::from(base_url.trim_end_matches('/')),
                api_token: Arc::from(api_token.into()),
                client,
            },
            poll_interval,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            poller: Mutex::new(None),
        })
    }

    fn stop_polling(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    fn start_polling(&self, cursor: Option<String>) {
        let bridge = self.bridge.clone();
        let events = self.events_tx.clone();
        let interval = self.poll_interval;

        let handle = tokio::spawn(poll_messages(bridge, events, interval, cursor));
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

/// Poll the bridge until a request fails
async fn poll_messages(
    bridge: BridgeClient,
    events: mpsc::UnboundedSender<GatewayEvent>,
    interval: Duration,
    mut cursor: Option<String>,
) {
    loop {
        tokio::time::sleep(interval).await;

        match bridge.messages(cursor.as_deref()).await {
            Ok(batch) => {
                let next = batch.next_cursor(cursor.take());
                for message in batch.messages {
                    debug!("Bridge message {} from {}", message.id, message.from);
                    let inbound = InboundMessage::new(message.from, message.text);
                    if events.send(GatewayEvent::Message(inbound)).is_err() {
                        return;
                    }
                }
                match next {
                    Ok(next) => cursor = next,
                    Err(e) => {
                        warn!("Bridge poll cannot advance: {}", e);
                        let reason = DisconnectReason::Lost(e.to_string());
                        let _ = events.send(GatewayEvent::Connection(ConnectionUpdate::Closed(reason)));
                        return;
                    }
                }
            }
            Err(e) => {
                let reason = if e.is_logged_out() {
                    DisconnectReason::LoggedOut
                } else {
                    DisconnectReason::Lost(e.to_string())
                };
                warn!("Bridge poll failed: {}", e);
                let _ = events.send(GatewayEvent::Connection(ConnectionUpdate::Closed(reason)));
                return;
            }
        }
    }
}

#[async_trait]
impl MessagingGateway for HttpGateway {
    async fn connect(&self) -> Result<()> {
        self.stop_polling();

        let status = self.bridge.session().await?;
        match status.as_str() {
            "open" => {}
            "logged_out" => return Err(Error::auth("Bridge session is logged out")),
            other => {
                return Err(Error::not_connected(format!("Bridge session is {}", other)));
            }
        }

        // Start after the current backlog so old commands are not replayed
        let backlog = self.bridge.messages(None).await?;
        let cursor = backlog.next_cursor(None)?;
        if !backlog.messages.is_empty() {
            info!("Skipping {} bridge messages received before connect", backlog.messages.len());
        }

        let _ = self
            .events_tx
            .send(GatewayEvent::Connection(ConnectionUpdate::Open));
        self.start_polling(cursor);
        info!("Connected to messaging bridge at {}", self.bridge.base_url);
        Ok(())
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        self.bridge.send(address, text).await
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>> {
        let receiver = self
            .events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match receiver {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => {
                warn!("HttpGateway::events() called more than once; returning an empty stream");
                Box::pin(tokio_stream::empty())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.stop_polling();
        debug!("Bridge polling stopped");
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        GATEWAY_NAME
    }
}

impl Drop for HttpGateway {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Factory for creating HTTP bridge gateways
pub struct HttpGatewayFactory;

impl MessagingGatewayFactory for HttpGatewayFactory {
    fn create(&self, config: &GatewayProviderConfig) -> Result<Box<dyn MessagingGateway>> {
        match config {
            GatewayProviderConfig::Http {
                base_url,
                api_token,
                poll_interval_ms,
            } => {
                if api_token.is_empty() {
                    warn!("HTTP gateway has no API token; requests are sent without authorization");
                }
                Ok(Box::new(HttpGateway::new(
                    base_url.clone(),
                    api_token.clone(),
                    Duration::from_millis(*poll_interval_ms),
                )?))
            }
            _ => Err(Error::config("Invalid config for HTTP gateway")),
        }
    }
}

/// Register the HTTP bridge gateway with a registry
///
/// # Example
///
/// ```rust
/// use dioalert_core::GatewayRegistry;
///
/// let registry = GatewayRegistry::new();
/// dioalert_gateway_http::register(&registry);
/// assert!(registry.has_gateway("http"));
/// ```
pub fn register(registry: &GatewayRegistry) {
    registry.register_gateway(GATEWAY_NAME, Box::new(HttpGatewayFactory));
}
