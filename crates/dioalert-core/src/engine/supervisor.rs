//! Messaging gateway connection supervisor
//!
//! ## State machine
//!
//! ```text
//!                connect() ok           Open
//! Disconnected ──────────────► Connecting ──────► Connected
//!      ▲   ▲                        │                 │
//!      │   └──── connect() failed ──┘                 │
//!      └────────────── Closed(Lost) ──────────────────┘
//!
//! any state ── Closed(LoggedOut) / auth failure ──► LoggedOut (terminal)
//! ```
//!
//! A reconnect is scheduled only on entering `Disconnected`, after the
//! configured delay. Attempts are unbounded. `LoggedOut` cancels any pending
//! reconnect and ignores everything except inbound messages.

use super::{EngineEvent, EventSink, stop_requested};
use crate::dispatch::Dispatcher;
use crate::traits::{ConnectionUpdate, DisconnectReason, GatewayEvent, InboundMessage, MessagingGateway};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Text sent to the operator once the gateway connection opens
pub const STARTUP_NOTICE: &str = "Alert service online. Monitoring device inputs.";

/// Gateway connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Session revoked; needs manual re-authorization
    LoggedOut,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggedOut => "logged_out",
        };
        f.write_str(name)
    }
}

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub reconnect_delay: Duration,
    pub startup_notice: bool,
    pub startup_notice_delay: Duration,
}

/// Drives the gateway connection and forwards inbound messages
pub(crate) struct GatewaySupervisor {
    gateway: Arc<dyn MessagingGateway>,
    dispatcher: Dispatcher,
    operator: String,
    settings: SupervisorSettings,
    state: Arc<watch::Sender<ConnectionState>>,
    commands: mpsc::Sender<InboundMessage>,
    events: EventSink,
    reconnect_at: Option<Instant>,
}

impl GatewaySupervisor {
    pub(crate) fn new(
        gateway: Arc<dyn MessagingGateway>,
        dispatcher: Dispatcher,
        operator: String,
        settings: SupervisorSettings,
        state: Arc<watch::Sender<ConnectionState>>,
        commands: mpsc::Sender<InboundMessage>,
        events: EventSink,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            operator,
            settings,
            state,
            commands,
            events,
            reconnect_at: None,
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.current();
        if previous == next {
            return;
        }

        info!("Gateway {}: {} -> {}", self.gateway.gateway_name(), previous, next);
        self.state.send_replace(next);
        self.events.emit(EngineEvent::GatewayStateChanged { state: next });

        match next {
            ConnectionState::Disconnected => {
                info!("Reconnecting in {:?}", self.settings.reconnect_delay);
                self.reconnect_at = Some(Instant::now() + self.settings.reconnect_delay);
            }
            ConnectionState::LoggedOut => {
                error!("Gateway session logged out; manual re-authorization required, not reconnecting");
                self.reconnect_at = None;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.reconnect_at = None;
            }
        }
    }

    async fn attempt_connect(&mut self) {
        if self.current() == ConnectionState::LoggedOut {
            return;
        }

        self.transition(ConnectionState::Connecting);
        match self.gateway.connect().await {
            Ok(()) => debug!("Gateway {} connect issued", self.gateway.gateway_name()),
            Err(e) if e.is_logged_out() => {
                warn!("Gateway connect rejected: {}", e);
                self.transition(ConnectionState::LoggedOut);
            }
            Err(e) => {
                warn!("Gateway connect failed: {}", e);
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Attempt a connect unless shutdown is requested first
    ///
    /// Returns `false` when shutdown won; the in-flight connect is dropped.
    async fn connect_or_stop(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = stop_requested(shutdown) => {
                debug!("Shutdown during gateway connect, abandoning attempt");
                false
            }
            _ = self.attempt_connect() => true,
        }
    }

    fn handle_connection_update(&mut self, update: ConnectionUpdate) {
        if self.current() == ConnectionState::LoggedOut {
            debug!("Ignoring {:?} after logout", update);
            return;
        }

        match update {
            ConnectionUpdate::Open => {
                self.transition(ConnectionState::Connected);
                if self.settings.startup_notice {
                    self.send_startup_notice();
                }
            }
            ConnectionUpdate::Closed(DisconnectReason::LoggedOut) => {
                self.transition(ConnectionState::LoggedOut);
            }
            ConnectionUpdate::Closed(DisconnectReason::Lost(reason)) => {
                warn!("Gateway connection lost: {}", reason);
                if self.current() != ConnectionState::Disconnected {
                    self.transition(ConnectionState::Disconnected);
                }
            }
        }
    }

    fn send_startup_notice(&self) {
        let dispatcher = self.dispatcher.clone();
        let operator = self.operator.clone();
        let delay = self.settings.startup_notice_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if dispatcher.send_to(&operator, STARTUP_NOTICE).await.is_ok() {
                info!("Startup notice sent to operator");
            }
        });
    }

    fn forward_message(&self, message: InboundMessage) {
        debug!("Inbound message from {}", message.sender);
        if let Err(e) = self.commands.try_send(message) {
            warn!("Command queue unavailable, dropping message: {}", e);
        }
    }

    /// Run until the shutdown flag is set
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut updates = self.gateway.events();
        let mut updates_open = true;

        let mut running = self.connect_or_stop(&mut shutdown).await;

        while running {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                _ = stop_requested(&mut shutdown) => break,
                event = updates.next(), if updates_open => match event {
                    Some(GatewayEvent::Connection(update)) => self.handle_connection_update(update),
                    Some(GatewayEvent::Message(message)) => self.forward_message(message),
                    None => {
                        warn!("Gateway {} event stream ended", self.gateway.gateway_name());
                        updates_open = false;
                    }
                },
                _ = sleep_until_opt(reconnect_at), if reconnect_at.is_some() => {
                    running = self.connect_or_stop(&mut shutdown).await;
                }
            }
        }

        debug!("Gateway supervisor stopped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::Result;
    use crate::state::MemoryRegistryStore;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_stream::Stream;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Gateway whose connection events are pushed by the test
    struct ScriptedGateway {
        connects: AtomicUsize,
        fail_connect: Mutex<Option<Error>>,
        stall_connect: AtomicBool,
        events: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedGateway {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<GatewayEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let gateway = Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail_connect: Mutex::new(None),
                stall_connect: AtomicBool::new(false),
                events: Mutex::new(Some(rx)),
                sent: Mutex::new(Vec::new()),
            });
            (gateway, tx)
        }
    }

    #[async_trait]
    impl MessagingGateway for ScriptedGateway {
        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.stall_connect.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            match self.fail_connect.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn send(&self, address: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), text.to_string()));
            Ok(())
        }

        fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>> {
            match self.events.lock().unwrap().take() {
                Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
                None => Box::pin(tokio_stream::empty()),
            }
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn gateway_name(&self) -> &'static str {
            "scripted"
        }
    }

    struct Harness {
        gateway: Arc<ScriptedGateway>,
        updates: mpsc::UnboundedSender<GatewayEvent>,
        state: watch::Receiver<ConnectionState>,
        commands: mpsc::Receiver<InboundMessage>,
        stop: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(configure: impl FnOnce(&ScriptedGateway)) -> Harness {
        let (gateway, updates) = ScriptedGateway::new();
        configure(&gateway);

        let registry = Arc::new(MemoryRegistryStore::new());
        let dispatcher = Dispatcher::new(gateway.clone(), registry, Duration::ZERO);
        let state = Arc::new(watch::channel(ConnectionState::Disconnected).0);
        let state_rx = state.subscribe();
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = mpsc::channel(64);
        let (stop, stop_rx) = watch::channel(false);

        let supervisor = GatewaySupervisor::new(
            gateway.clone(),
            dispatcher,
            "op@x".to_string(),
            SupervisorSettings {
                reconnect_delay: Duration::from_secs(5),
                startup_notice: true,
                startup_notice_delay: Duration::from_millis(100),
            },
            state,
            command_tx,
            EventSink::new(event_tx),
        );
        let task = tokio::spawn(supervisor.run(stop_rx));

        Harness {
            gateway,
            updates,
            state: state_rx,
            commands: command_rx,
            stop,
            task,
        }
    }

    async fn wait_for_state(state: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        state.wait_for(|s| *s == want).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_reconnects_after_delay() {
        let mut h = start(|_| {});
        wait_for_state(&mut h.state, ConnectionState::Connecting).await;

        h.updates.send(GatewayEvent::Connection(ConnectionUpdate::Open)).unwrap();
        wait_for_state(&mut h.state, ConnectionState::Connected).await;

        h.updates
            .send(GatewayEvent::Connection(ConnectionUpdate::Closed(
                DisconnectReason::Lost("reset".into()),
            )))
            .unwrap();
        wait_for_state(&mut h.state, ConnectionState::Disconnected).await;
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 2);
        assert_eq!(*h.state.borrow(), ConnectionState::Connecting);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn logout_is_terminal() {
        let mut h = start(|_| {});
        h.updates.send(GatewayEvent::Connection(ConnectionUpdate::Open)).unwrap();
        wait_for_state(&mut h.state, ConnectionState::Connected).await;

        h.updates
            .send(GatewayEvent::Connection(ConnectionUpdate::Closed(
                DisconnectReason::LoggedOut,
            )))
            .unwrap();
        wait_for_state(&mut h.state, ConnectionState::LoggedOut).await;

        h.updates.send(GatewayEvent::Connection(ConnectionUpdate::Open)).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*h.state.borrow(), ConnectionState::LoggedOut);
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 1);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_goes_back_to_disconnected() {
        let mut h = start(|g| {
            *g.fail_connect.lock().unwrap() = Some(Error::gateway("bridge down"));
        });
        wait_for_state(&mut h.state, ConnectionState::Disconnected).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 2);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_on_connect_is_terminal() {
        let mut h = start(|g| {
            *g.fail_connect.lock().unwrap() = Some(Error::auth("session revoked"));
        });
        wait_for_state(&mut h.state, ConnectionState::LoggedOut).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 1);

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_stalled_connect() {
        let mut h = start(|g| g.stall_connect.store(true, Ordering::SeqCst));
        wait_for_state(&mut h.state, ConnectionState::Connecting).await;

        h.stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("supervisor stops while connect is pending")
            .unwrap();
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_stalled_reconnect() {
        let mut h = start(|_| {});
        wait_for_state(&mut h.state, ConnectionState::Connecting).await;
        h.gateway.stall_connect.store(true, Ordering::SeqCst);

        h.updates
            .send(GatewayEvent::Connection(ConnectionUpdate::Closed(
                DisconnectReason::Lost("reset".into()),
            )))
            .unwrap();
        wait_for_state(&mut h.state, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.gateway.connects.load(Ordering::SeqCst), 2);

        h.stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), h.task)
            .await
            .expect("supervisor stops while reconnect is pending")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_sends_startup_notice_and_messages_are_forwarded() {
        let mut h = start(|_| {});
        h.updates.send(GatewayEvent::Connection(ConnectionUpdate::Open)).unwrap();
        wait_for_state(&mut h.state, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        let sent = h.gateway.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("op@x".to_string(), STARTUP_NOTICE.to_string())]);

        h.updates
            .send(GatewayEvent::Message(InboundMessage::new("op@x", "lista")))
            .unwrap();
        let forwarded = h.commands.recv().await.unwrap();
        assert_eq!(forwarded.text, "lista");

        h.stop.send(true).unwrap();
        h.task.await.unwrap();
    }
}
