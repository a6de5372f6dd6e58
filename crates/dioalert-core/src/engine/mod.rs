//! Core alert engine
//!
//! The AlertEngine is responsible for:
//! - Binding the stream and datagram listeners
//! - Routing frames through the alert pipeline
//! - Supervising the messaging gateway connection
//! - Handing operator messages to the command interpreter
//! - Flushing the registry store on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐
//! │   TCP    │  │   UDP    │
//! └────┬─────┘  └────┬─────┘
//!      └──── frame ──┘
//!             ▼
//!     ┌───────────────┐          ┌────────────────────┐
//!     │ AlertPipeline │          │ GatewaySupervisor  │◄── gateway events
//!     └───────┬───────┘          └─────────┬──────────┘
//!             │ alert text                 │ inbound message (queue)
//!             ▼                            ▼
//!     ┌───────────────┐          ┌────────────────────┐
//!     │  Dispatcher   │◄─ reply ─│ CommandInterpreter │
//!     └───────┬───────┘          └─────────┬──────────┘
//!             ▼                            ▼
//!     MessagingGateway               RegistryStore
//! ```
//!
//! ## Event Flow
//!
//! 1. A frame arrives on either listener
//! 2. The wire parser extracts a device event
//! 3. The input tracker decides whether it is novel
//! 4. Novel events are formatted and queued to the broadcast task
//! 5. Engine events are emitted for monitoring/logging

mod pipeline;
mod supervisor;

pub use pipeline::AlertPipeline;
pub use supervisor::{ConnectionState, STARTUP_NOTICE, SupervisorSettings};

use crate::command::CommandInterpreter;
use crate::config::AlertConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::listener::{Transport, tcp, udp};
use crate::traits::{InboundMessage, MessagingGateway, RegistryStore};
use crate::tracker::InputStateTracker;
use crate::wire::InputId;
use std::net::SocketAddr;
use std::sync::Arc;
use supervisor::GatewaySupervisor;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events emitted by the AlertEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        bind_addr: String,
    },

    /// A listener is accepting frames
    ListenerBound {
        transport: Transport,
        local_addr: SocketAddr,
    },

    /// A listener could not bind
    ListenerFailed {
        transport: Transport,
        error: String,
    },

    /// A novel input transition produced an alert
    AlertRaised {
        device_id: String,
        input: InputId,
        asserted: bool,
        text: String,
    },

    /// A repeated report was debounced
    AlertSuppressed {
        device_id: String,
        input: InputId,
        asserted: bool,
    },

    /// A broadcast went through the whole recipient set
    BroadcastCompleted {
        text: String,
        delivered: usize,
        failed: usize,
    },

    /// The gateway connection changed state
    GatewayStateChanged {
        state: ConnectionState,
    },

    /// An operator command was answered
    CommandHandled {
        reply: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Non-blocking sender for engine events
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Emit an engine event
    ///
    /// A full channel drops the event with a warning; a closed one drops it
    /// silently.
    pub(crate) fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone
pub(crate) async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Core alert engine
///
/// ## Lifecycle
///
/// 1. Create with [`AlertEngine::new()`]
/// 2. Start with [`AlertEngine::run()`]
/// 3. Engine runs until a shutdown signal is received
/// 4. Listeners stop, the gateway closes, the registry is flushed
///
/// ## Load Resistance
///
/// - **Bounded event channel**: full channel drops events (logged)
/// - **Bounded command queue**: inbound messages beyond capacity are dropped
/// - **Queued broadcasts**: one task sends alerts in order, so pacing delays never stall a listener
pub struct AlertEngine {
    config: AlertConfig,
    gateway: Arc<dyn MessagingGateway>,
    registry: Arc<dyn RegistryStore>,
    dispatcher: Dispatcher,
    pipeline: AlertPipeline,
    interpreter: CommandInterpreter,
    state: Arc<watch::Sender<ConnectionState>>,
    events: EventSink,
}

impl AlertEngine {
    /// Create a new alert engine
    ///
    /// # Parameters
    ///
    /// - `gateway`: Messaging gateway implementation
    /// - `registry`: Registry store implementation
    /// - `config`: Alert configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        gateway: Box<dyn MessagingGateway>,
        registry: Box<dyn RegistryStore>,
        config: AlertConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let events = EventSink::new(tx);

        let gateway: Arc<dyn MessagingGateway> = Arc::from(gateway);
        let registry: Arc<dyn RegistryStore> = Arc::from(registry);
        let dispatcher = Dispatcher::new(gateway.clone(), registry.clone(), config.dispatcher.pacing());

        let pipeline = AlertPipeline::with_sink(
            InputStateTracker::new(),
            registry.clone(),
            dispatcher.clone(),
            config.inputs.clone(),
            events.clone(),
        );
        let interpreter = CommandInterpreter::new(
            config.operator.address(),
            config.operator.address_format(),
            registry.clone(),
            dispatcher.clone(),
        );
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let engine = Self {
            config,
            gateway,
            registry,
            dispatcher,
            pipeline,
            interpreter,
            state: Arc::new(state),
            events,
        };

        Ok((engine, rx))
    }

    /// Frame pipeline shared by both listeners
    pub fn pipeline(&self) -> &AlertPipeline {
        &self.pipeline
    }

    /// Operator command interpreter
    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// Watch the gateway connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run the engine
    ///
    /// Runs until Ctrl-C / SIGINT.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Both listeners failed to bind, or the final flush failed
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or its sender is dropped)
    ///
    /// With `None` this behaves like [`AlertEngine::run()`]. Embedders and
    /// tests use this to stop the engine without an OS signal.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let bind_addr = self.config.listener.socket_addr();
        info!("Alert engine starting on {} (tcp + udp)", bind_addr);
        self.events.emit(EngineEvent::Started {
            bind_addr: bind_addr.clone(),
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let tcp_error = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                self.listener_bound(Transport::Tcp, listener.local_addr());
                let settings = tcp::StreamSettings {
                    ack_token: Arc::from(self.config.listener.ack_token.as_str()),
                    max_frame_len: self.config.listener.max_frame_len,
                };
                tasks.push(tokio::spawn(tcp::serve(
                    listener,
                    self.pipeline.clone(),
                    settings,
                    stop_rx.clone(),
                )));
                None
            }
            Err(e) => Some(self.listener_failed(Transport::Tcp, e)),
        };

        let udp_error = match UdpSocket::bind(&bind_addr).await {
            Ok(socket) => {
                self.listener_bound(Transport::Udp, socket.local_addr());
                tasks.push(tokio::spawn(udp::serve(
                    socket,
                    self.pipeline.clone(),
                    self.config.listener.max_frame_len,
                    stop_rx.clone(),
                )));
                None
            }
            Err(e) => Some(self.listener_failed(Transport::Udp, e)),
        };

        if let (Some(e), Some(_)) = (tcp_error, udp_error) {
            error!("No listener could bind {}", bind_addr);
            self.events.emit(EngineEvent::Stopped {
                reason: format!("Listeners failed to bind: {}", e),
            });
            return Err(Error::Network(e));
        }

        let (command_tx, command_rx) = mpsc::channel(self.config.engine.command_queue_capacity);
        let supervisor = GatewaySupervisor::new(
            self.gateway.clone(),
            self.dispatcher.clone(),
            self.config.operator.address(),
            SupervisorSettings {
                reconnect_delay: self.config.gateway.reconnect_delay(),
                startup_notice: self.config.gateway.startup_notice,
                startup_notice_delay: self.config.gateway.startup_notice_delay(),
            },
            self.state.clone(),
            command_tx,
            self.events.clone(),
        );
        tasks.push(tokio::spawn(supervisor.run(stop_rx.clone())));
        tasks.push(tokio::spawn(run_commands(
            self.interpreter.clone(),
            command_rx,
            self.events.clone(),
            stop_rx,
        )));

        let reason = wait_for_shutdown(shutdown_rx).await;
        info!("Shutdown signal received");

        let _ = stop_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.gateway.close().await {
            warn!("Failed to close gateway {}: {}", self.gateway.gateway_name(), e);
        }

        self.registry.flush().await?;
        info!("Registry flushed, engine stopped");

        self.events.emit(EngineEvent::Stopped { reason });
        Ok(())
    }

    fn listener_bound(&self, transport: Transport, local_addr: std::io::Result<SocketAddr>) {
        match local_addr {
            Ok(local_addr) => {
                info!("{} listener bound on {}", transport, local_addr);
                self.events.emit(EngineEvent::ListenerBound {
                    transport,
                    local_addr,
                });
            }
            Err(e) => warn!("{} listener bound, local address unknown: {}", transport, e),
        }
    }

    fn listener_failed(&self, transport: Transport, e: std::io::Error) -> std::io::Error {
        error!("{} listener failed to bind: {}", transport, e);
        self.events.emit(EngineEvent::ListenerFailed {
            transport,
            error: e.to_string(),
        });
        e
    }
}

/// Wait for the programmatic signal if one was given, Ctrl-C otherwise
async fn wait_for_shutdown(shutdown_rx: Option<oneshot::Receiver<()>>) -> String {
    match shutdown_rx {
        Some(rx) => {
            let _ = rx.await;
            "Shutdown signal".to_string()
        }
        None => match tokio::signal::ctrl_c().await {
            Ok(()) => "Interrupt signal".to_string(),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                format!("Signal handler failed: {}", e)
            }
        },
    }
}

/// Apply queued operator messages one at a time
async fn run_commands(
    interpreter: CommandInterpreter,
    mut commands: mpsc::Receiver<InboundMessage>,
    events: EventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            message = commands.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match interpreter.handle(&message).await {
            Ok(Some(reply)) => events.emit(EngineEvent::CommandHandled { reply }),
            Ok(None) => {}
            Err(e) => error!("Command from {} failed: {}", message.sender, e),
        }
    }

    debug!("Command task stopped");
}
