//! Minimal embedding example for dioalert-core
//!
//! Runs the alert engine in-process with a console gateway and an in-memory
//! registry, feeds it one device frame over TCP and one operator command,
//! then stops it through the shutdown channel.

use dioalert_core::config::RegistryConfig;
use dioalert_core::engine::EngineEvent;
use dioalert_core::listener::Transport;
use dioalert_core::traits::{ConnectionUpdate, GatewayEvent, InboundMessage, MessagingGateway};
use dioalert_core::{AlertConfig, AlertEngine, MemoryRegistryStore, Result};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Gateway that prints outgoing messages instead of delivering them
struct ConsoleGateway {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
}

impl ConsoleGateway {
    fn new() -> (Self, mpsc::UnboundedSender<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: tx.clone(),
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl MessagingGateway for ConsoleGateway {
    async fn connect(&self) -> Result<()> {
        let _ = self
            .tx
            .send(GatewayEvent::Connection(ConnectionUpdate::Open));
        Ok(())
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        println!("[Gateway] -> {}: {}", address, text.replace('\n', " | "));
        Ok(())
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(tokio_stream::empty()),
        }
    }

    async fn close(&self) -> Result<()> {
        println!("[Gateway] closed");
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "console"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
    println!("=== Embedded dioalert-core Example ===\n");

    let mut config = AlertConfig::new("1156511894");
    config.listener.bind_addr = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.registry = RegistryConfig::Memory;
    config.dispatcher.pacing_ms = 0;
    config.gateway.startup_notice_delay_ms = 0;
    let operator = config.operator.address();

    let (gateway, inbound) = ConsoleGateway::new();
    let registry = MemoryRegistryStore::with_operator(operator.clone());

    println!("1. Creating engine...");
    let (engine, mut events) = AlertEngine::new(Box::new(gateway), Box::new(registry), config)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle = tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    let tcp_addr = loop {
        match events.recv().await {
            Some(EngineEvent::ListenerBound {
                transport: Transport::Tcp,
                local_addr,
            }) => break local_addr,
            Some(event) => println!("[Event] {:?}", event),
            None => return Ok(()),
        }
    };
    println!("2. Listening for devices on {}", tcp_addr);

    let mut device = TcpStream::connect(tcp_addr).await?;
    device
        .write_all(b"+RESP:GTDIS,060100,862170010000001,,0,11,0,0$")
        .await?;
    let mut ack = [0u8; 16];
    device.read_exact(&mut ack).await?;
    println!("3. Device acknowledged with {}", String::from_utf8_lossy(&ack));

    let _ = inbound.send(GatewayEvent::Message(InboundMessage::new(
        operator,
        "+nombre 862170010000001 North Branch",
    )));

    let deadline = tokio::time::sleep(Duration::from_millis(500));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(event) => println!("[Event] {:?}", event),
                None => break,
            },
        }
    }

    println!("\n4. Stopping engine...");
    let _ = shutdown_tx.send(());
    if let Ok(result) = engine_handle.await {
        result?;
    }

    println!("5. Engine stopped cleanly.");
    Ok(())
}
