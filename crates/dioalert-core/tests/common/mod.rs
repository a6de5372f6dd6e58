//! Test doubles and common utilities for contract tests
//!
//! The doubles record what the engine does to them so tests can assert on
//! observable behavior without a real messaging bridge or disk.

#![allow(dead_code)]

use dioalert_core::config::{AlertConfig, RegistryConfig};
use dioalert_core::engine::EngineEvent;
use dioalert_core::error::{Error, Result};
use dioalert_core::state::MemoryRegistryStore;
use dioalert_core::traits::{
    ConnectionUpdate, DisconnectReason, GatewayEvent, InboundMessage, Membership,
    MessagingGateway, NameChange, RegistryStore,
};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const OPERATOR_PHONE: &str = "1156511894";
pub const OPERATOR: &str = "5491156511894@s.whatsapp.net";

/// A gateway that records sends and lets the test push events
#[derive(Clone)]
pub struct RecordingGateway {
    event_tx: mpsc::UnboundedSender<GatewayEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    connect_failures: Arc<Mutex<Vec<Error>>>,
    connect_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            connect_failures: Arc::new(Mutex::new(Vec::new())),
            connect_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every send to `address` fail
    pub fn fail_sends_to(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    /// Queue errors returned by the next `connect()` calls
    pub fn fail_next_connect(&self, error: Error) {
        self.connect_failures.lock().unwrap().push(error);
    }

    pub fn open(&self) {
        let _ = self
            .event_tx
            .send(GatewayEvent::Connection(ConnectionUpdate::Open));
    }

    pub fn lose_connection(&self, reason: &str) {
        let _ = self.event_tx.send(GatewayEvent::Connection(ConnectionUpdate::Closed(
            DisconnectReason::Lost(reason.to_string()),
        )));
    }

    pub fn log_out(&self) {
        let _ = self.event_tx.send(GatewayEvent::Connection(ConnectionUpdate::Closed(
            DisconnectReason::LoggedOut,
        )));
    }

    /// Deliver an inbound message as if `sender` wrote it
    pub fn receive(&self, sender: &str, text: &str) {
        let _ = self
            .event_tx
            .send(GatewayEvent::Message(InboundMessage::new(sender, text)));
    }

    /// Every successful send, in order
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts sent to one address
    pub fn sent_to(&self, address: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == address)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MessagingGateway for RecordingGateway {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.connect_failures.lock().unwrap();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(address) {
            return Err(Error::gateway(format!("{} unreachable", address)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), text.to_string()));
        Ok(())
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>> {
        // Only the first caller gets the live stream
        match self.event_rx.lock().unwrap().take() {
            Some(rx) => Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)),
            None => Box::pin(tokio_stream::empty()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "recording"
    }
}

/// A memory registry that counts writes and flushes
#[derive(Clone)]
pub struct CountingRegistry {
    inner: MemoryRegistryStore,
    mutations: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    read_only: Arc<Mutex<bool>>,
}

impl CountingRegistry {
    pub fn new(inner: MemoryRegistryStore) -> Self {
        Self {
            inner,
            mutations: Arc::new(AtomicUsize::new(0)),
            flushes: Arc::new(AtomicUsize::new(0)),
            read_only: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_operator() -> Self {
        Self::new(MemoryRegistryStore::with_operator(OPERATOR))
    }

    /// Make every mutation fail as if storage were unwritable
    pub fn make_read_only(&self) {
        *self.read_only.lock().unwrap() = true;
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if *self.read_only.lock().unwrap() {
            return Err(Error::registry("storage is read-only"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RegistryStore for CountingRegistry {
    async fn recipients(&self) -> Result<Vec<String>> {
        self.inner.recipients().await
    }

    async fn add_recipient(&self, address: &str) -> Result<Membership> {
        self.check_writable()?;
        self.inner.add_recipient(address).await
    }

    async fn remove_recipient(&self, address: &str) -> Result<Membership> {
        self.check_writable()?;
        self.inner.remove_recipient(address).await
    }

    async fn display_name(&self, device_id: &str) -> Result<Option<String>> {
        self.inner.display_name(device_id).await
    }

    async fn set_name(&self, device_id: &str, name: &str) -> Result<NameChange> {
        self.check_writable()?;
        self.inner.set_name(device_id, name).await
    }

    async fn delete_name(&self, device_id: &str) -> Result<bool> {
        self.check_writable()?;
        self.inner.delete_name(device_id).await
    }

    async fn names(&self) -> Result<Vec<(String, String)>> {
        self.inner.names().await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Config bound to an ephemeral loopback port with no pacing
pub fn test_config() -> AlertConfig {
    let mut config = AlertConfig::new(OPERATOR_PHONE);
    config.listener.bind_addr = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.registry = RegistryConfig::Memory;
    config.dispatcher.pacing_ms = 0;
    config.gateway.reconnect_delay_secs = 1;
    config.gateway.startup_notice = false;
    config.engine.event_channel_capacity = 256;
    config
}

/// A digital-I/O report frame for `device` with event `code`
pub fn dio_frame(device: &str, code: u32) -> String {
    format!("+RESP:GTDIS,060100,{},,0,{},0,0,20240101000000,0001$", device, code)
}

/// Wait for the first event matching `pred`, failing after two seconds
pub async fn wait_for_event<F>(events: &mut mpsc::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("engine event channel closed");
        if pred(&event) {
            return event;
        }
    }
}
