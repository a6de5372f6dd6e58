//! Shared downstream pipeline for both listeners
//!
//! parse -> observe -> format -> broadcast. Formatted alerts are queued to
//! a single broadcast task: a listener never waits on pacing delays, and
//! recipients receive alerts in the order the transitions were observed.

use super::{EngineEvent, EventSink};
use crate::config::InputLabels;
use crate::dispatch::Dispatcher;
use crate::format::{default_display_name, format_alert};
use crate::traits::RegistryStore;
use crate::tracker::{InputStateTracker, StateChange};
use crate::wire;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Alerts waiting for the broadcast task
const BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Turns raw frames into alert broadcasts
///
/// Clones share the input state and the broadcast queue. The broadcast
/// task ends once every clone is dropped.
#[derive(Clone)]
pub struct AlertPipeline {
    tracker: InputStateTracker,
    registry: Arc<dyn RegistryStore>,
    labels: Arc<InputLabels>,
    broadcasts: mpsc::Sender<String>,
    events: EventSink,
}

impl AlertPipeline {
    /// Create a new pipeline
    ///
    /// # Parameters
    ///
    /// - `tracker`: Shared input state (clones share the same map)
    /// - `registry`: Source of device display names
    /// - `dispatcher`: Broadcasts the formatted alert
    /// - `labels`: Human-readable input labels
    /// - `events`: Receives `AlertRaised`, `AlertSuppressed` and
    ///   `BroadcastCompleted`
    ///
    /// Spawns the broadcast task, so this must be called from within a
    /// Tokio runtime.
    pub fn new(
        tracker: InputStateTracker,
        registry: Arc<dyn RegistryStore>,
        dispatcher: Dispatcher,
        labels: InputLabels,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self::with_sink(tracker, registry, dispatcher, labels, EventSink::new(events))
    }

    pub(crate) fn with_sink(
        tracker: InputStateTracker,
        registry: Arc<dyn RegistryStore>,
        dispatcher: Dispatcher,
        labels: InputLabels,
        events: EventSink,
    ) -> Self {
        let (broadcasts, queue) = mpsc::channel(BROADCAST_QUEUE_CAPACITY);
        tokio::spawn(run_broadcasts(dispatcher, queue, events.clone()));
        Self {
            tracker,
            registry,
            labels: Arc::new(labels),
            broadcasts,
            events,
        }
    }

    /// Input state shared by this pipeline
    pub fn tracker(&self) -> &InputStateTracker {
        &self.tracker
    }

    /// Process one frame
    ///
    /// Returns the state change when the frame produced an alert. The
    /// broadcast is queued and may not have started on return.
    pub async fn process_frame(&self, frame: &[u8]) -> Option<StateChange> {
        let Some(event) = wire::parse(frame) else {
            trace!("Frame ignored: {}", String::from_utf8_lossy(frame));
            return None;
        };

        let Some(change) = self.tracker.observe(&event).await else {
            debug!(
                "Duplicate report from {} ({} asserted={})",
                event.device_id, event.input, event.asserted
            );
            self.events.emit(EngineEvent::AlertSuppressed {
                device_id: event.device_id,
                input: event.input,
                asserted: event.asserted,
            });
            return None;
        };

        let display_name = match self.registry.display_name(&change.device_id).await {
            Ok(Some(name)) => name,
            Ok(None) => default_display_name(&change.device_id),
            Err(e) => {
                warn!("Name lookup for {} failed: {}", change.device_id, e);
                default_display_name(&change.device_id)
            }
        };

        let text = format_alert(&self.labels, change.input, change.asserted, &display_name);
        info!(
            "Device {} {} -> {} (was {:?})",
            change.device_id,
            change.input,
            if change.asserted { "asserted" } else { "cleared" },
            change.previous
        );

        self.events.emit(EngineEvent::AlertRaised {
            device_id: change.device_id.clone(),
            input: change.input,
            asserted: change.asserted,
            text: text.clone(),
        });

        if self.broadcasts.send(text).await.is_err() {
            error!("Broadcast task is gone, alert for {} not sent", change.device_id);
        }

        Some(change)
    }
}

/// Broadcast queued alerts one at a time, in queue order
async fn run_broadcasts(dispatcher: Dispatcher, mut queue: mpsc::Receiver<String>, events: EventSink) {
    while let Some(text) = queue.recv().await {
        match dispatcher.broadcast(&text).await {
            Ok(report) => {
                info!(
                    "Broadcast finished: {} delivered, {} failed",
                    report.delivered.len(),
                    report.failed.len()
                );
                events.emit(EngineEvent::BroadcastCompleted {
                    text,
                    delivered: report.delivered.len(),
                    failed: report.failed.len(),
                });
            }
            Err(e) => error!("Broadcast aborted, recipient set unavailable: {}", e),
        }
    }
    debug!("Broadcast queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::state::MemoryRegistryStore;
    use crate::traits::{GatewayEvent, MessagingGateway};
    use crate::wire::InputId;
    use async_trait::async_trait;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_stream::Stream;

    #[derive(Default)]
    struct SinkGateway {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingGateway for SinkGateway {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _address: &str, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn events(&self) -> Pin<Box<dyn Stream<Item = GatewayEvent> + Send + 'static>> {
            Box::pin(tokio_stream::empty())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }

        fn gateway_name(&self) -> &'static str {
            "sink"
        }
    }

    fn pipeline(registry: MemoryRegistryStore) -> (AlertPipeline, mpsc::Receiver<EngineEvent>) {
        let (pipeline, events, _) = paced_pipeline(registry, Duration::ZERO);
        (pipeline, events)
    }

    fn paced_pipeline(
        registry: MemoryRegistryStore,
        pacing: Duration,
    ) -> (AlertPipeline, mpsc::Receiver<EngineEvent>, Arc<SinkGateway>) {
        let registry: Arc<dyn RegistryStore> = Arc::new(registry);
        let gateway = Arc::new(SinkGateway::default());
        let dispatcher = Dispatcher::new(gateway.clone(), registry.clone(), pacing);
        let (tx, rx) = mpsc::channel(16);
        let pipeline = AlertPipeline::new(
            InputStateTracker::new(),
            registry,
            dispatcher,
            InputLabels::default(),
            tx,
        );
        (pipeline, rx, gateway)
    }

    const FRAME: &[u8] = b"+RESP:GTDIS,060100,IMEI001,,0,11,0,0$";

    #[tokio::test]
    async fn first_report_raises_alert_with_default_name() {
        let (pipeline, mut events) = pipeline(MemoryRegistryStore::with_operator("op@x"));

        let change = pipeline.process_frame(FRAME).await.unwrap();
        assert_eq!(change.input, InputId::In1);
        assert!(change.asserted);

        match events.recv().await {
            Some(EngineEvent::AlertRaised { text, .. }) => {
                assert_eq!(text, "ALERT: Tamper ACTIVE\nDevice IMEI001");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repeated_report_is_suppressed() {
        let (pipeline, _events) = pipeline(MemoryRegistryStore::new());

        assert!(pipeline.process_frame(FRAME).await.is_some());
        assert!(pipeline.process_frame(FRAME).await.is_none());
    }

    #[tokio::test]
    async fn registered_name_is_used() {
        let registry = MemoryRegistryStore::new();
        registry.set_name("IMEI001", "North Branch").await.unwrap();
        let (pipeline, mut events) = pipeline(registry);

        pipeline.process_frame(FRAME).await.unwrap();
        match events.recv().await {
            Some(EngineEvent::AlertRaised { text, .. }) => assert!(text.ends_with("\nNorth Branch")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unrecognized_frame_is_ignored() {
        let (pipeline, _events) = pipeline(MemoryRegistryStore::new());
        assert!(pipeline.process_frame(b"+RESP:GTHBD,060100,IMEI001$").await.is_none());
        assert_eq!(pipeline.tracker().device_count().await, 0);
    }

    #[tokio::test]
    async fn quick_transitions_reach_recipients_in_order() {
        let registry =
            MemoryRegistryStore::with_recipients(["op@x", "a@x", "b@x"].map(String::from));
        let (pipeline, mut events, gateway) =
            paced_pipeline(registry, Duration::from_millis(20));

        pipeline
            .process_frame(b"+RESP:GTDIS,060100,IMEI001,,0,11$")
            .await
            .unwrap();
        pipeline
            .process_frame(b"+RESP:GTDIS,060100,IMEI001,,0,10$")
            .await
            .unwrap();

        let mut completed = Vec::new();
        while completed.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("broadcast completes")
                .unwrap();
            if let EngineEvent::BroadcastCompleted { text, delivered, .. } = event {
                assert_eq!(delivered, 3);
                completed.push(text);
            }
        }
        assert!(completed[0].starts_with("ALERT:"));
        assert!(completed[1].starts_with("NORMAL:"));

        let sent = gateway.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 6);
        assert!(sent[..3].iter().all(|t| t.starts_with("ALERT:")), "{:?}", sent);
        assert!(sent[3..].iter().all(|t| t.starts_with("NORMAL:")), "{:?}", sent);
    }
}
