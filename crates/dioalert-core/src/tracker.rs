//! Input state tracker
//!
//! Remembers the last reported state of every `(device, input)` pair and
//! decides whether an incoming report is novel. Repeated identical reports
//! are the debounce case and produce no state change.

use crate::wire::{DeviceEvent, InputId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A novel state transition of one device input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub device_id: String,
    pub input: InputId,
    pub asserted: bool,
    /// State before this report (`None` on first contact)
    pub previous: Option<bool>,
}

/// Per-device, per-input last-known state
///
/// Cloning shares the underlying map. The check-and-set in
/// [`InputStateTracker::observe`] runs under a single lock, so two
/// concurrent reports for the same pair cannot both be judged novel or both
/// be suppressed.
#[derive(Debug, Clone, Default)]
pub struct InputStateTracker {
    inner: Arc<Mutex<HashMap<(String, InputId), bool>>>,
}

impl InputStateTracker {
    /// Create an empty tracker (every input of every device is unknown)
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, returning the change if it is novel
    pub async fn observe(&self, event: &DeviceEvent) -> Option<StateChange> {
        let mut states = self.inner.lock().await;
        let key = (event.device_id.clone(), event.input);
        let previous = states.get(&key).copied();

        if previous == Some(event.asserted) {
            return None;
        }

        states.insert(key, event.asserted);

        Some(StateChange {
            device_id: event.device_id.clone(),
            input: event.input,
            asserted: event.asserted,
            previous,
        })
    }

    /// Last known state of an input (`None` when never reported)
    pub async fn state(&self, device_id: &str, input: InputId) -> Option<bool> {
        let states = self.inner.lock().await;
        states.get(&(device_id.to_string(), input)).copied()
    }

    /// Number of devices seen so far
    pub async fn device_count(&self) -> usize {
        let states = self.inner.lock().await;
        let mut devices: Vec<&String> = states.keys().map(|(device, _)| device).collect();
        devices.sort();
        devices.dedup();
        devices.len()
    }
}
