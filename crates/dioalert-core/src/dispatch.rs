//! Alert dispatcher
//!
//! Fans alert text out to the recipient set through the messaging gateway.
//! Sends are sequential with a fixed pacing delay; a failed send is logged
//! and skipped, never retried, and never aborts the rest of the broadcast.

use crate::error::Result;
use crate::traits::{MessagingGateway, RegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Addresses the gateway accepted
    pub delivered: Vec<String>,
    /// Addresses whose send failed
    pub failed: Vec<String>,
}

impl BroadcastReport {
    /// Total number of send attempts
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Sends alert text to recipients via the messaging gateway
#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn MessagingGateway>,
    registry: Arc<dyn RegistryStore>,
    pacing: Duration,
}

impl Dispatcher {
    /// Create a new dispatcher
    ///
    /// # Parameters
    ///
    /// - `gateway`: Messaging gateway used for every send
    /// - `registry`: Source of the recipient set
    /// - `pacing`: Delay between consecutive sends of one broadcast
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        registry: Arc<dyn RegistryStore>,
        pacing: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            pacing,
        }
    }

    /// Send `text` to a single address
    ///
    /// Failures are logged and returned; they are never fatal.
    pub async fn send_to(&self, address: &str, text: &str) -> Result<()> {
        match self.gateway.send(address, text).await {
            Ok(()) => {
                debug!("Sent via {} to {}: {}", self.gateway.gateway_name(), address, text);
                Ok(())
            }
            Err(e) => {
                warn!("Send to {} failed: {}", address, e);
                Err(e)
            }
        }
    }

    /// Send `text` to every recipient
    ///
    /// The recipient set is read once; the registry lock is not held while
    /// sending.
    pub async fn broadcast(&self, text: &str) -> Result<BroadcastReport> {
        let recipients = self.registry.recipients().await?;
        let mut report = BroadcastReport::default();

        for (index, address) in recipients.iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            match self.send_to(address, text).await {
                Ok(()) => {
                    info!("Alert sent to {}", address);
                    report.delivered.push(address.clone());
                }
                Err(_) => report.failed.push(address.clone()),
            }
        }

        Ok(report)
    }
}
