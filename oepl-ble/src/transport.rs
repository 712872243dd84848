//! The seam between the driver and a BLE stack
//!
//! The driver needs very little from the radio: connect to an address, find
//! the one characteristic a tag exposes, write bytes to it and receive its
//! notifications. [`crate::btle`] implements this on top of btleplug; tests
//! script it in memory.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("device not found")]
    NotFound,
    #[error("no available Bluetooth connection slots")]
    NoSlots,
    #[error("characteristic not resolved")]
    NoCharacteristic,
    #[error("{0}")]
    Backend(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::DeviceNotFound => TransportError::NotFound,
            other => {
                let message = other.to_string();
                if message.to_ascii_lowercase().contains("connection slot") {
                    TransportError::NoSlots
                } else {
                    TransportError::Backend(message)
                }
            }
        }
    }
}

/// Opens links to devices by address
#[async_trait]
pub trait Transport: Send + Sync {
    type Link: Link;

    async fn connect(&self, address: &str) -> Result<Self::Link, TransportError>;
}

/// One open GATT session
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Look up the characteristic `uuid`; `Ok(false)` when the device lacks it
    async fn resolve_characteristic(&mut self, uuid: Uuid) -> Result<bool, TransportError>;

    /// Start forwarding notifications of the resolved characteristic to `sink`
    async fn subscribe(&mut self, sink: NotificationSink) -> Result<(), TransportError>;

    /// Write without response to the resolved characteristic
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    async fn unsubscribe(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Producer half of a connection's notification queue
///
/// Pushing never blocks the transport: when the queue is full the newest
/// notification is dropped.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    address: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl NotificationSink {
    pub fn new(address: &str, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                address: address.to_string(),
                tx,
            },
            rx,
        )
    }

    pub fn push(&self, data: Vec<u8>) {
        match self.tx.try_send(data) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    address = %self.address,
                    len = dropped.len(),
                    "notification queue full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(address = %self.address, "notification after connection closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let (sink, mut rx) = NotificationSink::new("AA", 2);
        sink.push(vec![1]);
        sink.push(vec![2]);
        sink.push(vec![3]);
        assert_eq!(rx.recv().await, Some(vec![1]));
        assert_eq!(rx.recv().await, Some(vec![2]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_ignored() {
        let (sink, rx) = NotificationSink::new("AA", 2);
        drop(rx);
        sink.push(vec![1]);
    }
}
