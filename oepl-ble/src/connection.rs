//! One GATT session to one tag
//!
//! A [`Connection`] is opened under the device lock, initialised for its
//! firmware family and always torn down before the lock is released: by
//! [`Connection::close`] on the normal path, or by a teardown task spawned
//! from `Drop` when the owning future is abandoned.

use std::time::Duration;

use oepl_proto::Protocol;
use tokio::sync::mpsc;

use crate::config::OperationConfig;
use crate::lock::DeviceGuard;
use crate::transport::{Link, NotificationSink, Transport, TransportError};
use crate::{Error, variant};

pub struct Connection<L: Link> {
    address: String,
    protocol: Protocol,
    config: OperationConfig,
    link: Option<L>,
    subscribed: bool,
    notifications: mpsc::Receiver<Vec<u8>>,
    guard: Option<DeviceGuard>,
}

impl<L: Link> std::fmt::Debug for Connection<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("protocol", &self.protocol)
            .field("open", &self.link.is_some())
            .finish()
    }
}

fn connect_error(address: &str, e: TransportError) -> Error {
    let address = address.to_string();
    match e {
        TransportError::NotFound => Error::NotFound { address },
        TransportError::NoSlots => Error::NoSlots { address },
        other => Error::Connection {
            address,
            message: other.to_string(),
        },
    }
}

impl<L: Link> Connection<L> {
    /// Connect, resolve the protocol characteristic, subscribe and run the
    /// protocol's post-connect initialisation
    pub async fn open<T>(
        transport: &T,
        address: &str,
        protocol: Protocol,
        config: OperationConfig,
        guard: DeviceGuard,
    ) -> Result<Self, Error>
    where
        T: Transport<Link = L>,
    {
        tracing::debug!(address, %protocol, "connecting");
        let link = transport
            .connect(address)
            .await
            .map_err(|e| connect_error(address, e))?;

        let (sink, notifications) = NotificationSink::new(address, config.notification_queue);
        // From here on a dropped `conn` disconnects before the guard is released.
        let mut conn = Self {
            address: address.to_string(),
            protocol,
            config,
            link: Some(link),
            subscribed: false,
            notifications,
            guard: Some(guard),
        };

        if let Err(e) = conn.attach(sink).await {
            conn.close().await;
            return Err(e);
        }

        if let Err(e) = variant::initialize_connection(&mut conn).await {
            conn.close().await;
            return Err(e);
        }
        tracing::debug!(address, %protocol, "connection ready");
        Ok(conn)
    }

    /// Resolve the protocol characteristic, retrying once, and subscribe
    async fn attach(&mut self, sink: NotificationSink) -> Result<(), Error> {
        let uuid = self.protocol.service_uuid();
        let address = self.address.clone();
        let link = self.link()?;
        let mut resolved = link.resolve_characteristic(uuid).await;
        if !matches!(resolved, Ok(true)) {
            tracing::warn!(%address, %uuid, "characteristic not resolved, retrying once");
            resolved = link.resolve_characteristic(uuid).await;
        }
        match resolved {
            Ok(true) => {}
            Ok(false) => return Err(Error::CharacteristicNotFound { address, uuid }),
            Err(e) => return Err(connect_error(&address, e)),
        }
        link.subscribe(sink)
            .await
            .map_err(|e| connect_error(&address, e))?;
        self.subscribed = true;
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    fn link(&mut self) -> Result<&mut L, Error> {
        self.link.as_mut().ok_or_else(|| Error::Connection {
            address: self.address.clone(),
            message: "connection already closed".to_string(),
        })
    }

    /// Fire-and-forget write
    pub async fn write_command(&mut self, data: &[u8]) -> Result<(), Error> {
        tracing::trace!(address = %self.address, len = data.len(), "write");
        let address = self.address.clone();
        self.link()?
            .write(data)
            .await
            .map_err(|source| Error::Transport { address, source })
    }

    /// Empty the notification queue, returning how many were dropped
    pub fn discard_stale_notifications(&mut self) -> usize {
        let mut stale = 0;
        while self.notifications.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(address = %self.address, stale, "discarded stale notifications");
        }
        stale
    }

    /// Drop stale notifications, write, then wait for the next notification
    pub async fn write_command_with_response(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        self.discard_stale_notifications();
        self.write_command(data).await?;
        self.next_notification(timeout).await
    }

    /// Next queued notification, failing with `Error::Timeout` on expiry
    pub async fn next_notification(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        match tokio::time::timeout(timeout, self.notifications.recv()).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(Error::Connection {
                address: self.address.clone(),
                message: "notification stream ended".to_string(),
            }),
            Err(_) => Err(Error::Timeout {
                address: self.address.clone(),
                timeout,
            }),
        }
    }

    /// Unsubscribe, disconnect and release the device lock
    pub async fn close(mut self) {
        if let Some(link) = self.link.take() {
            teardown(&self.address, link, self.subscribed).await;
        }
        self.guard.take();
    }
}

async fn teardown<L: Link>(address: &str, mut link: L, subscribed: bool) {
    if subscribed && let Err(e) = link.unsubscribe().await {
        tracing::debug!(address, error = %e, "unsubscribe failed during teardown");
    }
    if let Err(e) = link.disconnect().await {
        tracing::debug!(address, error = %e, "disconnect failed during teardown");
    }
    tracing::debug!(address, "disconnected");
}

impl<L: Link> Drop for Connection<L> {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let address = std::mem::take(&mut self.address);
        let guard = self.guard.take();
        let subscribed = self.subscribed;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(%address, "connection dropped, tearing down in background");
                handle.spawn(async move {
                    teardown(&address, link, subscribed).await;
                    drop(guard);
                });
            }
            Err(_) => {
                tracing::warn!(%address, "connection dropped outside a runtime, skipping teardown");
            }
        }
    }
}
