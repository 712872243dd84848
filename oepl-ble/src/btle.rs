//! btleplug-backed transport and tag discovery

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use oepl_proto::{AdvertisingData, Protocol};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::transport::{Link, NotificationSink, Transport, TransportError};

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Backend("no Bluetooth adapter found".to_string()))
}

/// A tag seen while scanning
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTag {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub protocol: Protocol,
    pub advertising: AdvertisingData,
}

/// Scan for `duration` and return every peripheral advertising a known
/// manufacturer id with a well-formed beacon
pub async fn discover(adapter: &Adapter, duration: Duration) -> Result<Vec<DiscoveredTag>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    let found = collect_tags(adapter).await;
    adapter.stop_scan().await?;
    let mut tags = found?;
    tags.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(tags)
}

async fn collect_tags(adapter: &Adapter) -> Result<Vec<DiscoveredTag>, TransportError> {
    let mut tags = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        let address = peripheral.address().to_string();
        for (id, data) in &props.manufacturer_data {
            let Ok(protocol) = Protocol::from_manufacturer_id(*id) else {
                continue;
            };
            match protocol.parse_advertising(data) {
                Ok(advertising) => tags.push(DiscoveredTag {
                    address: address.clone(),
                    name: props.local_name.clone(),
                    rssi: props.rssi,
                    protocol,
                    advertising,
                }),
                Err(e) => {
                    tracing::debug!(address = %address, %protocol, error = %e, "ignoring beacon");
                }
            }
        }
    }
    Ok(tags)
}

/// Connects through one adapter, scanning when an address is not yet known
pub struct BtleTransport {
    adapter: Adapter,
    scan_duration: Duration,
}

impl BtleTransport {
    pub fn new(adapter: Adapter, scan_duration: Duration) -> Self {
        Self {
            adapter,
            scan_duration,
        }
    }

    pub async fn default_adapter(scan_duration: Duration) -> Result<Self, TransportError> {
        Ok(Self::new(get_adapter().await?, scan_duration))
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn known(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    async fn find(&self, address: &str) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.known(address).await? {
            return Ok(peripheral);
        }
        tracing::debug!(address, duration = ?self.scan_duration, "scanning for device");
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(self.scan_duration).await;
        let found = self.known(address).await;
        self.adapter.stop_scan().await?;
        found?.ok_or(TransportError::NotFound)
    }
}

#[async_trait]
impl Transport for BtleTransport {
    type Link = BtleLink;

    async fn connect(&self, address: &str) -> Result<BtleLink, TransportError> {
        let peripheral = self.find(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        Ok(BtleLink {
            address: address.to_string(),
            peripheral,
            characteristic: None,
            pump: None,
        })
    }
}

pub struct BtleLink {
    address: String,
    peripheral: Peripheral,
    characteristic: Option<Characteristic>,
    pump: Option<JoinHandle<()>>,
}

impl BtleLink {
    fn characteristic(&self) -> Result<&Characteristic, TransportError> {
        self.characteristic
            .as_ref()
            .ok_or(TransportError::NoCharacteristic)
    }

    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn resolve_characteristic(&mut self, uuid: Uuid) -> Result<bool, TransportError> {
        self.peripheral.discover_services().await?;
        self.characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid);
        Ok(self.characteristic.is_some())
    }

    async fn subscribe(&mut self, sink: NotificationSink) -> Result<(), TransportError> {
        let characteristic = self.characteristic()?.clone();
        self.peripheral.subscribe(&characteristic).await?;
        let mut stream = self.peripheral.notifications().await?;
        let address = self.address.clone();
        self.stop_pump();
        self.pump = Some(tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic.uuid {
                    sink.push(notification.value);
                }
            }
            tracing::debug!(address = %address, "notification stream closed");
        }));
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic()?;
        self.peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.stop_pump();
        let characteristic = self.characteristic()?.clone();
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_pump();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
