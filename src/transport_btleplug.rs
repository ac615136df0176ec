use crate::error::OtaError;
use crate::transport::{OtaTransport, OtaTransportManager, TransportEvent};

use anyhow::{Context, Result, anyhow};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::future;
use futures::stream::{Stream, StreamExt};
use indicatif::ProgressBar;
use std::time::Duration;
use tokio::time::timeout;

/// How long to scan for the target before reporting it missing.
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OtaTransportManagerBtleplug {
    adapter: Adapter,
}

impl OtaTransportManagerBtleplug {
    pub async fn new() -> Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapters = manager.adapters().await?;
        if let Some(adapter) = adapters.into_iter().next() {
            Ok(OtaTransportManagerBtleplug { adapter })
        } else {
            Err(anyhow!("No Bluetooth adapter found"))
        }
    }

    async fn find_peripheral_by_name(&self, name: &str, pb: &ProgressBar) -> Result<Peripheral> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let mut events = self.adapter.events().await?;
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDiscovered(id) = event {
                let peripheral = self.adapter.peripheral(&id).await?;
                if let Some(properties) = peripheral.properties().await? {
                    pb.set_message(Self::format_peripheral_properties(&properties));
                    if properties.local_name.as_deref() == Some(name) {
                        self.adapter.stop_scan().await?;
                        return Ok(peripheral);
                    }
                }
            }
        }
        Err(anyhow!("Scanning stopped unexpectedly"))
    }

    fn format_peripheral_properties(properties: &PeripheralProperties) -> String {
        let name = properties.local_name.as_deref().unwrap_or("None");
        let rssi = properties.rssi.unwrap_or(-99);
        format!("rssi: {}, address: {}, name: {}", rssi, properties.address, name)
    }
}

impl OtaTransportManager for OtaTransportManagerBtleplug {
    type Transport = OtaTransportBtleplug;

    async fn connect(&self, name: &str) -> Result<Self::Transport, OtaError> {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(64));
        pb.println(format!("Searching for `{name}`..."));
        let peripheral = match timeout(SCAN_TIMEOUT, self.find_peripheral_by_name(name, &pb)).await {
            Ok(found) => found?,
            Err(_) => {
                pb.finish_and_clear();
                let _ = self.adapter.stop_scan().await;
                return Err(OtaError::DeviceNotFound(name.to_owned()));
            }
        };
        peripheral.connect().await.context("Failed to establish a connection")?;
        peripheral.discover_services().await.context("Service discovery failed")?;
        pb.finish();
        log::info!("`{name}` found");
        Ok(OtaTransportBtleplug {
            adapter: self.adapter.clone(),
            peripheral,
        })
    }
}

pub struct OtaTransportBtleplug {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl OtaTransportBtleplug {
    fn characteristic(&self, uuid: uuid::Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|char| char.uuid == uuid)
            .ok_or_else(|| anyhow!("characteristic {uuid} not found"))
    }
}

impl OtaTransport for OtaTransportBtleplug {
    async fn subscribe(&self, char: uuid::Uuid) -> Result<()> {
        let char = self.characteristic(char)?;
        self.peripheral.subscribe(&char).await?;
        Ok(())
    }

    async fn write(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        let char = self.characteristic(char)?;
        // Fire and forget; pacing happens at the acknowledgment level.
        self.peripheral.write(&char, bytes, WriteType::WithoutResponse).await?;
        Ok(())
    }

    async fn events(&self) -> Result<impl Stream<Item = TransportEvent> + Send + Unpin + 'static> {
        let notifications = self.peripheral.notifications().await?.map(|ntf| TransportEvent::Notification {
            characteristic: ntf.uuid,
            value: ntf.value,
        });
        let id = self.peripheral.id();
        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            let dropped = matches!(&event, CentralEvent::DeviceDisconnected(dev) if *dev == id);
            future::ready(dropped.then_some(TransportEvent::Disconnected))
        });
        Ok(futures::stream::select(notifications, disconnects).boxed())
    }
}
