use crate::error::OtaError;

use anyhow::Result;
use futures::Stream;

/// Event surfaced by the transport layer while a link is open.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Notification received on a subscribed characteristic.
    Notification {
        characteristic: uuid::Uuid,
        value: Vec<u8>,
    },
    /// The link to the device was closed, for whatever reason.
    Disconnected,
}

/// OTA transport interface
pub trait OtaTransport {
    /// Subscribe to notifications on the given characteristic
    async fn subscribe(&self, char: uuid::Uuid) -> Result<()>;
    /// Write without response
    async fn write(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()>;
    /// Stream of notifications and link closure events, in arrival order
    async fn events(&self) -> Result<impl Stream<Item = TransportEvent> + Send + Unpin + 'static>;
}

/// Discovers devices and opens OTA transports
pub trait OtaTransportManager {
    type Transport: OtaTransport;

    /// Scan for a device advertising the given name and connect to it
    async fn connect(&self, name: &str) -> Result<Self::Transport, OtaError>;
}
