use crate::error::OtaError;
use crate::firmware::PacketSequence;
use crate::transport::{OtaTransport, OtaTransportManager, TransportEvent};

use futures::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Fixed packet size written to the data characteristic.
///
/// The receiver does not negotiate an MTU; it expects payloads of at most
/// 510 bytes on the data characteristic.
pub const PACKET_SIZE: usize = 510;

/// Payload the receiver notifies on the control characteristic when it is
/// ready for the next packet.
const SEND_MORE: [u8; 1] = [0x00];

/// Signal received on the control characteristic.
#[derive(Debug, Clone, PartialEq)]
enum AckSignal {
    MoreDataRequested,
    /// Any payload other than `SEND_MORE`. It still takes up the queue
    /// slot for the packet in flight, so the pacing loop advances as if
    /// more data had been requested. Known ambiguity of the receiver
    /// protocol, preserved as-is.
    Unrecognized { value: Vec<u8>, sender: uuid::Uuid },
}

enum LinkEvent {
    Ack(AckSignal),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    NotStarted,
    InProgress,
    Completed,
}

/// Knobs that are fixed in the wire protocol but tunable in code.
pub struct TransferConfig {
    /// Pause between subscribing to the control characteristic and the
    /// first packet, so the receiver can finish wiring up its notifier.
    /// Not a handshake, purely an empirical pacing guard.
    pub settle_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Connect to the named device and upload all packets.
pub async fn ota_run<M: OtaTransportManager>(
    manager: M,
    name: &str,
    packets: &PacketSequence,
    config: &TransferConfig,
) -> Result<(), OtaError> {
    let transport = manager.connect(name).await?;
    transfer(&transport, packets, config).await
}

/// Run the pacing loop against an open transport.
///
/// The control characteristic is subscribed before anything is written so
/// an early ready signal cannot be missed. Acknowledgments flow through a
/// FIFO queue fed by the listener task; exactly one entry is consumed per
/// packet, and packet `i + 1` is never written before that.
async fn transfer<T: OtaTransport>(
    transport: &T,
    packets: &PacketSequence,
    config: &TransferConfig,
) -> Result<(), OtaError> {
    transport.subscribe(ota_uuids::CONTROL).await?;
    let events = transport.events().await?;

    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(TransferState::NotStarted);
    let listener = tokio::spawn(listen(events, ack_tx, state_rx));

    log::info!("Total packets to be sent: {}", packets.len());

    tokio::time::sleep(config.settle_delay).await;

    let pb = ProgressBar::new(packets.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{msg} [{elapsed}] [{wide_bar:.blue/white}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#> "),
    );
    pb.set_message("Uploading...");

    state_tx.send_replace(TransferState::InProgress);
    let result = send_packets(transport, packets, &mut ack_rx, &pb).await;
    if result.is_ok() {
        state_tx.send_replace(TransferState::Completed);
        pb.finish_with_message("Done");
    } else {
        pb.abandon();
    }
    listener.abort();
    result
}

async fn send_packets<T: OtaTransport>(
    transport: &T,
    packets: &PacketSequence,
    acks: &mut mpsc::UnboundedReceiver<LinkEvent>,
    pb: &ProgressBar,
) -> Result<(), OtaError> {
    for (index, packet) in packets.iter().enumerate() {
        transport
            .write(ota_uuids::DATA, packet)
            .await
            .map_err(|source| OtaError::WriteFailed { index, source })?;
        pb.inc(1);
        // The wait is unbounded; the receiver defines no readiness timeout.
        match acks.recv().await {
            Some(LinkEvent::Ack(AckSignal::MoreDataRequested)) => log::debug!("More data requested"),
            Some(LinkEvent::Ack(AckSignal::Unrecognized { value, sender })) => {
                log::debug!("Consuming unrecognized signal from {sender} ({value:02x?}) as ready");
            }
            Some(LinkEvent::Closed) | None => return Err(OtaError::UnexpectedDisconnect),
        }
    }
    Ok(())
}

/// Listener half of the acknowledgment channel.
///
/// Runs as its own task so notifications are queued even while the
/// controller is busy writing. It never blocks and never exits the
/// process: a closure observed before the transfer completes is forwarded
/// to the controller as a fatal `Closed` signal.
async fn listen(
    mut events: impl Stream<Item = TransportEvent> + Unpin,
    acks: mpsc::UnboundedSender<LinkEvent>,
    state: watch::Receiver<TransferState>,
) {
    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Notification { characteristic, value } if characteristic == ota_uuids::CONTROL => {
                let signal = if value == SEND_MORE {
                    AckSignal::MoreDataRequested
                } else {
                    log::warn!("Unknown response on control channel: sender: {characteristic}, data: {value:02x?}");
                    AckSignal::Unrecognized {
                        value,
                        sender: characteristic,
                    }
                };
                if acks.send(LinkEvent::Ack(signal)).is_err() {
                    return;
                }
            }
            TransportEvent::Notification { .. } => {}
            TransportEvent::Disconnected => {
                if *state.borrow() == TransferState::Completed {
                    log::debug!("Device disconnected after a completed transfer");
                } else {
                    let _ = acks.send(LinkEvent::Closed);
                }
                return;
            }
        }
    }
    // The event stream ending counts as a closure too.
    if *state.borrow() != TransferState::Completed {
        let _ = acks.send(LinkEvent::Closed);
    }
}

/// OTA service & characteristic UUIDs
///
/// These must match the receiver firmware byte for byte.
#[allow(dead_code)]
pub mod ota_uuids {
    use uuid::Uuid;
    /// OTA Service
    pub const SERVICE: Uuid = Uuid::from_u128(0x4FAFC201_1FB5_459E_8FCC_C5C9C331914B);
    /// Control characteristic, notifies acknowledgments
    pub const CONTROL: Uuid = Uuid::from_u128(0x62EC0272_3EC5_11EB_B378_0242AC130003);
    /// Data characteristic, receives firmware packets
    pub const DATA: Uuid = Uuid::from_u128(0x62EC0272_3EC5_11EB_B378_0242AC130005);
}
