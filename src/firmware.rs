use std::path::Path;
use thiserror::Error;

/// Packets in transmission order; every packet except possibly the last
/// holds exactly `packet_size` bytes.
pub type PacketSequence = Vec<Vec<u8>>;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("firmware image is empty, nothing to send")]
    EmptyImage,
    #[error("failed to read firmware image")]
    Io(#[from] std::io::Error),
}

/// Read a firmware image from disk.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<u8>, FirmwareError> {
    Ok(std::fs::read(path)?)
}

/// Split an image into packets of `packet_size` bytes, the last one
/// holding the remainder. An empty image is rejected outright rather than
/// producing an empty sequence.
pub fn chunk(image: &[u8], packet_size: usize) -> Result<PacketSequence, FirmwareError> {
    if image.is_empty() {
        return Err(FirmwareError::EmptyImage);
    }
    Ok(image.chunks(packet_size).map(<[u8]>::to_vec).collect())
}
