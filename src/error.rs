use thiserror::Error;

/// Errors that abort an OTA session.
#[derive(Debug, Error)]
pub enum OtaError {
    /// No device advertising the requested name was discovered within the
    /// scan window.
    #[error("device `{0}` has not been found")]
    DeviceNotFound(String),

    /// A transport-level write failed. There is no retry and no partial
    /// resume; the transfer is abandoned.
    #[error("failed to write packet {index}")]
    WriteFailed {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The link dropped while packets were still outstanding.
    #[error("OTA device disconnected without warning")]
    UnexpectedDisconnect,

    #[error(transparent)]
    Firmware(#[from] crate::firmware::FirmwareError),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl OtaError {
    /// Process exit code reported for this error.
    ///
    /// `0` is success and clap already uses `2` for usage errors, so the
    /// two conditions the receiver side cares about get their own codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            OtaError::DeviceNotFound(_) => 3,
            OtaError::UnexpectedDisconnect => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_conditions_map_to_distinct_exit_codes() {
        let not_found = OtaError::DeviceNotFound("Meshtastic_0000".into());
        let dropped = OtaError::UnexpectedDisconnect;
        assert_ne!(not_found.exit_code(), 0);
        assert_ne!(dropped.exit_code(), 0);
        assert_ne!(not_found.exit_code(), dropped.exit_code());
    }
}
