use thiserror::Error as ThisError;

/// Errors the flashing session can terminate with.
///
/// Every variant drives the session to its teardown phase; there is no
/// in-session retry beyond the auto-baud attempts in Phase 1.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("failed to open serial port: {0}")]
    PortOpen(String),

    #[error("bootloader did not respond to auto-baud probe")]
    BootloaderUnresponsive,

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("unknown or unverifiable chip (product id 0x{0:04X})")]
    UnknownChip(u16),

    #[error("image too large: {image_bytes} bytes does not fit in {flash_size} bytes of flash")]
    ImageTooLarge { image_bytes: usize, flash_size: usize },

    #[error("verification mismatch in segment {segment} at byte offset {offset}")]
    VerifyMismatch { segment: usize, offset: usize },

    #[error("timed out waiting for the bootloader")]
    Timeout,

    #[error("I/O error communicating with bootloader: {0}")]
    Io(#[from] std::io::Error),
}
