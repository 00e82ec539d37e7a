//! Tunables shared by the transport and the command wrappers.

use std::time::Duration;

/// Timeout applied when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// START STOP UNIT may spin a drive up, which takes a while.
pub const START_STOP_TIMEOUT: Duration = Duration::from_secs(120);

/// FORMAT UNIT and friends.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(7200);

/// Sense buffer length used by the command wrappers.
pub const SENSE_BUFF_LEN: usize = 64;

/// How a backend moves the data phase between the caller and the OS.
///
/// Only the Windows backend distinguishes the two; the others always hand
/// the caller's buffer to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// The OS is given a pointer to the caller's buffer.
    #[default]
    Direct,
    /// Data is copied through a buffer owned by the request.
    Buffered,
}

#[derive(Debug, Clone)]
pub struct PtConfig {
    pub default_timeout: Duration,
    pub transfer_mode: TransferMode,
    pub sense_len: usize,
    /// Open devices read-only. Some commands (MODE SELECT, START STOP UNIT)
    /// need write access on Linux.
    pub read_only: bool,
}

impl Default for PtConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            transfer_mode: TransferMode::default(),
            sense_len: SENSE_BUFF_LEN,
            read_only: false,
        }
    }
}
