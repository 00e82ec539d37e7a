use std::time::Duration;

use bitflags::bitflags;

use super::request::{DataDirection, TaskAttributes};
use crate::config::TransferMode;
use crate::error::PtError;

bitflags! {
    /// Optional request attributes a backend can carry to the OS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const TAG = 0x01;
        const TASK_MANAGEMENT = 0x02;
        const TASK_ATTRIBUTE = 0x04;
        const PRIORITY = 0x08;
        /// Backend specific flag word (e.g. `SG_FLAG_*` on Linux).
        const FLAGS = 0x10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const READ_ONLY = 0x01;
        /// Ask for exclusive access where the platform supports it.
        const EXCLUSIVE = 0x02;
    }
}

/// The data phase of a request, borrowed from the caller.
#[derive(Debug, Default)]
pub enum DataBuffer<'a> {
    #[default]
    None,
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

impl DataBuffer<'_> {
    pub fn direction(&self) -> DataDirection {
        match self {
            Self::None => DataDirection::None,
            Self::In(_) => DataDirection::In,
            Self::Out(_) => DataDirection::Out,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::In(buf) => buf.len(),
            Self::Out(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn reborrow(&mut self) -> DataBuffer<'_> {
        match self {
            Self::None => DataBuffer::None,
            Self::In(buf) => DataBuffer::In(&mut **buf),
            Self::Out(buf) => DataBuffer::Out(&**buf),
        }
    }
}

/// Everything a backend needs to issue one command.
///
/// Borrowed from a validated [`super::PtRequest`]; backends never see a
/// request that failed its pre-submission checks.
#[derive(Debug)]
pub struct SubmitView<'r> {
    pub cdb: &'r [u8],
    pub data: DataBuffer<'r>,
    /// Empty when the caller attached no sense buffer.
    pub sense: &'r mut [u8],
    pub timeout: Duration,
    pub attributes: &'r TaskAttributes,
    pub transfer_mode: TransferMode,
}

/// Raw result fields as one platform call reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformReport {
    /// errno-like code for a failure the OS reported after the call was made.
    pub os_error: i32,
    /// Platform specific failure below the SCSI layer, 0 if none.
    pub transport_error: u32,
    pub scsi_status: u8,
    /// The driver flagged valid sense data independently of the status.
    pub driver_sense: bool,
    /// Requested minus transferred bytes, as the platform computes it.
    pub resid: i64,
    /// Sense bytes the platform claims to have written.
    pub sense_len: usize,
    pub duration: Option<Duration>,
}

/// One OS pass-through mechanism.
///
/// Implementations open and close device handles and turn a [`SubmitView`]
/// into exactly one platform call. They never retry and never interpret
/// SCSI status; [`super::categorize`] does that.
pub trait PtBackend {
    /// The OS resource behind an open device.
    type Handle;

    const NAME: &'static str;
    const CAPABILITIES: Capabilities;

    fn open(&self, name: &str, flags: OpenFlags) -> Result<Self::Handle, PtError>;

    fn close(&self, handle: Self::Handle) -> Result<(), PtError>;

    /// A number identifying the handle, used to match requests to devices.
    fn descriptor(handle: &Self::Handle) -> i64;

    /// Nonzero when descriptors are only unique within this backend value.
    /// Clones sharing the same descriptor space return the same number.
    fn instance(&self) -> u64 {
        0
    }

    /// Issues the command and blocks until it completes or times out.
    ///
    /// `Err` means the platform primitive could not be invoked or failed as
    /// a whole; a device reporting an error is an `Ok` report.
    fn submit(
        &self,
        handle: &Self::Handle,
        view: SubmitView<'_>,
    ) -> Result<PlatformReport, PtError>;
}

/// Copies sense bytes into the caller's buffer, truncating to its length.
///
/// Returns the number of bytes copied.
#[cfg_attr(not(any(test, windows)), allow(dead_code))]
pub(crate) fn copy_sense(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
