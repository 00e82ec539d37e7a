//! SCSI pass-through transport.
//!
//! A [`PtRequest`] collects a CDB, a sense buffer and at most one data
//! buffer. It is submitted through a [`PtDevice`], which owns an OS handle
//! opened by a [`PtBackend`]. The backend issues exactly one platform call
//! per submission and reports the raw result, which [`categorize`] turns
//! into a [`ResultCategory`].
//!
//! Platform backends:
//! - [`LinuxSg`]: the `SG_IO` ioctl of the Linux sg driver
//! - [`Win32Spt`]: `IOCTL_SCSI_PASS_THROUGH{,_DIRECT}`
//! - [`HaikuRaw`]: `B_RAW_DEVICE_COMMAND`
//!
//! [`NativeBackend`] names the one matching the build target.

mod backend;
mod device;
pub mod handle_table;
pub mod haiku;
#[cfg(target_os = "linux")]
mod linux;
#[cfg(test)]
pub(crate) mod mock;
mod outcome;
mod request;
pub mod win32;

pub use backend::{Capabilities, DataBuffer, OpenFlags, PlatformReport, PtBackend, SubmitView};
pub use device::{DeviceId, PtDevice};
pub use outcome::{RawOutcome, ResultCategory, categorize};
pub use request::{DataDirection, Misuse, PtRequest, Released, TaskAttributes};

#[cfg(target_os = "haiku")]
pub use haiku::HaikuRaw;
#[cfg(target_os = "linux")]
pub use linux::{LinuxSg, SgFlags};
#[cfg(windows)]
pub use win32::Win32Spt;

#[cfg(target_os = "linux")]
pub type NativeBackend = LinuxSg;
#[cfg(windows)]
pub type NativeBackend = Win32Spt;
#[cfg(target_os = "haiku")]
pub type NativeBackend = HaikuRaw;

/// Largest CDB any backend accepts (variable length CDBs included).
pub const MAX_CDB_LEN: usize = 260;
/// Smallest CDB, a group 0 six byte command.
pub const MIN_CDB_LEN: usize = 6;
