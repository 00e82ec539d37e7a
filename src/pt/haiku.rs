//! Haiku backend: the `B_RAW_DEVICE_COMMAND` ioctl of the SCSI disk and
//! CD drivers.
//!
//! The command layout and status decoding are plain data and build on every
//! target; only [`HaikuRaw`] itself needs Haiku.

#![cfg_attr(not(target_os = "haiku"), allow(dead_code))]

use std::ffi::c_void;
use std::ptr;
use std::time::Duration;

use static_assertions::const_assert_eq;

use crate::error::PtError;

/// `B_DEVICE_OP_CODES_END + 6`
pub const B_RAW_DEVICE_COMMAND: u32 = 10005;

/// The CDB field of [`RawDeviceCommand`] is fixed at 16 bytes.
pub const MAX_CDB_LEN: usize = 16;

pub const B_RAW_DEVICE_DATA_IN: u8 = 0x01;
pub const B_RAW_DEVICE_REPORT_RESIDUAL: u8 = 0x02;

pub const CAM_REQ_CMP: u8 = 0x01;
pub const CAM_REQ_CMP_ERR: u8 = 0x04;
/// The low bits of `cam_status`; the rest are flags.
pub const CAM_STATUS_MASK: u8 = 0x3f;
/// The device queue is frozen after an error.
pub const CAM_DEV_QFRZN: u8 = 0x40;
/// Sense data was fetched automatically and is valid.
pub const CAM_AUTOSNS_VALID: u8 = 0x80;

/// `raw_device_command` from `<CAM.h>`.
#[repr(C)]
#[derive(Debug)]
pub struct RawDeviceCommand {
    pub command: [u8; MAX_CDB_LEN],
    pub command_length: u8,
    pub flags: u8,
    pub scsi_status: u8,
    pub cam_status: u8,
    pub data: *mut c_void,
    pub data_length: usize,
    pub sense_data: *mut c_void,
    pub sense_data_length: usize,
    /// `bigtime_t`, in microseconds.
    pub timeout: i64,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(std::mem::size_of::<RawDeviceCommand>(), 64);

impl RawDeviceCommand {
    /// Builds the command block. CDBs that do not fit the fixed 16 byte
    /// field are [`PtError::Unsupported`].
    pub fn new(cdb: &[u8], timeout: Duration) -> Result<Self, PtError> {
        if cdb.len() > MAX_CDB_LEN {
            return Err(PtError::Unsupported(
                "raw device commands carry at most 16 CDB bytes",
            ));
        }
        let mut command = [0u8; MAX_CDB_LEN];
        command[..cdb.len()].copy_from_slice(cdb);
        Ok(Self {
            command,
            command_length: cdb.len() as u8,
            flags: B_RAW_DEVICE_REPORT_RESIDUAL,
            scsi_status: 0,
            cam_status: 0,
            data: ptr::null_mut(),
            data_length: 0,
            sense_data: ptr::null_mut(),
            sense_data_length: 0,
            timeout: i64::try_from(timeout.as_micros()).unwrap_or(i64::MAX),
        })
    }
}

/// Residual as the driver's report implies it: requested minus the
/// `data_length` left in the command block after the call.
pub fn resid(requested: usize, reported: usize) -> i64 {
    requested as i64 - reported as i64
}

/// A CAM status other than "completed" or "completed with error" means the
/// command never produced a SCSI status. Flag bits are ignored.
pub fn cam_transport_error(cam_status: u8) -> u32 {
    match cam_status & CAM_STATUS_MASK {
        CAM_REQ_CMP | CAM_REQ_CMP_ERR => 0,
        other => u32::from(other),
    }
}

pub fn autosense_valid(cam_status: u8) -> bool {
    cam_status & CAM_AUTOSNS_VALID != 0
}

#[cfg(target_os = "haiku")]
mod raw {
    use std::fs::{File, OpenOptions};
    use std::os::fd::{AsRawFd, IntoRawFd};

    use super::*;
    use crate::pt::backend::{
        Capabilities, DataBuffer, OpenFlags, PlatformReport, PtBackend, SubmitView,
    };

    /// The Haiku raw device command backend.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HaikuRaw;

    impl PtBackend for HaikuRaw {
        type Handle = File;

        const NAME: &'static str = "haiku-raw";
        const CAPABILITIES: Capabilities = Capabilities::empty();

        fn open(&self, name: &str, flags: OpenFlags) -> Result<File, PtError> {
            OpenOptions::new()
                .read(true)
                .write(!flags.contains(OpenFlags::READ_ONLY))
                .open(name)
                .map_err(|err| PtError::from_io(&err, "open"))
        }

        fn close(&self, handle: File) -> Result<(), PtError> {
            let fd = handle.into_raw_fd();
            // SAFETY: `fd` came from `into_raw_fd`, so nothing else owns it.
            match unsafe { libc::close(fd) } {
                0 => Ok(()),
                _ => Err(PtError::last_os_error("close")),
            }
        }

        fn descriptor(handle: &File) -> i64 {
            i64::from(handle.as_raw_fd())
        }

        fn submit(
            &self,
            handle: &File,
            view: SubmitView<'_>,
        ) -> Result<PlatformReport, PtError> {
            let mut cmd = RawDeviceCommand::new(view.cdb, view.timeout)?;
            let requested = view.data.len();
            match view.data {
                DataBuffer::None => {}
                DataBuffer::In(buf) => {
                    cmd.flags |= B_RAW_DEVICE_DATA_IN;
                    cmd.data = buf.as_mut_ptr().cast();
                    cmd.data_length = buf.len();
                }
                DataBuffer::Out(buf) => {
                    cmd.data = buf.as_ptr().cast_mut().cast();
                    cmd.data_length = buf.len();
                }
            }
            if !view.sense.is_empty() {
                cmd.sense_data = view.sense.as_mut_ptr().cast();
                cmd.sense_data_length = view.sense.len();
            }

            // SAFETY: the data and sense pointers refer to buffers borrowed
            // by `view` for the duration of this call.
            let rc = unsafe {
                libc::ioctl(
                    handle.as_raw_fd(),
                    B_RAW_DEVICE_COMMAND as _,
                    &mut cmd as *mut RawDeviceCommand,
                )
            };
            if rc < 0 {
                return Err(PtError::last_os_error("B_RAW_DEVICE_COMMAND"));
            }

            Ok(PlatformReport {
                os_error: 0,
                transport_error: cam_transport_error(cmd.cam_status),
                scsi_status: cmd.scsi_status,
                driver_sense: autosense_valid(cmd.cam_status),
                resid: resid(requested, cmd.data_length),
                sense_len: cmd.sense_data_length,
                duration: None,
            })
        }
    }
}

#[cfg(target_os = "haiku")]
pub use raw::HaikuRaw;
