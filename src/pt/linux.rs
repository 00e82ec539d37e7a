//! Linux sg driver backend: one `SG_IO` ioctl per command.
//!
//! Works on `/dev/sg*` as well as on block devices whose driver accepts
//! `SG_IO` (`/dev/sd*`, `/dev/sr*`, `/dev/nvme*n*` through translation).

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::ptr;
use std::time::Duration;

use bitflags::bitflags;
use libc::{c_int, c_uint, c_ushort, c_void};
use static_assertions::const_assert_eq;
use tracing::trace;

use super::backend::{
    Capabilities, DataBuffer, OpenFlags, PlatformReport, PtBackend, SubmitView,
};
use crate::error::PtError;

#[cfg(not(target_env = "musl"))]
const SG_IO: libc::c_ulong = 0x2285;
#[cfg(target_env = "musl")]
const SG_IO: c_int = 0x2285;

const SG_INTERFACE_ID: c_int = b'S' as c_int;

const SG_DXFER_NONE: c_int = -1;
const SG_DXFER_TO_DEV: c_int = -2;
const SG_DXFER_FROM_DEV: c_int = -3;

const DRIVER_STATUS_MASK: c_ushort = 0x0f;
const DRIVER_SENSE: c_ushort = 0x08;

/// `mx_sb_len` is a single byte.
const MAX_SENSE_LEN: usize = u8::MAX as usize;

bitflags! {
    /// `SG_FLAG_*` values accepted by [`super::PtRequest::set_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SgFlags: u32 {
        const DIRECT_IO = 0x01;
        const UNUSED_LUN_INHIBIT = 0x02;
        const MMAP_IO = 0x04;
        const Q_AT_TAIL = 0x10;
        const Q_AT_HEAD = 0x20;
        const NO_DXFER = 0x1_0000;
    }
}

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
#[derive(Debug)]
struct SgIoHdr {
    interface_id: c_int,
    dxfer_direction: c_int,
    cmd_len: u8,
    mx_sb_len: u8,
    iovec_count: c_ushort,
    dxfer_len: c_uint,
    dxferp: *mut c_void,
    cmdp: *const u8,
    sbp: *mut u8,
    timeout: c_uint,
    flags: c_uint,
    pack_id: c_int,
    usr_ptr: *mut c_void,
    status: u8,
    masked_status: u8,
    msg_status: u8,
    sb_len_wr: u8,
    host_status: c_ushort,
    driver_status: c_ushort,
    resid: c_int,
    duration: c_uint,
    info: c_uint,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(std::mem::size_of::<SgIoHdr>(), 88);
#[cfg(target_pointer_width = "32")]
const_assert_eq!(std::mem::size_of::<SgIoHdr>(), 64);

/// Host or driver failures below the SCSI layer, packed as
/// `host_status << 8 | driver_status`. Zero when the command reached the
/// device, even if the driver only flagged sense data.
fn transport_error(host_status: c_ushort, driver_status: c_ushort) -> u32 {
    let driver = driver_status & DRIVER_STATUS_MASK;
    if host_status != 0 || (driver != 0 && driver != DRIVER_SENSE) {
        (u32::from(host_status) << 8) | u32::from(driver_status)
    } else {
        0
    }
}

fn millis(timeout: Duration) -> c_uint {
    c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX)
}

/// The Linux sg pass-through backend. Handles are plain [`File`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSg;

impl PtBackend for LinuxSg {
    type Handle = File;

    const NAME: &'static str = "linux-sg";
    const CAPABILITIES: Capabilities = Capabilities::FLAGS;

    fn open(&self, name: &str, flags: OpenFlags) -> Result<File, PtError> {
        let mut custom = libc::O_NONBLOCK;
        if flags.contains(OpenFlags::EXCLUSIVE) {
            custom |= libc::O_EXCL;
        }
        OpenOptions::new()
            .read(true)
            .write(!flags.contains(OpenFlags::READ_ONLY))
            .custom_flags(custom)
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

    fn submit(&self, handle: &File, view: SubmitView<'_>) -> Result<PlatformReport, PtError> {
        let cmd_len = u8::try_from(view.cdb.len())
            .map_err(|_| PtError::Unsupported("sg carries at most 255 CDB bytes"))?;
        let sense_len = view.sense.len().min(MAX_SENSE_LEN);

        let (dxfer_direction, dxferp, dxfer_len) = match view.data {
            DataBuffer::None => (SG_DXFER_NONE, ptr::null_mut(), 0),
            DataBuffer::In(buf) => (SG_DXFER_FROM_DEV, buf.as_mut_ptr().cast(), buf.len()),
            DataBuffer::Out(buf) => (SG_DXFER_TO_DEV, buf.as_ptr().cast_mut().cast(), buf.len()),
        };
        let dxfer_len = c_uint::try_from(dxfer_len)
            .map_err(|_| PtError::BadParams(format!("{dxfer_len} byte transfer is too large")))?;

        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction,
            cmd_len,
            mx_sb_len: sense_len as u8,
            iovec_count: 0,
            dxfer_len,
            dxferp,
            cmdp: view.cdb.as_ptr(),
            sbp: if sense_len > 0 {
                view.sense.as_mut_ptr()
            } else {
                ptr::null_mut()
            },
            timeout: millis(view.timeout),
            flags: view.attributes.flags,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in `hdr` refers to a buffer borrowed by
        // `view` for the duration of this call, with matching lengths.
        let rc = unsafe { libc::ioctl(handle.as_raw_fd(), SG_IO, &mut hdr as *mut SgIoHdr) };
        if rc < 0 {
            return Err(PtError::last_os_error("SG_IO"));
        }
        trace!(
            status = hdr.status,
            host_status = hdr.host_status,
            driver_status = hdr.driver_status,
            info = hdr.info,
            "SG_IO returned"
        );

        Ok(PlatformReport {
            os_error: 0,
            transport_error: transport_error(hdr.host_status, hdr.driver_status),
            scsi_status: hdr.status,
            driver_sense: hdr.driver_status & DRIVER_STATUS_MASK == DRIVER_SENSE,
            resid: i64::from(hdr.resid),
            sense_len: usize::from(hdr.sb_len_wr),
            duration: Some(Duration::from_millis(u64::from(hdr.duration))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pt::{PtDevice, PtRequest};

    #[test]
    fn transport_error_ignores_driver_sense() {
        assert_eq!(transport_error(0, 0), 0);
        assert_eq!(transport_error(0, DRIVER_SENSE), 0);
        // DID_NO_CONNECT
        assert_eq!(transport_error(0x01, 0), 0x0100);
        // DRIVER_TIMEOUT with a suggestion byte
        assert_eq!(transport_error(0, 0x26), 0x26);
        assert_eq!(transport_error(0x07, DRIVER_SENSE), 0x0708);
    }

    #[test]
    fn timeout_saturates() {
        assert_eq!(millis(Duration::from_secs(60)), 60_000);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), c_uint::MAX);
    }

    #[test]
    fn open_missing_device_reports_errno() {
        let err = PtDevice::open(LinuxSg, "/dev/nonexistent-sg-device", OpenFlags::READ_ONLY)
            .unwrap_err();
        assert!(matches!(err, PtError::Os { errno: libc::ENOENT, .. }));
        assert_eq!(err.negated(), -libc::ENOENT);
    }

    #[test]
    fn requests_carry_only_flags() {
        let mut req = PtRequest::with_capabilities(LinuxSg::CAPABILITIES);
        req.set_flags(SgFlags::Q_AT_HEAD.bits()).set_tag(1);
        assert_eq!(req.misuse_count(), 1);
    }
}
