//! Windows backend: `IOCTL_SCSI_PASS_THROUGH` and `IOCTL_SCSI_PASS_THROUGH_DIRECT`.
//!
//! Handles live in a [`HandleTable`](super::handle_table::HandleTable) owned
//! by the backend, so requests refer to a device by a small descriptor
//! rather than a raw `HANDLE`.

pub mod ffi;
pub mod name;

#[cfg(windows)]
pub use spt::Win32Spt;

#[cfg(windows)]
mod spt {
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{
        CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE,
    };
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE, FILE_SHARE_READ,
        FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::IO::DeviceIoControl;
    use windows::core::HSTRING;

    use super::ffi::{
        BufferedBlock, DirectBlock, Header, IOCTL_SCSI_PASS_THROUGH,
        IOCTL_SCSI_PASS_THROUGH_DIRECT, SCSI_IOCTL_DATA_IN, SCSI_IOCTL_DATA_OUT,
        SCSI_IOCTL_DATA_UNSPECIFIED, SPT_CDB_LEN, SPT_SENSE_LEN, timeout_secs,
    };
    use super::name::{self, ScsiAddress};
    use crate::config::TransferMode;
    use crate::error::PtError;
    use crate::pt::backend::{
        Capabilities, DataBuffer, OpenFlags, PlatformReport, PtBackend, SubmitView, copy_sense,
    };
    use crate::pt::handle_table::HandleTable;

    /// `EIO`, recorded when `DeviceIoControl` itself fails.
    const EIO: i32 = 5;

    #[derive(Debug)]
    struct Win32Slot {
        /// `HANDLE` as an integer so the table stays `Send`.
        handle: isize,
        address: ScsiAddress,
    }

    impl Win32Slot {
        fn handle(&self) -> HANDLE {
            HANDLE(self.handle as *mut c_void)
        }
    }

    fn win32_code(err: &windows::core::Error) -> i32 {
        (err.code().0 as u32 & 0xffff) as i32
    }

    static NEXT_TABLE: AtomicU64 = AtomicU64::new(1);

    /// The Windows SCSI pass-through backend. Clones share one handle table.
    ///
    /// Every table hands out descriptors from the same offset, so each one
    /// also carries a serial that keeps device ids distinct.
    #[derive(Debug, Clone)]
    pub struct Win32Spt {
        table: Arc<Mutex<HandleTable<Win32Slot>>>,
        serial: u64,
    }

    impl Default for Win32Spt {
        fn default() -> Self {
            Self {
                table: Arc::default(),
                serial: NEXT_TABLE.fetch_add(1, Ordering::Relaxed),
            }
        }
    }

    impl Win32Spt {
        pub fn new() -> Self {
            Self::default()
        }

        fn table(&self) -> MutexGuard<'_, HandleTable<Win32Slot>> {
            self.table.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn slot(&self, descriptor: i64) -> Result<(HANDLE, ScsiAddress), PtError> {
            let table = self.table();
            let slot = table.get(descriptor)?;
            Ok((slot.handle(), slot.address))
        }
    }

    impl PtBackend for Win32Spt {
        type Handle = i64;

        const NAME: &'static str = "win32-spt";
        const CAPABILITIES: Capabilities = Capabilities::empty();

        #[tracing::instrument(skip(self))]
        fn open(&self, device: &str, flags: OpenFlags) -> Result<i64, PtError> {
            let target = name::parse(device);
            let path = target.path();
            debug!(%path, address = %target.address(), "opening");

            let mut access = GENERIC_READ.0;
            if !flags.contains(OpenFlags::READ_ONLY) {
                access |= GENERIC_WRITE.0;
            }
            let share = if flags.contains(OpenFlags::EXCLUSIVE) {
                FILE_SHARE_MODE(0)
            } else {
                FILE_SHARE_READ | FILE_SHARE_WRITE
            };

            // SAFETY: `HSTRING` keeps the wide path alive for the call.
            let handle = unsafe {
                CreateFileW(
                    &HSTRING::from(path.as_str()),
                    access,
                    share,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAGS_AND_ATTRIBUTES(0),
                    None,
                )
            }
            .map_err(|err| PtError::Os {
                errno: win32_code(&err),
                context: "CreateFileW",
            })?;

            let slot = Win32Slot {
                handle: handle.0 as isize,
                address: target.address(),
            };
            let inserted = self.table().insert(slot);
            match inserted {
                Ok(descriptor) => Ok(descriptor),
                Err(err) => {
                    // SAFETY: the handle was just opened and is not shared.
                    let _ = unsafe { CloseHandle(handle) };
                    Err(err)
                }
            }
        }

        fn close(&self, descriptor: i64) -> Result<(), PtError> {
            let slot = self.table().remove(descriptor)?;
            // SAFETY: removing the slot transferred sole ownership of the handle.
            unsafe { CloseHandle(slot.handle()) }.map_err(|err| PtError::Os {
                errno: win32_code(&err),
                context: "CloseHandle",
            })
        }

        fn descriptor(handle: &i64) -> i64 {
            *handle
        }

        fn instance(&self) -> u64 {
            self.serial
        }

        fn submit(
            &self,
            handle: &i64,
            mut view: SubmitView<'_>,
        ) -> Result<PlatformReport, PtError> {
            if view.cdb.len() > SPT_CDB_LEN {
                return Err(PtError::Unsupported(
                    "SCSI pass-through carries at most 16 CDB bytes",
                ));
            }
            let requested = view.data.len();
            let data_len = u32::try_from(requested)
                .map_err(|_| PtError::BadParams(format!("{requested} byte transfer is too large")))?;
            let (device, address) = self.slot(*handle)?;

            let header = Header {
                address,
                cdb: view.cdb,
                sense_len: view.sense.len().min(SPT_SENSE_LEN) as u8,
                data_in: match view.data {
                    DataBuffer::None => SCSI_IOCTL_DATA_UNSPECIFIED,
                    DataBuffer::In(_) => SCSI_IOCTL_DATA_IN,
                    DataBuffer::Out(_) => SCSI_IOCTL_DATA_OUT,
                },
                data_len,
                timeout: timeout_secs(view.timeout),
            };

            let mut returned = 0u32;
            let (result, scsi_status, transferred, sense) = match view.transfer_mode {
                TransferMode::Direct => {
                    let data: *mut c_void = match &mut view.data {
                        DataBuffer::None => ptr::null_mut(),
                        DataBuffer::In(buf) => buf.as_mut_ptr().cast(),
                        DataBuffer::Out(buf) => buf.as_ptr().cast_mut().cast(),
                    };
                    let mut block = DirectBlock::new(header, data);
                    let block_ptr: *mut DirectBlock = &mut block;
                    // SAFETY: `block` and the data buffer it points at
                    // outlive this synchronous call.
                    let result = unsafe {
                        DeviceIoControl(
                            device,
                            IOCTL_SCSI_PASS_THROUGH_DIRECT,
                            Some(block_ptr.cast_const().cast()),
                            DirectBlock::size(),
                            Some(block_ptr.cast()),
                            DirectBlock::size(),
                            Some(&mut returned as *mut u32),
                            None,
                        )
                    };
                    let sense_len = usize::from(block.sptd.sense_info_length).min(SPT_SENSE_LEN);
                    let sense_len = copy_sense(view.sense, &block.sense[..sense_len]);
                    (
                        result,
                        block.sptd.scsi_status,
                        block.sptd.data_transfer_length,
                        sense_len,
                    )
                }
                TransferMode::Buffered => {
                    let mut block = BufferedBlock::new(header);
                    if let DataBuffer::Out(buf) = &view.data {
                        block.data_mut().copy_from_slice(buf);
                    }
                    let size = block.size() as u32;
                    let block_ptr = block.as_mut_ptr();
                    // SAFETY: `block` owns `size` bytes for the whole call.
                    let result = unsafe {
                        DeviceIoControl(
                            device,
                            IOCTL_SCSI_PASS_THROUGH,
                            Some(block_ptr.cast_const()),
                            size,
                            Some(block_ptr),
                            size,
                            Some(&mut returned as *mut u32),
                            None,
                        )
                    };
                    let transferred = block.header().data_transfer_length;
                    if result.is_ok() {
                        if let DataBuffer::In(buf) = &mut view.data {
                            let n = (transferred as usize).min(buf.len());
                            buf[..n].copy_from_slice(&block.data()[..n]);
                        }
                    }
                    let sense_len = copy_sense(view.sense, block.sense());
                    (result, block.header().scsi_status, transferred, sense_len)
                }
            };

            if let Err(err) = result {
                let code = win32_code(&err) as u32;
                warn!(code, %err, "DeviceIoControl failed");
                return Ok(PlatformReport {
                    os_error: EIO,
                    transport_error: code,
                    ..PlatformReport::default()
                });
            }

            Ok(PlatformReport {
                os_error: 0,
                transport_error: 0,
                scsi_status,
                driver_sense: false,
                resid: requested as i64 - i64::from(transferred),
                sense_len: sense,
                duration: None,
            })
        }
    }
}
