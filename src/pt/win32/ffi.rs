//! `ntddscsi.h` structures for the SCSI pass-through IOCTLs.

#![cfg_attr(not(windows), allow(dead_code))]

use std::ffi::c_void;
use std::mem::{offset_of, size_of};
use std::{ptr, slice};
use std::time::Duration;

use static_assertions::const_assert_eq;

use super::name::ScsiAddress;

pub const IOCTL_SCSI_PASS_THROUGH: u32 = 0x0004_d004;
pub const IOCTL_SCSI_PASS_THROUGH_DIRECT: u32 = 0x0004_d014;

pub const SCSI_IOCTL_DATA_OUT: u8 = 0;
pub const SCSI_IOCTL_DATA_IN: u8 = 1;
pub const SCSI_IOCTL_DATA_UNSPECIFIED: u8 = 2;

/// The `Cdb` array of both structures.
pub const SPT_CDB_LEN: usize = 16;
/// Sense area reserved after each pass-through header.
pub const SPT_SENSE_LEN: usize = 64;
/// Data area embedded in a buffered block when the transfer fits.
pub const EMBEDDED_DATA_LEN: usize = 16384;

/// `SCSI_PASS_THROUGH`: data is copied through `DataBufferOffset`.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ScsiPassThrough {
    pub length: u16,
    pub scsi_status: u8,
    pub path_id: u8,
    pub target_id: u8,
    pub lun: u8,
    pub cdb_length: u8,
    pub sense_info_length: u8,
    pub data_in: u8,
    pub data_transfer_length: u32,
    pub timeout_value: u32,
    pub data_buffer_offset: usize,
    pub sense_info_offset: u32,
    pub cdb: [u8; SPT_CDB_LEN],
}

/// `SCSI_PASS_THROUGH_DIRECT`: the driver maps the caller's buffer.
#[repr(C)]
#[derive(Debug)]
pub struct ScsiPassThroughDirect {
    pub length: u16,
    pub scsi_status: u8,
    pub path_id: u8,
    pub target_id: u8,
    pub lun: u8,
    pub cdb_length: u8,
    pub sense_info_length: u8,
    pub data_in: u8,
    pub data_transfer_length: u32,
    pub timeout_value: u32,
    pub data_buffer: *mut c_void,
    pub sense_info_offset: u32,
    pub cdb: [u8; SPT_CDB_LEN],
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(size_of::<ScsiPassThrough>(), 56);
#[cfg(target_pointer_width = "64")]
const_assert_eq!(size_of::<ScsiPassThroughDirect>(), 56);
#[cfg(target_pointer_width = "32")]
const_assert_eq!(size_of::<ScsiPassThrough>(), 44);
#[cfg(target_pointer_width = "32")]
const_assert_eq!(size_of::<ScsiPassThroughDirect>(), 44);

/// Fields shared by both pass-through headers.
#[derive(Debug, Clone, Copy)]
pub struct Header<'c> {
    pub address: ScsiAddress,
    pub cdb: &'c [u8],
    pub sense_len: u8,
    pub data_in: u8,
    pub data_len: u32,
    pub timeout: u32,
}

/// Windows timeouts are whole seconds; partial seconds round up.
pub fn timeout_secs(timeout: Duration) -> u32 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

fn cdb_array(cdb: &[u8]) -> [u8; SPT_CDB_LEN] {
    let mut out = [0u8; SPT_CDB_LEN];
    let n = cdb.len().min(SPT_CDB_LEN);
    out[..n].copy_from_slice(&cdb[..n]);
    out
}

/// A direct pass-through header followed by its sense area.
#[repr(C)]
#[derive(Debug)]
pub struct DirectBlock {
    pub sptd: ScsiPassThroughDirect,
    pub sense: [u8; SPT_SENSE_LEN],
}

impl DirectBlock {
    pub fn new(header: Header<'_>, data: *mut c_void) -> Self {
        Self {
            sptd: ScsiPassThroughDirect {
                length: size_of::<ScsiPassThroughDirect>() as u16,
                scsi_status: 0,
                path_id: header.address.path_id,
                target_id: header.address.target_id,
                lun: header.address.lun,
                cdb_length: header.cdb.len() as u8,
                sense_info_length: header.sense_len,
                data_in: header.data_in,
                data_transfer_length: header.data_len,
                timeout_value: header.timeout,
                data_buffer: data,
                sense_info_offset: offset_of!(DirectBlock, sense) as u32,
                cdb: cdb_array(header.cdb),
            },
            sense: [0; SPT_SENSE_LEN],
        }
    }

    pub fn size() -> u32 {
        size_of::<Self>() as u32
    }
}

/// A buffered pass-through block: header, sense area, then data.
///
/// The data area is [`EMBEDDED_DATA_LEN`] bytes and grows to fit larger
/// transfers. Backed by `u64`s so the header is suitably aligned.
#[derive(Debug)]
pub struct BufferedBlock {
    words: Vec<u64>,
    data_len: usize,
}

impl BufferedBlock {
    pub const SENSE_OFFSET: usize = size_of::<ScsiPassThrough>();
    pub const DATA_OFFSET: usize = Self::SENSE_OFFSET + SPT_SENSE_LEN;

    pub fn new(header: Header<'_>) -> Self {
        let data_len = header.data_len as usize;
        let bytes = Self::DATA_OFFSET + data_len.max(EMBEDDED_DATA_LEN);
        let mut block = Self {
            words: vec![0; bytes.div_ceil(size_of::<u64>())],
            data_len,
        };
        let spt = ScsiPassThrough {
            length: size_of::<ScsiPassThrough>() as u16,
            scsi_status: 0,
            path_id: header.address.path_id,
            target_id: header.address.target_id,
            lun: header.address.lun,
            cdb_length: header.cdb.len() as u8,
            sense_info_length: header.sense_len,
            data_in: header.data_in,
            data_transfer_length: header.data_len,
            timeout_value: header.timeout,
            data_buffer_offset: Self::DATA_OFFSET,
            sense_info_offset: Self::SENSE_OFFSET as u32,
            cdb: cdb_array(header.cdb),
        };
        // SAFETY: `words` is 8-byte aligned and longer than the header.
        unsafe { ptr::write(block.words.as_mut_ptr().cast::<ScsiPassThrough>(), spt) };
        block
    }

    /// Bytes reserved for data, at least [`EMBEDDED_DATA_LEN`].
    pub fn data_capacity(&self) -> usize {
        self.size() - Self::DATA_OFFSET
    }

    /// Total size handed to `DeviceIoControl`.
    pub fn size(&self) -> usize {
        self.words.len() * size_of::<u64>()
    }

    pub fn header(&self) -> &ScsiPassThrough {
        // SAFETY: written in `new`, aligned, and only reachable through `self`.
        unsafe { &*self.words.as_ptr().cast::<ScsiPassThrough>() }
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: any `u64` slice is a valid `u8` slice of eight times the length.
        unsafe { slice::from_raw_parts(self.words.as_ptr().cast(), self.size()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size();
        // SAFETY: as in `bytes`, with exclusive access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast(), size) }
    }

    pub fn sense(&self) -> &[u8] {
        let len = usize::from(self.header().sense_info_length).min(SPT_SENSE_LEN);
        &self.bytes()[Self::SENSE_OFFSET..Self::SENSE_OFFSET + len]
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes()[Self::DATA_OFFSET..Self::DATA_OFFSET + self.data_len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.data_len;
        &mut self.bytes_mut()[Self::DATA_OFFSET..Self::DATA_OFFSET + len]
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.words.as_mut_ptr().cast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cdb: &[u8], data_len: u32) -> Header<'_> {
        Header {
            address: ScsiAddress {
                path_id: 1,
                target_id: 2,
                lun: 3,
            },
            cdb,
            sense_len: 32,
            data_in: SCSI_IOCTL_DATA_IN,
            data_len,
            timeout: 60,
        }
    }

    #[test]
    fn timeouts_round_up() {
        assert_eq!(timeout_secs(Duration::from_secs(60)), 60);
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_secs(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn direct_block_points_at_its_sense_area() {
        let block = DirectBlock::new(header(&[0x12, 0, 0, 0, 96, 0], 96), ptr::null_mut());
        assert_eq!(block.sptd.sense_info_offset as usize, size_of::<ScsiPassThroughDirect>());
        assert_eq!(block.sptd.cdb_length, 6);
        assert_eq!(block.sptd.cdb[0], 0x12);
        assert_eq!((block.sptd.path_id, block.sptd.target_id, block.sptd.lun), (1, 2, 3));
    }

    #[test]
    fn buffered_block_embeds_small_transfers() {
        let block = BufferedBlock::new(header(&[0x12, 0, 0, 0, 96, 0], 96));
        assert_eq!(block.data_capacity(), EMBEDDED_DATA_LEN);
        assert_eq!(block.data().len(), 96);
        assert_eq!(block.header().data_buffer_offset, BufferedBlock::DATA_OFFSET);
        assert_eq!(block.header().sense_info_length, 32);
        assert_eq!(block.sense().len(), 32);
    }

    #[test]
    fn buffered_block_grows_for_large_transfers() {
        let len = EMBEDDED_DATA_LEN as u32 * 4 + 3;
        let mut block = BufferedBlock::new(header(&[0x28, 0, 0, 0, 0, 0, 0, 0, 0, 0], len));
        assert!(block.data_capacity() >= len as usize);
        block.data_mut().fill(0xab);
        assert_eq!(block.data().len(), len as usize);
        assert!(block.data().iter().all(|b| *b == 0xab));
        assert_eq!(block.header().cdb_length, 10);
    }
}
