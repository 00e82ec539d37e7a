//! Representations for SCSI commands.
//!
//! This module uses the term "command descriptor" to describe a struct and implementation specific
//! details behind a CDB, and uses the term "command block" to describe a "black box" containing
//! a valid CDB.
//!
//! Commands are exposed as a function that returns a [`CommandBlock`]. These functions wrap
//! the more granular [`X6CommandDescriptor`], [`X10CommandDescriptor`] and
//! [`X16CommandDescriptor`] structs.

use std::time::Duration;

use super::command_descriptor::*;
use crate::config::{DEFAULT_TIMEOUT, LONG_TIMEOUT, START_STOP_TIMEOUT};
use crate::pt::DataDirection;

/// A serialized command block ready to be attached to a request
#[derive(Debug, Clone)]
pub struct CommandBlock {
    cdb: Vec<u8>,
    pub op_code: OpCode,
    pub direction: DataDirection,
    /// Bytes the command moves in its data phase
    pub data_transfer_len: u32,
    /// Timeout suited to the command class
    pub timeout: Duration,
}

impl CommandBlock {
    fn new<D: CommandDescriptor>(
        descriptor: &D,
        op_code: OpCode,
        direction: DataDirection,
        data_transfer_len: u32,
    ) -> Self {
        Self {
            cdb: descriptor.as_slice().to_vec(),
            op_code,
            direction,
            data_transfer_len,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Returns the length of the underlying command block.
    pub fn len(&self) -> usize {
        self.cdb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cdb.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.cdb
    }
}

/// "The TEST UNIT READY command provides a means to check if the logical unit is ready.
///
/// If the logical unit is able to accept an appropriate medium access command without
/// returning CHECK CONDITION status, this command shall return a GOOD status. If the logical
/// unit is unable to become operational or is in a state such that an applicaton client action
/// (e.g START UNIT command) is required to make the unit ready, the device server shall return
/// CHECK CONDITION status with a sense key of NOT READY."
///
/// Defined in SPC-4 6.47
pub fn test_unit_ready() -> CommandBlock {
    CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::TestUnitReady,
            misc_info: [0, 0, 0],
            misc_len: 0,
            control: 0,
        },
        OpCode::TestUnitReady,
        DataDirection::None,
        0,
    )
}

/// "The INQUIRY command requests that information regarding the logical unit
/// and SCSI target device be sent to the application client."
///
/// With `evpd` set, `page_code` selects a vital product data page.
///
/// Defined in SPC-4 6.6.1 table 142
pub fn inquiry(evpd: bool, page_code: u8, allocation_len: u16) -> CommandBlock {
    let [len_hi, len_lo] = allocation_len.to_be_bytes();
    CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::Inquiry,
            misc_info: [u8::from(evpd), page_code, len_hi],
            misc_len: len_lo,
            control: 0,
        },
        OpCode::Inquiry,
        DataDirection::In,
        u32::from(allocation_len),
    )
}

/// SPC-4 6.39. `desc` asks for descriptor format sense data.
pub fn request_sense(desc: bool, allocation_len: u8) -> CommandBlock {
    CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::RequestSense,
            misc_info: [u8::from(desc), 0, 0],
            misc_len: allocation_len,
            control: 0,
        },
        OpCode::RequestSense,
        DataDirection::In,
        u32::from(allocation_len),
    )
}

/// "The `READ CAPACITY (10)` command requests that the device server transfer 8 bytes of
/// parameter data describing the capacity and medium format of the direct-access
/// block device to the Data-In Buffer."
///
/// SBC-3 5.16
pub fn read_capacity_10(pmi: bool, lba: u32) -> CommandBlock {
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::ReadCapacity10,
            service_action: 0,
            logical_block_address: lba.to_be_bytes(),
            misc_cdb_info: 0,
            misc_len: [0, u8::from(pmi)],
            control: 0,
        },
        OpCode::ReadCapacity10,
        DataDirection::In,
        8,
    )
}

/// READ CAPACITY(16), a service action of SERVICE ACTION IN(16).
///
/// SBC-3 5.17
pub fn read_capacity_16(pmi: bool, lba: u64, allocation_len: u32) -> CommandBlock {
    CommandBlock::new(
        &X16CommandDescriptor {
            operation_code: OpCode::ServiceActionIn16,
            misc_info: 0x10,
            logical_block_address: lba.to_be_bytes(),
            param: allocation_len.to_be_bytes(),
            misc_cdb_info: u8::from(pmi),
            control: 0,
        },
        OpCode::ServiceActionIn16,
        DataDirection::In,
        allocation_len,
    )
}

/// Page control values of MODE SENSE, SPC-4 table 160.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageControl {
    Current = 0,
    Changeable = 1,
    Default = 2,
    Saved = 3,
}

impl PageControl {
    pub const ALL: [PageControl; 4] = [
        PageControl::Current,
        PageControl::Changeable,
        PageControl::Default,
        PageControl::Saved,
    ];
}

/// Bytes 1 and 2 shared by MODE SENSE and LOG SENSE
fn page_byte(pc: PageControl, page_code: u8) -> u8 {
    ((pc as u8) << 6) | (page_code & 0x3f)
}

/// SPC-4 6.11
pub fn mode_sense_6(
    dbd: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    allocation_len: u8,
) -> CommandBlock {
    CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::ModeSense6,
            misc_info: [u8::from(dbd) << 3, page_byte(pc, page_code), sub_page_code],
            misc_len: allocation_len,
            control: 0,
        },
        OpCode::ModeSense6,
        DataDirection::In,
        u32::from(allocation_len),
    )
}

/// SPC-4 6.12
pub fn mode_sense_10(
    llbaa: bool,
    dbd: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    allocation_len: u16,
) -> CommandBlock {
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::ModeSense10,
            service_action: (u8::from(llbaa) << 4) | (u8::from(dbd) << 3),
            logical_block_address: [page_byte(pc, page_code), sub_page_code, 0, 0],
            misc_cdb_info: 0,
            misc_len: allocation_len.to_be_bytes(),
            control: 0,
        },
        OpCode::ModeSense10,
        DataDirection::In,
        u32::from(allocation_len),
    )
}

/// SPC-4 6.9. `pf` selects the page format, `sp` saves the pages.
pub fn mode_select_6(pf: bool, sp: bool, param_len: u8) -> CommandBlock {
    CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::ModeSelect6,
            misc_info: [(u8::from(pf) << 4) | u8::from(sp), 0, 0],
            misc_len: param_len,
            control: 0,
        },
        OpCode::ModeSelect6,
        DataDirection::Out,
        u32::from(param_len),
    )
}

/// SPC-4 6.10
pub fn mode_select_10(pf: bool, sp: bool, param_len: u16) -> CommandBlock {
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::ModeSelect10,
            service_action: (u8::from(pf) << 4) | u8::from(sp),
            logical_block_address: [0; 4],
            misc_cdb_info: 0,
            misc_len: param_len.to_be_bytes(),
            control: 0,
        },
        OpCode::ModeSelect10,
        DataDirection::Out,
        u32::from(param_len),
    )
}

/// SPC-4 6.5
pub fn log_sense(
    ppc: bool,
    sp: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    param_pointer: u16,
    allocation_len: u16,
) -> CommandBlock {
    let [pp_hi, pp_lo] = param_pointer.to_be_bytes();
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::LogSense,
            service_action: (u8::from(ppc) << 1) | u8::from(sp),
            logical_block_address: [page_byte(pc, page_code), sub_page_code, 0, pp_hi],
            misc_cdb_info: pp_lo,
            misc_len: allocation_len.to_be_bytes(),
            control: 0,
        },
        OpCode::LogSense,
        DataDirection::In,
        u32::from(allocation_len),
    )
}

/// SPC-4 6.4. `pcr` resets the log parameters.
pub fn log_select(
    pcr: bool,
    sp: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    param_len: u16,
) -> CommandBlock {
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::LogSelect,
            service_action: (u8::from(pcr) << 1) | u8::from(sp),
            logical_block_address: [page_byte(pc, page_code), sub_page_code, 0, 0],
            misc_cdb_info: 0,
            misc_len: param_len.to_be_bytes(),
            control: 0,
        },
        OpCode::LogSelect,
        if param_len == 0 {
            DataDirection::None
        } else {
            DataDirection::Out
        },
        u32::from(param_len),
    )
}

/// Parameters of START STOP UNIT, SBC-3 table 119.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartStop {
    pub immed: bool,
    pub power_condition_modifier: u8,
    pub power_condition: u8,
    pub no_flush: bool,
    pub load_eject: bool,
    pub start: bool,
}

/// SBC-3 5.25
pub fn start_stop_unit(params: StartStop) -> CommandBlock {
    let byte4 = ((params.power_condition & 0xf) << 4)
        | (u8::from(params.no_flush) << 2)
        | (u8::from(params.load_eject) << 1)
        | u8::from(params.start);
    let mut block = CommandBlock::new(
        &X6CommandDescriptor {
            operation_code: OpCode::StartStopUnit,
            misc_info: [
                u8::from(params.immed),
                0,
                params.power_condition_modifier & 0xf,
            ],
            misc_len: byte4,
            control: 0,
        },
        OpCode::StartStopUnit,
        DataDirection::None,
        0,
    );
    block.timeout = START_STOP_TIMEOUT;
    block
}

/// SBC-3 5.22. A `count` of zero covers everything from `lba` onwards.
///
/// Without IMMED the device answers only once the whole range is on the
/// medium, so the command gets [`LONG_TIMEOUT`].
pub fn synchronize_cache_10(immed: bool, lba: u32, count: u16, group: u8) -> CommandBlock {
    let mut block = CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::SynchronizeCache10,
            service_action: u8::from(immed) << 1,
            logical_block_address: lba.to_be_bytes(),
            misc_cdb_info: group & 0x3f,
            misc_len: count.to_be_bytes(),
            control: 0,
        },
        OpCode::SynchronizeCache10,
        DataDirection::None,
        0,
    );
    if !immed {
        block.timeout = LONG_TIMEOUT;
    }
    block
}

/// SBC-3 5.40. Writes `xfer_len` bytes of a single block including its ECC.
pub fn write_long_10(
    cor_dis: bool,
    wr_uncor: bool,
    pblock: bool,
    lba: u32,
    xfer_len: u16,
) -> CommandBlock {
    CommandBlock::new(
        &X10CommandDescriptor {
            operation_code: OpCode::WriteLong10,
            service_action: (u8::from(cor_dis) << 7)
                | (u8::from(wr_uncor) << 6)
                | (u8::from(pblock) << 5),
            logical_block_address: lba.to_be_bytes(),
            misc_cdb_info: 0,
            misc_len: xfer_len.to_be_bytes(),
            control: 0,
        },
        OpCode::WriteLong10,
        if xfer_len == 0 {
            DataDirection::None
        } else {
            DataDirection::Out
        },
        u32::from(xfer_len),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inquiry_cdb() {
        let cb = inquiry(false, 0, 96);
        assert_eq!(cb.as_bytes(), &[0x12, 0, 0, 0, 96, 0]);
        assert_eq!(cb.direction, DataDirection::In);
        assert_eq!(cb.data_transfer_len, 96);

        let cb = inquiry(true, 0x80, 0x1fc);
        assert_eq!(cb.as_bytes(), &[0x12, 1, 0x80, 0x01, 0xfc, 0]);
    }

    #[test]
    fn test_unit_ready_is_all_zero() {
        let cb = test_unit_ready();
        assert_eq!(cb.len(), 6);
        assert!(cb.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(cb.direction, DataDirection::None);
    }

    #[test]
    fn mode_sense_page_control() {
        let cb = mode_sense_6(true, PageControl::Changeable, 0x08, 0, 252);
        assert_eq!(cb.as_bytes(), &[0x1a, 0x08, 0x48, 0, 252, 0]);

        let cb = mode_sense_10(false, false, PageControl::Saved, 0x3f, 0xff, 4096);
        assert_eq!(cb.as_bytes(), &[0x5a, 0, 0xff, 0xff, 0, 0, 0, 0x10, 0, 0]);
    }

    #[test]
    fn log_sense_param_pointer() {
        let cb = log_sense(false, false, PageControl::Default, 0x0d, 0, 0x0102, 0x0400);
        assert_eq!(
            cb.as_bytes(),
            &[0x4d, 0, 0x8d, 0, 0, 0x01, 0x02, 0x04, 0x00, 0]
        );
    }

    #[test]
    fn start_stop_uses_long_timeout() {
        let cb = start_stop_unit(StartStop {
            immed: true,
            load_eject: true,
            start: false,
            ..Default::default()
        });
        assert_eq!(cb.as_bytes(), &[0x1b, 1, 0, 0, 0x02, 0]);
        assert_eq!(cb.timeout, START_STOP_TIMEOUT);
    }

    #[test]
    fn sync_cache_waits_longer_without_immed() {
        let cb = synchronize_cache_10(false, 0x10, 8, 0);
        assert_eq!(cb.as_bytes(), &[0x35, 0, 0, 0, 0, 0x10, 0, 0, 8, 0]);
        assert_eq!(cb.timeout, LONG_TIMEOUT);
        let cb = synchronize_cache_10(true, 0, 0, 0);
        assert_eq!(cb.as_bytes()[1], 0x02);
        assert_eq!(cb.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn read_capacity_variants() {
        let cb = read_capacity_10(true, 0x0102_0304);
        assert_eq!(cb.as_bytes(), &[0x25, 0, 1, 2, 3, 4, 0, 0, 1, 0]);
        let cb = read_capacity_16(false, 0, 32);
        assert_eq!(cb.len(), 16);
        assert_eq!(cb.data_transfer_len, 32);
    }

    #[test]
    fn write_long_flags() {
        let cb = write_long_10(true, false, true, 7, 520);
        assert_eq!(cb.as_bytes(), &[0x3f, 0xa0, 0, 0, 0, 7, 0, 0x02, 0x08, 0]);
        assert_eq!(cb.direction, DataDirection::Out);
    }
}
