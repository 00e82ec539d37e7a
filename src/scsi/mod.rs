//! SCSI protocol and format implementation as described in:
//! - SCSI Primary Commands – 4 (SPC-4): status codes, sense data formats,
//!   INQUIRY, MODE and LOG commands.
//! - SCSI Block Commands – 3 (SBC-3): READ CAPACITY, SYNCHRONIZE CACHE,
//!   WRITE LONG and START STOP UNIT.
//! - SCSI Architecture Model – 5 (SAM-5): status byte values.
//!
//! Nothing in here talks to a device. The [`crate::pt`] module carries
//! command blocks to the OS and [`crate::cmds`] ties the two together.

pub mod command;
mod command_descriptor;
pub mod response;
pub mod sense;

pub use command_descriptor::OpCode;

/// SAM-5 status codes, table 43.
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const INTERMEDIATE: u8 = 0x10;
    pub const INTERMEDIATE_CONDITION_MET: u8 = 0x14;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const COMMAND_TERMINATED: u8 = 0x22;
    pub const TASK_SET_FULL: u8 = 0x28;
    pub const ACA_ACTIVE: u8 = 0x30;
    pub const TASK_ABORTED: u8 = 0x40;

    /// Mask applied to a status byte before it is interpreted.
    /// Bit 0 and bit 7 are reserved/vendor specific.
    pub const MASK: u8 = 0x7e;

    pub fn name(status: u8) -> &'static str {
        match status & MASK {
            GOOD => "Good",
            CHECK_CONDITION => "Check Condition",
            CONDITION_MET => "Condition Met",
            BUSY => "Busy",
            INTERMEDIATE => "Intermediate",
            INTERMEDIATE_CONDITION_MET => "Intermediate-Condition Met",
            RESERVATION_CONFLICT => "Reservation Conflict",
            COMMAND_TERMINATED => "Command Terminated (obsolete)",
            TASK_SET_FULL => "Task Set Full",
            ACA_ACTIVE => "ACA Active",
            TASK_ABORTED => "Task Aborted",
            _ => "Unknown status",
        }
    }
}
