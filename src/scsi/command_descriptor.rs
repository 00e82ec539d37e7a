//! Packed CDB layouts the command builders fill in.

/// Operation codes issued by this crate, SPC-4 annex D. Only the commands
/// the builders in [`super::command`] produce are listed.
#[repr(u8)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// SPC-4 6.47
    TestUnitReady = 0x00,
    /// SPC-4 6.39
    RequestSense = 0x03,
    /// SPC-4 6.6
    Inquiry = 0x12,
    /// SPC-4 6.9
    ModeSelect6 = 0x15,
    /// SPC-4 6.11
    ModeSense6 = 0x1a,
    /// SBC-3 5.25
    StartStopUnit = 0x1b,
    /// SBC-3 5.16
    ReadCapacity10 = 0x25,
    /// SBC-3 5.22
    SynchronizeCache10 = 0x35,
    /// SBC-3 5.40
    WriteLong10 = 0x3f,
    /// SPC-4 6.4
    LogSelect = 0x4c,
    /// SPC-4 6.5
    LogSense = 0x4d,
    /// SPC-4 6.10
    ModeSelect10 = 0x55,
    /// SPC-4 6.12
    ModeSense10 = 0x5a,
    /// SERVICE ACTION IN(16), SBC-3 5.17 uses it for READ CAPACITY(16)
    ServiceActionIn16 = 0x9e,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            Self::TestUnitReady => "TEST UNIT READY",
            Self::RequestSense => "REQUEST SENSE",
            Self::Inquiry => "INQUIRY",
            Self::ModeSelect6 => "MODE SELECT(6)",
            Self::ModeSense6 => "MODE SENSE(6)",
            Self::StartStopUnit => "START STOP UNIT",
            Self::ReadCapacity10 => "READ CAPACITY(10)",
            Self::SynchronizeCache10 => "SYNCHRONIZE CACHE(10)",
            Self::WriteLong10 => "WRITE LONG(10)",
            Self::LogSelect => "LOG SELECT",
            Self::LogSense => "LOG SENSE",
            Self::ModeSelect10 => "MODE SELECT(10)",
            Self::ModeSense10 => "MODE SENSE(10)",
            Self::ServiceActionIn16 => "SERVICE ACTION IN(16)",
        }
    }
}

/// As described in SPC-4 4.2.5.2, a typical CDB for 6 byte commands.
#[repr(C, packed)]
pub struct X6CommandDescriptor {
    pub operation_code: OpCode,
    /// Bytes 1 to 3: flag bits and page codes for the commands built here.
    pub misc_info: [u8; 3],
    /// Byte 4: allocation, parameter list or transfer length.
    pub misc_len: u8,
    /// Always zero; no linked commands or NACA.
    pub control: u8,
}

impl CommandDescriptor for X6CommandDescriptor {
    const LEN: usize = 6;
}

/// As described in SPC-4 4.2.5.3, a typical CDB for 10 byte commands.
///
/// Multi-byte fields are big endian, hence the byte arrays.
#[repr(C, packed)]
pub struct X10CommandDescriptor {
    pub operation_code: OpCode,
    /// Byte 1: service action in the low five bits, or command flags.
    pub service_action: u8,
    /// Bytes 2 to 5. An LBA, or page codes for MODE/LOG commands.
    pub logical_block_address: [u8; 4],
    /// Byte 6, group number or a command specific field.
    pub misc_cdb_info: u8,
    /// `TRANSFER LENGTH`, `PARAMETER LIST LENGTH` or `ALLOCATION LENGTH`
    pub misc_len: [u8; 2],
    pub control: u8,
}

impl CommandDescriptor for X10CommandDescriptor {
    const LEN: usize = 10;
}

/// SPC-4 4.2.5.5, a typical CDB for 16 byte commands.
#[repr(C, packed)]
pub struct X16CommandDescriptor {
    pub operation_code: OpCode,
    /// The service action for SERVICE ACTION IN(16).
    pub misc_info: u8,
    pub logical_block_address: [u8; 8],
    /// Bytes 10 to 13. A zero allocation length transfers nothing and is
    /// not an error.
    pub param: [u8; 4],
    /// Byte 14, command specific bits (e.g. PMI for READ CAPACITY(16))
    pub misc_cdb_info: u8,
    pub control: u8,
}

impl CommandDescriptor for X16CommandDescriptor {
    const LEN: usize = 16;
}

pub trait CommandDescriptor: Sized {
    /// Size of the CDB on the wire.
    const LEN: usize;

    fn as_slice(&'_ self) -> &[u8] {
        const {
            assert!(
                std::mem::size_of::<Self>() == Self::LEN,
                "command descriptor does not match its CDB length"
            );
        };
        // SAFETY: the const assertion above guarantees the struct is exactly
        // `LEN` bytes, it is packed, and every field is a byte or byte array
        let slice: &'_ [u8] = unsafe {
            let ptr = self as *const Self as *const u8;
            std::slice::from_raw_parts(ptr, Self::LEN)
        };
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x10_is_big_endian() {
        let cdb = X10CommandDescriptor {
            operation_code: OpCode::ModeSense10,
            service_action: 0x08,
            logical_block_address: [0x3f, 0xff, 0, 0],
            misc_cdb_info: 0,
            misc_len: 0x0104u16.to_be_bytes(),
            control: 0,
        };
        assert_eq!(
            cdb.as_slice(),
            &[0x5a, 0x08, 0x3f, 0xff, 0, 0, 0, 0x01, 0x04, 0]
        );
    }

    #[test]
    fn x16_layout() {
        let cdb = X16CommandDescriptor {
            operation_code: OpCode::ServiceActionIn16,
            misc_info: 0x10,
            logical_block_address: [0; 8],
            param: 32u32.to_be_bytes(),
            misc_cdb_info: 0,
            control: 0,
        };
        let bytes = cdb.as_slice();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], 0x9e);
        assert_eq!(bytes[1], 0x10);
        assert_eq!(&bytes[10..14], &[0, 0, 0, 32]);
    }
}
