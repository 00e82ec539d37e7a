//! Decoding of sense data returned with CHECK CONDITION.
//!
//! Both sense data formats of SPC-4 4.5 are handled: fixed format (response
//! codes 0x70/0x71) and descriptor format (0x72/0x73). Callers usually only
//! need [`SenseInfo::from_bytes`] and [`SenseCategory::from_sense`].

use std::fmt;

/// SPC-4 table 48, the sense key values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    NoSense = 0x0,
    RecoveredError = 0x1,
    NotReady = 0x2,
    MediumError = 0x3,
    HardwareError = 0x4,
    IllegalRequest = 0x5,
    UnitAttention = 0x6,
    DataProtect = 0x7,
    BlankCheck = 0x8,
    VendorSpecific = 0x9,
    CopyAborted = 0xa,
    AbortedCommand = 0xb,
    Reserved = 0xc,
    VolumeOverflow = 0xd,
    Miscompare = 0xe,
    Completed = 0xf,
}

impl SenseKey {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0xf {
            0x0 => Self::NoSense,
            0x1 => Self::RecoveredError,
            0x2 => Self::NotReady,
            0x3 => Self::MediumError,
            0x4 => Self::HardwareError,
            0x5 => Self::IllegalRequest,
            0x6 => Self::UnitAttention,
            0x7 => Self::DataProtect,
            0x8 => Self::BlankCheck,
            0x9 => Self::VendorSpecific,
            0xa => Self::CopyAborted,
            0xb => Self::AbortedCommand,
            0xc => Self::Reserved,
            0xd => Self::VolumeOverflow,
            0xe => Self::Miscompare,
            _ => Self::Completed,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoSense => "No Sense",
            Self::RecoveredError => "Recovered Error",
            Self::NotReady => "Not Ready",
            Self::MediumError => "Medium Error",
            Self::HardwareError => "Hardware Error",
            Self::IllegalRequest => "Illegal Request",
            Self::UnitAttention => "Unit Attention",
            Self::DataProtect => "Data Protect",
            Self::BlankCheck => "Blank Check",
            Self::VendorSpecific => "Vendor Specific",
            Self::CopyAborted => "Copy Aborted",
            Self::AbortedCommand => "Aborted Command",
            Self::Reserved => "Reserved",
            Self::VolumeOverflow => "Volume Overflow",
            Self::Miscompare => "Miscompare",
            Self::Completed => "Completed",
        }
    }
}

/// The parts of a sense buffer every caller cares about, regardless of format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseInfo {
    pub response_code: u8,
    pub sense_key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
    /// Additional sense length as reported, not clipped to the buffer.
    pub additional_len: u8,
}

impl SenseInfo {
    /// Normalizes fixed and descriptor format sense data.
    ///
    /// Returns `None` for empty buffers and unknown response codes. Fields
    /// that fall past the end of a short buffer read as zero.
    pub fn from_bytes(sense: &[u8]) -> Option<Self> {
        let first = *sense.first()?;
        let response_code = first & 0x7f;
        let at = |i: usize| sense.get(i).copied().unwrap_or(0);
        match response_code {
            0x70 | 0x71 => Some(Self {
                response_code,
                sense_key: SenseKey::from_nibble(at(2)),
                asc: at(12),
                ascq: at(13),
                additional_len: at(7),
            }),
            0x72 | 0x73 => Some(Self {
                response_code,
                sense_key: SenseKey::from_nibble(at(1)),
                asc: at(2),
                ascq: at(3),
                additional_len: at(7),
            }),
            _ => None,
        }
    }

    pub fn is_descriptor_format(&self) -> bool {
        self.response_code >= 0x72
    }

    /// Deferred errors belong to an earlier command.
    pub fn is_deferred(&self) -> bool {
        self.response_code & 0x1 == 0x1
    }
}

impl fmt::Display for SenseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sense_key.name())?;
        if self.is_deferred() {
            write!(f, " [deferred]")?;
        }
        match asc_ascq_name(self.asc, self.ascq) {
            Some(text) => write!(f, ": {text}"),
            None => write!(
                f,
                ": asc=0x{:02x}, ascq=0x{:02x}",
                self.asc, self.ascq
            ),
        }
    }
}

/// Finds the first sense data descriptor of type `desc_type`.
///
/// Only meaningful for descriptor format sense (response code 0x72/0x73);
/// the returned slice starts at the descriptor's type byte.
pub fn find_descriptor(sense: &[u8], desc_type: u8) -> Option<&[u8]> {
    let info = SenseInfo::from_bytes(sense)?;
    if !info.is_descriptor_format() || sense.len() < 8 {
        return None;
    }
    let end = sense.len().min(8 + usize::from(info.additional_len));
    let mut offset = 8;
    while offset + 1 < end {
        let len = 2 + usize::from(sense[offset + 1]);
        if sense[offset] == desc_type {
            return sense.get(offset..(offset + len).min(end));
        }
        offset += len;
    }
    None
}

/// The INFORMATION field, when the device marked it valid.
pub fn information(sense: &[u8]) -> Option<u64> {
    let info = SenseInfo::from_bytes(sense)?;
    if info.is_descriptor_format() {
        let desc = find_descriptor(sense, 0x00)?;
        // VALID bit lives in byte 2 of the information descriptor
        if desc.len() < 12 || desc[2] & 0x80 == 0 {
            return None;
        }
        Some(u64::from_be_bytes(desc[4..12].try_into().ok()?))
    } else {
        if sense.len() < 7 || sense[0] & 0x80 == 0 {
            return None;
        }
        Some(u64::from(u32::from_be_bytes(sense[3..7].try_into().ok()?)))
    }
}

/// Incorrect length indicator: fixed format byte 2, or the block command
/// descriptor (type 0x05) in descriptor format.
pub fn ili(sense: &[u8]) -> bool {
    match SenseInfo::from_bytes(sense) {
        Some(info) if info.is_descriptor_format() => find_descriptor(sense, 0x05)
            .and_then(|desc| desc.get(3))
            .is_some_and(|b| b & 0x20 != 0),
        Some(_) => sense.get(2).is_some_and(|b| b & 0x20 != 0),
        None => false,
    }
}

/// The progress indication of a long running operation, scaled to 65536.
///
/// Reported with NOT READY or NO SENSE through the sense key specific
/// field (fixed format) or a progress indication descriptor (type 0x0a).
pub fn progress(sense: &[u8]) -> Option<u16> {
    let info = SenseInfo::from_bytes(sense)?;
    if !matches!(info.sense_key, SenseKey::NotReady | SenseKey::NoSense) {
        return None;
    }
    let sks = if info.is_descriptor_format() {
        if let Some(desc) = find_descriptor(sense, 0x0a) {
            if desc.len() >= 8 {
                return Some(u16::from_be_bytes([desc[6], desc[7]]));
            }
        }
        let desc = find_descriptor(sense, 0x02)?;
        desc.get(4..7)?
    } else {
        sense.get(15..18)?
    };
    // SKSV
    if sks[0] & 0x80 == 0 {
        return None;
    }
    Some(u16::from_be_bytes([sks[1], sks[2]]))
}

/// Classification of a sense buffer used by the command wrappers to choose
/// an error. This is a pure lookup over the sense key and, for ILLEGAL
/// REQUEST, the additional sense code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseCategory {
    NoSense,
    RecoveredError,
    NotReady,
    MediumOrHardwareError,
    IllegalRequest,
    /// ILLEGAL REQUEST with INVALID COMMAND OPERATION CODE.
    InvalidOpcode,
    UnitAttention,
    DataProtect,
    AbortedCommand,
    Miscompare,
    /// Anything else, including sense data that could not be decoded.
    Sense,
}

impl SenseCategory {
    pub fn from_sense(sense: &[u8]) -> Self {
        let Some(info) = SenseInfo::from_bytes(sense) else {
            return Self::Sense;
        };
        match info.sense_key {
            SenseKey::NoSense => Self::NoSense,
            SenseKey::RecoveredError => Self::RecoveredError,
            SenseKey::NotReady => Self::NotReady,
            SenseKey::MediumError | SenseKey::HardwareError | SenseKey::BlankCheck => {
                Self::MediumOrHardwareError
            }
            SenseKey::IllegalRequest if info.asc == 0x20 && info.ascq == 0x00 => {
                Self::InvalidOpcode
            }
            SenseKey::IllegalRequest => Self::IllegalRequest,
            SenseKey::UnitAttention => Self::UnitAttention,
            SenseKey::DataProtect => Self::DataProtect,
            SenseKey::AbortedCommand => Self::AbortedCommand,
            SenseKey::Miscompare => Self::Miscompare,
            _ => Self::Sense,
        }
    }
}

/// Text for the handful of additional sense codes these tools commonly see.
pub fn asc_ascq_name(asc: u8, ascq: u8) -> Option<&'static str> {
    let text = match (asc, ascq) {
        (0x00, 0x00) => "No additional sense information",
        (0x04, 0x00) => "Logical unit not ready, cause not reportable",
        (0x04, 0x01) => "Logical unit is in process of becoming ready",
        (0x04, 0x02) => "Logical unit not ready, initializing command required",
        (0x04, 0x03) => "Logical unit not ready, manual intervention required",
        (0x04, 0x04) => "Logical unit not ready, format in progress",
        (0x11, 0x00) => "Unrecovered read error",
        (0x1a, 0x00) => "Parameter list length error",
        (0x20, 0x00) => "Invalid command operation code",
        (0x21, 0x00) => "Logical block address out of range",
        (0x24, 0x00) => "Invalid field in cdb",
        (0x25, 0x00) => "Logical unit not supported",
        (0x26, 0x00) => "Invalid field in parameter list",
        (0x27, 0x00) => "Write protected",
        (0x28, 0x00) => "Not ready to ready change, medium may have changed",
        (0x29, 0x00) => "Power on, reset, or bus device reset occurred",
        (0x2a, 0x01) => "Mode parameters changed",
        (0x39, 0x00) => "Saving parameters not supported",
        (0x3a, 0x00) => "Medium not present",
        (0x44, 0x00) => "Internal target failure",
        (0x47, 0x00) => "Scsi parity error",
        (0x4e, 0x00) => "Overlapped commands attempted",
        _ => return None,
    };
    Some(text)
}
