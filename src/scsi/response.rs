//! Representations for responses to SCSI commands.
//!
//! Parsers take the bytes a command actually transferred, which may be fewer
//! than were requested. A response too short to hold the fields a parser
//! needs is reported as [`Malformed`].

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed {what}: {reason}")]
pub struct Malformed {
    pub what: &'static str,
    pub reason: String,
}

fn ensure_len(buf: &[u8], min: usize, what: &'static str) -> Result<(), Malformed> {
    if buf.len() < min {
        return Err(Malformed {
            what,
            reason: format!("need {min} bytes, got {}", buf.len()),
        });
    }
    Ok(())
}

/// Fixed length of the standard INQUIRY data every device returns.
pub const STANDARD_INQUIRY_LEN: usize = 36;

/// Standard INQUIRY data, SPC-4 6.6.2 table 143.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    /// PERIPHERAL QUALIFIER (bits 7:5 of byte 0).
    ///
    /// - 0b000 – The specified device type is currently connected. This
    ///   does not mean the device is ready for access.
    pub peripheral_qualifier: u8,
    /// PERIPHERAL DEVICE TYPE (bits 4:0 of byte 0); 0 is a direct access block device.
    pub peripheral_device_type: u8,
    pub removable: bool,
    pub version: u8,
    pub response_data_format: u8,
    pub additional_len: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

impl Inquiry {
    pub fn parse(buf: &[u8]) -> Result<Self, Malformed> {
        ensure_len(buf, STANDARD_INQUIRY_LEN, "standard INQUIRY data")?;
        Ok(Self {
            peripheral_qualifier: buf[0] >> 5,
            peripheral_device_type: buf[0] & 0x1f,
            removable: buf[1] & 0x80 != 0,
            version: buf[2],
            response_data_format: buf[3] & 0x0f,
            additional_len: buf[4],
            vendor: ascii_field(&buf[8..16]),
            product: ascii_field(&buf[16..32]),
            revision: ascii_field(&buf[32..36]),
        })
    }

    pub fn device_type_name(&self) -> &'static str {
        peripheral_type_name(self.peripheral_device_type)
    }
}

/// T10 identification fields are space padded printable ASCII.
fn ascii_field(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { ' ' })
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// SPC-4 table 146
pub fn peripheral_type_name(pdt: u8) -> &'static str {
    match pdt & 0x1f {
        0x00 => "disk",
        0x01 => "tape",
        0x02 => "printer",
        0x03 => "processor",
        0x04 => "write once optical disk",
        0x05 => "cd/dvd",
        0x07 => "optical memory device",
        0x08 => "medium changer",
        0x0c => "storage array controller",
        0x0d => "enclosure services device",
        0x0e => "simplified direct access device",
        0x0f => "optical card reader/writer",
        0x11 => "object based storage",
        0x12 => "automation/driver interface",
        0x14 => "host managed zoned block",
        0x1e => "well known logical unit",
        0x1f => "unknown or no device type",
        _ => "reserved",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub last_lba: u64,
    pub block_len: u32,
    /// Logical blocks per physical block exponent, READ CAPACITY(16) only.
    pub lb_per_pb_exp: u8,
    pub protection_enabled: bool,
}

impl Capacity {
    pub fn blocks(&self) -> u64 {
        self.last_lba + 1
    }

    pub fn bytes(&self) -> u128 {
        u128::from(self.blocks()) * u128::from(self.block_len)
    }

    /// SBC-3 table 55. A last LBA of 0xffffffff means READ CAPACITY(16) is needed.
    pub fn parse_10(buf: &[u8]) -> Result<Self, Malformed> {
        ensure_len(buf, 8, "READ CAPACITY(10) data")?;
        Ok(Self {
            last_lba: u64::from(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])),
            block_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            lb_per_pb_exp: 0,
            protection_enabled: false,
        })
    }

    /// SBC-3 table 56.
    pub fn parse_16(buf: &[u8]) -> Result<Self, Malformed> {
        ensure_len(buf, 14, "READ CAPACITY(16) data")?;
        let mut lba = [0u8; 8];
        lba.copy_from_slice(&buf[0..8]);
        Ok(Self {
            last_lba: u64::from_be_bytes(lba),
            block_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            lb_per_pb_exp: buf[13] & 0x0f,
            protection_enabled: buf[12] & 0x01 != 0,
        })
    }

    pub fn needs_16(&self) -> bool {
        self.last_lba == u64::from(u32::MAX)
    }
}

/// Mode parameter header, SPC-4 7.5.5. The 6 and 10 byte forms are
/// normalized into one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeHeader {
    /// Bytes of mode data available, including the header itself.
    pub mode_data_len: usize,
    pub medium_type: u8,
    pub device_specific: u8,
    pub block_descriptor_len: usize,
    pub header_len: usize,
}

impl ModeHeader {
    pub fn parse_6(buf: &[u8]) -> Result<Self, Malformed> {
        ensure_len(buf, 4, "mode parameter header(6)")?;
        Ok(Self {
            mode_data_len: usize::from(buf[0]) + 1,
            medium_type: buf[1],
            device_specific: buf[2],
            block_descriptor_len: usize::from(buf[3]),
            header_len: 4,
        })
    }

    pub fn parse_10(buf: &[u8]) -> Result<Self, Malformed> {
        ensure_len(buf, 8, "mode parameter header(10)")?;
        Ok(Self {
            mode_data_len: usize::from(u16::from_be_bytes([buf[0], buf[1]])) + 2,
            medium_type: buf[2],
            device_specific: buf[3],
            block_descriptor_len: usize::from(u16::from_be_bytes([buf[6], buf[7]])),
            header_len: 8,
        })
    }

    /// Offset of the first mode page inside the returned data.
    pub fn page_offset(&self) -> usize {
        self.header_len + self.block_descriptor_len
    }

    /// Slices out the first mode page, checking it fits what was returned.
    pub fn first_page<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8], Malformed> {
        let offset = self.page_offset();
        let avail = buf.len().min(self.mode_data_len);
        if offset + 2 > avail {
            return Err(Malformed {
                what: "mode page",
                reason: format!("page offset {offset} beyond {avail} bytes of mode data"),
            });
        }
        // SPF set means a sub_page format page with a 2 byte length
        let page_len = if buf[offset] & 0x40 != 0 {
            ensure_len(&buf[..avail], offset + 4, "mode sub-page header")?;
            4 + usize::from(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]))
        } else {
            2 + usize::from(buf[offset + 1])
        };
        Ok(&buf[offset..avail.min(offset + page_len)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inquiry_fields() {
        let mut buf = [0u8; 36];
        buf[0] = 0x05;
        buf[1] = 0x80;
        buf[2] = 0x06;
        buf[3] = 0x02;
        buf[8..16].copy_from_slice(b"ATA     ");
        buf[16..32].copy_from_slice(b"Samsung SSD 870 ");
        buf[32..36].copy_from_slice(b"1B6Q");
        let inq = Inquiry::parse(&buf).unwrap();
        assert_eq!(inq.peripheral_device_type, 5);
        assert_eq!(inq.device_type_name(), "cd/dvd");
        assert!(inq.removable);
        assert_eq!(inq.vendor, "ATA");
        assert_eq!(inq.product, "Samsung SSD 870");
        assert_eq!(inq.revision, "1B6Q");
    }

    #[test]
    fn short_inquiry_is_malformed() {
        let err = Inquiry::parse(&[0u8; 20]).unwrap_err();
        assert!(err.to_string().contains("need 36 bytes, got 20"));
    }

    #[test]
    fn capacity() {
        let cap = Capacity::parse_10(&[0, 0, 0x0f, 0xff, 0, 0, 2, 0]).unwrap();
        assert_eq!(cap.blocks(), 0x1000);
        assert_eq!(cap.bytes(), 0x1000 * 512);
        assert!(!cap.needs_16());
        assert!(Capacity::parse_10(&[0xff; 8]).unwrap().needs_16());

        let mut buf = [0u8; 32];
        buf[0..8].copy_from_slice(&0x1_0000_0000u64.to_be_bytes());
        buf[8..12].copy_from_slice(&4096u32.to_be_bytes());
        buf[12] = 0x01;
        buf[13] = 0x03;
        let cap = Capacity::parse_16(&buf).unwrap();
        assert_eq!(cap.last_lba, 0x1_0000_0000);
        assert_eq!(cap.block_len, 4096);
        assert_eq!(cap.lb_per_pb_exp, 3);
        assert!(cap.protection_enabled);
    }

    #[test]
    fn mode_header_and_page() {
        // 6 byte header, 8 byte block descriptor, caching page 0x08
        let mut buf = vec![0u8; 4 + 8 + 20];
        buf[0] = (buf.len() - 1) as u8;
        buf[3] = 8;
        buf[12] = 0x08;
        buf[13] = 18;
        let hdr = ModeHeader::parse_6(&buf).unwrap();
        assert_eq!(hdr.page_offset(), 12);
        let page = hdr.first_page(&buf).unwrap();
        assert_eq!(page.len(), 20);
        assert_eq!(page[0], 0x08);
    }

    #[test]
    fn truncated_mode_header_is_malformed() {
        assert!(ModeHeader::parse_10(&[0, 6, 0]).is_err());
        // block descriptor length pointing past the data
        let buf = [7u8, 0, 0, 200, 0, 0, 0, 0];
        let hdr = ModeHeader::parse_6(&buf).unwrap();
        assert!(hdr.first_page(&buf).is_err());
    }
}
