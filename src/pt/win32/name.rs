//! Device name shorthands accepted on Windows.
//!
//! | name              | opens                   |
//! |-------------------|-------------------------|
//! | `PD3`             | `\\.\PhysicalDrive3`    |
//! | `SCSI2:`          | `\\.\SCSI2:`            |
//! | `SCSI2:0,1,0`     | `\\.\SCSI2:` bus 0, target 1, lun 0 |
//! | `C:`              | `\\.\C:`                |
//! | `\\.\Tape0`       | itself                  |
//!
//! Matching is case insensitive. Anything else is opened as given.

use std::fmt;

pub const DEVICE_NAMESPACE: &str = r"\\.\";

/// Bus (path id), target and LUN on a SCSI adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScsiAddress {
    pub path_id: u8,
    pub target_id: u8,
    pub lun: u8,
}

impl fmt::Display for ScsiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.path_id, self.target_id, self.lun)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Win32Target {
    PhysicalDrive(u32),
    Adapter {
        port: u32,
        address: Option<ScsiAddress>,
    },
    DriveLetter(char),
    /// A full path, or a name that matched no shorthand.
    Literal(String),
}

impl Win32Target {
    /// The path handed to `CreateFileW`.
    pub fn path(&self) -> String {
        match self {
            Self::PhysicalDrive(n) => format!(r"{DEVICE_NAMESPACE}PhysicalDrive{n}"),
            Self::Adapter { port, .. } => format!(r"{DEVICE_NAMESPACE}SCSI{port}:"),
            Self::DriveLetter(letter) => format!(r"{DEVICE_NAMESPACE}{letter}:"),
            Self::Literal(name) => name.clone(),
        }
    }

    /// The address placed in each pass-through block. Zero unless an
    /// adapter was named with an explicit address.
    pub fn address(&self) -> ScsiAddress {
        match self {
            Self::Adapter {
                address: Some(address),
                ..
            } => *address,
            _ => ScsiAddress::default(),
        }
    }
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn scsi_address(s: &str) -> Option<ScsiAddress> {
    let mut parts = s.split(',').map(|p| p.trim().parse::<u8>());
    let address = ScsiAddress {
        path_id: parts.next()?.ok()?,
        target_id: parts.next()?.ok()?,
        lun: parts.next()?.ok()?,
    };
    parts.next().is_none().then_some(address)
}

pub fn parse(name: &str) -> Win32Target {
    if name.starts_with(DEVICE_NAMESPACE) {
        return Win32Target::Literal(name.to_string());
    }
    let upper = name.to_ascii_uppercase();

    if let Some(n) = upper.strip_prefix("PD").and_then(digits) {
        return Win32Target::PhysicalDrive(n);
    }

    if let Some((port, rest)) = upper
        .strip_prefix("SCSI")
        .and_then(|s| s.split_once(':'))
    {
        if let Some(port) = digits(port) {
            if rest.is_empty() {
                return Win32Target::Adapter {
                    port,
                    address: None,
                };
            }
            if let Some(address) = scsi_address(rest) {
                return Win32Target::Adapter {
                    port,
                    address: Some(address),
                };
            }
        }
    }

    let mut chars = upper.chars();
    if let (Some(letter), Some(':'), None) = (chars.next(), chars.next(), chars.next()) {
        if letter.is_ascii_alphabetic() {
            return Win32Target::DriveLetter(letter);
        }
    }

    Win32Target::Literal(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_drive() {
        assert_eq!(parse("PD3"), Win32Target::PhysicalDrive(3));
        assert_eq!(parse("pd12").path(), r"\\.\PhysicalDrive12");
        assert_eq!(parse("PD"), Win32Target::Literal("PD".into()));
    }

    #[test]
    fn adapter_with_address() {
        let target = parse("SCSI2:1,2,3");
        assert_eq!(
            target,
            Win32Target::Adapter {
                port: 2,
                address: Some(ScsiAddress {
                    path_id: 1,
                    target_id: 2,
                    lun: 3
                })
            }
        );
        assert_eq!(target.path(), r"\\.\SCSI2:");
        assert_eq!(target.address().to_string(), "1,2,3");
    }

    #[test]
    fn bare_adapter() {
        let target = parse("scsi0:");
        assert_eq!(
            target,
            Win32Target::Adapter {
                port: 0,
                address: None
            }
        );
        assert_eq!(target.address(), ScsiAddress::default());
    }

    #[test]
    fn drive_letter_and_passthrough() {
        assert_eq!(parse("c:").path(), r"\\.\C:");
        assert_eq!(parse(r"\\.\Tape0").path(), r"\\.\Tape0");
        assert_eq!(parse("SCSI2:1,2").path(), "SCSI2:1,2");
        assert_eq!(parse("disk").path(), "disk");
    }
}
