use std::time::Duration;

use crate::error::PtError;
use crate::scsi::sense::SenseKey;
use crate::scsi::status;

/// The normalized result fields of one submission.
///
/// `scsi_status` and the sense fields are only meaningful when both
/// `transport_error` and `os_error` are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutcome {
    pub os_error: i32,
    pub transport_error: u32,
    /// Masked with [`status::MASK`].
    pub scsi_status: u8,
    pub driver_sense: bool,
    /// Decoded from the sense buffer, if any sense was returned.
    pub sense_key: Option<SenseKey>,
    pub sense_len: usize,
    pub resid: i64,
    pub requested_len: usize,
    pub duration: Option<Duration>,
}

impl RawOutcome {
    /// `resid` checked against `0..=requested_len`.
    pub fn checked_resid(&self) -> Result<usize, PtError> {
        match usize::try_from(self.resid) {
            Ok(resid) if resid <= self.requested_len => Ok(resid),
            _ => Err(PtError::Malformed {
                resid: self.resid,
                requested: self.requested_len,
            }),
        }
    }

    pub fn transferred(&self) -> Result<usize, PtError> {
        Ok(self.requested_len - self.checked_resid()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCategory {
    Good,
    /// CHECK CONDITION carrying a RECOVERED ERROR sense key.
    Recovered,
    /// CHECK CONDITION (or COMMAND TERMINATED); decode the sense data.
    SenseCheckCondition,
    StatusNonzero,
    TransportError,
    OsError,
}

/// Maps raw outcome fields to a category.
///
/// Transport and OS failures are checked first: when the command never
/// reached the device the status and sense fields are undefined.
pub fn categorize(outcome: &RawOutcome) -> ResultCategory {
    if outcome.transport_error != 0 {
        return ResultCategory::TransportError;
    }
    if outcome.os_error != 0 {
        return ResultCategory::OsError;
    }
    let scsi_status = outcome.scsi_status & status::MASK;
    if outcome.driver_sense
        || scsi_status == status::CHECK_CONDITION
        || scsi_status == status::COMMAND_TERMINATED
    {
        if outcome.sense_key == Some(SenseKey::RecoveredError) {
            return ResultCategory::Recovered;
        }
        return ResultCategory::SenseCheckCondition;
    }
    if scsi_status != status::GOOD {
        return ResultCategory::StatusNonzero;
    }
    ResultCategory::Good
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_over_every_combination() {
        for transport_error in [0u32, 0x07] {
            for os_error in [0i32, 5] {
                for scsi_status in [0x00u8, 0x02, 0x22, 0x08, 0x18] {
                    let outcome = RawOutcome {
                        transport_error,
                        os_error,
                        scsi_status,
                        ..RawOutcome::default()
                    };
                    let expected = if transport_error != 0 {
                        ResultCategory::TransportError
                    } else if os_error != 0 {
                        ResultCategory::OsError
                    } else if scsi_status == 0x02 || scsi_status == 0x22 {
                        ResultCategory::SenseCheckCondition
                    } else if scsi_status != 0 {
                        ResultCategory::StatusNonzero
                    } else {
                        ResultCategory::Good
                    };
                    assert_eq!(categorize(&outcome), expected, "{outcome:?}");
                }
            }
        }
    }

    #[test]
    fn recovered_error_is_its_own_category() {
        let outcome = RawOutcome {
            scsi_status: status::CHECK_CONDITION,
            sense_key: Some(SenseKey::RecoveredError),
            ..RawOutcome::default()
        };
        assert_eq!(categorize(&outcome), ResultCategory::Recovered);

        let outcome = RawOutcome {
            sense_key: Some(SenseKey::NotReady),
            ..outcome
        };
        assert_eq!(categorize(&outcome), ResultCategory::SenseCheckCondition);
    }

    #[test]
    fn driver_sense_without_status() {
        let outcome = RawOutcome {
            driver_sense: true,
            ..RawOutcome::default()
        };
        assert_eq!(categorize(&outcome), ResultCategory::SenseCheckCondition);
    }

    #[test]
    fn residual_bounds() {
        let ok = RawOutcome {
            resid: 96,
            requested_len: 96,
            ..RawOutcome::default()
        };
        assert_eq!(ok.checked_resid().unwrap(), 96);
        assert_eq!(ok.transferred().unwrap(), 0);

        let over = RawOutcome {
            resid: 200,
            requested_len: 96,
            ..RawOutcome::default()
        };
        assert!(matches!(
            over.transferred(),
            Err(PtError::Malformed {
                resid: 200,
                requested: 96
            })
        ));

        let negative = RawOutcome {
            resid: -4,
            requested_len: 96,
            ..RawOutcome::default()
        };
        assert!(negative.checked_resid().is_err());
    }
}
