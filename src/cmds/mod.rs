//! Low level SCSI command wrappers built on the pass-through transport.
//!
//! Each `ll_*` function issues exactly one command (or, for
//! [`get_mode_page_controls`], one per page control) and turns the outcome
//! into data or a [`CmdError`]. None of them retry.

mod basic;
mod extra;

pub use basic::{
    ll_inquiry, ll_log_select, ll_log_sense, ll_mode_select6, ll_mode_select10, ll_mode_sense6,
    ll_mode_sense10, ll_readcap_10, ll_readcap_16, ll_request_sense, ll_start_stop_unit,
    ll_sync_cache_10, ll_test_unit_ready,
};
pub use extra::{ModePageControls, get_mode_page_controls, ll_write_long10};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PtConfig;
use crate::error::PtError;
use crate::pt::{DataBuffer, PtBackend, PtDevice, PtRequest, ResultCategory};
use crate::scsi::command::CommandBlock;
use crate::scsi::response::Malformed;
use crate::scsi::sense::{SenseCategory, SenseInfo};
use crate::scsi::status;

/// Why a command did not produce a usable result.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error("not ready: {0}")]
    NotReady(SenseInfo),
    #[error("unit attention: {0}")]
    UnitAttention(SenseInfo),
    #[error("illegal request: {0}")]
    IllegalRequest(SenseInfo),
    #[error("invalid command operation code")]
    InvalidOpcode(SenseInfo),
    #[error("aborted command: {0}")]
    AbortedCommand(SenseInfo),
    #[error("medium or hardware error: {0}")]
    MediumOrHardware(SenseInfo),
    #[error("data protect: {0}")]
    DataProtect(SenseInfo),
    #[error("miscompare: {0}")]
    Miscompare(SenseInfo),
    /// ILLEGAL REQUEST with the incorrect length indicator set. The
    /// INFORMATION field holds the requested minus the expected length.
    #[error("incorrect length, information field {information:#x}: {info}")]
    LengthMismatch { info: SenseInfo, information: u64 },
    /// CHECK CONDITION whose sense data fits no other variant, or could not
    /// be decoded at all.
    #[error("check condition: {}", describe_sense(.0))]
    Sense(Option<SenseInfo>),
    #[error("SCSI status {0:#04x} ({})", status_name(.0))]
    Status(u8),
    #[error("transport error {0:#06x}")]
    Transport(u32),
    #[error("OS error {0}")]
    Os(i32),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Pt(#[from] PtError),
}

fn status_name(scsi_status: &u8) -> &'static str {
    status::name(*scsi_status)
}

fn describe_sense(info: &Option<SenseInfo>) -> String {
    match info {
        Some(info) => info.to_string(),
        None => "no usable sense data".to_string(),
    }
}

impl From<Malformed> for CmdError {
    fn from(err: Malformed) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl CmdError {
    /// The decoded sense data, for errors that came with any.
    pub fn sense_info(&self) -> Option<&SenseInfo> {
        match self {
            Self::NotReady(info)
            | Self::UnitAttention(info)
            | Self::IllegalRequest(info)
            | Self::InvalidOpcode(info)
            | Self::AbortedCommand(info)
            | Self::MediumOrHardware(info)
            | Self::DataProtect(info)
            | Self::Miscompare(info)
            | Self::LengthMismatch { info, .. } => Some(info),
            Self::Sense(info) => info.as_ref(),
            _ => None,
        }
    }
}

/// Turns a completed request into the number of bytes it transferred.
///
/// GOOD status, RECOVERED ERROR and NO SENSE are successes. A success that
/// moved fewer than `min_len` bytes, or whose residual exceeds the request,
/// is [`CmdError::Malformed`]; everything else maps to the matching error.
pub fn process_response(
    req: &PtRequest<'_>,
    category: ResultCategory,
    min_len: usize,
) -> Result<usize, CmdError> {
    let opcode = req.cdb().map_or(0, |cdb| cdb[0]);
    match category {
        ResultCategory::Good | ResultCategory::Recovered => {}
        ResultCategory::SenseCheckCondition => {
            let sense = req.sense();
            let info = SenseInfo::from_bytes(sense);
            let sense_category = SenseCategory::from_sense(sense);
            debug!(
                opcode = format_args!("{opcode:#04x}"),
                ?sense_category,
                sense = %describe_sense(&info),
                "check condition"
            );
            let err = match (sense_category, info) {
                (SenseCategory::NoSense | SenseCategory::RecoveredError, _) => None,
                (SenseCategory::NotReady, Some(info)) => Some(CmdError::NotReady(info)),
                (SenseCategory::UnitAttention, Some(info)) => Some(CmdError::UnitAttention(info)),
                (SenseCategory::IllegalRequest, Some(info)) => {
                    Some(CmdError::IllegalRequest(info))
                }
                (SenseCategory::InvalidOpcode, Some(info)) => Some(CmdError::InvalidOpcode(info)),
                (SenseCategory::AbortedCommand, Some(info)) => {
                    Some(CmdError::AbortedCommand(info))
                }
                (SenseCategory::MediumOrHardwareError, Some(info)) => {
                    Some(CmdError::MediumOrHardware(info))
                }
                (SenseCategory::DataProtect, Some(info)) => Some(CmdError::DataProtect(info)),
                (SenseCategory::Miscompare, Some(info)) => Some(CmdError::Miscompare(info)),
                (_, info) => Some(CmdError::Sense(info)),
            };
            if let Some(err) = err {
                return Err(err);
            }
        }
        ResultCategory::StatusNonzero => return Err(CmdError::Status(req.scsi_status())),
        ResultCategory::TransportError => return Err(CmdError::Transport(req.transport_error())),
        ResultCategory::OsError => return Err(CmdError::Os(req.os_error())),
    }

    let transferred = match req.transferred() {
        Ok(n) => n,
        Err(err @ PtError::Malformed { .. }) => return Err(CmdError::Malformed(err.to_string())),
        Err(err) => return Err(err.into()),
    };
    if transferred < min_len {
        warn!(
            opcode = format_args!("{opcode:#04x}"),
            transferred, min_len, "short response"
        );
        return Err(CmdError::Malformed(format!(
            "{transferred} bytes transferred, expected at least {min_len}"
        )));
    }
    Ok(transferred)
}

/// An open device the `ll_*` wrappers issue commands to.
#[derive(Debug)]
pub struct ScsiDevice<B: PtBackend> {
    device: PtDevice<B>,
    sense_len: usize,
}

impl<B: PtBackend> ScsiDevice<B> {
    pub fn new(device: PtDevice<B>) -> Self {
        Self {
            device,
            sense_len: PtConfig::default().sense_len,
        }
    }

    pub fn open(backend: B, name: &str, config: &PtConfig) -> Result<Self, PtError> {
        let device = PtDevice::open_with(backend, name, config)?;
        Ok(Self {
            device,
            sense_len: config.sense_len,
        })
    }

    pub fn device(&self) -> &PtDevice<B> {
        &self.device
    }

    pub fn into_inner(self) -> PtDevice<B> {
        self.device
    }

    /// Issues a command with the given data phase.
    ///
    /// Submits the command and waits for it, then returns the number of
    /// bytes transferred as [`process_response`] reports it.
    #[tracing::instrument(level = "debug", skip_all, fields(op = command.op_code.name()))]
    pub fn issue_command(
        &self,
        command: &CommandBlock,
        data: DataBuffer<'_>,
        min_len: usize,
    ) -> Result<usize, CmdError> {
        let mut sense = vec![0u8; self.sense_len];
        let mut req = self.device.new_request();
        req.attach_cdb(command.as_bytes())
            .attach_sense_buffer(&mut sense)
            .set_timeout(command.timeout);
        match data {
            DataBuffer::None => {}
            DataBuffer::In(buf) => {
                req.attach_data_in(buf);
            }
            DataBuffer::Out(buf) => {
                req.attach_data_out(buf);
            }
        }
        let category = self.device.submit(&mut req)?;
        process_response(&req, category, min_len)
    }
}
