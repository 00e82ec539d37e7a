//! The request object: one SCSI command transaction.

use std::mem;
use std::time::Duration;

use tracing::{trace, warn};

use super::backend::{Capabilities, DataBuffer, PlatformReport, SubmitView};
use super::device::DeviceId;
use super::outcome::{RawOutcome, ResultCategory, categorize};
use super::{MAX_CDB_LEN, MIN_CDB_LEN};
use crate::config::TransferMode;
use crate::error::PtError;
use crate::scsi::sense::SenseInfo;
use crate::scsi::status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataDirection {
    #[default]
    None,
    /// From the device to the host
    In,
    /// From the host to the device
    Out,
}

/// A builder call that was rejected. Recorded on the request and reported
/// when it is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    DuplicateCdb,
    CdbLength(usize),
    DuplicateSense,
    DuplicateData,
    Unsupported(&'static str),
}

/// Optional attributes, only carried by backends that advertise them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAttributes {
    pub tag: Option<u64>,
    pub task_management: Option<u32>,
    pub task_attribute: Option<u32>,
    pub priority: Option<u8>,
    pub flags: u32,
}

impl TaskAttributes {
    /// The capabilities a backend needs to carry these attributes.
    pub fn required(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::TAG, self.tag.is_some());
        caps.set(Capabilities::TASK_MANAGEMENT, self.task_management.is_some());
        caps.set(Capabilities::TASK_ATTRIBUTE, self.task_attribute.is_some());
        caps.set(Capabilities::PRIORITY, self.priority.is_some());
        caps.set(Capabilities::FLAGS, self.flags != 0);
        caps
    }
}

/// Buffers handed back by [`PtRequest::clear`] so they can be attached again.
#[derive(Debug, Default)]
pub struct Released<'a> {
    pub sense: Option<&'a mut [u8]>,
    pub data: DataBuffer<'a>,
}

/// One SCSI command: CDB, sense buffer, data buffer and attributes.
///
/// Setters never fail. A rejected call (second CDB, second data buffer, an
/// attribute the backend cannot carry) is counted instead, and the request
/// is refused as a whole by [`super::PtDevice::submit`]. The buffers belong
/// to the caller and are borrowed for `'a`.
///
/// A request is submitted once. Afterwards it can be inspected, then either
/// dropped or [`clear`](Self::clear)ed for another command.
#[derive(Debug)]
pub struct PtRequest<'a> {
    cdb: Option<Vec<u8>>,
    sense: Option<&'a mut [u8]>,
    data: DataBuffer<'a>,
    timeout: Option<Duration>,
    attributes: TaskAttributes,
    capabilities: Capabilities,
    transfer_mode: TransferMode,
    misuse: Vec<Misuse>,
    device: Option<DeviceId>,
    outcome: Option<RawOutcome>,
}

impl<'a> PtRequest<'a> {
    /// A request for a backend with the given capabilities.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            cdb: None,
            sense: None,
            data: DataBuffer::None,
            timeout: None,
            attributes: TaskAttributes::default(),
            capabilities,
            transfer_mode: TransferMode::default(),
            misuse: Vec::new(),
            device: None,
            outcome: None,
        }
    }

    pub(crate) fn bound(
        capabilities: Capabilities,
        device: DeviceId,
        transfer_mode: TransferMode,
    ) -> Self {
        let mut req = Self::with_capabilities(capabilities);
        req.device = Some(device);
        req.transfer_mode = transfer_mode;
        req
    }

    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    fn reject(&mut self, misuse: Misuse) {
        warn!(?misuse, "pass-through request misuse");
        self.misuse.push(misuse);
    }

    /// Stores the CDB. A second call is counted as misuse and does not
    /// replace the first CDB.
    pub fn attach_cdb(&mut self, cdb: &[u8]) -> &mut Self {
        if self.cdb.is_some() {
            self.reject(Misuse::DuplicateCdb);
        } else if !(MIN_CDB_LEN..=MAX_CDB_LEN).contains(&cdb.len()) {
            self.reject(Misuse::CdbLength(cdb.len()));
        } else {
            self.cdb = Some(cdb.to_vec());
        }
        self
    }

    /// Zero-fills `sense` and keeps it for the backend to fill in.
    pub fn attach_sense_buffer(&mut self, sense: &'a mut [u8]) -> &mut Self {
        sense.fill(0);
        if self.sense.is_some() {
            self.reject(Misuse::DuplicateSense);
        } else {
            self.sense = Some(sense);
        }
        self
    }

    /// Attaches a buffer for data coming from the device. Empty buffers are ignored.
    pub fn attach_data_in(&mut self, data: &'a mut [u8]) -> &mut Self {
        if data.is_empty() {
            return self;
        }
        if !matches!(self.data, DataBuffer::None) {
            self.reject(Misuse::DuplicateData);
        } else {
            self.data = DataBuffer::In(data);
        }
        self
    }

    /// Attaches data going to the device. Empty buffers are ignored.
    pub fn attach_data_out(&mut self, data: &'a [u8]) -> &mut Self {
        if data.is_empty() {
            return self;
        }
        if !matches!(self.data, DataBuffer::None) {
            self.reject(Misuse::DuplicateData);
        } else {
            self.data = DataBuffer::Out(data);
        }
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    fn supports(&mut self, cap: Capabilities, what: &'static str) -> bool {
        if self.capabilities.contains(cap) {
            true
        } else {
            self.reject(Misuse::Unsupported(what));
            false
        }
    }

    pub fn set_tag(&mut self, tag: u64) -> &mut Self {
        if self.supports(Capabilities::TAG, "tag") {
            self.attributes.tag = Some(tag);
        }
        self
    }

    pub fn set_task_management(&mut self, tmf_code: u32) -> &mut Self {
        if self.supports(Capabilities::TASK_MANAGEMENT, "task management") {
            self.attributes.task_management = Some(tmf_code);
        }
        self
    }

    pub fn set_task_attribute(&mut self, attribute: u32) -> &mut Self {
        if self.supports(Capabilities::TASK_ATTRIBUTE, "task attribute") {
            self.attributes.task_attribute = Some(attribute);
        }
        self
    }

    pub fn set_priority(&mut self, priority: u8) -> &mut Self {
        if self.supports(Capabilities::PRIORITY, "priority") {
            self.attributes.priority = Some(priority);
        }
        self
    }

    pub fn set_flags(&mut self, flags: u32) -> &mut Self {
        if self.supports(Capabilities::FLAGS, "flags") {
            self.attributes.flags = flags;
        }
        self
    }

    /// Resets the request for another command.
    ///
    /// The device binding, capabilities and transfer mode survive. The
    /// caller's buffers are returned so they can be attached again.
    pub fn clear(&mut self) -> Released<'a> {
        let released = Released {
            sense: self.sense.take(),
            data: mem::take(&mut self.data),
        };
        self.cdb = None;
        self.timeout = None;
        self.attributes = TaskAttributes::default();
        self.misuse.clear();
        self.outcome = None;
        released
    }

    pub fn cdb(&self) -> Option<&[u8]> {
        self.cdb.as_deref()
    }

    pub fn data_direction(&self) -> DataDirection {
        self.data.direction()
    }

    /// Number of rejected builder calls so far.
    pub fn misuse_count(&self) -> usize {
        self.misuse.len()
    }

    pub fn misuses(&self) -> &[Misuse] {
        &self.misuse
    }

    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    pub fn is_submitted(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&RawOutcome> {
        self.outcome.as_ref()
    }

    pub fn category(&self) -> Option<ResultCategory> {
        self.outcome.as_ref().map(categorize)
    }

    pub fn scsi_status(&self) -> u8 {
        self.outcome.as_ref().map_or(0, |o| o.scsi_status)
    }

    pub fn os_error(&self) -> i32 {
        self.outcome.as_ref().map_or(0, |o| o.os_error)
    }

    pub fn transport_error(&self) -> u32 {
        self.outcome.as_ref().map_or(0, |o| o.transport_error)
    }

    /// The residual as reported, unchecked.
    pub fn resid(&self) -> i64 {
        self.outcome.as_ref().map_or(0, |o| o.resid)
    }

    /// The residual, or [`PtError::Malformed`] if the platform reported one
    /// outside the requested length.
    pub fn checked_resid(&self) -> Result<usize, PtError> {
        match &self.outcome {
            Some(outcome) => outcome.checked_resid(),
            None => Ok(0),
        }
    }

    /// Bytes actually moved in the data phase.
    pub fn transferred(&self) -> Result<usize, PtError> {
        match &self.outcome {
            Some(outcome) => outcome.transferred(),
            None => Ok(0),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.outcome.as_ref().and_then(|o| o.duration)
    }

    /// The sense bytes written by the last submission.
    pub fn sense(&self) -> &[u8] {
        let len = self.outcome.as_ref().map_or(0, |o| o.sense_len);
        match &self.sense {
            Some(buf) => &buf[..len.min(buf.len())],
            None => &[],
        }
    }

    pub fn sense_info(&self) -> Option<SenseInfo> {
        SenseInfo::from_bytes(self.sense())
    }

    /// The data-in buffer, including any zero-filled residual tail.
    pub fn data_in(&self) -> Option<&[u8]> {
        match &self.data {
            DataBuffer::In(buf) => Some(&buf[..]),
            _ => None,
        }
    }

    /// Pre-submission checks. Nothing here touches the OS.
    pub(crate) fn validate(
        &self,
        device: DeviceId,
        capabilities: Capabilities,
    ) -> Result<(), PtError> {
        if self.outcome.is_some() {
            return Err(PtError::BadParams(
                "request already submitted, clear it before reuse".into(),
            ));
        }
        if !self.misuse.is_empty() {
            return Err(PtError::BadParams(format!(
                "{} rejected builder call(s), first: {:?}",
                self.misuse.len(),
                self.misuse[0]
            )));
        }
        if self.cdb.is_none() {
            return Err(PtError::BadParams("no CDB attached".into()));
        }
        // a request built for another backend may carry more than this one can
        let missing = self.attributes.required().difference(capabilities);
        if !missing.is_empty() {
            return Err(PtError::BadParams(format!(
                "backend cannot carry request attributes {missing:?}"
            )));
        }
        if let Some(bound) = self.device {
            if bound != device {
                return Err(PtError::BadParams(format!(
                    "request bound to {bound} submitted on {device}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn view(&mut self, default_timeout: Duration) -> SubmitView<'_> {
        SubmitView {
            cdb: self.cdb.as_deref().unwrap_or_default(),
            data: self.data.reborrow(),
            sense: match &mut self.sense {
                Some(buf) => &mut buf[..],
                None => &mut [],
            },
            timeout: self.timeout.unwrap_or(default_timeout),
            attributes: &self.attributes,
            transfer_mode: self.transfer_mode,
        }
    }

    /// Records a platform report and cleans up the caller's buffers.
    pub(crate) fn complete(&mut self, report: PlatformReport) {
        let requested_len = self.data.len();
        let sense_len = match &self.sense {
            Some(buf) => report.sense_len.min(buf.len()),
            None => 0,
        };
        let sense_key = match &self.sense {
            Some(buf) if sense_len > 0 => {
                SenseInfo::from_bytes(&buf[..sense_len]).map(|info| info.sense_key)
            }
            _ => None,
        };

        let outcome = RawOutcome {
            os_error: report.os_error,
            transport_error: report.transport_error,
            scsi_status: report.scsi_status & status::MASK,
            driver_sense: report.driver_sense,
            sense_key,
            sense_len,
            resid: report.resid,
            requested_len,
            duration: report.duration,
        };

        match outcome.checked_resid() {
            Ok(resid) => {
                if let DataBuffer::In(buf) = &mut self.data {
                    if resid > 0 {
                        trace!(resid, "zero-filling residual tail");
                        buf[requested_len - resid..].fill(0);
                    }
                }
            }
            Err(_) => warn!(
                resid = report.resid,
                requested_len, "platform reported residual outside the transfer"
            ),
        }

        self.outcome = Some(outcome);
    }

    /// Records an OS failure of the platform call itself.
    pub(crate) fn fail_os(&mut self, errno: i32) {
        self.outcome = Some(RawOutcome {
            os_error: errno,
            requested_len: self.data.len(),
            ..RawOutcome::default()
        });
    }
}
