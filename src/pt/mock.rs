//! A scripted backend for tests. Each submission pops the next reply.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::backend::{
    Capabilities, DataBuffer, OpenFlags, PlatformReport, PtBackend, SubmitView, copy_sense,
};
use crate::error::PtError;
use crate::scsi::sense::SenseKey;
use crate::scsi::status;

const ENOENT: i32 = 2;

/// One scripted device reply.
#[derive(Debug, Clone, Default)]
pub(crate) struct Reply {
    pub status: u8,
    pub sense: Vec<u8>,
    pub data: Vec<u8>,
    /// Overrides the residual computed from `data`.
    pub resid: Option<i64>,
    pub transport_error: u32,
    /// Fail the platform call itself with this errno.
    pub fail_errno: Option<i32>,
}

impl Reply {
    pub fn good(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            ..Self::default()
        }
    }

    /// CHECK CONDITION with fixed format sense data.
    pub fn check_condition(key: SenseKey, asc: u8, ascq: u8) -> Self {
        let mut sense = vec![0u8; 18];
        sense[0] = 0x70;
        sense[2] = key as u8;
        sense[7] = 10;
        sense[12] = asc;
        sense[13] = ascq;
        Self {
            status: status::CHECK_CONDITION,
            sense,
            ..Self::default()
        }
    }

    pub fn status(status: u8) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn transport(code: u32) -> Self {
        Self {
            transport_error: code,
            ..Self::default()
        }
    }

    pub fn os_failure(errno: i32) -> Self {
        Self {
            fail_errno: Some(errno),
            ..Self::default()
        }
    }

    pub fn with_resid(mut self, resid: i64) -> Self {
        self.resid = Some(resid);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub replies: VecDeque<Reply>,
    /// Platform calls made, i.e. successful validations.
    pub submits: usize,
    pub opens: usize,
    pub closes: usize,
    pub cdbs: Vec<Vec<u8>>,
    pub timeouts: Vec<Duration>,
    pub data_out: Vec<Vec<u8>>,
    next_descriptor: i64,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Descriptors restart at 3 for every backend, like separate handle tables.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedBackend {
    state: Rc<RefCell<MockState>>,
    instance: u64,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            state: Rc::default(),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        let backend = Self::default();
        backend.state.borrow_mut().replies.extend(replies);
        backend
    }

    pub fn push(&self, reply: Reply) {
        self.state.borrow_mut().replies.push_back(reply);
    }

    pub fn state(&self) -> std::cell::Ref<'_, MockState> {
        self.state.borrow()
    }
}

impl PtBackend for ScriptedBackend {
    type Handle = i64;

    const NAME: &'static str = "scripted";
    const CAPABILITIES: Capabilities = Capabilities::FLAGS;

    fn open(&self, name: &str, _flags: OpenFlags) -> Result<i64, PtError> {
        if name.starts_with("/nonexistent") {
            return Err(PtError::Os {
                errno: ENOENT,
                context: "open",
            });
        }
        let mut state = self.state.borrow_mut();
        state.opens += 1;
        state.next_descriptor += 1;
        Ok(state.next_descriptor + 2)
    }

    fn close(&self, _handle: i64) -> Result<(), PtError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }

    fn descriptor(handle: &i64) -> i64 {
        *handle
    }

    fn instance(&self) -> u64 {
        self.instance
    }

    fn submit(&self, _handle: &i64, view: SubmitView<'_>) -> Result<PlatformReport, PtError> {
        let mut state = self.state.borrow_mut();
        state.submits += 1;
        state.cdbs.push(view.cdb.to_vec());
        state.timeouts.push(view.timeout);
        let reply = state.replies.pop_front().unwrap_or_default();

        if let Some(errno) = reply.fail_errno {
            return Err(PtError::Os {
                errno,
                context: "scripted",
            });
        }

        let requested = view.data.len();
        let moved = match view.data {
            DataBuffer::None => 0,
            DataBuffer::In(buf) => {
                let n = reply.data.len().min(buf.len());
                buf[..n].copy_from_slice(&reply.data[..n]);
                n
            }
            DataBuffer::Out(buf) => {
                state.data_out.push(buf.to_vec());
                buf.len()
            }
        };
        let sense_len = copy_sense(view.sense, &reply.sense);

        Ok(PlatformReport {
            os_error: 0,
            transport_error: reply.transport_error,
            scsi_status: reply.status,
            driver_sense: false,
            resid: reply.resid.unwrap_or((requested - moved) as i64),
            sense_len,
            duration: Some(Duration::from_micros(250)),
        })
    }
}
