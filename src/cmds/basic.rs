//! One wrapper per command, each a single submission.

use tracing::debug;

use super::{CmdError, ScsiDevice};
use crate::pt::{DataBuffer, PtBackend};
use crate::scsi::command::{self, PageControl, StartStop};
use crate::scsi::response::Capacity;

/// Lengths below which a response is useless to the caller.
const INQUIRY_HEADER_LEN: usize = 4;
const READ_CAPACITY_10_LEN: usize = 8;
const READ_CAPACITY_16_LEN: usize = 32;
const READ_CAPACITY_16_MIN_LEN: usize = 14;
const MODE_HEADER_6_LEN: usize = 4;
const MODE_HEADER_10_LEN: usize = 8;
const LOG_HEADER_LEN: usize = 4;

fn u8_len(buf: &[u8]) -> u8 {
    buf.len().min(usize::from(u8::MAX)) as u8
}

fn u16_len(buf: &[u8]) -> u16 {
    buf.len().min(usize::from(u16::MAX)) as u16
}

pub fn ll_test_unit_ready<B: PtBackend>(dev: &ScsiDevice<B>) -> Result<(), CmdError> {
    dev.issue_command(&command::test_unit_ready(), DataBuffer::None, 0)?;
    Ok(())
}

/// INQUIRY into `resp`, standard data or the VPD page `page_code` when
/// `evpd` is set. Returns the bytes received.
pub fn ll_inquiry<B: PtBackend>(
    dev: &ScsiDevice<B>,
    evpd: bool,
    page_code: u8,
    resp: &mut [u8],
) -> Result<usize, CmdError> {
    let len = u16_len(resp);
    let min_len = INQUIRY_HEADER_LEN.min(resp.len());
    let resp = &mut resp[..usize::from(len)];
    dev.issue_command(
        &command::inquiry(evpd, page_code, len),
        DataBuffer::In(resp),
        min_len,
    )
}

pub fn ll_request_sense<B: PtBackend>(
    dev: &ScsiDevice<B>,
    desc: bool,
    resp: &mut [u8],
) -> Result<usize, CmdError> {
    let len = u8_len(resp);
    let resp = &mut resp[..usize::from(len)];
    dev.issue_command(
        &command::request_sense(desc, len),
        DataBuffer::In(resp),
        0,
    )
}

pub fn ll_readcap_10<B: PtBackend>(
    dev: &ScsiDevice<B>,
    pmi: bool,
    lba: u32,
) -> Result<Capacity, CmdError> {
    let mut resp = [0u8; READ_CAPACITY_10_LEN];
    let n = dev.issue_command(
        &command::read_capacity_10(pmi, lba),
        DataBuffer::In(&mut resp),
        READ_CAPACITY_10_LEN,
    )?;
    let capacity = Capacity::parse_10(&resp[..n])?;
    debug!(?capacity, "READ CAPACITY(10)");
    Ok(capacity)
}

pub fn ll_readcap_16<B: PtBackend>(
    dev: &ScsiDevice<B>,
    pmi: bool,
    lba: u64,
) -> Result<Capacity, CmdError> {
    let mut resp = [0u8; READ_CAPACITY_16_LEN];
    // only the first 14 bytes are decoded; devices often stop short of 32
    let n = dev.issue_command(
        &command::read_capacity_16(pmi, lba, READ_CAPACITY_16_LEN as u32),
        DataBuffer::In(&mut resp),
        READ_CAPACITY_16_MIN_LEN,
    )?;
    let capacity = Capacity::parse_16(&resp[..n])?;
    debug!(?capacity, "READ CAPACITY(16)");
    Ok(capacity)
}

pub fn ll_mode_sense6<B: PtBackend>(
    dev: &ScsiDevice<B>,
    dbd: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    resp: &mut [u8],
) -> Result<usize, CmdError> {
    let len = u8_len(resp);
    let min_len = MODE_HEADER_6_LEN.min(resp.len());
    let resp = &mut resp[..usize::from(len)];
    dev.issue_command(
        &command::mode_sense_6(dbd, pc, page_code, sub_page_code, len),
        DataBuffer::In(resp),
        min_len,
    )
}

pub fn ll_mode_sense10<B: PtBackend>(
    dev: &ScsiDevice<B>,
    llbaa: bool,
    dbd: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    resp: &mut [u8],
) -> Result<usize, CmdError> {
    let len = u16_len(resp);
    let min_len = MODE_HEADER_10_LEN.min(resp.len());
    let resp = &mut resp[..usize::from(len)];
    dev.issue_command(
        &command::mode_sense_10(llbaa, dbd, pc, page_code, sub_page_code, len),
        DataBuffer::In(resp),
        min_len,
    )
}

/// MODE SELECT(6) with `param` as the parameter list.
pub fn ll_mode_select6<B: PtBackend>(
    dev: &ScsiDevice<B>,
    pf: bool,
    sp: bool,
    param: &[u8],
) -> Result<(), CmdError> {
    let len = u8_len(param);
    if usize::from(len) != param.len() {
        return Err(CmdError::Malformed(format!(
            "MODE SELECT(6) parameter list of {} bytes is too long",
            param.len()
        )));
    }
    dev.issue_command(
        &command::mode_select_6(pf, sp, len),
        DataBuffer::Out(param),
        0,
    )?;
    Ok(())
}

pub fn ll_mode_select10<B: PtBackend>(
    dev: &ScsiDevice<B>,
    pf: bool,
    sp: bool,
    param: &[u8],
) -> Result<(), CmdError> {
    let len = u16_len(param);
    if usize::from(len) != param.len() {
        return Err(CmdError::Malformed(format!(
            "MODE SELECT(10) parameter list of {} bytes is too long",
            param.len()
        )));
    }
    dev.issue_command(
        &command::mode_select_10(pf, sp, len),
        DataBuffer::Out(param),
        0,
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn ll_log_sense<B: PtBackend>(
    dev: &ScsiDevice<B>,
    ppc: bool,
    sp: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    param_pointer: u16,
    resp: &mut [u8],
) -> Result<usize, CmdError> {
    let len = u16_len(resp);
    let min_len = LOG_HEADER_LEN.min(resp.len());
    let resp = &mut resp[..usize::from(len)];
    dev.issue_command(
        &command::log_sense(ppc, sp, pc, page_code, sub_page_code, param_pointer, len),
        DataBuffer::In(resp),
        min_len,
    )
}

/// LOG SELECT. An empty `param` with `pcr` set resets the log parameters.
pub fn ll_log_select<B: PtBackend>(
    dev: &ScsiDevice<B>,
    pcr: bool,
    sp: bool,
    pc: PageControl,
    page_code: u8,
    sub_page_code: u8,
    param: &[u8],
) -> Result<(), CmdError> {
    let len = u16_len(param);
    if usize::from(len) != param.len() {
        return Err(CmdError::Malformed(format!(
            "LOG SELECT parameter list of {} bytes is too long",
            param.len()
        )));
    }
    let data = if param.is_empty() {
        DataBuffer::None
    } else {
        DataBuffer::Out(param)
    };
    dev.issue_command(
        &command::log_select(pcr, sp, pc, page_code, sub_page_code, len),
        data,
        0,
    )?;
    Ok(())
}

pub fn ll_start_stop_unit<B: PtBackend>(
    dev: &ScsiDevice<B>,
    params: StartStop,
) -> Result<(), CmdError> {
    dev.issue_command(&command::start_stop_unit(params), DataBuffer::None, 0)?;
    Ok(())
}

/// SYNCHRONIZE CACHE(10). A `count` of zero flushes from `lba` to the end.
pub fn ll_sync_cache_10<B: PtBackend>(
    dev: &ScsiDevice<B>,
    immed: bool,
    lba: u32,
    count: u16,
    group: u8,
) -> Result<(), CmdError> {
    dev.issue_command(
        &command::synchronize_cache_10(immed, lba, count, group),
        DataBuffer::None,
        0,
    )?;
    Ok(())
}
