//! Wrappers that need more than [`ScsiDevice::issue_command`]: raw sense
//! inspection, or several submissions through one request.

use tracing::{debug, info};

use super::{CmdError, ScsiDevice, process_response};
use crate::pt::{DataBuffer, PtBackend, Released};
use crate::scsi::command::{self, PageControl};
use crate::scsi::response::ModeHeader;
use crate::scsi::sense;

/// WRITE LONG(10) of `data` to the block at `lba`. An empty `data` sends
/// no data phase, which is how WR_UNCOR is normally used.
///
/// When the device rejects the transfer length it answers ILLEGAL REQUEST
/// with the incorrect length indicator set; that comes back as
/// [`CmdError::LengthMismatch`] carrying the INFORMATION field.
pub fn ll_write_long10<B: PtBackend>(
    dev: &ScsiDevice<B>,
    cor_dis: bool,
    wr_uncor: bool,
    pblock: bool,
    lba: u32,
    data: &[u8],
) -> Result<(), CmdError> {
    let xfer_len = u16::try_from(data.len()).map_err(|_| {
        CmdError::Malformed(format!(
            "WRITE LONG(10) of {} bytes is too long",
            data.len()
        ))
    })?;
    let command = command::write_long_10(cor_dis, wr_uncor, pblock, lba, xfer_len);
    let device = dev.device();

    let mut sense_buf = vec![0u8; dev.sense_len];
    let mut req = device.new_request();
    req.attach_cdb(command.as_bytes())
        .attach_sense_buffer(&mut sense_buf)
        .set_timeout(command.timeout);
    if !data.is_empty() {
        req.attach_data_out(data);
    }
    let category = device.submit(&mut req)?;

    match process_response(&req, category, 0) {
        Ok(_) => Ok(()),
        Err(CmdError::IllegalRequest(info)) if sense::ili(req.sense()) => {
            match sense::information(req.sense()) {
                Some(information) => {
                    debug!(information, xfer_len, "WRITE LONG(10) length rejected");
                    Err(CmdError::LengthMismatch { info, information })
                }
                None => Err(CmdError::IllegalRequest(info)),
            }
        }
        Err(err) => Err(err),
    }
}

/// One mode page as returned under each page control.
///
/// The current values are always present. A device may refuse the other
/// controls (saved values are commonly unsupported), in which case the
/// field is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModePageControls {
    pub current: Vec<u8>,
    pub changeable: Option<Vec<u8>>,
    pub default: Option<Vec<u8>>,
    pub saved: Option<Vec<u8>>,
}

/// Fetches mode page `page`/`subpage` once per page control.
///
/// All four MODE SENSE commands go through one request, cleared between
/// submissions so the same sense and response buffers are reused.
/// `mode6` selects MODE SENSE(6), otherwise MODE SENSE(10) is used.
#[tracing::instrument(level = "debug", skip(dev))]
pub fn get_mode_page_controls<B: PtBackend>(
    dev: &ScsiDevice<B>,
    mode6: bool,
    page: u8,
    subpage: u8,
    dbd: bool,
    alloc_len: u16,
) -> Result<ModePageControls, CmdError> {
    let alloc_len = if mode6 {
        alloc_len.min(u16::from(u8::MAX))
    } else {
        alloc_len
    };
    let header_len = if mode6 { 4 } else { 8 };
    if usize::from(alloc_len) < header_len {
        return Err(CmdError::Malformed(format!(
            "allocation length {alloc_len} cannot hold a mode parameter header"
        )));
    }

    let device = dev.device();
    let mut sense_buf = vec![0u8; dev.sense_len];
    let mut resp = vec![0u8; usize::from(alloc_len)];
    let mut buffers = Released {
        sense: Some(&mut sense_buf),
        data: DataBuffer::In(&mut resp),
    };
    let mut req = device.new_request();
    let mut controls = ModePageControls::default();

    for pc in PageControl::ALL {
        let command = if mode6 {
            command::mode_sense_6(dbd, pc, page, subpage, alloc_len as u8)
        } else {
            command::mode_sense_10(false, dbd, pc, page, subpage, alloc_len)
        };
        req.attach_cdb(command.as_bytes())
            .set_timeout(command.timeout);
        if let Some(sense) = buffers.sense.take() {
            req.attach_sense_buffer(sense);
        }
        if let DataBuffer::In(buf) = buffers.data {
            req.attach_data_in(buf);
        }

        let category = device.submit(&mut req)?;
        let fetched = match process_response(&req, category, header_len) {
            Ok(n) => {
                let data = req.data_in().map_or(&[][..], |buf| &buf[..n.min(buf.len())]);
                let header = if mode6 {
                    ModeHeader::parse_6(data)?
                } else {
                    ModeHeader::parse_10(data)?
                };
                Some(header.first_page(data)?.to_vec())
            }
            Err(CmdError::IllegalRequest(sense_info)) if pc != PageControl::Current => {
                info!(?pc, %sense_info, "page control not supported");
                None
            }
            Err(err) => return Err(err),
        };

        match pc {
            PageControl::Current => controls.current = fetched.unwrap_or_default(),
            PageControl::Changeable => controls.changeable = fetched,
            PageControl::Default => controls.default = fetched,
            PageControl::Saved => controls.saved = fetched,
        }
        buffers = req.clear();
    }
    Ok(controls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtConfig;
    use crate::pt::mock::{Reply, ScriptedBackend};
    use crate::scsi::sense::SenseKey;

    fn device(
        replies: impl IntoIterator<Item = Reply>,
    ) -> (ScriptedBackend, ScsiDevice<ScriptedBackend>) {
        let backend = ScriptedBackend::new(replies);
        let dev = ScsiDevice::open(backend.clone(), "/dev/sg0", &PtConfig::default()).unwrap();
        (backend, dev)
    }

    /// Mode parameter header(6) followed by a caching page.
    fn caching_page(wce: bool) -> Vec<u8> {
        let mut data = vec![0u8; 24];
        data[0] = 23;
        data[4] = 0x08;
        data[5] = 0x12;
        data[6] = u8::from(wce) << 2;
        data
    }

    #[test]
    fn write_long_sends_block() {
        let (backend, dev) = device([Reply::good(&[])]);
        let block = vec![0x5a; 520];
        ll_write_long10(&dev, true, false, false, 0x1000, &block).unwrap();

        let state = backend.state();
        assert_eq!(state.cdbs[0][0], 0x3f);
        assert_eq!(state.cdbs[0][1], 0x80);
        assert_eq!(&state.cdbs[0][2..6], &0x1000u32.to_be_bytes());
        assert_eq!(&state.cdbs[0][7..9], &520u16.to_be_bytes());
        assert_eq!(state.data_out[0], block);
    }

    #[test]
    fn write_long_reports_length_mismatch() {
        let mut reply = Reply::check_condition(SenseKey::IllegalRequest, 0x24, 0x00);
        reply.sense[0] |= 0x80;
        reply.sense[2] |= 0x20;
        reply.sense[3..7].copy_from_slice(&8u32.to_be_bytes());
        let (_, dev) = device([reply]);

        let err = ll_write_long10(&dev, false, false, false, 0, &[0u8; 520]).unwrap_err();
        let CmdError::LengthMismatch { info, information } = err else {
            panic!("expected a length mismatch, got {err:?}");
        };
        assert_eq!(information, 8);
        assert_eq!(info.asc, 0x24);
    }

    #[test]
    fn write_long_without_ili_is_plain_illegal_request() {
        let (_, dev) = device([Reply::check_condition(SenseKey::IllegalRequest, 0x24, 0x00)]);
        let err = ll_write_long10(&dev, false, true, false, 0, &[]).unwrap_err();
        assert!(matches!(err, CmdError::IllegalRequest(_)));
    }

    #[test]
    fn mode_page_controls_reuse_one_request() {
        let (backend, dev) = device([
            Reply::good(&caching_page(true)),
            Reply::good(&caching_page(true)),
            Reply::good(&caching_page(false)),
            Reply::check_condition(SenseKey::IllegalRequest, 0x39, 0x00),
        ]);

        let controls = get_mode_page_controls(&dev, true, 0x08, 0, true, 64).unwrap();
        assert_eq!(controls.current.len(), 20);
        assert_eq!(controls.current[0], 0x08);
        assert_eq!(controls.current[2], 0x04);
        assert_eq!(controls.changeable.as_deref().map(|p| p[2]), Some(0x04));
        assert_eq!(controls.default.as_deref().map(|p| p[2]), Some(0x00));
        assert_eq!(controls.saved, None);

        let state = backend.state();
        assert_eq!(state.submits, 4);
        for (k, cdb) in state.cdbs.iter().enumerate() {
            assert_eq!(cdb[0], 0x1a);
            assert_eq!(cdb[1], 0x08);
            assert_eq!(usize::from(cdb[2] >> 6), k);
            assert_eq!(cdb[4], 64);
        }
    }

    #[test]
    fn mode_page_controls_need_current_values() {
        let (backend, dev) = device([Reply::check_condition(SenseKey::IllegalRequest, 0x24, 0x00)]);
        let err = get_mode_page_controls(&dev, false, 0x1c, 0, false, 128).unwrap_err();
        assert!(matches!(err, CmdError::IllegalRequest(_)));
        assert_eq!(backend.state().submits, 1);
        assert_eq!(backend.state().cdbs[0][0], 0x5a);
    }

    #[test]
    fn mode_page_controls_reject_tiny_allocation() {
        let (backend, dev) = device(Vec::<Reply>::new());
        assert!(matches!(
            get_mode_page_controls(&dev, false, 0x08, 0, false, 4),
            Err(CmdError::Malformed(_))
        ));
        assert_eq!(backend.state().submits, 0);
    }
}
