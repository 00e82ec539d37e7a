use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use super::backend::{OpenFlags, PtBackend};
use super::outcome::{ResultCategory, categorize};
use super::request::PtRequest;
use crate::config::{PtConfig, TransferMode};
use crate::error::PtError;

/// Identifies an open device handle, so a request built for one device is
/// not submitted on another.
///
/// `instance` separates backends whose descriptors are only unique within
/// one backend value, such as the Windows handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    backend: &'static str,
    instance: u64,
    descriptor: i64,
}

impl DeviceId {
    pub fn new(backend: &'static str, descriptor: i64) -> Self {
        Self {
            backend,
            instance: 0,
            descriptor,
        }
    }

    pub fn with_instance(mut self, instance: u64) -> Self {
        self.instance = instance;
        self
    }

    pub fn descriptor(&self) -> i64 {
        self.descriptor
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            0 => write!(f, "{}:{}", self.backend, self.descriptor),
            instance => write!(f, "{}.{}:{}", self.backend, instance, self.descriptor),
        }
    }
}

/// An open pass-through device.
///
/// Owns one OS handle obtained from its backend. The handle is released by
/// [`close`](Self::close) or, failing that, on drop.
pub struct PtDevice<B: PtBackend> {
    backend: B,
    handle: Option<B::Handle>,
    id: DeviceId,
    name: String,
    default_timeout: Duration,
    transfer_mode: TransferMode,
}

impl<B: PtBackend> fmt::Debug for PtDevice<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtDevice")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl<B: PtBackend> PtDevice<B> {
    #[tracing::instrument(skip(backend), fields(backend = B::NAME))]
    pub fn open(backend: B, name: &str, flags: OpenFlags) -> Result<Self, PtError> {
        let handle = backend.open(name, flags)?;
        let id = DeviceId::new(B::NAME, B::descriptor(&handle)).with_instance(backend.instance());
        debug!(%id, "device opened");
        let config = PtConfig::default();
        Ok(Self {
            backend,
            handle: Some(handle),
            id,
            name: name.to_string(),
            default_timeout: config.default_timeout,
            transfer_mode: config.transfer_mode,
        })
    }

    /// Opens `name` with the access mode, timeout and transfer mode of `config`.
    pub fn open_with(backend: B, name: &str, config: &PtConfig) -> Result<Self, PtError> {
        let flags = if config.read_only {
            OpenFlags::READ_ONLY
        } else {
            OpenFlags::empty()
        };
        let mut device = Self::open(backend, name, flags)?;
        device.default_timeout = config.default_timeout;
        device.transfer_mode = config.transfer_mode;
        Ok(device)
    }

    /// Releases the OS handle. Closing twice is [`PtError::NotOpen`].
    pub fn close(&mut self) -> Result<(), PtError> {
        let handle = self.handle.take().ok_or(PtError::NotOpen)?;
        debug!(id = %self.id, "closing device");
        self.backend.close(handle)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// A request bound to this device, carrying its backend's capabilities.
    pub fn new_request<'a>(&self) -> PtRequest<'a> {
        PtRequest::bound(B::CAPABILITIES, self.id, self.transfer_mode)
    }

    /// Submits `req` and waits for it to complete.
    ///
    /// Builder misuse, a missing CDB, attributes the backend cannot carry, a
    /// closed device or a request bound to another device are rejected with [`PtError::BadParams`] before any
    /// OS call. A platform call that fails outright is returned as an error
    /// and also recorded on the request, whose category is then
    /// [`ResultCategory::OsError`].
    #[tracing::instrument(level = "debug", skip_all, fields(device = %self.name))]
    pub fn submit(&self, req: &mut PtRequest<'_>) -> Result<ResultCategory, PtError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| PtError::BadParams("device is not open".into()))?;
        req.validate(self.id, B::CAPABILITIES)?;

        let view = req.view(self.default_timeout);
        let opcode = view.cdb[0];
        debug!(
            opcode = format_args!("{opcode:#04x}"),
            cdb_len = view.cdb.len(),
            direction = ?view.data.direction(),
            data_len = view.data.len(),
            timeout_ms = view.timeout.as_millis() as u64,
            "submitting"
        );

        match self.backend.submit(handle, view) {
            Ok(report) => req.complete(report),
            Err(PtError::Os { errno, context }) => {
                warn!(errno, context, "pass-through call failed");
                req.fail_os(errno);
                return Err(PtError::Os { errno, context });
            }
            Err(err) => return Err(err),
        }

        let Some(outcome) = req.outcome() else {
            return Err(PtError::BadParams("request has no outcome".into()));
        };
        let category = categorize(outcome);
        debug!(
            ?category,
            status = outcome.scsi_status,
            resid = outcome.resid,
            sense_len = outcome.sense_len,
            duration = ?outcome.duration,
            "completed"
        );
        Ok(category)
    }
}

impl<B: PtBackend> Drop for PtDevice<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.backend.close(handle) {
                warn!(id = %self.id, %err, "failed to close device on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pt::Capabilities;
    use crate::pt::mock::{Reply, ScriptedBackend};
    use crate::scsi::sense::{SenseCategory, SenseKey};

    const INQUIRY: [u8; 6] = [0x12, 0, 0, 0, 96, 0];

    fn open(backend: &ScriptedBackend) -> PtDevice<ScriptedBackend> {
        PtDevice::open(backend.clone(), "/dev/sg0", OpenFlags::empty()).unwrap()
    }

    #[test]
    fn inquiry_good_path() {
        let mut reply = vec![0u8; 96];
        reply[8..16].copy_from_slice(b"ACME    ");
        let backend = ScriptedBackend::new([Reply::good(&reply)]);
        let device = open(&backend);

        let mut sense = [0u8; 32];
        let mut data = [0u8; 96];
        let mut req = device.new_request();
        req.attach_cdb(&INQUIRY)
            .attach_sense_buffer(&mut sense)
            .attach_data_in(&mut data);

        assert_eq!(device.submit(&mut req).unwrap(), ResultCategory::Good);
        assert_eq!(req.scsi_status(), 0);
        assert_eq!(req.resid(), 0);
        assert_eq!(req.transferred().unwrap(), 96);
        assert!(req.sense().is_empty());
        assert_eq!(&req.data_in().unwrap()[8..12], b"ACME");
        assert_eq!(backend.state().cdbs, vec![INQUIRY.to_vec()]);
        assert_eq!(backend.state().timeouts, vec![Duration::from_secs(60)]);
    }

    #[test]
    fn not_ready_check_condition() {
        let backend = ScriptedBackend::new([Reply::check_condition(SenseKey::NotReady, 0x04, 0x01)]);
        let device = open(&backend);

        let mut sense = [0u8; 32];
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]).attach_sense_buffer(&mut sense);

        assert_eq!(
            device.submit(&mut req).unwrap(),
            ResultCategory::SenseCheckCondition
        );
        let info = req.sense_info().unwrap();
        assert_eq!(info.sense_key, SenseKey::NotReady);
        assert_eq!((info.asc, info.ascq), (0x04, 0x01));
        assert_eq!(SenseCategory::from_sense(req.sense()), SenseCategory::NotReady);
    }

    #[test]
    fn misuse_is_refused_before_the_os() {
        let backend = ScriptedBackend::default();
        let device = open(&backend);

        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        let mut req = device.new_request();
        req.attach_cdb(&INQUIRY)
            .attach_data_in(&mut first)
            .attach_data_in(&mut second);

        assert!(matches!(device.submit(&mut req), Err(PtError::BadParams(_))));
        assert_eq!(backend.state().submits, 0);
        assert!(!req.is_submitted());
    }

    #[test]
    fn attributes_beyond_the_backend_are_refused() {
        let backend = ScriptedBackend::default();
        let device = open(&backend);

        let mut req = PtRequest::with_capabilities(Capabilities::all());
        req.attach_cdb(&INQUIRY).set_tag(7).set_priority(3);
        assert_eq!(req.misuse_count(), 0);

        let Err(PtError::BadParams(msg)) = device.submit(&mut req) else {
            panic!("tag and priority must not reach a FLAGS-only backend");
        };
        assert!(msg.contains("TAG"), "{msg}");
        assert_eq!(backend.state().submits, 0);

        let mut req = PtRequest::with_capabilities(Capabilities::all());
        req.attach_cdb(&INQUIRY).set_flags(0x20);
        assert_eq!(device.submit(&mut req).unwrap(), ResultCategory::Good);
        assert_eq!(backend.state().submits, 1);
    }

    #[test]
    fn missing_cdb_is_refused() {
        let backend = ScriptedBackend::default();
        let device = open(&backend);
        let mut req = device.new_request();
        assert!(matches!(device.submit(&mut req), Err(PtError::BadParams(_))));
        assert_eq!(backend.state().submits, 0);
    }

    #[test]
    fn oversized_residual_is_malformed() {
        let backend = ScriptedBackend::new([Reply::good(&[]).with_resid(200)]);
        let device = open(&backend);

        let mut data = [0x55u8; 96];
        let mut req = device.new_request();
        req.attach_cdb(&INQUIRY).attach_data_in(&mut data);

        assert_eq!(device.submit(&mut req).unwrap(), ResultCategory::Good);
        assert!(matches!(
            req.transferred(),
            Err(PtError::Malformed {
                resid: 200,
                requested: 96
            })
        ));
        // left untouched rather than zero-filled
        assert!(req.data_in().unwrap().iter().all(|b| *b == 0x55));
    }

    #[test]
    fn open_nonexistent_device() {
        let err = PtDevice::open(
            ScriptedBackend::default(),
            "/nonexistent/sg9",
            OpenFlags::READ_ONLY,
        )
        .unwrap_err();
        assert!(matches!(err, PtError::Os { errno: 2, .. }));
        assert_eq!(err.negated(), -2);
    }

    #[test]
    fn close_twice_is_an_error() {
        let backend = ScriptedBackend::default();
        let mut device = open(&backend);
        device.close().unwrap();
        assert!(!device.is_open());
        assert!(matches!(device.close(), Err(PtError::NotOpen)));
        drop(device);
        assert_eq!(backend.state().closes, 1);
    }

    #[test]
    fn drop_closes_once() {
        let backend = ScriptedBackend::default();
        drop(open(&backend));
        assert_eq!(backend.state().opens, 1);
        assert_eq!(backend.state().closes, 1);
    }

    #[test]
    fn submit_on_closed_device() {
        let backend = ScriptedBackend::default();
        let mut device = open(&backend);
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]);
        device.close().unwrap();
        assert!(matches!(device.submit(&mut req), Err(PtError::BadParams(_))));
    }

    #[test]
    fn os_failure_is_recorded_on_the_request() {
        let backend = ScriptedBackend::new([Reply::os_failure(5)]);
        let device = open(&backend);
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]);

        assert!(matches!(
            device.submit(&mut req),
            Err(PtError::Os { errno: 5, .. })
        ));
        assert_eq!(req.os_error(), 5);
        assert_eq!(req.category(), Some(ResultCategory::OsError));
    }

    #[test]
    fn transport_error_wins_over_status() {
        let mut reply = Reply::transport(0x0100);
        reply.status = 0x02;
        let backend = ScriptedBackend::new([reply]);
        let device = open(&backend);
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]);
        assert_eq!(
            device.submit(&mut req).unwrap(),
            ResultCategory::TransportError
        );
        assert_eq!(req.transport_error(), 0x0100);
    }

    #[test]
    fn resubmission_needs_clear() {
        let backend = ScriptedBackend::default();
        let device = open(&backend);
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]).set_timeout(Duration::from_secs(5));
        device.submit(&mut req).unwrap();
        assert!(matches!(device.submit(&mut req), Err(PtError::BadParams(_))));

        req.clear();
        req.attach_cdb(&[0; 6]);
        device.submit(&mut req).unwrap();
        assert_eq!(backend.state().submits, 2);
        assert_eq!(
            backend.state().timeouts,
            vec![Duration::from_secs(5), Duration::from_secs(60)]
        );
    }

    #[test]
    fn request_for_another_device_is_refused() {
        let backend = ScriptedBackend::default();
        let first = open(&backend);
        let second = open(&backend);
        let mut req = first.new_request();
        req.attach_cdb(&[0; 6]);
        assert!(matches!(second.submit(&mut req), Err(PtError::BadParams(_))));
        assert_eq!(backend.state().submits, 0);
    }

    #[test]
    fn same_descriptor_on_separate_backends_is_told_apart() {
        let first_backend = ScriptedBackend::default();
        let second_backend = ScriptedBackend::default();
        let first = open(&first_backend);
        let second = open(&second_backend);
        assert_eq!(first.id().descriptor(), second.id().descriptor());
        assert_ne!(first.id(), second.id());

        let mut req = first.new_request();
        req.attach_cdb(&[0; 6]);
        assert!(matches!(second.submit(&mut req), Err(PtError::BadParams(_))));
        assert_eq!(second_backend.state().submits, 0);
        first.submit(&mut req).unwrap();
        assert_eq!(first_backend.state().submits, 1);
    }

    #[test]
    fn device_id_display() {
        assert_eq!(DeviceId::new("linux-sg", 3).to_string(), "linux-sg:3");
        assert_eq!(
            DeviceId::new("win32-spt", 32768).with_instance(2).to_string(),
            "win32-spt.2:32768"
        );
    }

    #[test]
    fn config_sets_default_timeout() {
        let backend = ScriptedBackend::default();
        let config = PtConfig {
            default_timeout: Duration::from_secs(7),
            ..PtConfig::default()
        };
        let device = PtDevice::open_with(backend.clone(), "/dev/sg1", &config).unwrap();
        let mut req = device.new_request();
        req.attach_cdb(&[0; 6]);
        device.submit(&mut req).unwrap();
        assert_eq!(backend.state().timeouts, vec![Duration::from_secs(7)]);
    }
}
