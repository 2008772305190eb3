//! Device session: owns the device handle and the state guarded with it.
//!
//! Every device call, and every read or write of the session's error flags
//! and configuration, goes through one mutex. The mutex is held only for the
//! span of the call itself; buffer work happens after it is released.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::codec::encode;
use crate::domain::{
    DeviceMetadata, DriverError, DriverResult, ErrorFlags, EventMask, PurgeMask, SerialConfig,
    Setting, TransportError, TransportResult, UsbId, LATENCY_TIMER_MS, READ_TIMEOUT_MS,
    WRITE_TIMEOUT_MS,
};
use crate::ports::{EventSignal, FtdiDevice, FtdiDriver};

/// Conditions armed on the notification primitive at open
pub const NOTIFY_EVENTS: EventMask = EventMask::RX_CHAR.union(EventMask::MODEM_STATUS);

struct SessionState {
    device: Option<Box<dyn FtdiDevice>>,
    port: UsbId,
    config: SerialConfig,
    metadata: Option<DeviceMetadata>,
    errors: ErrorFlags,
    error_string: Option<String>,
}

/// The single mutual-exclusion section around one device connection.
pub struct DeviceSession {
    state: Mutex<SessionState>,
}

impl DeviceSession {
    pub fn new(port: UsbId, config: SerialConfig) -> Self {
        Self {
            state: Mutex::new(SessionState {
                device: None,
                port,
                config,
                metadata: None,
                errors: ErrorFlags::empty(),
                error_string: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Run one device call inside the section.
    ///
    /// The outer result is `Err(NotOpen)` when there is no handle; the inner
    /// result is whatever the driver returned.
    pub fn with_device<T>(
        &self,
        call: impl FnOnce(&mut dyn FtdiDevice) -> DriverResult<T>,
    ) -> TransportResult<DriverResult<T>> {
        let mut state = self.lock();
        match state.device.as_mut() {
            Some(device) => Ok(call(device.as_mut())),
            None => Err(TransportError::NotOpen),
        }
    }

    /// Push a setting if a handle is open, then commit it to the stored
    /// configuration. Both happen inside the section, so a concurrent close
    /// cannot slip between them. Returns whether the device was called.
    pub fn apply(
        &self,
        push: impl FnOnce(&mut dyn FtdiDevice) -> DriverResult<()>,
        commit: impl FnOnce(&mut SerialConfig),
    ) -> DriverResult<bool> {
        let mut state = self.lock();
        let pushed = match state.device.as_mut() {
            Some(device) => {
                push(device.as_mut())?;
                true
            }
            None => false,
        };
        commit(&mut state.config);
        Ok(pushed)
    }

    /// Install a freshly opened handle. Clears stale error state.
    pub fn attach(&self, device: Box<dyn FtdiDevice>, metadata: DeviceMetadata) {
        let mut state = self.lock();
        state.device = Some(device);
        state.metadata = Some(metadata);
        state.errors = ErrorFlags::empty();
        state.error_string = None;
    }

    /// Close and invalidate the handle. The handle is released and removed
    /// while the section is held, so no caller can observe it half closed.
    /// Returns false if there was nothing to close.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        let Some(mut device) = state.device.take() else {
            return false;
        };
        if let Err(e) = device.close() {
            log::warn!("device close reported an error: {e}");
        }
        state.metadata = None;
        true
    }

    pub fn port(&self) -> UsbId {
        self.lock().port
    }

    pub fn set_port(&self, port: UsbId) {
        self.lock().port = port;
    }

    pub fn config(&self) -> SerialConfig {
        self.lock().config
    }

    pub fn metadata(&self) -> Option<DeviceMetadata> {
        self.lock().metadata.clone()
    }

    pub fn errors(&self) -> ErrorFlags {
        self.lock().errors
    }

    /// Overwrite the error flags (decoded modem status)
    pub fn set_errors(&self, errors: ErrorFlags) {
        self.lock().errors = errors;
    }

    /// Overwrite the error flags and describe why
    pub fn record_fault(&self, errors: ErrorFlags, message: impl Into<String>) {
        let mut state = self.lock();
        state.errors = errors;
        state.error_string = Some(message.into());
    }

    pub fn clear_errors(&self) {
        self.lock().errors = ErrorFlags::empty();
    }

    pub fn error_string(&self) -> Option<String> {
        self.lock().error_string.clone()
    }

    pub fn set_error_string(&self, message: impl Into<String>) {
        self.lock().error_string = Some(message.into());
    }
}

fn configure_error(setting: Setting) -> impl FnOnce(DriverError) -> TransportError {
    move |source| TransportError::Configure { setting, source }
}

/// Find, open and prepare the device matching `port`.
///
/// On any failure after the handle was obtained the handle is closed again
/// before the error is returned, so nothing leaks and nothing is half open.
pub fn open_device(
    driver: &dyn FtdiDriver,
    port: UsbId,
    config: &SerialConfig,
    signal: &EventSignal,
) -> TransportResult<(Box<dyn FtdiDevice>, DeviceMetadata)> {
    let nodes = driver.enumerate().map_err(TransportError::Enumeration)?;
    let node = nodes
        .iter()
        .find(|node| node.matches(port.vendor_id, port.product_id))
        .ok_or(TransportError::NoCompatibleDevice {
            vendor_id: port.vendor_id,
            product_id: port.product_id,
        })?;

    log::debug!(
        "opening device #{} ({:04X}:{:04X}) at {}",
        node.index,
        node.vendor_id,
        node.product_id,
        node.location
    );
    let mut device = driver.open(node.index).map_err(TransportError::Open)?;

    match prepare(driver, device.as_mut(), config, signal) {
        Ok(metadata) => Ok((device, metadata)),
        Err(err) => {
            if let Err(close_err) = device.close() {
                log::warn!("failed to release device after open error: {close_err}");
            }
            Err(err)
        }
    }
}

fn prepare(
    driver: &dyn FtdiDriver,
    device: &mut dyn FtdiDevice,
    config: &SerialConfig,
    signal: &EventSignal,
) -> TransportResult<DeviceMetadata> {
    device
        .set_baud_rate(config.baud_rate)
        .map_err(configure_error(Setting::BaudRate))?;
    device
        .set_latency_timer(LATENCY_TIMER_MS)
        .map_err(configure_error(Setting::LatencyTimer))?;
    device
        .set_timeouts(READ_TIMEOUT_MS, WRITE_TIMEOUT_MS)
        .map_err(configure_error(Setting::Timeouts))?;
    device
        .set_data_characteristics(encode::data_characteristics(config.line_encoding))
        .map_err(configure_error(Setting::LineEncoding))?;
    device
        .set_flow_control(encode::flow_settings(config.flow_control))
        .map_err(configure_error(Setting::FlowControl))?;
    device
        .set_dtr(config.data_terminal_ready)
        .map_err(configure_error(Setting::DataTerminalReady))?;
    device
        .set_rts(config.request_to_send)
        .map_err(configure_error(Setting::RequestToSend))?;

    device
        .purge(PurgeMask::RX | PurgeMask::TX)
        .map_err(TransportError::Purge)?;

    let metadata = read_metadata(driver, device)?;

    // Armed last: once this succeeds the device may signal at any moment
    device
        .set_event_notification(NOTIFY_EVENTS, signal.clone())
        .map_err(configure_error(Setting::EventNotification))?;

    Ok(metadata)
}

fn read_metadata(
    driver: &dyn FtdiDriver,
    device: &mut dyn FtdiDevice,
) -> TransportResult<DeviceMetadata> {
    let eeprom = device.read_eeprom().map_err(TransportError::Metadata)?;
    let library_version = driver.library_version().map_err(TransportError::Metadata)?;

    Ok(DeviceMetadata {
        chip_id: eeprom.chip_id,
        product_name: eeprom.description,
        manufacturer: eeprom.manufacturer,
        serial_number: eeprom.serial_number.to_uppercase(),
        library_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_ftdi::{MockCall, MockDeviceSpec, MockFtdiDriver, MockOp};

    fn open_mock(driver: &MockFtdiDriver) -> TransportResult<(Box<dyn FtdiDevice>, DeviceMetadata)> {
        open_device(
            driver,
            UsbId::default(),
            &SerialConfig::default(),
            &EventSignal::new(),
        )
    }

    #[test]
    fn open_pushes_defaults_then_arms_notification() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("a1b2c3"));

        let (_handle, metadata) = open_mock(&driver).unwrap();

        assert_eq!(metadata.serial_number, "A1B2C3");
        assert_eq!(metadata.library_version.to_string(), "3.02.22");

        let calls = device.calls();
        assert_eq!(calls.first(), Some(&MockCall::SetBaudRate(115_200)));
        assert!(calls.contains(&MockCall::SetLatencyTimer(3)));
        assert!(calls.contains(&MockCall::SetTimeouts(5000, 2000)));
        assert!(calls.contains(&MockCall::Purge(PurgeMask::RX | PurgeMask::TX)));
        assert_eq!(
            calls.last(),
            Some(&MockCall::SetEventNotification(NOTIFY_EVENTS))
        );
        assert!(device.is_open());
    }

    #[test]
    fn no_matching_device_opens_nothing() {
        let driver = MockFtdiDriver::new();
        let other = driver.add_device(MockDeviceSpec::ft232r("X").with_ids(0x0403, 0x6015));

        let err = open_mock(&driver).err().unwrap();
        assert!(matches!(
            err,
            TransportError::NoCompatibleDevice { vendor_id: 0x0403, product_id: 0x6001 }
        ));
        assert!(other.calls().is_empty());
    }

    #[test]
    fn failed_setup_step_closes_the_handle() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        device.fail_next(MockOp::SetTimeouts, DriverError::InvalidParameter("timeouts".into()));

        let err = open_mock(&driver).err().unwrap();
        assert!(matches!(
            err,
            TransportError::Configure { setting: Setting::Timeouts, .. }
        ));
        assert!(!device.is_open());
        assert_eq!(device.calls().last(), Some(&MockCall::Close));
    }

    #[test]
    fn eeprom_failure_is_a_metadata_error() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        device.fail_next(MockOp::ReadEeprom, DriverError::EepromReadFailed);

        let err = open_mock(&driver).err().unwrap();
        assert!(matches!(err, TransportError::Metadata(DriverError::EepromReadFailed)));
        assert!(!device.is_open());
    }

    #[test]
    fn with_device_reports_not_open_without_handle() {
        let session = DeviceSession::new(UsbId::default(), SerialConfig::default());
        let result = session.with_device(|device| device.queue_status());
        assert!(matches!(result, Err(TransportError::NotOpen)));
        assert!(!session.close());
    }

    #[test]
    fn apply_commits_without_device_when_closed() {
        let session = DeviceSession::new(UsbId::default(), SerialConfig::default());
        let pushed = session
            .apply(|device| device.set_baud_rate(9600), |c| c.baud_rate = 9600)
            .unwrap();
        assert!(!pushed);
        assert_eq!(session.config().baud_rate, 9600);
    }

    #[test]
    fn apply_leaves_config_unchanged_when_device_rejects() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let (handle, metadata) = open_mock(&driver).unwrap();

        let session = DeviceSession::new(UsbId::default(), SerialConfig::default());
        session.attach(handle, metadata);
        device.fail_next(MockOp::SetBaudRate, DriverError::InvalidParameter("baud".into()));

        let result = session.apply(|d| d.set_baud_rate(1), |c| c.baud_rate = 1);
        assert!(result.is_err());
        assert_eq!(session.config().baud_rate, 115_200);
    }

    #[test]
    fn close_invalidates_handle_and_metadata() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let (handle, metadata) = open_mock(&driver).unwrap();

        let session = DeviceSession::new(UsbId::default(), SerialConfig::default());
        session.attach(handle, metadata);
        assert!(session.is_open());
        assert!(session.metadata().is_some());

        assert!(session.close());
        assert!(!session.is_open());
        assert!(session.metadata().is_none());
        assert!(!device.is_open());
        assert!(!session.close());
    }
}
