//! Transport facade
//!
//! `FtTransport` is the object callers hold. It owns the device session, the
//! receive buffer and the observer list, and runs the event dispatcher while
//! the device is open.
//!
//! ```text
//!  caller ──read/wait──▶ ReceiveBuffer ◀──append── Dispatcher ◀── EventSignal
//!     │                                               │              ▲
//!     └──write/config/close──▶ DeviceSession ◀────────┘              │
//!                                  │                                 │
//!                                  └─────────── FtdiDevice ──────────┘
//! ```

pub mod buffer;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod session;

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::codec::{self, encode};
use crate::domain::{
    DeviceDescriptor, DeviceMetadata, DriverResult, DriverVersion, ErrorFlags, FlowControl,
    LineEncoding, PinoutSignals, Profile, SerialConfig, Setting, TransportError,
    TransportResult, UsbId,
};
use crate::ports::{EventSignal, FtdiDevice, FtdiDriver};

pub use buffer::ReceiveBuffer;
pub use discovery::available_ports;
pub use dispatcher::Dispatcher;
pub use events::{Observers, TransportEvent, EVENT_QUEUE_CAPACITY};
pub use session::{open_device, DeviceSession, NOTIFY_EVENTS};

/// How long `std::io::Read` waits for data before reporting `TimedOut`
pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the facade and the dispatcher thread
pub(crate) struct Shared {
    pub(crate) session: DeviceSession,
    pub(crate) buffer: ReceiveBuffer,
    pub(crate) observers: Observers,
}

impl Shared {
    pub(crate) fn new(port: UsbId, config: SerialConfig) -> Self {
        Self {
            session: DeviceSession::new(port, config),
            buffer: ReceiveBuffer::new(),
            observers: Observers::new(),
        }
    }
}

/// Buffered, event-driven serial transport over one FTDI device.
///
/// All methods take `&self`; the transport can be shared between a reader
/// thread and a writer thread behind an `Arc`.
pub struct FtTransport {
    driver: Arc<dyn FtdiDriver>,
    shared: Arc<Shared>,
    /// Held across open and close so the two never interleave
    lifecycle: Mutex<Option<Dispatcher>>,
}

impl FtTransport {
    /// A closed transport targeting the default FT232R ids at 115200 8N1
    pub fn new(driver: Arc<dyn FtdiDriver>) -> Self {
        Self::with_config(driver, UsbId::default(), SerialConfig::default())
    }

    pub fn with_config(driver: Arc<dyn FtdiDriver>, port: UsbId, config: SerialConfig) -> Self {
        Self {
            driver,
            shared: Arc::new(Shared::new(port, config)),
            lifecycle: Mutex::new(None),
        }
    }

    // ---- lifecycle ----

    /// Find the configured device, open it, push the stored configuration
    /// and start the dispatcher.
    pub fn open(&self) -> TransportResult<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if self.shared.session.is_open() {
            return Err(TransportError::AlreadyOpen);
        }
        if let Some(stale) = lifecycle.take() {
            stale.stop();
        }

        let port = self.shared.session.port();
        let config = self.shared.session.config();
        log::info!(
            "Opening {:04X}:{:04X} at {} baud {}",
            port.vendor_id,
            port.product_id,
            config.baud_rate,
            config.line_encoding
        );

        let signal = EventSignal::new();
        let (device, metadata) = match open_device(self.driver.as_ref(), port, &config, &signal) {
            Ok(opened) => opened,
            Err(err) => {
                log::error!("Open failed: {err}");
                self.shared.session.set_error_string(err.to_string());
                return Err(err);
            }
        };

        let description = format!(
            "{} {} (serial {}, driver {})",
            metadata.manufacturer,
            metadata.product_name,
            metadata.serial_number,
            metadata.library_version
        );

        self.shared.buffer.clear();
        self.shared.buffer.resume();
        self.shared.session.attach(device, metadata);

        match Dispatcher::spawn(Arc::clone(&self.shared), signal) {
            Ok(dispatcher) => *lifecycle = Some(dispatcher),
            Err(e) => {
                self.shared.session.close();
                let err = TransportError::Dispatcher(e);
                log::error!("Open failed: {err}");
                self.shared.session.set_error_string(err.to_string());
                return Err(err);
            }
        }

        log::info!("Opened {description}");
        self.shared.observers.emit(TransportEvent::Connected);
        Ok(())
    }

    /// Stop the dispatcher and release the device. Unread bytes are
    /// discarded and blocked waiters return false. Closing a closed
    /// transport does nothing.
    pub fn close(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        if !self.shared.session.is_open() {
            if let Some(stale) = lifecycle.take() {
                stale.stop();
            }
            return;
        }

        self.shared.observers.emit(TransportEvent::AboutToClose);
        if let Some(dispatcher) = lifecycle.take() {
            dispatcher.stop();
        }
        self.shared.session.close();
        self.shared.buffer.interrupt();
        let dropped = self.shared.buffer.clear();
        if dropped > 0 {
            log::debug!("Discarded {dropped} unread bytes");
        }
        log::info!("Device closed");
    }

    pub fn is_open(&self) -> bool {
        self.shared.session.is_open()
    }

    // ---- data path ----

    /// Remove and return up to `max` buffered bytes. Never blocks.
    pub fn read(&self, max: usize) -> Vec<u8> {
        self.shared.buffer.take_up_to(max)
    }

    /// Like `read`, copying into `out`
    pub fn read_into(&self, out: &mut [u8]) -> usize {
        self.shared.buffer.take_into(out)
    }

    pub fn bytes_available(&self) -> usize {
        self.shared.buffer.available()
    }

    /// Block until buffered data is available or `timeout` elapses.
    /// Returns false on timeout, when closed, or when closed while waiting.
    pub fn wait_for_ready_read(&self, timeout: Duration) -> bool {
        if !self.is_open() {
            return false;
        }
        self.shared.buffer.wait_available(timeout)
    }

    /// Write `data` to the device. The device call runs inside the session
    /// section, so it never interleaves with the dispatcher's drain.
    pub fn write(&self, data: &[u8]) -> TransportResult<usize> {
        self.shared
            .session
            .with_device(|device| device.write(data))?
            .map_err(|e| {
                log::warn!("Write of {} bytes failed: {e}", data.len());
                TransportError::Write(e)
            })
    }

    // ---- configuration ----

    /// Select the device to open next. Has no effect on an open session.
    pub fn set_port(&self, vendor_id: u16, product_id: u16) {
        self.shared.session.set_port(UsbId {
            vendor_id,
            product_id,
        });
    }

    pub fn vendor_id(&self) -> u16 {
        self.shared.session.port().vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.shared.session.port().product_id
    }

    pub fn config(&self) -> SerialConfig {
        self.shared.session.config()
    }

    pub fn baud_rate(&self) -> u32 {
        self.config().baud_rate
    }

    pub fn line_encoding(&self) -> LineEncoding {
        self.config().line_encoding
    }

    pub fn flow_control(&self) -> FlowControl {
        self.config().flow_control
    }

    pub fn data_terminal_ready(&self) -> bool {
        self.config().data_terminal_ready
    }

    pub fn request_to_send(&self) -> bool {
        self.config().request_to_send
    }

    pub fn set_baud_rate(&self, baud_rate: u32) -> TransportResult<()> {
        if baud_rate == 0 {
            return Err(TransportError::InvalidBaudRate(baud_rate));
        }
        self.apply_setting(
            Setting::BaudRate,
            |device| device.set_baud_rate(baud_rate),
            |config| config.baud_rate = baud_rate,
        )?;
        self.shared
            .observers
            .emit(TransportEvent::BaudRateChanged(baud_rate));
        Ok(())
    }

    pub fn set_line_encoding(&self, line_encoding: LineEncoding) -> TransportResult<()> {
        let chars = encode::data_characteristics(line_encoding);
        self.apply_setting(
            Setting::LineEncoding,
            |device| device.set_data_characteristics(chars),
            |config| config.line_encoding = line_encoding,
        )?;
        self.shared
            .observers
            .emit(TransportEvent::LineEncodingChanged(line_encoding));
        Ok(())
    }

    pub fn set_flow_control(&self, flow_control: FlowControl) -> TransportResult<()> {
        let flow = encode::flow_settings(flow_control);
        self.apply_setting(
            Setting::FlowControl,
            |device| device.set_flow_control(flow),
            |config| config.flow_control = flow_control,
        )?;
        self.shared
            .observers
            .emit(TransportEvent::FlowControlChanged(flow_control));
        Ok(())
    }

    pub fn set_data_terminal_ready(&self, asserted: bool) -> TransportResult<()> {
        self.apply_setting(
            Setting::DataTerminalReady,
            |device| device.set_dtr(asserted),
            |config| config.data_terminal_ready = asserted,
        )?;
        self.shared
            .observers
            .emit(TransportEvent::DataTerminalReadyChanged(asserted));
        Ok(())
    }

    pub fn set_request_to_send(&self, asserted: bool) -> TransportResult<()> {
        self.apply_setting(
            Setting::RequestToSend,
            |device| device.set_rts(asserted),
            |config| config.request_to_send = asserted,
        )?;
        self.shared
            .observers
            .emit(TransportEvent::RequestToSendChanged(asserted));
        Ok(())
    }

    /// Select the profile's device and apply its line settings, stopping at
    /// the first setting the device rejects.
    pub fn apply_profile(&self, profile: &Profile) -> TransportResult<()> {
        log::debug!("Applying profile '{}'", profile.name);
        self.set_port(profile.port.vendor_id, profile.port.product_id);
        let serial = &profile.serial;
        self.set_baud_rate(serial.baud_rate)?;
        self.set_line_encoding(serial.line_encoding)?;
        self.set_flow_control(serial.flow_control)?;
        self.set_data_terminal_ready(serial.data_terminal_ready)?;
        self.set_request_to_send(serial.request_to_send)
    }

    /// Push through the session, then apply the failure policy: a rejected
    /// baud rate, line encoding or flow control closes the session.
    fn apply_setting(
        &self,
        setting: Setting,
        push: impl FnOnce(&mut dyn FtdiDevice) -> DriverResult<()>,
        commit: impl FnOnce(&mut SerialConfig),
    ) -> TransportResult<()> {
        // Serialised with open and close: a stored value is pushed either here
        // or by the open that follows
        let applied = {
            let _lifecycle = lock(&self.lifecycle);
            self.shared.session.apply(push, commit)
        };
        match applied {
            Ok(true) => {
                log::debug!("Pushed {setting} to device");
                Ok(())
            }
            Ok(false) => {
                log::debug!("Stored {setting}, applied at next open");
                Ok(())
            }
            Err(source) => {
                let err = TransportError::Configure { setting, source };
                self.shared.session.set_error_string(err.to_string());
                if setting.is_core() {
                    log::error!("{err}; closing device");
                    self.close();
                } else {
                    log::warn!("{err}");
                }
                Err(err)
            }
        }
    }

    // ---- status ----

    /// Fresh modem line state from the device
    pub fn pinout_signals(&self) -> TransportResult<PinoutSignals> {
        self.shared
            .session
            .with_device(|device| device.modem_status())?
            .map(codec::decode_signal_bits)
            .map_err(|e| {
                let err = TransportError::ModemStatus(e);
                log::warn!("{err}");
                self.shared.session.set_error_string(err.to_string());
                err
            })
    }

    /// Last recorded error flags
    pub fn error(&self) -> ErrorFlags {
        self.shared.session.errors()
    }

    pub fn clear_error(&self) {
        self.shared.session.clear_errors();
    }

    /// Description of the last recorded fault
    pub fn error_string(&self) -> Option<String> {
        self.shared.session.error_string()
    }

    // ---- metadata (read at open, cleared at close) ----

    pub fn metadata(&self) -> Option<DeviceMetadata> {
        self.shared.session.metadata()
    }

    pub fn chip_id(&self) -> Option<u32> {
        self.metadata().map(|m| m.chip_id)
    }

    pub fn product_name(&self) -> Option<String> {
        self.metadata().map(|m| m.product_name)
    }

    pub fn manufacturer(&self) -> Option<String> {
        self.metadata().map(|m| m.manufacturer)
    }

    pub fn serial_number(&self) -> Option<String> {
        self.metadata().map(|m| m.serial_number)
    }

    pub fn library_version(&self) -> Option<DriverVersion> {
        self.metadata().map(|m| m.library_version)
    }

    /// Scan for devices with the configured vendor/product ids
    pub fn available_ports(&self) -> TransportResult<Vec<DeviceDescriptor>> {
        let port = self.shared.session.port();
        available_ports(self.driver.as_ref(), port.vendor_id, port.product_id)
    }

    /// Receive every transport event from now on. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        self.shared.observers.subscribe()
    }
}

impl Drop for FtTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl io::Read for FtTransport {
    /// Blocks up to `DEFAULT_WAIT` for the first byte.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + DEFAULT_WAIT;
        loop {
            if !self.is_open() {
                return Err(TransportError::NotOpen.into());
            }
            let n = self.read_into(buf);
            if n > 0 {
                return Ok(n);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for_ready_read(remaining) {
                if !self.is_open() {
                    return Err(TransportError::NotOpen.into());
                }
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout.into());
                }
            }
        }
    }
}

impl io::Write for FtTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FtTransport::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_ftdi::{MockDevice, MockDeviceSpec, MockFtdiDriver, MockOp};
    use crate::domain::DriverError;

    fn transport() -> (FtTransport, MockDevice) {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("ab12"));
        (FtTransport::new(Arc::new(driver)), device)
    }

    #[test]
    fn open_twice_is_rejected() {
        let (transport, _device) = transport();
        transport.open().unwrap();
        assert!(matches!(transport.open(), Err(TransportError::AlreadyOpen)));
        assert!(transport.is_open());
    }

    #[test]
    fn metadata_is_available_only_while_open() {
        let (transport, _device) = transport();
        assert!(transport.serial_number().is_none());

        transport.open().unwrap();
        assert_eq!(transport.serial_number().as_deref(), Some("AB12"));
        assert_eq!(transport.product_name().as_deref(), Some("FT232R USB UART"));
        assert_eq!(transport.library_version().unwrap().to_string(), "3.02.22");

        transport.close();
        assert!(transport.metadata().is_none());
    }

    #[test]
    fn failed_open_records_error_string() {
        let driver = MockFtdiDriver::new();
        let transport = FtTransport::new(Arc::new(driver));

        assert!(transport.open().is_err());
        assert_eq!(
            transport.error_string().as_deref(),
            Some("no compatible devices found for 0403:6001")
        );
    }

    #[test]
    fn pinout_signals_query_the_device() {
        let (transport, device) = transport();
        assert!(matches!(transport.pinout_signals(), Err(TransportError::NotOpen)));

        transport.open().unwrap();
        device.set_modem_status(0x10 | 0x80);
        assert_eq!(
            transport.pinout_signals().unwrap(),
            PinoutSignals::CLEAR_TO_SEND | PinoutSignals::RECEIVED_DATA
        );
    }

    #[test]
    fn modem_status_failure_surfaces_as_error() {
        let (transport, device) = transport();
        transport.open().unwrap();
        device.fail_next(MockOp::ModemStatus, DriverError::InvalidHandle);

        assert!(matches!(
            transport.pinout_signals(),
            Err(TransportError::ModemStatus(DriverError::InvalidHandle))
        ));
        assert_eq!(
            transport.error_string().as_deref(),
            Some("an error occurred while reading the modem status: invalid device handle")
        );
        assert!(transport.is_open());
    }

    #[test]
    fn zero_baud_rate_is_rejected_before_the_device() {
        let (transport, device) = transport();
        transport.open().unwrap();
        device.clear_calls();

        assert!(matches!(
            transport.set_baud_rate(0),
            Err(TransportError::InvalidBaudRate(0))
        ));
        assert!(device.calls().is_empty());
        assert_eq!(transport.baud_rate(), 115_200);
    }

    #[test]
    fn clear_error_resets_flags() {
        let (transport, _device) = transport();
        transport.shared.session.set_errors(ErrorFlags::PARITY);
        transport.clear_error();
        assert!(transport.error().is_empty());
    }

    #[test]
    fn wait_on_closed_transport_returns_false_immediately() {
        let (transport, _device) = transport();
        let start = Instant::now();
        assert!(!transport.wait_for_ready_read(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn io_write_reports_not_connected_when_closed() {
        let (mut transport, _device) = transport();
        let err = io::Write::write(&mut transport, b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn io_read_returns_buffered_bytes() {
        let (mut transport, device) = transport();
        transport.open().unwrap();
        device.inject_rx(b"ping");

        let mut buf = [0u8; 8];
        let n = io::Read::read(&mut transport, &mut buf).unwrap();
        assert!(n > 0);
        assert_eq!(&buf[..n], &b"ping"[..n]);
    }
}
