//! Driver binding over the `serialport` crate
//!
//! Talks to FTDI adapters through the OS virtual COM port driver rather than
//! D2XX. `SerialPortDriver` has no instance data: enumeration and open go
//! straight to `serialport`. Each open device runs a small poller thread that
//! watches the receive queue and the modem lines and raises the armed events,
//! since the VCP driver has no native event notification.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::codec::decode::{MODEM_CTS, MODEM_DSR, MODEM_RI, MODEM_RLSD};
use crate::domain::{
    DataCharacteristics, DeviceNode, DeviceStatus, DriverError, DriverResult, DriverVersion,
    EepromData, EventMask, FlowControl, FlowSettings, Parity, PurgeMask, StopBits,
    DEFAULT_BAUD_RATE, LATENCY_TIMER_MS, READ_TIMEOUT_MS,
};
use crate::ports::{EventSignal, FtdiDevice, FtdiDriver};

/// Zero-sized driver for USB serial ports exposed by the OS.
pub struct SerialPortDriver;

fn map_error(err: serialport::Error) -> DriverError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => DriverError::DeviceNotFound,
        serialport::ErrorKind::InvalidInput => DriverError::InvalidParameter(err.to_string()),
        serialport::ErrorKind::Io(_) => DriverError::Io(err.to_string()),
        serialport::ErrorKind::Unknown => DriverError::Other(err.to_string()),
    }
}

fn map_io_error(err: io::Error) -> DriverError {
    DriverError::Io(err.to_string())
}

/// USB ports only, in OS order. The position in this list is the device index.
fn usb_ports() -> DriverResult<Vec<(String, serialport::UsbPortInfo)>> {
    let ports = serialport::available_ports().map_err(map_error)?;
    Ok(ports
        .into_iter()
        .filter_map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(info) => Some((p.port_name, info)),
            _ => None,
        })
        .collect())
}

fn eeprom_from(info: &serialport::UsbPortInfo) -> EepromData {
    EepromData {
        manufacturer: info.manufacturer.clone().unwrap_or_default(),
        manufacturer_id: String::new(),
        description: info.product.clone().unwrap_or_default(),
        serial_number: info.serial_number.clone().unwrap_or_default(),
        vendor_id: info.vid,
        product_id: info.pid,
        // Not exposed through the VCP driver
        chip_id: 0,
    }
}

impl FtdiDriver for SerialPortDriver {
    fn enumerate(&self) -> DriverResult<Vec<DeviceNode>> {
        Ok(usb_ports()?
            .into_iter()
            .enumerate()
            .map(|(index, (name, info))| DeviceNode {
                index,
                vendor_id: info.vid,
                product_id: info.pid,
                description: info.product.unwrap_or_default(),
                serial_number: info.serial_number.unwrap_or_default(),
                location: name,
            })
            .collect())
    }

    fn open(&self, index: usize) -> DriverResult<Box<dyn FtdiDevice>> {
        let ports = usb_ports()?;
        let (name, info) = ports.get(index).ok_or(DriverError::DeviceNotFound)?;

        let port = serialport::new(name.as_str(), DEFAULT_BAUD_RATE)
            .timeout(Duration::from_millis(u64::from(READ_TIMEOUT_MS)))
            .open()
            .map_err(map_error)?;
        log::debug!("Opened serial port {name}");

        Ok(Box::new(SerialPortDevice {
            port: Some(port),
            eeprom: eeprom_from(info),
            pending: Arc::new(Mutex::new(EventMask::empty())),
            poll_interval: Duration::from_millis(u64::from(LATENCY_TIMER_MS)),
            poller: None,
        }))
    }

    /// The VCP driver does not report a version; always 0.00.00.
    fn library_version(&self) -> DriverResult<DriverVersion> {
        Ok(DriverVersion::default())
    }
}

// ---- setting translation ----

fn data_bits(word_length: u8) -> DriverResult<serialport::DataBits> {
    match word_length {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        n => Err(DriverError::InvalidParameter(format!("{n} data bits"))),
    }
}

fn parity(parity: Parity) -> DriverResult<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(DriverError::InvalidParameter(
            "mark/space parity is not supported by the serial port driver".into(),
        )),
    }
}

fn stop_bits(stop_bits: StopBits) -> serialport::StopBits {
    match stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn flow_control(mode: FlowControl) -> DriverResult<serialport::FlowControl> {
    match mode {
        FlowControl::None => Ok(serialport::FlowControl::None),
        FlowControl::RtsCts => Ok(serialport::FlowControl::Hardware),
        FlowControl::XonXoff => Ok(serialport::FlowControl::Software),
        FlowControl::DtrDsr => Err(DriverError::InvalidParameter(
            "DTR/DSR flow control is not supported by the serial port driver".into(),
        )),
    }
}

/// Build the D2XX-style modem status word from the individual input lines
fn modem_word(cts: bool, dsr: bool, ri: bool, dcd: bool) -> u32 {
    [(cts, MODEM_CTS), (dsr, MODEM_DSR), (ri, MODEM_RI), (dcd, MODEM_RLSD)]
        .iter()
        .filter(|(asserted, _)| *asserted)
        .fold(0, |word, (_, bit)| word | bit)
}

fn read_modem_word(port: &mut dyn serialport::SerialPort) -> serialport::Result<u32> {
    Ok(modem_word(
        port.read_clear_to_send()?,
        port.read_data_set_ready()?,
        port.read_ring_indicator()?,
        port.read_carrier_detect()?,
    ))
}

// ---- event poller ----

/// Receive-queue half of one poll. `None` means the port is gone.
fn rx_poll(queued: serialport::Result<u32>) -> Option<EventMask> {
    match queued {
        Ok(0) => Some(EventMask::empty()),
        Ok(_) => Some(EventMask::RX_CHAR),
        Err(e) => {
            log::warn!("Serial port lost, poller stopping: {e}");
            None
        }
    }
}

/// Record `events` for the next status query and wake the dispatcher.
/// On a lost port the whole armed mask is latched, so the dispatcher's next
/// status query runs against the dead port and reports the failure.
fn latch(pending: &Mutex<EventMask>, signal: &EventSignal, events: EventMask) {
    *pending.lock().unwrap_or_else(PoisonError::into_inner) |= events;
    signal.set();
}

struct Poller {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Poller {
    fn spawn(
        mut port: Box<dyn serialport::SerialPort>,
        mask: EventMask,
        signal: EventSignal,
        pending: Arc<Mutex<EventMask>>,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("ftserial-poll".into())
            .spawn(move || {
                let mut last_modem = read_modem_word(port.as_mut()).ok();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let mut raised = EventMask::empty();
                    if mask.contains(EventMask::RX_CHAR) {
                        match rx_poll(port.bytes_to_read()) {
                            Some(events) => raised |= events,
                            None => {
                                latch(&pending, &signal, mask);
                                break;
                            }
                        }
                    }
                    if mask.contains(EventMask::MODEM_STATUS) {
                        let word = read_modem_word(port.as_mut()).ok();
                        if word != last_modem {
                            last_modem = word;
                            raised |= EventMask::MODEM_STATUS;
                        }
                    }

                    if !raised.is_empty() {
                        latch(&pending, &signal, raised);
                    }
                }
            })?;
        Ok(Self { stop, thread })
    }

    fn stop(self) {
        let _ = self.stop.try_send(());
        if self.thread.join().is_err() {
            log::error!("Serial poller thread panicked");
        }
    }
}

/// An open serial port. `port` is `None` once closed.
pub struct SerialPortDevice {
    port: Option<Box<dyn serialport::SerialPort>>,
    eeprom: EepromData,
    pending: Arc<Mutex<EventMask>>,
    poll_interval: Duration,
    poller: Option<Poller>,
}

impl SerialPortDevice {
    fn port(&mut self) -> DriverResult<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or(DriverError::InvalidHandle)
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }
}

impl FtdiDevice for SerialPortDevice {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DriverResult<()> {
        self.port()?.set_baud_rate(baud_rate).map_err(map_error)
    }

    fn set_data_characteristics(&mut self, chars: DataCharacteristics) -> DriverResult<()> {
        let bits = data_bits(chars.word_length)?;
        let parity = parity(chars.parity)?;
        let port = self.port()?;
        port.set_data_bits(bits).map_err(map_error)?;
        port.set_parity(parity).map_err(map_error)?;
        port.set_stop_bits(stop_bits(chars.stop_bits))
            .map_err(map_error)
    }

    /// XON/XOFF characters are fixed by the OS driver (0x11/0x13).
    fn set_flow_control(&mut self, flow: FlowSettings) -> DriverResult<()> {
        let mode = flow_control(flow.mode)?;
        self.port()?.set_flow_control(mode).map_err(map_error)
    }

    fn set_dtr(&mut self, asserted: bool) -> DriverResult<()> {
        self.port()?
            .write_data_terminal_ready(asserted)
            .map_err(map_error)
    }

    fn set_rts(&mut self, asserted: bool) -> DriverResult<()> {
        self.port()?
            .write_request_to_send(asserted)
            .map_err(map_error)
    }

    /// Used as the poller interval
    fn set_latency_timer(&mut self, millis: u8) -> DriverResult<()> {
        self.poll_interval = Duration::from_millis(u64::from(millis.max(1)));
        Ok(())
    }

    fn set_timeouts(&mut self, read_ms: u32, _write_ms: u32) -> DriverResult<()> {
        self.port()?
            .set_timeout(Duration::from_millis(u64::from(read_ms)))
            .map_err(map_error)
    }

    fn purge(&mut self, mask: PurgeMask) -> DriverResult<()> {
        let buffer = if mask.contains(PurgeMask::RX | PurgeMask::TX) {
            serialport::ClearBuffer::All
        } else if mask.contains(PurgeMask::RX) {
            serialport::ClearBuffer::Input
        } else if mask.contains(PurgeMask::TX) {
            serialport::ClearBuffer::Output
        } else {
            return Ok(());
        };
        self.port()?.clear(buffer).map_err(map_error)
    }

    fn queue_status(&mut self) -> DriverResult<u32> {
        self.port()?.bytes_to_read().map_err(map_error)
    }

    fn status(&mut self) -> DriverResult<DeviceStatus> {
        let port = self.port()?;
        let rx_queue = port.bytes_to_read().map_err(map_error)?;
        let tx_queue = port.bytes_to_write().map_err(map_error)?;
        let events = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        Ok(DeviceStatus {
            rx_queue,
            tx_queue,
            events,
        })
    }

    fn modem_status(&mut self) -> DriverResult<u32> {
        read_modem_word(self.port()?.as_mut()).map_err(map_error)
    }

    fn read(&mut self, buffer: &mut [u8]) -> DriverResult<usize> {
        match self.port()?.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(map_io_error(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> DriverResult<usize> {
        let port = self.port()?;
        port.write_all(data).map_err(map_io_error)?;
        port.flush().map_err(map_io_error)?;
        Ok(data.len())
    }

    fn read_eeprom(&mut self) -> DriverResult<EepromData> {
        self.port()?;
        Ok(self.eeprom.clone())
    }

    fn set_event_notification(
        &mut self,
        mask: EventMask,
        signal: EventSignal,
    ) -> DriverResult<()> {
        self.stop_poller();
        let watcher = self.port()?.try_clone().map_err(map_error)?;
        let poller = Poller::spawn(
            watcher,
            mask,
            signal,
            Arc::clone(&self.pending),
            self.poll_interval,
        )
        .map_err(map_io_error)?;
        self.poller = Some(poller);
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.stop_poller();
        self.port.take().ok_or(DriverError::InvalidHandle)?;
        log::debug!("Closed serial port");
        Ok(())
    }
}

impl Drop for SerialPortDevice {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_bit_encodings_map_to_serialport_settings() {
        assert_eq!(data_bits(8).unwrap(), serialport::DataBits::Eight);
        assert!(data_bits(9).is_err());
        assert_eq!(parity(Parity::Even).unwrap(), serialport::Parity::Even);
        assert_eq!(stop_bits(StopBits::Two), serialport::StopBits::Two);
    }

    #[test]
    fn mark_and_space_parity_are_rejected() {
        assert!(matches!(
            parity(Parity::Mark),
            Err(DriverError::InvalidParameter(_))
        ));
        assert!(matches!(
            parity(Parity::Space),
            Err(DriverError::InvalidParameter(_))
        ));
    }

    #[test]
    fn flow_modes_map_to_serialport_modes() {
        assert_eq!(
            flow_control(FlowControl::RtsCts).unwrap(),
            serialport::FlowControl::Hardware
        );
        assert_eq!(
            flow_control(FlowControl::XonXoff).unwrap(),
            serialport::FlowControl::Software
        );
        assert!(flow_control(FlowControl::DtrDsr).is_err());
    }

    #[test]
    fn modem_word_uses_d2xx_bit_positions() {
        assert_eq!(modem_word(false, false, false, false), 0);
        assert_eq!(modem_word(true, false, false, true), 0x10 | 0x80);
        assert_eq!(modem_word(false, true, true, false), 0x20 | 0x40);
    }

    #[test]
    fn queued_bytes_raise_the_receive_event() {
        assert_eq!(rx_poll(Ok(0)), Some(EventMask::empty()));
        assert_eq!(rx_poll(Ok(12)), Some(EventMask::RX_CHAR));
    }

    #[test]
    fn lost_port_wakes_the_dispatcher() {
        let unplugged = serialport::Error::new(serialport::ErrorKind::NoDevice, "unplugged");
        assert_eq!(rx_poll(Err(unplugged)), None);

        let pending = Mutex::new(EventMask::empty());
        let signal = EventSignal::new();
        latch(&pending, &signal, EventMask::RX_CHAR | EventMask::MODEM_STATUS);

        assert!(signal.is_set());
        assert_eq!(
            *pending.lock().unwrap(),
            EventMask::RX_CHAR | EventMask::MODEM_STATUS
        );
    }

    #[test]
    fn serialport_errors_map_to_driver_errors() {
        let missing = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert_eq!(map_error(missing), DriverError::DeviceNotFound);

        let io = serialport::Error::new(
            serialport::ErrorKind::Io(io::ErrorKind::BrokenPipe),
            "pipe",
        );
        assert!(map_error(io).is_io());
    }
}
