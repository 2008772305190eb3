//! Mock FTDI driver for development and testing without hardware.
//!
//! `MockFtdiDriver` holds a list of simulated devices. `add_device` returns a
//! `MockDevice` controller that scripts the device from the outside: inject
//! received bytes, change the modem status word, queue one-shot failures,
//! and inspect every call the transport made.
//!
//! Every device call is checked for overlap with another device call, so a
//! test can prove the transport never interleaves calls on one handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::domain::{
    DataCharacteristics, DeviceNode, DeviceStatus, DriverError, DriverResult, DriverVersion,
    EepromData, EventMask, FlowSettings, PurgeMask, FTDI_PID, FTDI_VID,
};
use crate::ports::{EventSignal, FtdiDevice, FtdiDriver};

/// Raw library version reported by the mock driver (3.02.22)
const MOCK_LIBRARY_VERSION: u32 = 0x0003_0216;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device call kinds, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    SetBaudRate,
    SetDataCharacteristics,
    SetFlowControl,
    SetDtr,
    SetRts,
    SetLatencyTimer,
    SetTimeouts,
    Purge,
    QueueStatus,
    Status,
    ModemStatus,
    Read,
    Write,
    ReadEeprom,
    SetEventNotification,
    Close,
}

/// One recorded device call with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    SetBaudRate(u32),
    SetDataCharacteristics(DataCharacteristics),
    SetFlowControl(FlowSettings),
    SetDtr(bool),
    SetRts(bool),
    SetLatencyTimer(u8),
    SetTimeouts(u32, u32),
    Purge(PurgeMask),
    QueueStatus,
    Status,
    ModemStatus,
    /// Requested length
    Read(usize),
    Write(Vec<u8>),
    ReadEeprom,
    SetEventNotification(EventMask),
    Close,
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::SetBaudRate(_) => MockOp::SetBaudRate,
            MockCall::SetDataCharacteristics(_) => MockOp::SetDataCharacteristics,
            MockCall::SetFlowControl(_) => MockOp::SetFlowControl,
            MockCall::SetDtr(_) => MockOp::SetDtr,
            MockCall::SetRts(_) => MockOp::SetRts,
            MockCall::SetLatencyTimer(_) => MockOp::SetLatencyTimer,
            MockCall::SetTimeouts(..) => MockOp::SetTimeouts,
            MockCall::Purge(_) => MockOp::Purge,
            MockCall::QueueStatus => MockOp::QueueStatus,
            MockCall::Status => MockOp::Status,
            MockCall::ModemStatus => MockOp::ModemStatus,
            MockCall::Read(_) => MockOp::Read,
            MockCall::Write(_) => MockOp::Write,
            MockCall::ReadEeprom => MockOp::ReadEeprom,
            MockCall::SetEventNotification(_) => MockOp::SetEventNotification,
            MockCall::Close => MockOp::Close,
        }
    }
}

/// Identity of a simulated device
#[derive(Debug, Clone)]
pub struct MockDeviceSpec {
    pub eeprom: EepromData,
}

impl MockDeviceSpec {
    /// An FT232R with the stock FTDI strings and the given serial number
    pub fn ft232r(serial_number: &str) -> Self {
        Self {
            eeprom: EepromData {
                manufacturer: "FTDI".to_string(),
                manufacturer_id: "FT".to_string(),
                description: "FT232R USB UART".to_string(),
                serial_number: serial_number.to_string(),
                vendor_id: FTDI_VID,
                product_id: FTDI_PID,
                chip_id: 0x5F3A_91C4,
            },
        }
    }

    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.eeprom.vendor_id = vendor_id;
        self.eeprom.product_id = product_id;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.eeprom.description = description.to_string();
        self
    }
}

#[derive(Debug)]
struct DeviceState {
    spec: MockDeviceSpec,
    open: bool,
    rx: VecDeque<u8>,
    pending_events: EventMask,
    modem_status: u32,
    armed: Option<(EventMask, EventSignal)>,
    failures: Vec<(MockOp, DriverError)>,
    calls: Vec<MockCall>,
    writes: Vec<Vec<u8>>,
    baud_rate: Option<u32>,
    data_characteristics: Option<DataCharacteristics>,
    flow: Option<FlowSettings>,
    dtr: bool,
    rts: bool,
    purge_count: usize,
}

impl DeviceState {
    fn new(spec: MockDeviceSpec) -> Self {
        Self {
            spec,
            open: false,
            rx: VecDeque::new(),
            pending_events: EventMask::empty(),
            modem_status: 0,
            armed: None,
            failures: Vec::new(),
            calls: Vec::new(),
            writes: Vec::new(),
            baud_rate: None,
            data_characteristics: None,
            flow: None,
            dtr: false,
            rts: false,
            purge_count: 0,
        }
    }

    fn take_failure(&mut self, op: MockOp) -> Option<DriverError> {
        let pos = self.failures.iter().position(|(failing, _)| *failing == op)?;
        Some(self.failures.remove(pos).1)
    }

    /// Latch `events` and set the armed signal if it listens for any of them
    fn raise(&mut self, events: EventMask) {
        self.pending_events |= events;
        if let Some((mask, signal)) = &self.armed {
            if mask.intersects(events) {
                signal.set();
            }
        }
    }
}

#[derive(Debug)]
struct DeviceShared {
    state: Mutex<DeviceState>,
    in_call: AtomicBool,
    overlapping_calls: AtomicUsize,
    call_latency: Mutex<Duration>,
}

/// Controller for one simulated device. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MockDevice {
    shared: Arc<DeviceShared>,
}

impl MockDevice {
    fn new(spec: MockDeviceSpec) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                state: Mutex::new(DeviceState::new(spec)),
                in_call: AtomicBool::new(false),
                overlapping_calls: AtomicUsize::new(0),
                call_latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.shared.state)
    }

    /// Bytes arrive on the wire: queue them and raise the receive event
    pub fn inject_rx(&self, bytes: &[u8]) {
        log::debug!("[MOCK FTDI] RX {} bytes", bytes.len());
        let mut state = self.state();
        state.rx.extend(bytes);
        state.raise(EventMask::RX_CHAR);
    }

    /// Change the modem status word and raise the modem status event
    pub fn set_modem_status(&self, word: u32) {
        log::debug!("[MOCK FTDI] modem status → {word:#06x}");
        let mut state = self.state();
        state.modem_status = word;
        state.raise(EventMask::MODEM_STATUS);
    }

    /// Raise arbitrary event conditions without changing anything else
    pub fn raise_events(&self, events: EventMask) {
        self.state().raise(events);
    }

    /// Make the next call of kind `op` fail with `error`
    pub fn fail_next(&self, op: MockOp, error: DriverError) {
        self.state().failures.push((op, error));
    }

    /// Hold every device call for `latency` after it completes its work,
    /// widening the window in which an unserialized caller would overlap.
    pub fn set_call_latency(&self, latency: Duration) {
        *lock(&self.shared.call_latency) = latency;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of recorded calls of kind `op`
    pub fn count(&self, op: MockOp) -> usize {
        self.state().calls.iter().filter(|call| call.op() == op).count()
    }

    /// Payload of every successful write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn queued_rx(&self) -> usize {
        self.state().rx.len()
    }

    pub fn purge_count(&self) -> usize {
        self.state().purge_count
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn is_armed(&self) -> bool {
        self.state().armed.is_some()
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.state().baud_rate
    }

    pub fn data_characteristics(&self) -> Option<DataCharacteristics> {
        self.state().data_characteristics
    }

    pub fn flow(&self) -> Option<FlowSettings> {
        self.state().flow
    }

    pub fn dtr(&self) -> bool {
        self.state().dtr
    }

    pub fn rts(&self) -> bool {
        self.state().rts
    }

    /// Device calls that started while another was still running
    pub fn overlapping_calls(&self) -> usize {
        self.shared.overlapping_calls.load(Ordering::SeqCst)
    }

    fn node(&self, index: usize) -> DeviceNode {
        let state = self.state();
        DeviceNode {
            index,
            vendor_id: state.spec.eeprom.vendor_id,
            product_id: state.spec.eeprom.product_id,
            description: state.spec.eeprom.description.clone(),
            serial_number: state.spec.eeprom.serial_number.clone(),
            location: format!("MOCK{index}"),
        }
    }
}

/// The handle given to the transport
struct MockHandle {
    device: MockDevice,
}

impl MockHandle {
    fn call<T>(
        &mut self,
        call: MockCall,
        body: impl FnOnce(&mut DeviceState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let shared = &self.device.shared;
        if shared.in_call.swap(true, Ordering::SeqCst) {
            shared.overlapping_calls.fetch_add(1, Ordering::SeqCst);
        }

        let op = call.op();
        let result = {
            let mut state = lock(&shared.state);
            state.calls.push(call);
            if !state.open {
                Err(DriverError::InvalidHandle)
            } else if let Some(err) = state.take_failure(op) {
                Err(err)
            } else {
                body(&mut state)
            }
        };

        let latency = *lock(&shared.call_latency);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        shared.in_call.store(false, Ordering::SeqCst);
        result
    }
}

impl FtdiDevice for MockHandle {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DriverResult<()> {
        self.call(MockCall::SetBaudRate(baud_rate), |state| {
            state.baud_rate = Some(baud_rate);
            Ok(())
        })
    }

    fn set_data_characteristics(&mut self, chars: DataCharacteristics) -> DriverResult<()> {
        self.call(MockCall::SetDataCharacteristics(chars), |state| {
            state.data_characteristics = Some(chars);
            Ok(())
        })
    }

    fn set_flow_control(&mut self, flow: FlowSettings) -> DriverResult<()> {
        self.call(MockCall::SetFlowControl(flow), |state| {
            state.flow = Some(flow);
            Ok(())
        })
    }

    fn set_dtr(&mut self, asserted: bool) -> DriverResult<()> {
        self.call(MockCall::SetDtr(asserted), |state| {
            state.dtr = asserted;
            Ok(())
        })
    }

    fn set_rts(&mut self, asserted: bool) -> DriverResult<()> {
        self.call(MockCall::SetRts(asserted), |state| {
            state.rts = asserted;
            Ok(())
        })
    }

    fn set_latency_timer(&mut self, millis: u8) -> DriverResult<()> {
        self.call(MockCall::SetLatencyTimer(millis), |_| Ok(()))
    }

    fn set_timeouts(&mut self, read_ms: u32, write_ms: u32) -> DriverResult<()> {
        self.call(MockCall::SetTimeouts(read_ms, write_ms), |_| Ok(()))
    }

    fn purge(&mut self, mask: PurgeMask) -> DriverResult<()> {
        self.call(MockCall::Purge(mask), |state| {
            if mask.contains(PurgeMask::RX) {
                state.rx.clear();
            }
            state.purge_count += 1;
            Ok(())
        })
    }

    fn queue_status(&mut self) -> DriverResult<u32> {
        self.call(MockCall::QueueStatus, |state| Ok(state.rx.len() as u32))
    }

    fn status(&mut self) -> DriverResult<DeviceStatus> {
        self.call(MockCall::Status, |state| {
            let events = std::mem::take(&mut state.pending_events);
            Ok(DeviceStatus {
                rx_queue: state.rx.len() as u32,
                tx_queue: 0,
                events,
            })
        })
    }

    fn modem_status(&mut self) -> DriverResult<u32> {
        self.call(MockCall::ModemStatus, |state| Ok(state.modem_status))
    }

    fn read(&mut self, buffer: &mut [u8]) -> DriverResult<usize> {
        self.call(MockCall::Read(buffer.len()), |state| {
            let n = buffer.len().min(state.rx.len());
            for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        })
    }

    fn write(&mut self, data: &[u8]) -> DriverResult<usize> {
        self.call(MockCall::Write(data.to_vec()), |state| {
            state.writes.push(data.to_vec());
            Ok(data.len())
        })
    }

    fn read_eeprom(&mut self) -> DriverResult<EepromData> {
        self.call(MockCall::ReadEeprom, |state| Ok(state.spec.eeprom.clone()))
    }

    fn set_event_notification(
        &mut self,
        mask: EventMask,
        signal: EventSignal,
    ) -> DriverResult<()> {
        self.call(MockCall::SetEventNotification(mask), |state| {
            state.armed = Some((mask, signal));
            Ok(())
        })
    }

    fn close(&mut self) -> DriverResult<()> {
        self.call(MockCall::Close, |state| {
            state.open = false;
            state.armed = None;
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct DriverState {
    devices: Vec<MockDevice>,
    failures: Vec<(DriverCallKind, DriverError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverCallKind {
    Enumerate,
    Open,
}

/// In-memory driver. Clones share the same device list.
#[derive(Debug, Clone, Default)]
pub struct MockFtdiDriver {
    inner: Arc<Mutex<DriverState>>,
}

impl MockFtdiDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a device. It appears at the end of the enumeration list.
    pub fn add_device(&self, spec: MockDeviceSpec) -> MockDevice {
        let device = MockDevice::new(spec);
        lock(&self.inner).devices.push(device.clone());
        device
    }

    pub fn fail_next_enumeration(&self, error: DriverError) {
        lock(&self.inner)
            .failures
            .push((DriverCallKind::Enumerate, error));
    }

    pub fn fail_next_open(&self, error: DriverError) {
        lock(&self.inner).failures.push((DriverCallKind::Open, error));
    }

    fn take_failure(&self, kind: DriverCallKind) -> Option<DriverError> {
        let mut inner = lock(&self.inner);
        let pos = inner.failures.iter().position(|(k, _)| *k == kind)?;
        Some(inner.failures.remove(pos).1)
    }
}

impl FtdiDriver for MockFtdiDriver {
    fn enumerate(&self) -> DriverResult<Vec<DeviceNode>> {
        if let Some(err) = self.take_failure(DriverCallKind::Enumerate) {
            return Err(err);
        }
        let devices = lock(&self.inner).devices.clone();
        Ok(devices
            .iter()
            .enumerate()
            .map(|(index, device)| device.node(index))
            .collect())
    }

    fn open(&self, index: usize) -> DriverResult<Box<dyn FtdiDevice>> {
        if let Some(err) = self.take_failure(DriverCallKind::Open) {
            return Err(err);
        }
        let device = lock(&self.inner)
            .devices
            .get(index)
            .cloned()
            .ok_or(DriverError::DeviceNotFound)?;

        {
            let mut state = device.state();
            if state.open {
                return Err(DriverError::DeviceNotOpened);
            }
            state.open = true;
        }
        log::debug!("[MOCK FTDI] opened device #{index}");
        Ok(Box::new(MockHandle { device }))
    }

    fn library_version(&self) -> DriverResult<DriverVersion> {
        Ok(DriverVersion::from_raw(MOCK_LIBRARY_VERSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_lists_devices_in_insertion_order() {
        let driver = MockFtdiDriver::new();
        driver.add_device(MockDeviceSpec::ft232r("A"));
        driver.add_device(MockDeviceSpec::ft232r("B").with_ids(0x0403, 0x6015));

        let nodes = driver.enumerate().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].index, 1);
        assert_eq!(nodes[1].product_id, 0x6015);
        assert_eq!(nodes[0].serial_number, "A");
    }

    #[test]
    fn device_cannot_be_opened_twice() {
        let driver = MockFtdiDriver::new();
        driver.add_device(MockDeviceSpec::ft232r("A"));

        let _first = driver.open(0).unwrap();
        assert!(matches!(driver.open(0), Err(DriverError::DeviceNotOpened)));
    }

    #[test]
    fn injected_rx_is_read_in_order() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let mut handle = driver.open(0).unwrap();

        device.inject_rx(b"hello");
        assert_eq!(handle.queue_status().unwrap(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(handle.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(device.queued_rx(), 2);
    }

    #[test]
    fn status_consumes_pending_events() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let mut handle = driver.open(0).unwrap();

        device.set_modem_status(0x10);
        assert_eq!(handle.status().unwrap().events, EventMask::MODEM_STATUS);
        assert!(handle.status().unwrap().events.is_empty());
    }

    #[test]
    fn armed_signal_fires_on_injection() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let mut handle = driver.open(0).unwrap();
        let signal = EventSignal::new();
        handle
            .set_event_notification(EventMask::RX_CHAR, signal.clone())
            .unwrap();

        device.set_modem_status(0x10);
        assert!(!signal.is_set());
        device.inject_rx(b"x");
        assert!(signal.is_set());
    }

    #[test]
    fn injected_failure_hits_once() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let mut handle = driver.open(0).unwrap();
        device.fail_next(MockOp::Write, DriverError::Io("stall".into()));

        assert!(handle.write(b"a").is_err());
        assert_eq!(handle.write(b"b").unwrap(), 1);
        assert_eq!(device.writes(), vec![b"b".to_vec()]);
        assert_eq!(device.count(MockOp::Write), 2);
    }

    #[test]
    fn calls_after_close_fail_with_invalid_handle() {
        let driver = MockFtdiDriver::new();
        let device = driver.add_device(MockDeviceSpec::ft232r("A"));
        let mut handle = driver.open(0).unwrap();

        handle.close().unwrap();
        assert!(!device.is_open());
        assert!(matches!(handle.queue_status(), Err(DriverError::InvalidHandle)));
    }
}
