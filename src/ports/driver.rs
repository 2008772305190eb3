//! Driver binding traits
//!
//! Split into two traits, the same way a D2XX-style library is shaped:
//! - `FtdiDriver`: process-wide calls: list devices, open one, library version
//! - `FtdiDevice`: calls on one open device handle

use crate::domain::{
    DataCharacteristics, DeviceNode, DeviceStatus, DriverResult, DriverVersion, EepromData,
    EventMask, FlowSettings, PurgeMask,
};

use super::event::EventSignal;

/// Factory for device handles.
pub trait FtdiDriver: Send + Sync {
    /// List every device the driver can see, compatible or not
    fn enumerate(&self) -> DriverResult<Vec<DeviceNode>>;

    /// Open the device at `index` of the last enumeration
    fn open(&self, index: usize) -> DriverResult<Box<dyn FtdiDevice>>;

    /// Version of the underlying driver library
    fn library_version(&self) -> DriverResult<DriverVersion>;
}

/// An open device handle.
/// Only requires `Send` (not `Sync`); always accessed behind the session mutex.
pub trait FtdiDevice: Send {
    fn set_baud_rate(&mut self, baud_rate: u32) -> DriverResult<()>;

    fn set_data_characteristics(&mut self, chars: DataCharacteristics) -> DriverResult<()>;

    fn set_flow_control(&mut self, flow: FlowSettings) -> DriverResult<()>;

    fn set_dtr(&mut self, asserted: bool) -> DriverResult<()>;

    fn set_rts(&mut self, asserted: bool) -> DriverResult<()>;

    /// USB latency timer in milliseconds
    fn set_latency_timer(&mut self, millis: u8) -> DriverResult<()>;

    fn set_timeouts(&mut self, read_ms: u32, write_ms: u32) -> DriverResult<()>;

    /// Discard the selected device queues
    fn purge(&mut self, mask: PurgeMask) -> DriverResult<()>;

    /// Number of bytes waiting in the receive queue
    fn queue_status(&mut self) -> DriverResult<u32>;

    /// Queue sizes plus the event conditions fired since the last call
    fn status(&mut self) -> DriverResult<DeviceStatus>;

    /// Raw modem status word: modem lines in the low byte, line status in the high byte
    fn modem_status(&mut self) -> DriverResult<u32>;

    /// Read up to `buffer.len()` bytes, returning how many were read
    fn read(&mut self, buffer: &mut [u8]) -> DriverResult<usize>;

    /// Write bytes to the device, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> DriverResult<usize>;

    fn read_eeprom(&mut self) -> DriverResult<EepromData>;

    /// Arm `signal` to be set whenever one of the `mask` conditions fires
    fn set_event_notification(&mut self, mask: EventMask, signal: EventSignal)
        -> DriverResult<()>;

    /// Release the handle. No other call is made on it afterwards.
    fn close(&mut self) -> DriverResult<()>;
}
