//! Core domain types

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::error::TransportError;

bitflags! {
    /// Last known port error state.
    ///
    /// Bit values match the public flag values of the FT232 wrapper so they
    /// can be logged and compared against device documentation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorFlags: u8 {
        const NOT_OPEN = 0x01;
        const OVERRUN = 0x02;
        const PARITY = 0x04;
        const FRAMING = 0x10;
        const BREAK_CONDITION = 0x20;
        const FIFO = 0x40;
        const READ = 0x80;
    }
}

bitflags! {
    /// Modem input lines currently asserted by the remote side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PinoutSignals: u8 {
        /// Receive line signal detect (carrier)
        const RECEIVED_DATA = 0x02;
        const DATA_SET_READY = 0x10;
        const RING_INDICATOR = 0x20;
        const CLEAR_TO_SEND = 0x80;
    }
}

bitflags! {
    /// Conditions the device can report through the notification primitive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// At least one character was received
        const RX_CHAR = 0x01;
        /// A modem or line status bit changed
        const MODEM_STATUS = 0x02;
        const LINE_STATUS = 0x04;
    }
}

bitflags! {
    /// Device queues to discard.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PurgeMask: u32 {
        const RX = 0x01;
        const TX = 0x02;
    }
}

/// Snapshot returned by the combined queue/event status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    /// Bytes waiting in the device receive queue
    pub rx_queue: u32,
    /// Bytes still pending in the device transmit queue
    pub tx_queue: u32,
    /// Conditions fired since the last status query
    pub events: EventMask,
}

/// Supported data-bits × parity × stop-bits combinations (always 8 data bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LineEncoding {
    #[default]
    #[serde(rename = "8N1")]
    Serial8N1,
    #[serde(rename = "8N2")]
    Serial8N2,
    #[serde(rename = "8E1")]
    Serial8E1,
    #[serde(rename = "8E2")]
    Serial8E2,
    #[serde(rename = "8O1")]
    Serial8O1,
    #[serde(rename = "8O2")]
    Serial8O2,
    #[serde(rename = "8M1")]
    Serial8M1,
    #[serde(rename = "8M2")]
    Serial8M2,
    #[serde(rename = "8S1")]
    Serial8S1,
    #[serde(rename = "8S2")]
    Serial8S2,
}

impl LineEncoding {
    pub const ALL: [LineEncoding; 10] = [
        LineEncoding::Serial8N1,
        LineEncoding::Serial8N2,
        LineEncoding::Serial8E1,
        LineEncoding::Serial8E2,
        LineEncoding::Serial8O1,
        LineEncoding::Serial8O2,
        LineEncoding::Serial8M1,
        LineEncoding::Serial8M2,
        LineEncoding::Serial8S1,
        LineEncoding::Serial8S2,
    ];

    /// Short form, e.g. `"8E1"`
    pub fn as_str(self) -> &'static str {
        match self {
            LineEncoding::Serial8N1 => "8N1",
            LineEncoding::Serial8N2 => "8N2",
            LineEncoding::Serial8E1 => "8E1",
            LineEncoding::Serial8E2 => "8E2",
            LineEncoding::Serial8O1 => "8O1",
            LineEncoding::Serial8O2 => "8O2",
            LineEncoding::Serial8M1 => "8M1",
            LineEncoding::Serial8M2 => "8M2",
            LineEncoding::Serial8S1 => "8S1",
            LineEncoding::Serial8S2 => "8S2",
        }
    }
}

impl fmt::Display for LineEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineEncoding {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        LineEncoding::ALL
            .into_iter()
            .find(|line| line.as_str() == wanted)
            .ok_or_else(|| TransportError::Config(format!("Unknown line encoding '{s}'")))
    }
}

/// Flow control mode forwarded to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "rts-cts")]
    RtsCts,
    #[serde(rename = "xon-xoff")]
    XonXoff,
    #[serde(rename = "dtr-dsr")]
    DtrDsr,
}

impl FlowControl {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowControl::None => "none",
            FlowControl::RtsCts => "rts-cts",
            FlowControl::XonXoff => "xon-xoff",
            FlowControl::DtrDsr => "dtr-dsr",
        }
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowControl {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "rts-cts" | "hardware" => Ok(FlowControl::RtsCts),
            "xon-xoff" | "software" => Ok(FlowControl::XonXoff),
            "dtr-dsr" => Ok(FlowControl::DtrDsr),
            _ => Err(TransportError::Config(format!("Unknown flow control '{s}'"))),
        }
    }
}

/// Parity setting as understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Stop bits setting as understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Encoded data characteristics pushed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCharacteristics {
    pub word_length: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

/// Encoded flow control settings pushed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSettings {
    pub mode: FlowControl,
    /// Driver selector code for `mode`
    pub code: u16,
    pub xon: u8,
    pub xoff: u8,
}

/// One entry of the driver's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Index accepted by `FtdiDriver::open`
    pub index: usize,
    pub vendor_id: u16,
    pub product_id: u16,
    pub description: String,
    pub serial_number: String,
    /// OS-specific location (port name, USB location id)
    pub location: String,
}

impl DeviceNode {
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Strings and identifiers stored in the device EEPROM
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EepromData {
    pub manufacturer: String,
    pub manufacturer_id: String,
    pub description: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub chip_id: u32,
}

/// Driver library version, decoded from the `0x00MMmmbb` dword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl DriverVersion {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            major: ((raw >> 16) & 0xFF) as u8,
            minor: ((raw >> 8) & 0xFF) as u8,
            build: (raw & 0xFF) as u8,
        }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}.{:02}", self.major, self.minor, self.build)
    }
}

/// Device information read once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceMetadata {
    pub chip_id: u32,
    pub product_name: String,
    pub manufacturer: String,
    /// Upper-cased serial number
    pub serial_number: String,
    pub library_version: DriverVersion,
}

/// Result of a device scan. Unrelated to any open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub description: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub product_id: u16,
}
