//! Domain error types
//!
//! Two layers: `DriverError` is what the device binding reports for a single
//! call, `TransportError` is what the transport surfaces to its callers.

use std::fmt;
use std::io;

use thiserror::Error;

/// Status reported by the driver binding for a failed call.
///
/// Mirrors the non-OK status codes of the FTDI D2XX library closely enough
/// that a real binding can map them one to one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid device handle")]
    InvalidHandle,

    #[error("device not found")]
    DeviceNotFound,

    #[error("device not opened")]
    DeviceNotOpened,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("EEPROM read failed")]
    EepromReadFailed,

    #[error("driver error: {0}")]
    Other(String),
}

impl DriverError {
    /// True for transfer-level failures (the D2XX `FT_IO_ERROR` class).
    pub fn is_io(&self) -> bool {
        matches!(self, DriverError::Io(_))
    }
}

/// Result type alias for driver binding calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Device setting pushed during open or by a configuration setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    BaudRate,
    LineEncoding,
    FlowControl,
    DataTerminalReady,
    RequestToSend,
    LatencyTimer,
    Timeouts,
    EventNotification,
}

impl Setting {
    /// Core line parameters. A device rejecting one of these closes the session.
    pub fn is_core(self) -> bool {
        matches!(
            self,
            Setting::BaudRate | Setting::LineEncoding | Setting::FlowControl
        )
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Setting::BaudRate => "baud rate",
            Setting::LineEncoding => "line encoding",
            Setting::FlowControl => "flow control",
            Setting::DataTerminalReady => "DTR",
            Setting::RequestToSend => "RTS",
            Setting::LatencyTimer => "latency timer",
            Setting::Timeouts => "timeouts",
            Setting::EventNotification => "event notification",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the serial transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("an error occurred while enumerating devices: {0}")]
    Enumeration(#[source] DriverError),

    #[error("no compatible devices found for {vendor_id:04X}:{product_id:04X}")]
    NoCompatibleDevice { vendor_id: u16, product_id: u16 },

    #[error("an error occurred while opening the device: {0}")]
    Open(#[source] DriverError),

    #[error("an error occurred while setting the {setting}: {source}")]
    Configure {
        setting: Setting,
        #[source]
        source: DriverError,
    },

    #[error("an error occurred while purging the device queues: {0}")]
    Purge(#[source] DriverError),

    #[error("an error occurred while reading device metadata: {0}")]
    Metadata(#[source] DriverError),

    #[error("failed to start the event dispatcher: {0}")]
    Dispatcher(#[source] io::Error),

    #[error("device is already open")]
    AlreadyOpen,

    #[error("device is not open")]
    NotOpen,

    #[error("an error occurred while reading from the device: {0}")]
    Read(#[source] DriverError),

    #[error("an error occurred while writing to the port: {0}")]
    Write(#[source] DriverError),

    #[error("an error occurred while reading the modem status: {0}")]
    ModemStatus(#[source] DriverError),

    #[error("read timeout")]
    Timeout,

    #[error("invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::NotOpen => io::ErrorKind::NotConnected,
            TransportError::Timeout => io::ErrorKind::TimedOut,
            TransportError::InvalidBaudRate(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_baud_line_and_flow_are_core_settings() {
        assert!(Setting::BaudRate.is_core());
        assert!(Setting::LineEncoding.is_core());
        assert!(Setting::FlowControl.is_core());
        assert!(!Setting::DataTerminalReady.is_core());
        assert!(!Setting::RequestToSend.is_core());
        assert!(!Setting::LatencyTimer.is_core());
    }

    #[test]
    fn configure_error_names_the_setting() {
        let err = TransportError::Configure {
            setting: Setting::FlowControl,
            source: DriverError::InvalidParameter("mode".into()),
        };
        assert_eq!(
            err.to_string(),
            "an error occurred while setting the flow control: invalid parameter: mode"
        );
    }

    #[test]
    fn io_conversion_preserves_kind() {
        let not_open: io::Error = TransportError::NotOpen.into();
        assert_eq!(not_open.kind(), io::ErrorKind::NotConnected);

        let timeout: io::Error = TransportError::Timeout.into();
        assert_eq!(timeout.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn io_driver_errors_are_classified() {
        assert!(DriverError::Io("overflow".into()).is_io());
        assert!(!DriverError::DeviceNotOpened.is_io());
    }
}
