//! Serial configuration and saved profiles
//!
//! A Profile is a named, saved combination of a USB vendor/product id pair
//! and the serial line settings to use with it.

use serde::{Deserialize, Serialize};

use super::types::{FlowControl, LineEncoding};

/// FTDI vendor id
pub const FTDI_VID: u16 = 0x0403;
/// FT232R product id
pub const FTDI_PID: u16 = 0x6001;

/// Default baud rate pushed at open
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// USB latency timer in milliseconds (how long the chip holds a partial packet)
pub const LATENCY_TIMER_MS: u8 = 3;
/// Device read timeout in milliseconds
pub const READ_TIMEOUT_MS: u32 = 5000;
/// Device write timeout in milliseconds
pub const WRITE_TIMEOUT_MS: u32 = 2000;

/// USB vendor/product id pair identifying which device to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for UsbId {
    fn default() -> Self {
        Self {
            vendor_id: FTDI_VID,
            product_id: FTDI_PID,
        }
    }
}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud_rate: u32,
    #[serde(default)]
    pub line_encoding: LineEncoding,
    #[serde(default)]
    pub flow_control: FlowControl,
    #[serde(default)]
    pub data_terminal_ready: bool,
    #[serde(default)]
    pub request_to_send: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            line_encoding: LineEncoding::default(),
            flow_control: FlowControl::default(),
            data_terminal_ready: false,
            request_to_send: false,
        }
    }
}

/// A saved configuration profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name (e.g., "Default", "Bench FT232R")
    pub name: String,
    #[serde(default)]
    pub port: UsbId,
    #[serde(default)]
    pub serial: SerialConfig,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            port: UsbId::default(),
            serial: SerialConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_targets_ft232r_at_115200() {
        let profile = Profile::default();
        assert_eq!(profile.name, "Default");
        assert_eq!(profile.port, UsbId { vendor_id: 0x0403, product_id: 0x6001 });
        assert_eq!(profile.serial.baud_rate, 115_200);
        assert_eq!(profile.serial.line_encoding, LineEncoding::Serial8N1);
        assert_eq!(profile.serial.flow_control, FlowControl::None);
    }

    #[test]
    fn profile_serializes_to_json() {
        let json = serde_json::to_string(&Profile::default()).unwrap();
        assert!(json.contains("\"name\":\"Default\""));
        assert!(json.contains("\"line_encoding\":\"8N1\""));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"name":"Bench","serial":{"baud_rate":9600}}"#).unwrap();
        assert_eq!(profile.port, UsbId::default());
        assert_eq!(profile.serial.baud_rate, 9600);
        assert_eq!(profile.serial.line_encoding, LineEncoding::Serial8N1);
        assert!(!profile.serial.data_terminal_ready);
    }
}
