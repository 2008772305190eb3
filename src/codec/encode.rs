//! Pure encoding: line settings → driver parameter codes.
//!
//! No I/O. Codes follow the D2XX constants so a native binding can pass
//! them straight through.

use crate::domain::{DataCharacteristics, FlowControl, FlowSettings, LineEncoding, Parity, StopBits};

/// Word length code for 8 data bits
pub const BITS_8: u8 = 8;

/// XON character used with software flow control
pub const XON_CHAR: u8 = 0x11;
/// XOFF character used with software flow control
pub const XOFF_CHAR: u8 = 0x13;

pub const FLOW_NONE: u16 = 0x0000;
pub const FLOW_RTS_CTS: u16 = 0x0100;
pub const FLOW_DTR_DSR: u16 = 0x0200;
pub const FLOW_XON_XOFF: u16 = 0x0400;

/// `8N1` → 8 data bits, no parity, one stop bit
pub fn data_characteristics(line: LineEncoding) -> DataCharacteristics {
    use LineEncoding::*;

    let (parity, stop_bits) = match line {
        Serial8N1 => (Parity::None, StopBits::One),
        Serial8N2 => (Parity::None, StopBits::Two),
        Serial8E1 => (Parity::Even, StopBits::One),
        Serial8E2 => (Parity::Even, StopBits::Two),
        Serial8O1 => (Parity::Odd, StopBits::One),
        Serial8O2 => (Parity::Odd, StopBits::Two),
        Serial8M1 => (Parity::Mark, StopBits::One),
        Serial8M2 => (Parity::Mark, StopBits::Two),
        Serial8S1 => (Parity::Space, StopBits::One),
        Serial8S2 => (Parity::Space, StopBits::Two),
    };

    DataCharacteristics {
        word_length: BITS_8,
        stop_bits,
        parity,
    }
}

/// Flow mode → driver selector plus the XON/XOFF characters
pub fn flow_settings(flow: FlowControl) -> FlowSettings {
    let code = match flow {
        FlowControl::None => FLOW_NONE,
        FlowControl::RtsCts => FLOW_RTS_CTS,
        FlowControl::XonXoff => FLOW_XON_XOFF,
        FlowControl::DtrDsr => FLOW_DTR_DSR,
    };

    FlowSettings {
        mode: flow,
        code,
        xon: XON_CHAR,
        xoff: XOFF_CHAR,
    }
}
