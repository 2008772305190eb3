//! Pure decoding: raw modem status word → typed flag sets.
//!
//! Total functions, no I/O. Word layout:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | B4  | Clear to send (CTS) |
//! | B5  | Data set ready (DSR) |
//! | B6  | Ring indicator (RI) |
//! | B7  | Receive line signal detect (RLSD) |
//! | B8  | Data ready |
//! | B9  | Overrun error * |
//! | B10 | Parity error * |
//! | B11 | Framing error * |
//! | B12 | Break interrupt |
//! | B13 | Transmitter holding register empty |
//! | B14 | Transmitter empty |
//! | B15 | Error in receiver FIFO * |
//!
//! Bits marked * are the serious receive errors.

use crate::domain::{ErrorFlags, PinoutSignals};

pub const MODEM_CTS: u32 = 0x0010;
pub const MODEM_DSR: u32 = 0x0020;
pub const MODEM_RI: u32 = 0x0040;
pub const MODEM_RLSD: u32 = 0x0080;

pub const LINE_DATA_READY: u32 = 0x0100;
pub const LINE_OVERRUN: u32 = 0x0200;
pub const LINE_PARITY: u32 = 0x0400;
pub const LINE_FRAMING: u32 = 0x0800;
pub const LINE_BREAK: u32 = 0x1000;
pub const LINE_THRE: u32 = 0x2000;
pub const LINE_TEMT: u32 = 0x4000;
pub const LINE_FIFO: u32 = 0x8000;

/// Overrun | parity | framing | FIFO
pub const SERIOUS_ERROR_MASK: u32 = LINE_OVERRUN | LINE_PARITY | LINE_FRAMING | LINE_FIFO;

const ERROR_BITS: [(u32, ErrorFlags); 5] = [
    (LINE_OVERRUN, ErrorFlags::OVERRUN),
    (LINE_PARITY, ErrorFlags::PARITY),
    (LINE_FRAMING, ErrorFlags::FRAMING),
    (LINE_BREAK, ErrorFlags::BREAK_CONDITION),
    (LINE_FIFO, ErrorFlags::FIFO),
];

const SIGNAL_BITS: [(u32, PinoutSignals); 4] = [
    (MODEM_RLSD, PinoutSignals::RECEIVED_DATA),
    (MODEM_RI, PinoutSignals::RING_INDICATOR),
    (MODEM_DSR, PinoutSignals::DATA_SET_READY),
    (MODEM_CTS, PinoutSignals::CLEAR_TO_SEND),
];

/// True if any serious receive error bit is set
pub fn has_serious_error(word: u32) -> bool {
    word & SERIOUS_ERROR_MASK != 0
}

/// Line status half of the word → error flags.
/// Data ready and the transmitter-empty bits are not modelled and are dropped.
pub fn decode_error_bits(word: u32) -> ErrorFlags {
    ERROR_BITS
        .iter()
        .filter(|(bit, _)| word & bit != 0)
        .fold(ErrorFlags::empty(), |flags, (_, flag)| flags | *flag)
}

/// Modem half of the word → asserted input lines
pub fn decode_signal_bits(word: u32) -> PinoutSignals {
    SIGNAL_BITS
        .iter()
        .filter(|(bit, _)| word & bit != 0)
        .fold(PinoutSignals::empty(), |signals, (_, signal)| signals | *signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_bit_alone_decodes_to_parity() {
        assert_eq!(decode_error_bits(0x0400), ErrorFlags::PARITY);
    }

    #[test]
    fn zero_word_decodes_to_no_error() {
        assert_eq!(decode_error_bits(0), ErrorFlags::empty());
        assert_eq!(decode_signal_bits(0), PinoutSignals::empty());
    }

    #[test]
    fn each_error_bit_maps_to_its_flag() {
        assert_eq!(decode_error_bits(0x0200), ErrorFlags::OVERRUN);
        assert_eq!(decode_error_bits(0x0800), ErrorFlags::FRAMING);
        assert_eq!(decode_error_bits(0x1000), ErrorFlags::BREAK_CONDITION);
        assert_eq!(decode_error_bits(0x8000), ErrorFlags::FIFO);
    }

    #[test]
    fn unmodelled_line_bits_are_dropped() {
        let word = LINE_DATA_READY | LINE_THRE | LINE_TEMT | MODEM_CTS;
        assert_eq!(decode_error_bits(word), ErrorFlags::empty());
    }

    #[test]
    fn all_error_bits_combine() {
        let flags = decode_error_bits(0xFFFF);
        assert_eq!(
            flags,
            ErrorFlags::OVERRUN
                | ErrorFlags::PARITY
                | ErrorFlags::FRAMING
                | ErrorFlags::BREAK_CONDITION
                | ErrorFlags::FIFO
        );
        assert!(!flags.contains(ErrorFlags::NOT_OPEN));
        assert!(!flags.contains(ErrorFlags::READ));
    }

    #[test]
    fn signal_bits_map_to_lines() {
        assert_eq!(decode_signal_bits(0x10), PinoutSignals::CLEAR_TO_SEND);
        assert_eq!(decode_signal_bits(0x20), PinoutSignals::DATA_SET_READY);
        assert_eq!(decode_signal_bits(0x40), PinoutSignals::RING_INDICATOR);
        assert_eq!(decode_signal_bits(0x80), PinoutSignals::RECEIVED_DATA);
        assert_eq!(decode_signal_bits(0xF0), PinoutSignals::all());
    }

    #[test]
    fn signal_decode_ignores_line_status_byte() {
        assert_eq!(decode_signal_bits(0xFF0F), PinoutSignals::empty());
    }

    #[test]
    fn serious_mask_covers_overrun_parity_framing_fifo() {
        assert_eq!(SERIOUS_ERROR_MASK, 0b1000_1110_0000_0000);
        assert!(has_serious_error(LINE_PARITY));
        assert!(has_serious_error(LINE_FIFO | MODEM_CTS));
        assert!(!has_serious_error(LINE_BREAK | LINE_DATA_READY | MODEM_DSR));
    }
}
