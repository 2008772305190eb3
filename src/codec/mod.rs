//! Translation between typed settings/flags and raw driver values.
//!
//! - `encode`: line encoding / flow control → driver parameter codes
//! - `decode`: modem status word → error flags and pinout signals
//!
//! Both are pure so they can be tested without any device.

pub mod decode;
pub mod encode;

pub use decode::{decode_error_bits, decode_signal_bits, has_serious_error};
pub use encode::{data_characteristics, flow_settings};
