//! Driver binding implementations
//!
//! - `mock_ftdi`: scripted in-memory devices for development and tests
//! - `serial_port`: FTDI adapters through the OS serial driver (`serialport` crate)

pub mod mock_ftdi;
pub mod serial_port;
