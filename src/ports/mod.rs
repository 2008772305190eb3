//! Port traits (interfaces)
//!
//! These define the boundary between the transport core and the device
//! driver. Adapters implement them to connect to real hardware or a mock.

pub mod driver;
pub mod event;

pub use driver::*;
pub use event::*;
