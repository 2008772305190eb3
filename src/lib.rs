//! Buffered, event-driven serial transport for FTDI USB-serial devices.
//!
//! Opens a device by vendor/product id, pushes the line configuration, and
//! runs a dispatcher thread that drains received bytes into a buffer the
//! caller reads without blocking (or waits on with a timeout).
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, no I/O dependencies
//! - `ports/` - Trait definitions for the driver binding and its event signal
//! - `codec/` - Setting encoders and status decoders (pure functions)
//! - `transport/` - Session, receive buffer, dispatcher and the `FtTransport` facade
//! - `adapters/` - Implementations of ports (mock driver, `serialport`)
//! - `profile_store` - JSON persistence of named profiles

// Core domain (pure, no I/O)
pub mod codec;
pub mod domain;
pub mod ports;

// Transport core
pub mod transport;

// Adapters (external I/O)
pub mod adapters;
pub mod profile_store;

pub use transport::{FtTransport, TransportEvent};
