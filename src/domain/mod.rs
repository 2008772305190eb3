//! Core domain types
//!
//! Pure types with no I/O dependencies: flag sets, line settings, device
//! descriptors and the error vocabulary shared by every layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
