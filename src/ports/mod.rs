//! Port traits (interfaces)
//!
//! These traits define the boundaries between the CAT engine and external I/O.
//! Adapters implement these traits to connect to real hardware.

pub mod radio;
pub mod transport;

pub use radio::*;
pub use transport::*;
