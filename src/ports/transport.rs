//! Byte transport traits
//!
//! Split into two traits:
//! - `TransportFactory`: static methods for listing and opening links
//! - `Transport`: instance methods for reading/writing bytes
//!
//! A transport knows nothing about CAT framing. The transaction engine owns
//! exactly one and is the only thing that talks to it.

use std::time::Instant;

use crate::domain::{CatResult, SerialPortInfo};

/// Factory for creating transports.
pub trait TransportFactory {
    /// List available serial ports on the system
    fn list_ports() -> CatResult<Vec<SerialPortInfo>>;

    /// Open a serial port at the given baud rate, returning a boxed transport
    fn open(port: &str, baud_rate: u32) -> CatResult<Box<dyn Transport>>;
}

/// An open duplex byte link to the radio.
/// Only requires `Send` (not `Sync`); owned by the engine's IO thread.
pub trait Transport: Send {
    /// Write all bytes to the link
    fn write(&mut self, data: &[u8]) -> CatResult<()>;

    /// Return whatever bytes arrive before `deadline`.
    ///
    /// An empty vector means the deadline passed with nothing received. A
    /// deadline already in the past only collects bytes that are waiting.
    fn read_available(&mut self, deadline: Instant) -> CatResult<Vec<u8>>;

    /// Close the link
    fn close(&mut self) -> CatResult<()>;

    /// Check if the link is still open
    fn is_connected(&self) -> bool;
}
