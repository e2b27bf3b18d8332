//! Adapters: implementations of the port traits
//!
//! - `serial_port`: a real serial link via the `serialport` crate
//! - `mock_radio`: a simulated FT-991A for running without hardware

pub mod mock_radio;
pub mod serial_port;

pub use mock_radio::{MockFt991a, SimulatorHandle};
pub use serial_port::{SerialTransport, SerialTransportFactory};
