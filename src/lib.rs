//! catsu: FT-991A CAT protocol engine
//!
//! Frames, sends and matches Yaesu CAT commands over a serial link, keeps a
//! mirror of radio-confirmed state and programs memory channels without
//! leaving a slot half written.
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, errors and configuration, no I/O
//! - `ports/` - Trait definitions (interfaces) for external dependencies
//! - `cat/` - Command catalog, frame codec and the transaction engine
//! - `state` - Cache of radio-confirmed state
//! - `memory/` - Channel plans and the channel program controller
//! - `adapters/` - Implementations of ports (serialport, simulated radio)
//! - `radio` - The `Ft991a` facade tying it together

// Core domain (pure, no I/O)
pub mod domain;
pub mod ports;

// Protocol engine
pub mod cat;
pub mod memory;
pub mod state;

// Adapters (external I/O)
pub mod adapters;

pub mod radio;

pub use domain::{CatError, CatResult, Configuration};
pub use radio::Ft991a;
pub use state::{StateKey, StateValue};
