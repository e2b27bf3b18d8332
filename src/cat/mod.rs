//! CAT (Computer Aided Transceiver) protocol layer for the FT-991A.
//!
//! This module separates the concerns of CAT communication:
//! - `catalog`: what each mnemonic means and accepts (pure data)
//! - `codec`: Command + values → wire bytes, wire bytes → frames (no I/O)
//! - `engine`: own the transport, drive timing, retries and matching
//!
//! The catalog and codec are pure so they can be tested without any
//! transport at all.

pub mod catalog;
pub mod codec;
pub mod engine;

pub use catalog::{lookup, validate, Command, CommandDef, Direction, Value};
pub use codec::{encode, Decoded, Frame, FrameCodec};
pub use engine::{PendingRequest, TransactionEngine};

/// Outcome of a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Answer to a read, or the read-back that confirmed a write. Values
    /// follow the command's answer grammar.
    Values { command: Command, values: Vec<Value> },
    /// An execute command the radio did not reject
    Ack,
}

impl Response {
    pub fn values(&self) -> &[Value] {
        match self {
            Response::Values { values, .. } => values,
            Response::Ack => &[],
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Response::Values { values, .. } => values,
            Response::Ack => Vec::new(),
        }
    }
}
