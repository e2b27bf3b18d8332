//! CAT frame codec: Command + values → wire bytes, wire bytes → frames.
//!
//! Encoding is a pure function. Decoding keeps one piece of state, the
//! partial frame at the end of the last chunk, because the serial link
//! hands us arbitrary slices of the byte stream. Bytes are processed one at
//! a time so the frames produced never depend on how the stream was chunked.

use crate::domain::CatResult;

use super::catalog::{self, Command, Direction, Value};

/// CAT command/response terminator byte.
pub const TERMINATOR: u8 = b';';

/// Default cap on a partial frame. The longest FT-991A answer (`MR`) is 27
/// bytes; anything far beyond that is line garbage.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64;

/// One complete wire unit: mnemonic + parameter text (terminator stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub mnemonic: String,
    pub params: String,
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.mnemonic.len() + self.params.len() + 1);
        out.extend_from_slice(self.mnemonic.as_bytes());
        out.extend_from_slice(self.params.as_bytes());
        out.push(TERMINATOR);
        out
    }
}

/// One item produced by [`FrameCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// The radio's error answer (`?;` by default)
    Rejection,
    /// Bytes that cannot be a frame, with a description
    Malformed(String),
}

/// Encode a command into the FT-991A wire bytes (including the `;` terminator).
///
/// Fails with `Validation` if any value is outside the catalog domain.
pub fn encode(cmd: &Command, values: &[Value]) -> CatResult<Vec<u8>> {
    catalog::validate(cmd, values)?;
    let params = cmd.format_params(values);
    Ok(Frame {
        mnemonic: cmd.mnemonic().to_string(),
        params,
    }
    .to_bytes())
}

/// Encode a write followed by the read of the same setting.
///
/// FT-991A writes are silent; the read that follows makes the radio report
/// the value it actually applied, which may be clamped.
pub fn encode_confirmed_write(cmd: &Command, values: &[Value]) -> CatResult<Vec<u8>> {
    let mut wire = encode(cmd, values)?;
    if let (Direction::Write, Some(read)) = (cmd.direction(), cmd.confirming_read()) {
        let address = &values[..read.address_len().min(values.len())];
        wire.extend(encode(&read, address)?);
    }
    Ok(wire)
}

/// Streaming decoder for `;`-terminated CAT frames.
#[derive(Debug)]
pub struct FrameCodec {
    buf: Vec<u8>,
    /// Dropping everything up to the next terminator after an overlong frame
    discarding: bool,
    /// Consecutive bytes that cannot appear in a frame
    junk: usize,
    max_frame_len: usize,
    reject_body: Vec<u8>,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize, reject_pattern: &str) -> Self {
        Self {
            buf: Vec::with_capacity(max_frame_len),
            discarding: false,
            junk: 0,
            max_frame_len,
            reject_body: reject_pattern.as_bytes().to_vec(),
        }
    }

    /// Feed received bytes; returns every item completed by them.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        for &b in bytes {
            if self.discarding {
                if b == TERMINATOR {
                    self.discarding = false;
                }
                continue;
            }

            if !is_frame_byte(b) {
                // A partial frame interrupted by garbage is garbage too.
                self.junk += 1 + self.buf.len();
                self.buf.clear();
                continue;
            }
            if self.junk > 0 {
                out.push(Decoded::Malformed(format!(
                    "discarded {} stray byte(s)",
                    self.junk
                )));
                self.junk = 0;
            }

            if b == TERMINATOR {
                let body = std::mem::take(&mut self.buf);
                out.push(self.parse_body(&body));
                continue;
            }

            self.buf.push(b);
            if self.buf.len() > self.max_frame_len {
                out.push(Decoded::Malformed(format!(
                    "no terminator within {} bytes",
                    self.max_frame_len
                )));
                self.buf.clear();
                self.discarding = true;
            }
        }
        out
    }

    /// Bytes of the incomplete frame carried over to the next call.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Forget any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
        self.junk = 0;
    }

    fn parse_body(&self, body: &[u8]) -> Decoded {
        if body == self.reject_body.as_slice() {
            return Decoded::Rejection;
        }
        // is_frame_byte() only admits printable ASCII, so this cannot fail.
        let Ok(text) = std::str::from_utf8(body) else {
            return Decoded::Malformed("non-ASCII frame".into());
        };
        match text.chars().next() {
            None => Decoded::Malformed("empty frame".into()),
            Some(c) if !c.is_ascii_uppercase() => {
                Decoded::Malformed(format!("frame '{text}' does not start with a mnemonic"))
            }
            Some(_) => {
                let (mnemonic, params) = catalog::split_mnemonic(text);
                Decoded::Frame(Frame {
                    mnemonic: mnemonic.to_string(),
                    params: params.to_string(),
                })
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN, "?")
    }
}

fn is_frame_byte(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}
