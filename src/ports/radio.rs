//! Radio control port trait

use crate::domain::{CatResult, Frequency, Mode};

/// Trait for everyday radio control (PTT, frequency, mode)
pub trait RadioControl: Send {
    /// Engage PTT (start transmitting)
    fn ptt_on(&mut self) -> CatResult<()>;

    /// Release PTT (stop transmitting)
    fn ptt_off(&mut self) -> CatResult<()>;

    /// Whether the radio last confirmed it is transmitting
    fn is_transmitting(&self) -> bool;

    /// Get current VFO-A frequency
    fn get_frequency(&mut self) -> CatResult<Frequency>;

    /// Set VFO-A frequency, returning the frequency the radio settled on
    fn set_frequency(&mut self, freq: Frequency) -> CatResult<Frequency>;

    /// Get current operating mode
    fn get_mode(&mut self) -> CatResult<Mode>;

    /// Set operating mode
    fn set_mode(&mut self, mode: Mode) -> CatResult<Mode>;
}
