//! Audio Driver Interface
//!
//! Contract of the platform audio output backend. Implemented elsewhere
//! (against the host's audio stack); the core only queries the native rate
//! and opens streams fed by a data-producing callback.

use anyhow::Result;

/// Fills `buffer` with interleaved samples; returns how many frames were
/// produced. Producing fewer frames than requested signals stream end.
pub type DataCallback = Box<dyn FnMut(&mut [i16]) -> usize + Send>;

/// An open, startable audio output stream.
pub trait OutputStream: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn playing(&self) -> bool;
}

/// Platform audio output backend.
pub trait AudioDriver: Send + Sync {
    /// Preferred sample rate of the host device, in Hz. 0 when unknown.
    fn native_sample_rate(&self) -> u32;

    /// Open an output stream at the given rate, pulling data from `callback`.
    fn new_output_stream(&self, sample_rate: u32, callback: DataCallback)
        -> Result<Box<dyn OutputStream>>;
}
