//! Track signal handling
//!
//! Everything between the sampler and the bit stream:
//! 1. Load and validate edge captures
//! 2. Elide interfering short pulses
//! 3. Select timing profiles (decoder, compliance, experimental)
//! 4. Classify half-bit pairs into symbolic bits

pub mod capture;
mod classify;
mod filter;
mod profile;
#[cfg(test)]
pub(crate) mod synth;

pub use capture::{Capture, Edge, Polarity};
pub use classify::{classify_interval, Symbol, SymbolicBit, TimingClassifier};
pub use filter::{Filtered, PulseFilter};
pub use profile::{ExperimentalTiming, ProfileRegistry, TimingMode, TimingProfile};
