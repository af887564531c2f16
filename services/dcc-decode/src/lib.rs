//! DCC telegram decoder
//!
//! Turns the edge timestamps of a digitized DCC track signal into fully
//! interpreted packets:
//! 1. Elide interfering short pulses (optional)
//! 2. Classify half-bit pairs as `1`, `0` or stretched `0` under a timing profile
//! 3. Detect the preamble and assemble start-bit framed bytes
//! 4. Verify the XOR checksum
//! 5. Interpret address, instruction and CV fields
//! 6. Search decoded packets by address, CV, raw byte or command text
//!
//! The whole pipeline is single-threaded and pull-based: [`DecoderRunner`]
//! is an iterator of [`Annotation`]s and does no work until it is polled.

use thiserror::Error;

pub mod config;
pub mod dcc;
pub mod decoder;
pub mod signal;

pub use dcc::{
    interpret, Address, DecodedPacket, EvaluationMode, Instruction, InterpretContext, Packet,
    PacketClass, Query,
};
pub use decoder::{Annotation, AnnotationKind, DecodeStats, DecoderRunner};
pub use signal::{Capture, Edge, ProfileRegistry, SymbolicBit, TimingMode, TimingProfile};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture contains no edges")]
    EmptyCapture,

    #[error("edge at sample {sample} does not follow previous edge at sample {previous}")]
    NonMonotonicEdge { sample: u64, previous: u64 },

    #[error("capture line {line}: {reason}")]
    CaptureFormat { line: usize, reason: String },

    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u64),

    #[error("sample rate {rate} Hz too low for {mode}: at least {required} Hz required")]
    SampleRateTooLow {
        rate: u64,
        required: u64,
        mode: TimingMode,
    },

    #[error("invalid timing profile: {0}")]
    InvalidProfile(String),

    #[error("invalid search value: {0}")]
    InvalidSearch(String),

    #[error("search query has no predicates")]
    EmptyQuery,
}

pub type Result<T> = std::result::Result<T, DecodeError>;
