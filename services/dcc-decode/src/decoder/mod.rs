//! Decoding pass over a capture

mod runner;

pub use runner::{Annotation, AnnotationKind, DecodeStats, DecoderRunner};
