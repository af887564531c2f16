//! Edge captures from the logic sampler
//!
//! A capture is the strictly time-ordered list of level transitions on the
//! DCC data line plus the sample rate they were recorded at. Captures are
//! validated once up front; the decoder never iterates a malformed one.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::{DecodeError, Result};

/// Direction of a level transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Polarity {
    Rising,
    Falling,
}

impl Polarity {
    pub fn flipped(self) -> Self {
        match self {
            Polarity::Rising => Polarity::Falling,
            Polarity::Falling => Polarity::Rising,
        }
    }
}

/// A single zero-crossing on the data line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Sample index of the transition
    pub sample: u64,
    pub polarity: Polarity,
}

impl Edge {
    pub fn new(sample: u64, polarity: Polarity) -> Self {
        Self { sample, polarity }
    }
}

/// Validated edge capture
#[derive(Debug, Clone)]
pub struct Capture {
    edges: Vec<Edge>,
    sample_rate: u64,
}

impl Capture {
    /// Validate an edge list. Rejects empty captures, a zero sample rate and
    /// edges that do not strictly increase in time.
    pub fn new(edges: Vec<Edge>, sample_rate: u64) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DecodeError::InvalidSampleRate(sample_rate));
        }
        if edges.is_empty() {
            return Err(DecodeError::EmptyCapture);
        }
        for pair in edges.windows(2) {
            if pair[1].sample <= pair[0].sample {
                return Err(DecodeError::NonMonotonicEdge {
                    sample: pair[1].sample,
                    previous: pair[0].sample,
                });
            }
        }
        Ok(Self { edges, sample_rate })
    }

    /// Build a capture from raw logic levels, one entry per sample.
    pub fn from_levels(levels: &[bool], sample_rate: u64) -> Result<Self> {
        let edges = levels
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] != w[1])
            .map(|(i, w)| {
                let polarity = if w[1] { Polarity::Rising } else { Polarity::Falling };
                Edge::new(i as u64 + 1, polarity)
            })
            .collect();
        Self::new(edges, sample_rate)
    }

    /// Load a text capture: one edge per line as `sample_index[,level]`.
    ///
    /// Blank lines and `#` comments are skipped. Fields may be separated by
    /// a comma or whitespace. Without a level column the polarity alternates
    /// starting with a rising edge.
    pub fn from_reader<R: Read>(reader: R, sample_rate: u64) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut edges = Vec::new();
        let mut next_polarity = Polarity::Rising;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty());

            let sample = fields
                .next()
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or_else(|| DecodeError::CaptureFormat {
                    line: idx + 1,
                    reason: format!("expected sample index, got {:?}", line),
                })?;

            let polarity = match fields.next() {
                None => next_polarity,
                Some("1") => Polarity::Rising,
                Some("0") => Polarity::Falling,
                Some(other) => {
                    return Err(DecodeError::CaptureFormat {
                        line: idx + 1,
                        reason: format!("level must be 0 or 1, got {:?}", other),
                    })
                }
            };
            next_polarity = polarity.flipped();
            edges.push(Edge::new(sample, polarity));
        }

        debug!("Loaded {} edges at {} Hz", edges.len(), sample_rate);
        Self::new(edges, sample_rate)
    }

    pub fn from_path(path: impl AsRef<Path>, sample_rate: u64) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, sample_rate)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    /// Duration of `samples` in microseconds
    pub fn samples_to_us(&self, samples: u64) -> f64 {
        samples as f64 * 1_000_000.0 / self.sample_rate as f64
    }

    /// Measurement accuracy: one sample period in microseconds
    pub fn accuracy_us(&self) -> f64 {
        1_000_000.0 / self.sample_rate as f64
    }
}
