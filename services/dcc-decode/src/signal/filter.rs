//! Short pulse elision
//!
//! A pulse narrower than the configured width is treated as interference:
//! both of its edges are dropped, so the surrounding half-bit is measured
//! as if the pulse had never happened.

use std::iter::Peekable;

use super::capture::Edge;

/// Output of [`PulseFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtered {
    Edge(Edge),
    /// A short pulse spanning these two samples was removed
    Elided { start: u64, end: u64 },
}

/// Iterator adapter dropping edge pairs closer than `max_width_us`
pub struct PulseFilter<I: Iterator<Item = Edge>> {
    edges: Peekable<I>,
    /// Widest elided pulse in samples, `None` disables elision
    max_width_samples: Option<f64>,
}

impl<I: Iterator<Item = Edge>> PulseFilter<I> {
    pub fn new(edges: I, max_width_us: Option<f64>, sample_rate: u64) -> Self {
        Self {
            edges: edges.peekable(),
            max_width_samples: max_width_us.map(|us| us * sample_rate as f64 / 1_000_000.0),
        }
    }
}

impl<I: Iterator<Item = Edge>> Iterator for PulseFilter<I> {
    type Item = Filtered;

    fn next(&mut self) -> Option<Self::Item> {
        let edge = self.edges.next()?;
        let Some(limit) = self.max_width_samples else {
            return Some(Filtered::Edge(edge));
        };

        match self
            .edges
            .next_if(|next| (next.sample - edge.sample) as f64 <= limit)
        {
            Some(next) => Some(Filtered::Elided {
                start: edge.sample,
                end: next.sample,
            }),
            None => Some(Filtered::Edge(edge)),
        }
    }
}
