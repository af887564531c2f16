//! Track signal synthesiser for tests

use super::capture::{Capture, Edge, Polarity};

pub(crate) struct SignalBuilder {
    sample_rate: u64,
    one_half_us: f64,
    zero_half_us: f64,
    cursor_us: f64,
    polarity: Polarity,
    edges: Vec<Edge>,
}

impl SignalBuilder {
    /// Nominal 58/100 us halves at 1 MHz
    pub(crate) fn new() -> Self {
        Self::with_timing(1_000_000, 58.0, 100.0)
    }

    pub(crate) fn with_timing(sample_rate: u64, one_half_us: f64, zero_half_us: f64) -> Self {
        Self {
            sample_rate,
            one_half_us,
            zero_half_us,
            cursor_us: 0.0,
            polarity: Polarity::Rising,
            edges: Vec::new(),
        }
    }

    pub(crate) fn half(&mut self, us: f64) -> &mut Self {
        let sample = (self.cursor_us * self.sample_rate as f64 / 1_000_000.0).round() as u64;
        self.edges.push(Edge::new(sample, self.polarity));
        self.polarity = self.polarity.flipped();
        self.cursor_us += us;
        self
    }

    pub(crate) fn bit(&mut self, one: bool) -> &mut Self {
        let half = if one { self.one_half_us } else { self.zero_half_us };
        self.half(half).half(half)
    }

    pub(crate) fn ones(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.bit(true);
        }
        self
    }

    /// Start bit, then the byte MSB first
    pub(crate) fn byte(&mut self, value: u8) -> &mut Self {
        self.bit(false);
        for i in (0..8).rev() {
            self.bit(value & (1 << i) != 0);
        }
        self
    }

    /// Preamble, framed bytes and the packet end bit
    pub(crate) fn packet(&mut self, preamble: usize, bytes: &[u8]) -> &mut Self {
        self.ones(preamble);
        for &b in bytes {
            self.byte(b);
        }
        self.bit(true)
    }

    pub(crate) fn cursor_us(&self) -> f64 {
        self.cursor_us
    }

    pub(crate) fn edges(&self) -> Vec<Edge> {
        let mut edges = self.edges.clone();
        let sample = (self.cursor_us * self.sample_rate as f64 / 1_000_000.0).round() as u64;
        edges.push(Edge::new(sample, self.polarity));
        edges
    }

    pub(crate) fn capture(&self) -> Capture {
        Capture::new(self.edges(), self.sample_rate).expect("synthesised capture is valid")
    }
}
