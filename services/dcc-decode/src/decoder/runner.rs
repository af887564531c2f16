//! Decoder runner - pulls edges through the signal and protocol layers

use std::collections::VecDeque;
use std::iter::Copied;
use std::slice::Iter;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::dcc::{interpret, Assembler, DecodedPacket, FrameEvent, InterpretContext};
use crate::signal::{Capture, Edge, Filtered, ProfileRegistry, PulseFilter, Symbol, SymbolicBit, TimingClassifier};
use crate::{DecodeError, Result};

/// Lowest sample rate that can resolve a one half at all
pub const MIN_SAMPLE_RATE: u64 = 25_000;
/// Below this the decoder modes lose precision
pub const DECODER_SAMPLE_RATE: u64 = 1_000_000;
/// Required by the compliance modes
pub const COMPLIANCE_SAMPLE_RATE: u64 = 2_000_000;

/// RailCom cutout window after the packet end bit, microseconds
const CUTOUT_MIN_US: f64 = 454.0;
const CUTOUT_MAX_US: f64 = 488.0;

/// A labelled span of the capture, in samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub start: u64,
    pub end: u64,
    pub kind: AnnotationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnnotationKind {
    Bit(Symbol),
    PulseElided,
    Preamble { bits: u32 },
    PreambleTooShort { bits: u32, min: u32 },
    PacketStart,
    Byte { value: u8 },
    PacketEnd,
    Packet(Box<DecodedPacket>),
    FramingError { reason: &'static str },
    InvalidTiming { part1_us: f64, part2_us: Option<f64> },
    RailcomCutout { duration_us: f64 },
    /// Short bit straight after a cutout, tolerated in decoder modes
    BrokenBitIgnored,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub bits: u64,
    pub invalid_symbols: u64,
    pub pulses_elided: u64,
    pub railcom_cutouts: u64,
    pub broken_bits: u64,
    /// Stretched zeros seen in a compliance mode
    pub violations: u64,
    pub preambles: u64,
    pub short_preambles: u64,
    pub packets: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64,
}

/// Decoder runner that turns capture edges into annotations on demand
///
/// Bits are measured from three consecutive edges. Until a packet start
/// bit has been seen the runner is unaligned and slides one edge at a
/// time on invalid timing; afterwards it consumes edges in pairs.
pub struct DecoderRunner<'a> {
    edges: PulseFilter<Copied<Iter<'a, Edge>>>,
    window: VecDeque<u64>,
    pending: VecDeque<Annotation>,
    classifier: TimingClassifier,
    assembler: Assembler,
    context: InterpretContext,
    sample_rate: u64,
    compliance: bool,
    aligned: bool,
    after_packet: bool,
    after_cutout: bool,
    stats: DecodeStats,
}

impl<'a> DecoderRunner<'a> {
    pub fn new(
        capture: &'a Capture,
        registry: &ProfileRegistry,
        context: InterpretContext,
    ) -> Result<Self> {
        registry.validate()?;
        let profile = registry.active();
        let rate = capture.sample_rate();

        if rate < MIN_SAMPLE_RATE {
            return Err(DecodeError::InvalidSampleRate(rate));
        }
        if profile.mode.is_compliance() && rate < COMPLIANCE_SAMPLE_RATE {
            return Err(DecodeError::SampleRateTooLow {
                rate,
                required: COMPLIANCE_SAMPLE_RATE,
                mode: profile.mode,
            });
        }
        if rate < DECODER_SAMPLE_RATE {
            warn!(
                "Sample rate {} Hz is below {} Hz, timing will be imprecise",
                rate, DECODER_SAMPLE_RATE
            );
        }

        info!(
            "Decoding {} edges at {} Hz ({}, preamble >= {} bits)",
            capture.edges().len(),
            rate,
            profile.mode,
            profile.min_preamble_bits
        );

        let compliance = profile.mode.is_compliance();
        Ok(Self {
            edges: PulseFilter::new(capture.edges().iter().copied(), profile.ignore_pulse_leq, rate),
            window: VecDeque::with_capacity(3),
            pending: VecDeque::new(),
            classifier: TimingClassifier::new(profile, registry.comparison(), capture.accuracy_us()),
            assembler: Assembler::new(profile.min_preamble_bits, !compliance),
            context,
            sample_rate: rate,
            compliance,
            aligned: false,
            after_packet: false,
            after_cutout: false,
            stats: DecodeStats::default(),
        })
    }

    /// Counters so far, complete once the runner is exhausted
    pub fn stats(&self) -> DecodeStats {
        let frames = self.assembler.stats();
        DecodeStats {
            preambles: frames.preambles,
            short_preambles: frames.short_preambles,
            packets: frames.packets,
            checksum_errors: frames.checksum_errors,
            framing_errors: frames.framing_errors,
            ..self.stats
        }
    }

    /// Drain the runner keeping only interpreted packets
    pub fn packets(self) -> impl Iterator<Item = DecodedPacket> + 'a {
        self.filter_map(|annotation| match annotation.kind {
            AnnotationKind::Packet(packet) => Some(*packet),
            _ => None,
        })
    }

    fn us(&self, samples: u64) -> f64 {
        samples as f64 * 1_000_000.0 / self.sample_rate as f64
    }

    fn emit(&mut self, start: u64, end: u64, kind: AnnotationKind) {
        self.pending.push_back(Annotation { start, end, kind });
    }

    /// Top the window up to three edges. Returns false once the capture
    /// cannot supply them.
    fn fill(&mut self) -> bool {
        while self.window.len() < 3 {
            match self.edges.next() {
                Some(Filtered::Edge(edge)) => self.window.push_back(edge.sample),
                Some(Filtered::Elided { start, end }) => {
                    trace!("Elided pulse at sample {}", start);
                    self.stats.pulses_elided += 1;
                    self.emit(start, end, AnnotationKind::PulseElided);
                }
                None => return false,
            }
        }
        true
    }

    /// Measure one bit window. Returns false at the end of the capture.
    fn step(&mut self) -> bool {
        if !self.fill() {
            return false;
        }
        let (e0, e1, e2) = (self.window[0], self.window[1], self.window[2]);
        let part1 = self.us(e1 - e0);
        let part2 = self.us(e2 - e1);
        let symbol = self.classifier.classify_bit(part1, part2);
        let total = part1 + part2;
        let a = self.classifier.accuracy_us();
        let one_max = self.classifier.profile().one_max;

        // The cutout may measure as a plain zero under wide zero ranges
        if self.aligned
            && !self.compliance
            && self.after_packet
            && total >= CUTOUT_MIN_US - a
            && total <= CUTOUT_MAX_US + 2.0 * (one_max + a)
        {
            debug!("RailCom cutout of {:.1} us at sample {}", total, e0);
            self.window.drain(..2);
            self.stats.railcom_cutouts += 1;
            self.after_packet = false;
            self.after_cutout = true;
            self.assembler.clear_stop_bit();
            self.emit(e0, e2, AnnotationKind::RailcomCutout { duration_us: total });
            return true;
        }

        if symbol.bit != SymbolicBit::Invalid {
            self.window.drain(..2);
            self.bit(symbol, e0, e2);
            return true;
        }

        if !self.aligned {
            self.window.pop_front();
            self.after_packet = false;
            self.after_cutout = false;
            if self.classifier.is_half_one(part1) {
                // Stray half of a one, realign on the next edge
                return true;
            }
            self.stats.invalid_symbols += 1;
            self.emit(
                e0,
                e1,
                AnnotationKind::InvalidTiming {
                    part1_us: part1,
                    part2_us: None,
                },
            );
            if let Some(event) = self.assembler.push(SymbolicBit::Invalid, e0, e1) {
                self.frame_event(event, e0, e1);
            }
            return true;
        }

        if !self.compliance && self.after_cutout && total <= one_max + a {
            self.window.drain(..2);
            self.stats.broken_bits += 1;
            self.after_cutout = false;
            self.assembler.clear_stop_bit();
            self.emit(e0, e2, AnnotationKind::BrokenBitIgnored);
            return true;
        }

        debug!("Invalid bit timing {:.1}/{:.1} us at sample {}", part1, part2, e0);
        self.window.pop_front();
        self.stats.invalid_symbols += 1;
        self.aligned = false;
        self.after_packet = false;
        self.after_cutout = false;
        self.emit(
            e0,
            e2,
            AnnotationKind::InvalidTiming {
                part1_us: part1,
                part2_us: Some(part2),
            },
        );
        if let Some(event) = self.assembler.push(SymbolicBit::Invalid, e0, e2) {
            self.frame_event(event, e0, e2);
        }
        true
    }

    fn bit(&mut self, symbol: Symbol, start: u64, end: u64) {
        self.stats.bits += 1;
        if symbol.violation {
            debug!("Stretched zero at sample {} violates {}", start, self.classifier.profile().mode);
            self.stats.violations += 1;
        }
        self.after_packet = false;
        self.after_cutout = false;
        self.emit(start, end, AnnotationKind::Bit(symbol));
        if let Some(event) = self.assembler.push(symbol.bit, start, end) {
            self.frame_event(event, start, end);
        }
    }

    fn frame_event(&mut self, event: FrameEvent, start: u64, end: u64) {
        match event {
            FrameEvent::PacketStart {
                preamble_bits,
                preamble_start,
                preamble_end,
            } => {
                self.aligned = true;
                self.emit(
                    preamble_start,
                    preamble_end,
                    AnnotationKind::Preamble {
                        bits: preamble_bits,
                    },
                );
                self.emit(start, end, AnnotationKind::PacketStart);
            }
            FrameEvent::PreambleTooShort {
                ones,
                min,
                start,
                end,
            } => self.emit(start, end, AnnotationKind::PreambleTooShort { bits: ones, min }),
            FrameEvent::Byte(byte) => {
                self.emit(byte.start, byte.end, AnnotationKind::Byte { value: byte.value })
            }
            FrameEvent::Packet(packet) => {
                self.after_packet = true;
                self.emit(start, end, AnnotationKind::PacketEnd);
                let decoded = interpret(&packet, &self.context);
                trace!("{}", decoded.summary());
                self.emit(
                    packet.start,
                    packet.end,
                    AnnotationKind::Packet(Box::new(decoded)),
                );
            }
            FrameEvent::FramingError { start, end, reason } => {
                self.emit(start, end, AnnotationKind::FramingError { reason });
            }
        }
    }
}

impl Iterator for DecoderRunner<'_> {
    type Item = Annotation;

    fn next(&mut self) -> Option<Annotation> {
        loop {
            if let Some(annotation) = self.pending.pop_front() {
                return Some(annotation);
            }
            if !self.step() {
                return self.pending.pop_front();
            }
        }
    }
}
