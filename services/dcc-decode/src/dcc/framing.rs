//! Bit and byte assembly
//!
//! State machine over the classified bit stream:
//! - `SeekPreamble` counts consecutive ones
//! - a zero after enough ones is the packet start bit
//! - `DataByte` shifts in eight bits MSB first
//! - `Separator` reads the bit after a byte: zero starts another data byte,
//!   one ends the packet and the last byte is the checksum
//!
//! An invalid bit anywhere aborts the packet and restarts the preamble search.

use serde::Serialize;
use tracing::{debug, trace};

use super::checksum::xor_checksum;
use crate::signal::SymbolicBit;

/// Longest packet accepted before the frame is treated as broken
pub const MAX_PACKET_BYTES: usize = 32;

/// One assembled byte and the samples it spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketByte {
    pub value: u8,
    pub start: u64,
    pub end: u64,
}

/// Bytes between packet start bit and packet end bit, checksum included
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    pub bytes: Vec<PacketByte>,
    pub preamble_bits: u32,
    pub start: u64,
    pub end: u64,
}

impl Packet {
    /// Build a packet from raw bytes with no timing information
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes
                .iter()
                .map(|&value| PacketByte {
                    value,
                    start: 0,
                    end: 0,
                })
                .collect(),
            preamble_bits: 0,
            start: 0,
            end: 0,
        }
    }

    pub fn values(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.value).collect()
    }

    /// Bytes without the trailing checksum
    pub fn body(&self) -> Vec<u8> {
        let n = self.bytes.len().saturating_sub(1);
        self.bytes[..n].iter().map(|b| b.value).collect()
    }

    pub fn checksum_byte(&self) -> Option<u8> {
        self.bytes.last().map(|b| b.value)
    }

    pub fn checksum_valid(&self) -> bool {
        match self.checksum_byte() {
            Some(checksum) => xor_checksum(&self.body()) == checksum,
            None => false,
        }
    }
}

/// Output of [`Assembler::push`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Preamble accepted, the pushed bit was the packet start bit
    PacketStart {
        preamble_bits: u32,
        preamble_start: u64,
        preamble_end: u64,
    },
    /// A zero ended a run of ones that was too short
    PreambleTooShort {
        ones: u32,
        min: u32,
        start: u64,
        end: u64,
    },
    Byte(PacketByte),
    /// The pushed bit was the packet end bit
    Packet(Packet),
    /// Packet abandoned mid-frame
    FramingError { start: u64, end: u64, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekPreamble,
    DataByte,
    Separator,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssemblerStats {
    pub preambles: u64,
    pub short_preambles: u64,
    pub packets: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64,
}

pub struct Assembler {
    min_preamble_bits: u32,
    /// Count the previous packet end bit as a preamble bit
    count_stop_bit: bool,
    state: State,
    ones: u32,
    preamble_start: u64,
    preamble_end: u64,
    bit_count: u8,
    value: u8,
    byte_start: u64,
    bytes: Vec<PacketByte>,
    preamble_bits: u32,
    packet_start: u64,
    stats: AssemblerStats,
}

impl Assembler {
    pub fn new(min_preamble_bits: u32, count_stop_bit: bool) -> Self {
        Self {
            min_preamble_bits,
            count_stop_bit,
            state: State::SeekPreamble,
            ones: 0,
            preamble_start: 0,
            preamble_end: 0,
            bit_count: 0,
            value: 0,
            byte_start: 0,
            bytes: Vec::new(),
            preamble_bits: 0,
            packet_start: 0,
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    /// True while bits are being collected into a packet
    pub fn in_packet(&self) -> bool {
        self.state != State::SeekPreamble
    }

    /// Stop counting the previous packet end bit toward the next preamble
    pub fn clear_stop_bit(&mut self) {
        if self.state == State::SeekPreamble {
            self.ones = 0;
        }
    }

    /// Feed one classified bit spanning `start..end`
    pub fn push(&mut self, bit: SymbolicBit, start: u64, end: u64) -> Option<FrameEvent> {
        match self.state {
            State::SeekPreamble => self.seek(bit, start, end),
            State::DataByte => self.data_bit(bit, start, end),
            State::Separator => self.separator(bit, start, end),
        }
    }

    fn seek(&mut self, bit: SymbolicBit, start: u64, end: u64) -> Option<FrameEvent> {
        match bit {
            SymbolicBit::One => {
                if self.ones == 0 {
                    self.preamble_start = start;
                }
                self.ones += 1;
                self.preamble_end = end;
                None
            }
            SymbolicBit::Zero | SymbolicBit::StretchedZero => {
                let ones = std::mem::take(&mut self.ones);
                if ones >= self.min_preamble_bits {
                    trace!("Preamble of {} bits", ones);
                    self.stats.preambles += 1;
                    self.state = State::DataByte;
                    self.bit_count = 0;
                    self.value = 0;
                    self.bytes.clear();
                    self.preamble_bits = ones;
                    self.packet_start = start;
                    Some(FrameEvent::PacketStart {
                        preamble_bits: ones,
                        preamble_start: self.preamble_start,
                        preamble_end: self.preamble_end,
                    })
                } else if ones > 0 {
                    debug!("Preamble too short: {}/{} bits", ones, self.min_preamble_bits);
                    self.stats.short_preambles += 1;
                    Some(FrameEvent::PreambleTooShort {
                        ones,
                        min: self.min_preamble_bits,
                        start: self.preamble_start,
                        end: self.preamble_end,
                    })
                } else {
                    None
                }
            }
            SymbolicBit::Invalid => {
                self.ones = 0;
                None
            }
        }
    }

    fn data_bit(&mut self, bit: SymbolicBit, start: u64, end: u64) -> Option<FrameEvent> {
        let Some(v) = bit.value() else {
            return Some(self.abort(end, "invalid bit in data byte"));
        };
        if self.bit_count == 0 {
            self.byte_start = start;
        }
        self.value = (self.value << 1) | v;
        self.bit_count += 1;
        if self.bit_count < 8 {
            return None;
        }

        let byte = PacketByte {
            value: self.value,
            start: self.byte_start,
            end,
        };
        self.bytes.push(byte);
        self.bit_count = 0;
        self.value = 0;
        self.state = State::Separator;
        Some(FrameEvent::Byte(byte))
    }

    fn separator(&mut self, bit: SymbolicBit, start: u64, end: u64) -> Option<FrameEvent> {
        match bit {
            SymbolicBit::Zero | SymbolicBit::StretchedZero => {
                if self.bytes.len() >= MAX_PACKET_BYTES {
                    return Some(self.abort(end, "packet too long"));
                }
                self.state = State::DataByte;
                None
            }
            SymbolicBit::One => {
                let packet = Packet {
                    bytes: std::mem::take(&mut self.bytes),
                    preamble_bits: self.preamble_bits,
                    start: self.packet_start,
                    end,
                };
                self.stats.packets += 1;
                if !packet.checksum_valid() {
                    debug!("Checksum mismatch in {}", hex::encode(packet.values()));
                    self.stats.checksum_errors += 1;
                }
                self.state = State::SeekPreamble;
                if self.count_stop_bit {
                    self.ones = 1;
                    self.preamble_start = start;
                    self.preamble_end = end;
                } else {
                    self.ones = 0;
                }
                Some(FrameEvent::Packet(packet))
            }
            SymbolicBit::Invalid => Some(self.abort(end, "invalid bit after data byte")),
        }
    }

    fn abort(&mut self, end: u64, reason: &'static str) -> FrameEvent {
        debug!("Framing error: {}", reason);
        self.stats.framing_errors += 1;
        self.state = State::SeekPreamble;
        self.ones = 0;
        self.bytes.clear();
        self.bit_count = 0;
        self.value = 0;
        FrameEvent::FramingError {
            start: self.packet_start,
            end,
            reason,
        }
    }
}
