//! DCC protocol layer
//!
//! Packet framing, error detection, interpretation and search.

pub mod checksum;
mod framing;
mod parser;
mod search;
mod types;

pub use framing::{Assembler, AssemblerStats, FrameEvent, Packet, PacketByte, MAX_PACKET_BYTES};
pub use parser::{interpret, EvaluationMode, InterpretContext};
pub use search::{parse_number, Query};
pub use types::*;
