//! Decoded DCC packet types

use std::fmt;
use std::ops::Range;

use chrono::{NaiveDate, Weekday};
use serde::Serialize;

use super::framing::PacketByte;

/// Packet class, selected by the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacketClass {
    Idle,
    /// Broadcast decoder reset
    Reset,
    Broadcast,
    MultiFunctionShort,
    MultiFunctionLong,
    Accessory,
    ExtendedAccessory,
    ServiceRegister,
    ServicePage,
    ServiceDirect,
    AdvancedExtended,
    DccA,
    RailComPlus,
    Reserved,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessoryKind {
    Basic,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessoryAddress {
    pub kind: AccessoryKind,
    /// Address as reported, offset applied
    pub address: i32,
    /// Address as encoded in the packet
    pub raw: i32,
    /// 9-bit decoder address
    pub decoder: u16,
    /// Output pair within the decoder
    pub port: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Address {
    Broadcast,
    Short(u8),
    Long(u16),
    Accessory(AccessoryAddress),
    AccessoryBroadcast(AccessoryKind),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Broadcast => write!(f, "broadcast"),
            Address::Short(a) => write!(f, "short {}", a),
            Address::Long(a) => write!(f, "long {}", a),
            Address::Accessory(a) => write!(
                f,
                "accessory {} (decoder {}, port {})",
                a.address, a.decoder, a.port
            ),
            Address::AccessoryBroadcast(_) => write!(f, "accessory broadcast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedSteps {
    Steps14,
    Steps28,
    Steps128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedStep {
    Stop,
    EmergencyStop,
    Step(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Speed {
    /// `None` for broadcasts
    pub direction: Option<Direction>,
    pub step: SpeedStep,
    pub steps: SpeedSteps,
    /// Step mode taken from the CV29 hint rather than the packet
    pub inferred: bool,
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let of = match self.steps {
            SpeedSteps::Steps14 => 14,
            SpeedSteps::Steps28 => 28,
            SpeedSteps::Steps128 => 126,
        };
        match self.step {
            SpeedStep::Stop => write!(f, "stop")?,
            SpeedStep::EmergencyStop => write!(f, "emergency stop")?,
            SpeedStep::Step(s) => write!(f, "{}/{}", s, of)?,
        }
        match self.direction {
            Some(Direction::Forward) => write!(f, " forward"),
            Some(Direction::Reverse) => write!(f, " reverse"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionState {
    pub number: u8,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsistPosition {
    Single,
    Leading,
    Middle,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalogChannel {
    Volume,
    Position(u8),
    Any(u8),
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CvOperation {
    Read,
    Verify,
    Write,
    /// Verify or write a single bit
    Bit { write: bool, position: u8, value: bool },
}

/// A configuration variable read or written by the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CvAccess {
    pub cv: u32,
    pub operation: CvOperation,
    pub value: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CvForm {
    ShortForm,
    /// Programming on the main, 10-bit CV number
    Long,
    /// Extended POM, 24-bit CV number
    Xpom { sequence: u8 },
    ServiceDirect,
    AccessoryPom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogonGroup {
    All,
    Loco,
    Accessory,
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DccACommand {
    GetDataStart,
    GetDataCont,
    SetDataStart,
    SetDataCont,
    Select {
        manufacturer: u16,
        decoder_id: u32,
        subcommand: u8,
    },
    LogonAssign {
        manufacturer: u16,
        decoder_id: u32,
        address: Option<u16>,
    },
    LogonEnable {
        group: LogonGroup,
        cid: u16,
        session: u8,
    },
    Reserved(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instruction {
    Idle,
    DecoderReset {
        hard: bool,
    },
    FactoryTest,
    SetAdvancedAddressing {
        enabled: bool,
    },
    AckRequest,
    /// `address` is `None` for reserved consist sub-instructions
    ConsistControl {
        address: Option<u8>,
        reverse: bool,
    },
    Speed {
        speed: Speed,
        /// Headlight bit of the 14 step format
        f0: Option<bool>,
    },
    SpeedFunctions {
        speed: Speed,
        functions: Vec<FunctionState>,
    },
    SpecialOperation {
        consist: ConsistPosition,
        shunting: bool,
        west: bool,
        east: bool,
        man: bool,
    },
    AnalogFunction {
        channel: AnalogChannel,
        data: u8,
    },
    Functions(Vec<FunctionState>),
    BinaryState {
        state: u16,
        on: bool,
        short_form: bool,
    },
    ModelTime {
        weekday: Option<Weekday>,
        hour: u8,
        minute: u8,
        update: bool,
        acceleration: u8,
    },
    ModelDate {
        day: u8,
        month: u8,
        year: u16,
        date: Option<NaiveDate>,
    },
    SystemTime {
        millis: u32,
    },
    CvAccess(CvForm),
    RegisterAccess {
        register: u8,
        write: bool,
        value: u8,
    },
    PagePreset,
    AccessoryOutput {
        output: u8,
        activate: bool,
    },
    AccessoryAspect {
        aspect: u8,
    },
    AccessoryReset,
    EmergencyStop,
    RailComNop,
    DccA(DccACommand),
    AdvancedExtended,
    SystemCommand,
    Reserved,
    Unknown,
}

/// Fully interpreted packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPacket {
    pub class: PacketClass,
    pub address: Option<Address>,
    pub instruction: Instruction,
    pub cv: Vec<CvAccess>,
    /// Command names, most general first
    pub mnemonics: Vec<&'static str>,
    pub notes: Vec<String>,
    /// All bytes including the checksum
    pub bytes: Vec<PacketByte>,
    pub checksum_valid: bool,
    /// CRC-8 result for packets that carry one
    pub crc_valid: Option<bool>,
    pub start: u64,
    pub end: u64,
    /// Byte indices holding the address
    pub address_bytes: Range<usize>,
    /// Byte indices holding the CV number
    pub cv_bytes: Option<Range<usize>>,
}

impl DecodedPacket {
    pub fn values(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.value).collect()
    }

    /// Multi-function decoder address, broadcasts are 0
    pub fn decoder_address(&self) -> Option<u16> {
        match self.address? {
            Address::Broadcast => Some(0),
            Address::Short(a) => Some(a as u16),
            Address::Long(a) => Some(a),
            _ => None,
        }
    }

    pub fn accessory_address(&self) -> Option<i32> {
        match self.address? {
            Address::Accessory(a) => Some(a.address),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        self.mnemonics.first().copied().unwrap_or("Unknown")
    }

    /// Case-insensitive substring match against every mnemonic
    pub fn matches_command(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.mnemonics
            .iter()
            .any(|m| m.to_lowercase().contains(&needle))
    }

    /// One line description for logs and text output
    pub fn summary(&self) -> String {
        let mut line = self.mnemonics.join(" / ");
        if line.is_empty() {
            line.push_str("Unknown");
        }
        if let Some(address) = &self.address {
            line.push_str(&format!(" [{}]", address));
        }
        match &self.instruction {
            Instruction::Speed { speed, .. } | Instruction::SpeedFunctions { speed, .. } => {
                line.push_str(&format!(" speed {}", speed));
            }
            Instruction::Functions(fs) => {
                let states: Vec<String> = fs
                    .iter()
                    .map(|f| format!("F{}:{}", f.number, u8::from(f.on)))
                    .collect();
                line.push_str(&format!(" {}", states.join(",")));
            }
            _ => {}
        }
        for cv in &self.cv {
            match cv.value {
                Some(v) => line.push_str(&format!(" CV{}={} ({:?})", cv.cv, v, cv.operation)),
                None => line.push_str(&format!(" CV{} ({:?})", cv.cv, cv.operation)),
            }
        }
        line.push_str(&format!(" <{}>", hex::encode(self.values())));
        if !self.checksum_valid {
            line.push_str(" CHECKSUM ERROR");
        }
        if self.crc_valid == Some(false) {
            line.push_str(" CRC ERROR");
        }
        for note in &self.notes {
            line.push_str(&format!(" ({})", note));
        }
        line
    }
}
