//! DCC packet interpreter
//!
//! Decodes the address and instruction fields of an assembled packet:
//! - Multi-function decoders (RCN-211/212), short and long address
//! - CV access short form, POM and XPOM (RCN-214/217)
//! - Basic and extended accessory decoders (RCN-213)
//! - Service mode register, page and direct mode (RCN-214/216)
//! - DCC-A logon (RCN-218)
//!
//! Each packet is interpreted on its own. Malformed fields never abort;
//! they leave the instruction as `Unknown` and add a note.

use chrono::{NaiveDate, Weekday};
use serde::Serialize;
use tracing::trace;

use super::checksum::crc8;
use super::framing::Packet;
use super::types::*;

/// Address byte of accessory broadcasts, encoded address plus three
const ACCESSORY_BROADCAST: i32 = 2047;

/// Which track the packets were recorded on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EvaluationMode {
    #[default]
    Operations,
    /// Programming track: 0x70-0x7F start service mode packets
    Service,
}

/// Per-pass interpretation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterpretContext {
    /// Added to every decoded accessory address
    pub accessory_offset: i32,
    pub mode: EvaluationMode,
    /// CV29 bit 1 cleared: read basic speed as 14 steps
    pub speed_steps_14: bool,
}

/// Interpret an assembled packet.
pub fn interpret(packet: &Packet, ctx: &InterpretContext) -> DecodedPacket {
    let values = packet.values();
    let mut out = DecodedPacket {
        class: PacketClass::Unknown,
        address: None,
        instruction: Instruction::Unknown,
        cv: Vec::new(),
        mnemonics: Vec::new(),
        notes: Vec::new(),
        bytes: packet.bytes.clone(),
        checksum_valid: packet.checksum_valid(),
        crc_valid: None,
        start: packet.start,
        end: packet.end,
        address_bytes: 0..0,
        cv_bytes: None,
    };

    if values.len() < 3 {
        out.notes
            .push(format!("packet too short: {} bytes", values.len()));
        return out;
    }

    let body = &values[..values.len() - 1];
    let mut interpreter = Interpreter {
        body,
        ctx,
        out,
        consumed: 1,
    };
    let complete = interpreter.dispatch().is_some();
    let decoded = interpreter.finish(complete);
    trace!("Decoded {}", decoded.summary());
    decoded
}

struct Interpreter<'a> {
    /// Packet bytes without the checksum
    body: &'a [u8],
    ctx: &'a InterpretContext,
    out: DecodedPacket,
    /// Number of body bytes accounted for
    consumed: usize,
}

impl Interpreter<'_> {
    /// Read body byte `i`, marking it as interpreted. `None` means the
    /// packet ended early and unwinds the handlers through `?`.
    fn at(&mut self, i: usize) -> Option<u8> {
        let b = *self.body.get(i)?;
        self.consumed = self.consumed.max(i + 1);
        Some(b)
    }

    fn consume_all(&mut self) {
        self.consumed = self.body.len();
    }

    fn mnemonic(&mut self, name: &'static str) {
        self.out.mnemonics.push(name);
    }

    fn note(&mut self, note: impl Into<String>) {
        self.out.notes.push(note.into());
    }

    fn finish(mut self, complete: bool) -> DecodedPacket {
        if !complete {
            self.note("packet ends before the instruction is complete");
        }
        for &b in &self.body[self.consumed.min(self.body.len())..] {
            self.out.notes.push(format!("unexpected byte 0x{:02x}", b));
        }
        self.out
    }

    fn dispatch(&mut self) -> Option<()> {
        let b0 = self.body[0];

        if self.ctx.mode == EvaluationMode::Service && (112..=127).contains(&b0) {
            return self.service(b0);
        }

        match b0 {
            0..=127 | 192..=231 => self.multi_function(b0),
            128..=191 => self.accessory(b0),
            232..=252 => {
                self.out.class = PacketClass::Reserved;
                self.out.instruction = Instruction::Reserved;
                self.mnemonic("Reserved");
                Some(())
            }
            253 => self.advanced_extended(),
            254 => self.dcc_a(),
            255 => self.idle_or_system(),
        }
    }

    fn service(&mut self, b0: u8) -> Option<()> {
        match self.body.len() {
            2 => {
                let value = self.at(1)?;
                self.out.address_bytes = 0..1;
                if b0 == 0x7d && value == 1 {
                    self.out.class = PacketClass::ServicePage;
                    self.out.instruction = Instruction::PagePreset;
                    self.mnemonic("Register/page mode");
                    self.mnemonic("Page preset");
                } else {
                    self.out.class = PacketClass::ServiceRegister;
                    self.out.instruction = Instruction::RegisterAccess {
                        register: (b0 & 0x07) + 1,
                        write: b0 & 0x08 != 0,
                        value,
                    };
                    self.mnemonic("Register/page mode");
                }
            }
            3 => {
                self.out.class = PacketClass::ServiceDirect;
                self.mnemonic("Service mode");
                self.mnemonic("Direct mode");
                self.cv_long(0, CvForm::ServiceDirect)?;
            }
            n => {
                self.out.class = PacketClass::Unknown;
                self.consume_all();
                self.note(format!("no service mode packet has {} bytes", n + 1));
            }
        }
        Some(())
    }

    fn multi_function(&mut self, b0: u8) -> Option<()> {
        let pos = match b0 {
            0 => {
                self.out.class = PacketClass::Broadcast;
                self.out.address = Some(Address::Broadcast);
                self.mnemonic("Broadcast");
                1
            }
            1..=127 => {
                self.out.class = PacketClass::MultiFunctionShort;
                self.out.address = Some(Address::Short(b0));
                self.mnemonic("Multi-function decoder, 7-bit address");
                1
            }
            _ => {
                let b1 = self.at(1)?;
                self.out.class = PacketClass::MultiFunctionLong;
                self.out.address = Some(Address::Long(((b0 as u16 & 0x3f) << 8) | b1 as u16));
                self.mnemonic("Multi-function decoder, 14-bit address");
                2
            }
        };
        self.out.address_bytes = 0..pos;

        let instr = self.at(pos)?;
        let broadcast = b0 == 0;
        let sub = instr & 0x1f;
        match instr >> 5 {
            0b000 => self.decoder_control(pos, sub, broadcast),
            0b001 => self.advanced_operations(pos, sub, broadcast),
            0b010 | 0b011 => {
                self.basic_speed(instr, broadcast);
                Some(())
            }
            0b100 => {
                self.function_group_one(sub);
                Some(())
            }
            0b101 => {
                let base = if sub & 0x10 != 0 { 5 } else { 9 };
                self.mnemonic("Function group two");
                self.out.instruction = Instruction::Functions(functions(sub, base, 4));
                Some(())
            }
            0b110 => self.future_expansion(pos, sub, broadcast),
            _ => self.cv_access(pos, instr),
        }
    }

    fn decoder_control(&mut self, pos: usize, sub: u8, broadcast: bool) -> Option<()> {
        self.out.instruction = match sub {
            0b00000 => {
                if broadcast {
                    self.out.class = PacketClass::Reset;
                }
                self.mnemonic("Decoder reset");
                Instruction::DecoderReset { hard: false }
            }
            0b00001 => {
                self.mnemonic("Decoder hard reset");
                Instruction::DecoderReset { hard: true }
            }
            s if s & 0b11110 == 0b00010 => {
                self.mnemonic("Factory test");
                Instruction::FactoryTest
            }
            s if s & 0b11110 == 0b01010 => {
                self.mnemonic("Set advanced addressing");
                Instruction::SetAdvancedAddressing {
                    enabled: s & 1 != 0,
                }
            }
            0b01111 => {
                self.mnemonic("Decoder acknowledgement request");
                Instruction::AckRequest
            }
            s if s & 0b10000 != 0 => {
                self.mnemonic("Consist control");
                let value = self.at(pos + 1)?;
                if s & 0b11110 == 0b10010 {
                    Instruction::ConsistControl {
                        address: Some(value & 0x7f),
                        reverse: s & 1 != 0,
                    }
                } else {
                    self.note("reserved consist instruction");
                    Instruction::ConsistControl {
                        address: None,
                        reverse: false,
                    }
                }
            }
            _ => {
                self.mnemonic("Reserved");
                Instruction::Reserved
            }
        };
        Some(())
    }

    fn advanced_operations(&mut self, pos: usize, sub: u8, broadcast: bool) -> Option<()> {
        self.out.instruction = match sub {
            0b11111 => {
                self.mnemonic("128 speed step control");
                let v = self.at(pos + 1)?;
                Instruction::Speed {
                    speed: speed_128(v, broadcast),
                    f0: None,
                }
            }
            0b11110 => {
                self.mnemonic("Special operation mode");
                let v = self.at(pos + 1)?;
                let consist = match (v >> 2) & 0b11 {
                    0b00 => ConsistPosition::Single,
                    0b10 => ConsistPosition::Leading,
                    0b01 => ConsistPosition::Middle,
                    _ => ConsistPosition::Final,
                };
                Instruction::SpecialOperation {
                    consist,
                    shunting: v & 0x10 != 0,
                    west: v & 0x20 != 0,
                    east: v & 0x40 != 0,
                    man: v & 0x80 != 0,
                }
            }
            0b11101 => {
                self.mnemonic("Analog function group");
                let channel = match self.at(pos + 1)? {
                    0x01 => AnalogChannel::Volume,
                    c @ 0x10..=0x1f => AnalogChannel::Position(c & 0x0f),
                    c @ 0x80..=0xff => AnalogChannel::Any(c & 0x7f),
                    c => AnalogChannel::Reserved(c),
                };
                let data = self.at(pos + 2)?;
                Instruction::AnalogFunction { channel, data }
            }
            0b11100 => {
                self.mnemonic("Speed, direction and functions");
                let v = self.at(pos + 1)?;
                let mut states = Vec::new();
                for (k, base) in [0u8, 8, 16, 24].into_iter().enumerate() {
                    if pos + 2 + k >= self.body.len() {
                        break;
                    }
                    let b = self.at(pos + 2 + k)?;
                    states.extend(functions(b, base, 8));
                }
                Instruction::SpeedFunctions {
                    speed: speed_128(v, broadcast),
                    functions: states,
                }
            }
            _ => {
                self.mnemonic("Reserved");
                Instruction::Reserved
            }
        };
        Some(())
    }

    fn basic_speed(&mut self, instr: u8, broadcast: bool) {
        let direction = (!broadcast).then(|| {
            if instr & 0x20 != 0 {
                Direction::Forward
            } else {
                Direction::Reverse
            }
        });
        let code = instr & 0x0f;
        let c = (instr >> 4) & 1;

        let (steps, step, f0) = if self.ctx.speed_steps_14 {
            self.mnemonic("Speed and direction, 14 speed steps");
            let step = match code {
                0 => SpeedStep::Stop,
                1 => SpeedStep::EmergencyStop,
                n => SpeedStep::Step(n - 1),
            };
            (SpeedSteps::Steps14, step, (!broadcast).then_some(c != 0))
        } else {
            self.mnemonic("Speed and direction, 28 speed steps");
            let step = match code {
                0 => SpeedStep::Stop,
                1 => SpeedStep::EmergencyStop,
                n => SpeedStep::Step((n - 1) * 2 - 1 + c),
            };
            (SpeedSteps::Steps28, step, None)
        };

        self.out.instruction = Instruction::Speed {
            speed: Speed {
                direction,
                step,
                steps,
                inferred: true,
            },
            f0,
        };
    }

    fn function_group_one(&mut self, sub: u8) {
        let mut states = Vec::with_capacity(5);
        if self.ctx.speed_steps_14 {
            self.mnemonic("Function group one, 14 speed steps");
        } else {
            self.mnemonic("Function group one");
            states.push(FunctionState {
                number: 0,
                on: sub & 0x10 != 0,
            });
        }
        states.extend(functions(sub, 1, 4));
        self.out.instruction = Instruction::Functions(states);
    }

    fn future_expansion(&mut self, pos: usize, sub: u8, broadcast: bool) -> Option<()> {
        self.mnemonic("Feature expansion");
        let v = self.at(pos + 1)?;

        let group_base = match sub {
            0b11110 => Some(13),
            0b11111 => Some(21),
            0b11000 => Some(29),
            0b11001 => Some(37),
            0b11010 => Some(45),
            0b11011 => Some(53),
            0b11100 => Some(61),
            _ => None,
        };
        if let Some(base) = group_base {
            self.mnemonic("Function group expansion");
            self.out.instruction = Instruction::Functions(functions(v, base, 8));
            return Some(());
        }

        self.out.instruction = match sub {
            0b11101 => {
                self.mnemonic("Binary state control short form");
                let state = (v & 0x7f) as u16;
                if state == 0 {
                    self.note("applies to all binary states F29-F127");
                }
                Instruction::BinaryState {
                    state,
                    on: v & 0x80 != 0,
                    short_form: true,
                }
            }
            0b00000 => {
                self.mnemonic("Binary state control long form");
                let high = self.at(pos + 2)?;
                let state = high as u16 * 128 + (v & 0x7f) as u16;
                if v & 0x7f == 0 && high != 0 {
                    self.note("state fits the short form");
                }
                Instruction::BinaryState {
                    state,
                    on: v & 0x80 != 0,
                    short_form: false,
                }
            }
            0b00001 => {
                if !broadcast {
                    self.note("time and date are broadcast only");
                }
                match v >> 6 {
                    0b00 => {
                        self.mnemonic("Model time");
                        let b2 = self.at(pos + 2)?;
                        let b3 = self.at(pos + 3)?;
                        Instruction::ModelTime {
                            weekday: weekday(b2 >> 5),
                            hour: b2 & 0x1f,
                            minute: v & 0x3f,
                            update: b3 & 0x80 != 0,
                            acceleration: b3 & 0x3f,
                        }
                    }
                    0b01 => {
                        self.mnemonic("Model date");
                        let b2 = self.at(pos + 2)?;
                        let b3 = self.at(pos + 3)?;
                        let day = v & 0x1f;
                        let month = b2 >> 4;
                        let year = ((b2 as u16 & 0x0f) << 8) | b3 as u16;
                        Instruction::ModelDate {
                            day,
                            month,
                            year,
                            date: NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32),
                        }
                    }
                    _ => {
                        self.mnemonic("Reserved");
                        Instruction::Reserved
                    }
                }
            }
            0b00010 => {
                if !broadcast {
                    self.note("system time is broadcast only");
                }
                let remaining = self.body.len() - (pos + 1);
                let width = if remaining >= 4 {
                    self.mnemonic("System time (deprecated)");
                    4
                } else {
                    self.mnemonic("System time");
                    2
                };
                let mut millis = 0u32;
                for i in 0..width {
                    millis = (millis << 8) | self.at(pos + 1 + i)? as u32;
                }
                Instruction::SystemTime { millis }
            }
            _ => {
                self.mnemonic("Reserved");
                Instruction::Reserved
            }
        };
        Some(())
    }

    fn cv_access(&mut self, pos: usize, instr: u8) -> Option<()> {
        if instr & 0x10 != 0 {
            return self.cv_short_form(pos, instr & 0x0f);
        }

        match self.body.len() - (pos + 1) {
            2 => {
                self.mnemonic("CV access long form");
                self.mnemonic("POM");
                self.cv_long(pos, CvForm::Long)
            }
            n if n >= 3 => self.xpom(pos, instr),
            _ => {
                self.mnemonic("CV access long form");
                self.at(pos + 2).map(|_| ())
            }
        }
    }

    fn cv_short_form(&mut self, pos: usize, kind: u8) -> Option<()> {
        self.mnemonic("CV access short form");
        let single = |cv: u32, value: u8| CvAccess {
            cv,
            operation: CvOperation::Write,
            value: Some(value),
        };
        match kind {
            0b0010 | 0b0011 => {
                let cv = if kind == 0b0010 { 23 } else { 24 };
                let value = self.at(pos + 1)?;
                self.out.cv.push(single(cv, value));
            }
            0b0100 | 0b0101 => {
                let cv = if kind == 0b0100 { 17 } else { 31 };
                let first = self.at(pos + 1)?;
                let second = self.at(pos + 2)?;
                self.out.cv.push(single(cv, first));
                self.out.cv.push(single(cv + 1, second));
            }
            0b1001 => {
                let address = self.at(pos + 1)? & 0x7f;
                self.note(format!("deprecated decoder lock for address {}", address));
                self.out.instruction = Instruction::Reserved;
                return Some(());
            }
            _ => {
                self.out.instruction = Instruction::Reserved;
                return Some(());
            }
        }
        self.out.cv_bytes = Some(pos..pos + 1);
        self.out.instruction = Instruction::CvAccess(CvForm::ShortForm);
        Some(())
    }

    /// 10-bit CV access: `pos` holds the operation and CV high bits,
    /// followed by the CV low byte and the data byte
    fn cv_long(&mut self, pos: usize, form: CvForm) -> Option<()> {
        let instr = self.at(pos)?;
        let low = self.at(pos + 1)?;
        let data = self.at(pos + 2)?;
        let cv = ((instr as u32 & 0x03) << 8) + low as u32 + 1;
        self.out.cv_bytes = Some(pos..pos + 2);

        let access = match (instr >> 2) & 0b11 {
            0b01 => Some(CvAccess {
                cv,
                operation: CvOperation::Verify,
                value: Some(data),
            }),
            0b11 => Some(CvAccess {
                cv,
                operation: CvOperation::Write,
                value: Some(data),
            }),
            0b10 => Some(CvAccess {
                cv,
                operation: bit_operation(data, data & 0x10 != 0),
                value: None,
            }),
            _ => None,
        };
        match access {
            Some(access) => {
                self.out.cv.push(access);
                self.out.instruction = Instruction::CvAccess(form);
            }
            None => {
                self.note("reserved CV operation");
                self.out.instruction = Instruction::Reserved;
            }
        }
        Some(())
    }

    fn xpom(&mut self, pos: usize, instr: u8) -> Option<()> {
        self.mnemonic("XPOM");
        let mut cv = 0u32;
        for i in 1..=3 {
            cv = (cv << 8) | self.at(pos + i)? as u32;
        }
        let cv = cv + 1;
        self.out.cv_bytes = Some(pos..pos + 4);

        match (instr >> 2) & 0b11 {
            0b01 => self.out.cv.push(CvAccess {
                cv,
                operation: CvOperation::Read,
                value: None,
            }),
            0b11 => {
                let mut offset = 0;
                while offset < 4 && pos + 4 + offset < self.body.len() {
                    let value = self.at(pos + 4 + offset)?;
                    self.out.cv.push(CvAccess {
                        cv: cv + offset as u32,
                        operation: CvOperation::Write,
                        value: Some(value),
                    });
                    offset += 1;
                }
                if offset == 0 {
                    self.at(pos + 4)?;
                }
            }
            0b10 => {
                let data = self.at(pos + 4)?;
                if data >> 4 != 0b1111 {
                    self.note("bit write data must start with 1111");
                }
                self.out.cv.push(CvAccess {
                    cv,
                    operation: bit_operation(data, true),
                    value: None,
                });
            }
            _ => {
                self.note("reserved CV operation");
                self.out.instruction = Instruction::Reserved;
                return Some(());
            }
        }
        self.out.instruction = Instruction::CvAccess(CvForm::Xpom {
            sequence: instr & 0x03,
        });
        Some(())
    }

    fn accessory(&mut self, b0: u8) -> Option<()> {
        let b1 = self.at(1)?;
        let a1 = (b0 & 0x3f) as u16;
        let a2 = (!(b1 >> 4) & 0x07) as u16;
        let a3 = ((b1 & 0x06) >> 1) as u16;
        let decoder = (a2 << 6) + a1;
        let raw = ((a2 << 8) + (a1 << 2) + a3) as i32 - 3;
        let broadcast = raw + 3 == ACCESSORY_BROADCAST;
        self.out.address_bytes = 0..2;

        let kind = if b1 & 0x88 == 0x08 {
            if b1 & 1 == 0 {
                AccessoryKind::Basic
            } else {
                AccessoryKind::Extended
            }
        } else if b1 & 0x80 != 0 {
            AccessoryKind::Basic
        } else {
            AccessoryKind::Extended
        };
        self.out.class = match kind {
            AccessoryKind::Basic => PacketClass::Accessory,
            AccessoryKind::Extended => PacketClass::ExtendedAccessory,
        };
        self.out.address = Some(Address::Accessory(AccessoryAddress {
            kind,
            address: raw + self.ctx.accessory_offset,
            raw,
            decoder,
            port: a3 as u8,
        }));
        if raw < 1 && !broadcast {
            self.note("accessory address below 1");
        }

        // RailCom accessory query
        if b1 & 0x88 == 0x08 {
            self.mnemonic(match kind {
                AccessoryKind::Basic => "Basic accessory decoder",
                AccessoryKind::Extended => "Extended accessory decoder",
            });
            self.mnemonic("RailCom NOP");
            self.out.instruction = Instruction::RailComNop;
            return Some(());
        }

        let len = self.body.len();
        match (kind, len) {
            (AccessoryKind::Basic, 2 | 3) => {
                self.mnemonic("Basic accessory decoder");
                if broadcast {
                    if b1 & 0x09 == 0 && len == 2 {
                        self.broadcast_stop(kind);
                    } else {
                        self.note("unknown accessory broadcast");
                    }
                } else if len == 2 {
                    self.out.instruction = Instruction::AccessoryOutput {
                        output: b1 & 1,
                        activate: b1 & 0x08 != 0,
                    };
                } else if b1 & 0x09 == 0 && self.at(2)? == 0 {
                    self.mnemonic("Decoder reset");
                    self.out.instruction = Instruction::AccessoryReset;
                }
            }
            (AccessoryKind::Extended, 3) => {
                self.mnemonic("Extended accessory decoder");
                let b2 = self.at(2)?;
                if broadcast {
                    if b2 == 0 {
                        self.broadcast_stop(kind);
                    } else {
                        self.note("unknown accessory broadcast");
                    }
                } else {
                    self.out.instruction = Instruction::AccessoryAspect { aspect: b2 };
                }
            }
            (_, 5) => {
                let b2 = self.at(2)?;
                if b2 >> 4 == 0b1110 {
                    self.mnemonic(match kind {
                        AccessoryKind::Basic => "Basic accessory decoder POM",
                        AccessoryKind::Extended => "Extended accessory decoder POM",
                    });
                    self.mnemonic("POM");
                    self.cv_long(2, CvForm::AccessoryPom)?;
                } else {
                    self.consume_all();
                    self.note("unknown accessory instruction");
                }
            }
            _ => {
                self.consume_all();
                self.note(format!("no accessory packet has {} bytes", len + 1));
            }
        }
        Some(())
    }

    fn broadcast_stop(&mut self, kind: AccessoryKind) {
        self.out.address = Some(Address::AccessoryBroadcast(kind));
        self.mnemonic("Broadcast");
        self.mnemonic("Emergency stop");
        self.out.instruction = Instruction::EmergencyStop;
    }

    fn advanced_extended(&mut self) -> Option<()> {
        self.out.class = PacketClass::AdvancedExtended;
        self.out.instruction = Instruction::AdvancedExtended;
        self.mnemonic("Advanced extended packet");
        let n = self.body.len();
        if n > 5 {
            self.out.crc_valid = Some(crc8(&self.body[..n - 1]) == self.body[n - 1]);
        }
        self.consume_all();
        Some(())
    }

    fn dcc_a(&mut self) -> Option<()> {
        self.out.class = PacketClass::DccA;
        self.mnemonic("DCC-A");
        let cmd = self.at(1)?;

        let command = match cmd {
            0x00 => {
                self.mnemonic("GET_DATA_START");
                DccACommand::GetDataStart
            }
            0x01 => {
                self.mnemonic("GET_DATA_CONT");
                DccACommand::GetDataCont
            }
            0x02 => {
                self.mnemonic("SET_DATA_START");
                DccACommand::SetDataStart
            }
            0x03 => {
                self.mnemonic("SET_DATA_CONT");
                DccACommand::SetDataCont
            }
            0xd0..=0xdf => {
                self.mnemonic("SELECT");
                let (manufacturer, decoder_id) = self.unique_id(cmd)?;
                let subcommand = self.at(7)?;
                self.check_crc();
                DccACommand::Select {
                    manufacturer,
                    decoder_id,
                    subcommand,
                }
            }
            0xe0..=0xef => {
                self.mnemonic("LOGON_ASSIGN");
                let (manufacturer, decoder_id) = self.unique_id(cmd)?;
                let high = self.at(7)?;
                let low = self.at(8)?;
                let address = (high >> 6 == 0b11).then(|| ((high as u16 & 0x3f) << 8) | low as u16);
                self.check_crc();
                DccACommand::LogonAssign {
                    manufacturer,
                    decoder_id,
                    address,
                }
            }
            0xfc..=0xff => {
                self.mnemonic("LOGON_ENABLE");
                let group = match cmd & 0b11 {
                    0b00 => LogonGroup::All,
                    0b01 => LogonGroup::Loco,
                    0b10 => LogonGroup::Accessory,
                    _ => LogonGroup::Now,
                };
                let cid = ((self.at(2)? as u16) << 8) | self.at(3)? as u16;
                let session = self.at(4)?;
                DccACommand::LogonEnable {
                    group,
                    cid,
                    session,
                }
            }
            other => {
                self.mnemonic("Reserved");
                self.consume_all();
                DccACommand::Reserved(other)
            }
        };
        self.out.instruction = Instruction::DccA(command);
        Some(())
    }

    /// 12-bit manufacturer and 32-bit decoder id following a DCC-A command
    fn unique_id(&mut self, cmd: u8) -> Option<(u16, u32)> {
        let manufacturer = ((cmd as u16 & 0x0f) << 8) | self.at(2)? as u16;
        let mut id = 0u32;
        for i in 3..7 {
            id = (id << 8) | self.at(i)? as u32;
        }
        Some((manufacturer, id))
    }

    /// Last body byte is a CRC-8 over everything before it
    fn check_crc(&mut self) {
        let n = self.body.len();
        let valid = crc8(&self.body[..n - 1]) == self.body[n - 1];
        if !valid {
            self.note("CRC mismatch");
        }
        self.out.crc_valid = Some(valid);
        self.consume_all();
    }

    fn idle_or_system(&mut self) -> Option<()> {
        if self.at(1)? == 0 {
            self.out.class = PacketClass::Idle;
            self.out.instruction = Instruction::Idle;
            self.mnemonic("Idle");
        } else {
            self.out.class = PacketClass::RailComPlus;
            self.out.instruction = Instruction::SystemCommand;
            self.mnemonic("RailComPlus");
            self.mnemonic("System command");
            self.consume_all();
        }
        Some(())
    }
}

/// `count` function states from the low bits of `bits`, numbered from `base`
fn functions(bits: u8, base: u8, count: u8) -> Vec<FunctionState> {
    (0..count)
        .map(|i| FunctionState {
            number: base + i,
            on: bits & (1 << i) != 0,
        })
        .collect()
}

fn speed_128(v: u8, broadcast: bool) -> Speed {
    let direction = (!broadcast).then(|| {
        if v & 0x80 != 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    });
    let step = match v & 0x7f {
        0 => SpeedStep::Stop,
        1 => SpeedStep::EmergencyStop,
        n => SpeedStep::Step(n - 1),
    };
    Speed {
        direction,
        step,
        steps: SpeedSteps::Steps128,
        inferred: false,
    }
}

/// Bit access data byte: `...KDBBB` with K write flag, D value, BBB position
fn bit_operation(data: u8, write: bool) -> CvOperation {
    CvOperation::Bit {
        write,
        position: data & 0x07,
        value: data & 0x08 != 0,
    }
}

fn weekday(w: u8) -> Option<Weekday> {
    match w {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::checksum::xor_checksum;

    /// Append the XOR checksum to a hex body and interpret it
    fn decode_with(body_hex: &str, ctx: &InterpretContext) -> DecodedPacket {
        let mut bytes = hex::decode(body_hex).unwrap();
        bytes.push(xor_checksum(&bytes));
        interpret(&Packet::from_bytes(&bytes), ctx)
    }

    fn decode(body_hex: &str) -> DecodedPacket {
        decode_with(body_hex, &InterpretContext::default())
    }

    #[test]
    fn test_idle_packet() {
        let p = decode("ff00");
        assert_eq!(p.class, PacketClass::Idle);
        assert_eq!(p.instruction, Instruction::Idle);
        assert!(p.checksum_valid);
        assert!(p.notes.is_empty());
    }

    #[test]
    fn test_broadcast_reset() {
        let p = decode("0000");
        assert_eq!(p.class, PacketClass::Reset);
        assert_eq!(p.address, Some(Address::Broadcast));
        assert_eq!(p.instruction, Instruction::DecoderReset { hard: false });
        assert_eq!(p.decoder_address(), Some(0));
    }

    #[test]
    fn test_short_address_28_steps() {
        // 011 1 0110: forward, code 6, C=1 -> step 10
        let p = decode("0376");
        assert_eq!(p.class, PacketClass::MultiFunctionShort);
        assert_eq!(p.address, Some(Address::Short(3)));
        assert_eq!(p.address_bytes, 0..1);
        let Instruction::Speed { speed, f0 } = p.instruction else {
            panic!("expected speed, got {:?}", p.instruction);
        };
        assert_eq!(speed.direction, Some(Direction::Forward));
        assert_eq!(speed.step, SpeedStep::Step(10));
        assert_eq!(speed.steps, SpeedSteps::Steps28);
        assert!(speed.inferred);
        assert_eq!(f0, None);
    }

    #[test]
    fn test_basic_speed_uses_cv29_hint() {
        let ctx = InterpretContext {
            speed_steps_14: true,
            ..InterpretContext::default()
        };
        // 010 1 0110: reverse, step 5, headlight on
        let p = decode_with("0356", &ctx);
        let Instruction::Speed { speed, f0 } = p.instruction else {
            panic!("expected speed");
        };
        assert_eq!(speed.direction, Some(Direction::Reverse));
        assert_eq!(speed.step, SpeedStep::Step(5));
        assert_eq!(speed.steps, SpeedSteps::Steps14);
        assert!(speed.inferred);
        assert_eq!(f0, Some(true));
    }

    #[test]
    fn test_long_address_128_steps() {
        // Address 1234 = 0x04d2
        let p = decode("c4d23f85");
        assert_eq!(p.class, PacketClass::MultiFunctionLong);
        assert_eq!(p.address, Some(Address::Long(1234)));
        assert_eq!(p.address_bytes, 0..2);
        let Instruction::Speed { speed, .. } = p.instruction else {
            panic!("expected speed");
        };
        assert_eq!(speed.step, SpeedStep::Step(4));
        assert_eq!(speed.steps, SpeedSteps::Steps128);
        assert!(!speed.inferred);
    }

    #[test]
    fn test_function_groups() {
        let p = decode("0393");
        assert_eq!(
            p.instruction,
            Instruction::Functions(vec![
                FunctionState { number: 0, on: true },
                FunctionState { number: 1, on: true },
                FunctionState { number: 2, on: true },
                FunctionState { number: 3, on: false },
                FunctionState { number: 4, on: false },
            ])
        );

        let p = decode("03a1");
        let Instruction::Functions(fs) = p.instruction else {
            panic!("expected functions");
        };
        assert_eq!(fs[0], FunctionState { number: 9, on: true });

        // F21-F28
        let p = decode("03df81");
        let Instruction::Functions(fs) = p.instruction else {
            panic!("expected functions");
        };
        assert_eq!(fs.len(), 8);
        assert_eq!(fs[0], FunctionState { number: 21, on: true });
        assert_eq!(fs[7], FunctionState { number: 28, on: true });
    }

    #[test]
    fn test_pom_write() {
        // Write CV 29 = 0x06 on short address 3
        let p = decode("03ec1c06");
        assert!(p.matches_command("pom"));
        assert_eq!(p.instruction, Instruction::CvAccess(CvForm::Long));
        assert_eq!(
            p.cv,
            vec![CvAccess {
                cv: 29,
                operation: CvOperation::Write,
                value: Some(6)
            }]
        );
        assert_eq!(p.cv_bytes, Some(1..3));
    }

    #[test]
    fn test_xpom_read() {
        let p = decode("03e5000102");
        assert!(p.matches_command("xpom"));
        assert_eq!(p.instruction, Instruction::CvAccess(CvForm::Xpom { sequence: 1 }));
        assert_eq!(p.cv[0].cv, 0x000102 + 1);
        assert_eq!(p.cv[0].operation, CvOperation::Read);
    }

    #[test]
    fn test_cv_short_form() {
        let p = decode("03f40a0b");
        assert_eq!(p.cv.len(), 2);
        assert_eq!(p.cv[0].cv, 17);
        assert_eq!(p.cv[1].value, Some(0x0b));
    }

    #[test]
    fn test_basic_accessory_offset() {
        for offset in [-4, 0, 4, 100] {
            let ctx = InterpretContext {
                accessory_offset: offset,
                ..InterpretContext::default()
            };
            let p = decode_with("83fa", &ctx);
            assert_eq!(p.class, PacketClass::Accessory);
            assert_eq!(p.accessory_address(), Some(10 + offset));
            let Some(Address::Accessory(a)) = p.address else {
                panic!("expected accessory address");
            };
            assert_eq!(a.raw, 10);
            assert_eq!(a.decoder, 3);
            assert_eq!(a.port, 1);
            assert_eq!(
                p.instruction,
                Instruction::AccessoryOutput {
                    output: 0,
                    activate: true
                }
            );
        }
    }

    #[test]
    fn test_accessory_broadcast_stop() {
        let p = decode("bf86");
        assert_eq!(p.address, Some(Address::AccessoryBroadcast(AccessoryKind::Basic)));
        assert_eq!(p.instruction, Instruction::EmergencyStop);

        let p = decode("bf0700");
        assert_eq!(p.class, PacketClass::ExtendedAccessory);
        assert_eq!(p.instruction, Instruction::EmergencyStop);
    }

    #[test]
    fn test_extended_accessory_aspect() {
        let p = decode("837111");
        assert_eq!(p.class, PacketClass::ExtendedAccessory);
        assert_eq!(p.instruction, Instruction::AccessoryAspect { aspect: 0x11 });
    }

    #[test]
    fn test_accessory_pom() {
        let p = decode("83f8ec0105");
        assert_eq!(p.instruction, Instruction::CvAccess(CvForm::AccessoryPom));
        assert_eq!(p.cv[0].cv, 2);
        assert_eq!(p.cv[0].value, Some(5));
        assert_eq!(p.cv_bytes, Some(2..4));
    }

    #[test]
    fn test_service_mode_depends_on_context() {
        let service = InterpretContext {
            mode: EvaluationMode::Service,
            ..InterpretContext::default()
        };

        // Direct mode verify CV 8 == 0x0d
        let p = decode_with("74070d", &service);
        assert_eq!(p.class, PacketClass::ServiceDirect);
        assert_eq!(p.cv[0].cv, 8);
        assert_eq!(p.cv[0].operation, CvOperation::Verify);

        let p = decode_with("7d01", &service);
        assert_eq!(p.class, PacketClass::ServicePage);

        let p = decode_with("7a05", &service);
        assert_eq!(
            p.instruction,
            Instruction::RegisterAccess {
                register: 3,
                write: true,
                value: 5
            }
        );

        // Same bytes on the main track
        let p = decode("7a05");
        assert_eq!(p.class, PacketClass::MultiFunctionShort);
    }

    #[test]
    fn test_model_time_and_date() {
        // Tuesday 13:45, no update, acceleration 4
        let p = decode("00c12d2d04");
        assert_eq!(
            p.instruction,
            Instruction::ModelTime {
                weekday: Some(Weekday::Tue),
                hour: 13,
                minute: 45,
                update: false,
                acceleration: 4
            }
        );

        // 24 December 2024 = year 0x7e8
        let p = decode("00c158c7e8");
        let Instruction::ModelDate { date, .. } = p.instruction else {
            panic!("expected model date");
        };
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 12, 24));
    }

    #[test]
    fn test_dcc_a_select_crc() {
        let mut body = hex::decode("fed10d12345678ff").unwrap();
        body.push(crc8(&body));
        let p = decode(&hex::encode(&body));
        assert_eq!(p.class, PacketClass::DccA);
        assert_eq!(p.crc_valid, Some(true));
        assert_eq!(
            p.instruction,
            Instruction::DccA(DccACommand::Select {
                manufacturer: 0x10d,
                decoder_id: 0x12345678,
                subcommand: 0xff
            })
        );

        let last = body.len() - 1;
        body[last] ^= 0x01;
        let p = decode(&hex::encode(&body));
        assert_eq!(p.crc_valid, Some(false));
    }

    #[test]
    fn test_short_and_truncated_packets() {
        let p = interpret(&Packet::from_bytes(&[0x03, 0x03]), &InterpretContext::default());
        assert_eq!(p.class, PacketClass::Unknown);
        assert_eq!(p.instruction, Instruction::Unknown);
        assert!(!p.notes.is_empty());

        // 128 step instruction without its speed byte
        let p = decode("033f");
        assert_eq!(p.class, PacketClass::MultiFunctionShort);
        assert_eq!(p.instruction, Instruction::Unknown);
        assert!(p.notes.iter().any(|n| n.contains("ends before")));

        // Speed byte present: nothing to report
        assert!(decode("033f85").notes.is_empty());
    }

    #[test]
    fn test_never_panics_on_any_byte_pair() {
        for mode in [EvaluationMode::Operations, EvaluationMode::Service] {
            let ctx = InterpretContext {
                mode,
                speed_steps_14: true,
                accessory_offset: -3,
            };
            for b0 in 0..=255u8 {
                for b1 in [0x00, 0x01, 0x3f, 0x7f, 0x80, 0xd3, 0xe0, 0xff] {
                    let bytes = [b0, b1, b0 ^ b1];
                    let p = interpret(&Packet::from_bytes(&bytes), &ctx);
                    assert!(p.checksum_valid);
                }
            }
        }
    }

    #[test]
    fn test_trailing_bytes_noted() {
        let p = decode("ff0012");
        assert_eq!(p.class, PacketClass::Idle);
        assert!(p.notes.iter().any(|n| n.contains("0x12")));
    }
}
