//! Packet search
//!
//! Filters decoded packets by address, CV, raw byte and command text.
//! Predicates combine with AND; a query without predicates is refused.

use serde::Serialize;

use super::types::DecodedPacket;
use crate::{DecodeError, Result};

pub const ACCESSORY_RANGE: std::ops::RangeInclusive<i64> = 1..=2048;
pub const DECODER_RANGE: std::ops::RangeInclusive<i64> = 0..=10239;
pub const CV_RANGE: std::ops::RangeInclusive<i64> = 1..=16_777_216;

/// Parse a decimal, `0x` hex or `0b` binary literal.
pub fn parse_number(input: &str) -> Result<i64> {
    let s = input.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let lower = digits.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)
    } else {
        lower.parse::<i64>()
    };
    parsed
        .map(|v| if negative { -v } else { v })
        .map_err(|_| DecodeError::InvalidSearch(format!("not a number: {:?}", input)))
}

/// Search predicates, each optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Query {
    pub accessory: Option<i32>,
    pub decoder: Option<u16>,
    pub cv: Option<u32>,
    /// Byte value and mask
    pub byte: Option<(u8, u8)>,
    pub command: Option<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accessory(mut self, address: i64) -> Result<Self> {
        self.accessory = Some(checked(address, ACCESSORY_RANGE, "accessory address")? as i32);
        Ok(self)
    }

    pub fn decoder(mut self, address: i64) -> Result<Self> {
        self.decoder = Some(checked(address, DECODER_RANGE, "decoder address")? as u16);
        Ok(self)
    }

    pub fn cv(mut self, cv: i64) -> Result<Self> {
        self.cv = Some(checked(cv, CV_RANGE, "CV")? as u32);
        Ok(self)
    }

    pub fn byte(mut self, value: i64, mask: i64) -> Result<Self> {
        let value = checked(value, 0..=255, "byte")? as u8;
        let mask = checked(mask, 0..=255, "byte mask")? as u8;
        self.byte = Some((value, mask));
        Ok(self)
    }

    pub fn command(mut self, text: &str) -> Self {
        let text = text.trim();
        self.command = (!text.is_empty()).then(|| text.to_lowercase());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accessory.is_none()
            && self.decoder.is_none()
            && self.cv.is_none()
            && self.byte.is_none()
            && self.command.is_none()
    }

    /// Lazily yield matching packets in stream order.
    pub fn search<'a>(
        &'a self,
        packets: &'a [DecodedPacket],
    ) -> Result<impl Iterator<Item = &'a DecodedPacket> + Clone + 'a> {
        if self.is_empty() {
            return Err(DecodeError::EmptyQuery);
        }
        Ok(packets.iter().filter(move |p| self.matches(p)))
    }

    pub fn matches(&self, packet: &DecodedPacket) -> bool {
        if let Some(address) = self.accessory {
            if packet.accessory_address() != Some(address) {
                return false;
            }
        }
        if let Some(address) = self.decoder {
            if packet.decoder_address() != Some(address) {
                return false;
            }
        }
        if let Some(cv) = self.cv {
            if !packet.cv.iter().any(|access| access.cv == cv) {
                return false;
            }
        }
        if let Some(command) = &self.command {
            if !packet.matches_command(command) {
                return false;
            }
        }
        match self.byte {
            Some((value, mask)) => self.byte_matches(packet, value, mask),
            None => true,
        }
    }

    /// The byte predicate looks at the address bytes when an address is
    /// searched, at the CV bytes when a CV is searched, else everywhere.
    fn byte_matches(&self, packet: &DecodedPacket, value: u8, mask: u8) -> bool {
        let hit = |b: &u8| b & mask == value & mask;
        let values = packet.values();
        let by_address = self.accessory.is_some() || self.decoder.is_some();
        let by_cv = self.cv.is_some();

        if !by_address && !by_cv {
            return values.iter().any(hit);
        }

        let in_range = |range: &std::ops::Range<usize>| {
            values
                .get(range.clone())
                .map_or(false, |slice| slice.iter().any(hit))
        };
        (by_address && in_range(&packet.address_bytes))
            || (by_cv && packet.cv_bytes.as_ref().map_or(false, in_range))
    }
}

fn checked(value: i64, range: std::ops::RangeInclusive<i64>, what: &str) -> Result<i64> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(DecodeError::InvalidSearch(format!(
            "{} {} outside {}..={}",
            what,
            value,
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::checksum::xor_checksum;
    use crate::dcc::{interpret, InterpretContext, Packet};

    fn packets(bodies: &[&str]) -> Vec<DecodedPacket> {
        bodies
            .iter()
            .map(|body| {
                let mut bytes = hex::decode(body).unwrap();
                bytes.push(xor_checksum(&bytes));
                interpret(&Packet::from_bytes(&bytes), &InterpretContext::default())
            })
            .collect()
    }

    fn sample() -> Vec<DecodedPacket> {
        packets(&[
            "0376",     // short 3, speed
            "03ec1c06", // short 3, POM CV29
            "05ec1c06", // short 5, POM CV29
            "83fa",     // accessory 10
            "ff00",     // idle
            "c4d23f85", // long 1234, 128 steps
        ])
    }

    fn indices(query: &Query, packets: &[DecodedPacket]) -> Vec<usize> {
        query
            .search(packets)
            .unwrap()
            .map(|p| packets.iter().position(|q| std::ptr::eq(p, q)).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x2A").unwrap(), 42);
        assert_eq!(parse_number("0b101010").unwrap(), 42);
        assert_eq!(parse_number(" -3 ").unwrap(), -3);
        assert!(parse_number("0xzz").is_err());
    }

    #[test]
    fn test_empty_query_refused() {
        let all = sample();
        assert!(matches!(Query::new().search(&all), Err(DecodeError::EmptyQuery)));
        assert!(Query::new().command("  ").is_empty());
    }

    #[test]
    fn test_range_validation() {
        assert!(Query::new().accessory(0).is_err());
        assert!(Query::new().accessory(2048).is_ok());
        assert!(Query::new().decoder(10240).is_err());
        assert!(Query::new().cv(16_777_217).is_err());
        assert!(Query::new().byte(256, 0xff).is_err());
    }

    #[test]
    fn test_single_predicates() {
        let all = sample();
        assert_eq!(indices(&Query::new().decoder(3).unwrap(), &all), vec![0, 1]);
        assert_eq!(indices(&Query::new().decoder(1234).unwrap(), &all), vec![5]);
        assert_eq!(indices(&Query::new().accessory(10).unwrap(), &all), vec![3]);
        assert_eq!(indices(&Query::new().cv(29).unwrap(), &all), vec![1, 2]);
        assert_eq!(indices(&Query::new().command("IDLE"), &all), vec![4]);
    }

    #[test]
    fn test_predicates_intersect() {
        let all = sample();
        let by_decoder: Vec<_> = indices(&Query::new().decoder(3).unwrap(), &all);
        let by_command: Vec<_> = indices(&Query::new().command("pom"), &all);
        let both = indices(&Query::new().decoder(3).unwrap().command("pom"), &all);

        let expected: Vec<_> = by_decoder
            .iter()
            .filter(|i| by_command.contains(i))
            .copied()
            .collect();
        assert_eq!(both, expected);
        assert_eq!(both, vec![1]);
    }

    #[test]
    fn test_byte_search_context() {
        let all = sample();
        // 0x06 appears as POM data, never as an address byte
        assert_eq!(indices(&Query::new().byte(0x06, 0xff).unwrap(), &all), vec![1, 2]);
        let q = Query::new().decoder(3).unwrap().byte(0x06, 0xff).unwrap();
        assert!(indices(&q, &all).is_empty());

        // 0x1c is the CV low byte
        let q = Query::new().cv(29).unwrap().byte(0x1c, 0xff).unwrap();
        assert_eq!(indices(&q, &all), vec![1, 2]);

        // Mask: any address byte with low nibble 3
        let q = Query::new().decoder(3).unwrap().byte(0x03, 0x0f).unwrap();
        assert_eq!(indices(&q, &all), vec![0, 1]);
    }

    #[test]
    fn test_results_restartable() {
        let all = sample();
        let query = Query::new().command("multi-function");
        let results = query.search(&all).unwrap();
        let first: Vec<_> = results.clone().collect();
        let second: Vec<_> = results.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }
}
