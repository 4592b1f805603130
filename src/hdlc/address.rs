//! HDLC addressing (IEC 62056-46).
//!
//! Addresses occupy 1, 2 or 4 bytes; the low bit of every byte is an
//! extension marker and terminates the field when set. Server addresses
//! combine an upper (logical device) and an optional lower (physical
//! device) part.

use alloc::vec::Vec;

use nom::{IResult, Parser, combinator::fail, number::streaming::u8};

/// Well-known station addresses.
pub mod reserved {
    /// Client management process.
    pub const CLIENT_MANAGEMENT_PROCESS: u16 = 0x01;
    /// Public client.
    pub const CLIENT_PUBLIC: u16 = 0x10;
    /// Management logical device of a server.
    pub const SERVER_MANAGEMENT_LOGICAL_DEVICE: u16 = 0x01;
    /// All-stations broadcast (one-byte form).
    pub const SERVER_ALL_STATIONS: u16 = 0x7f;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdlcAddress {
    logical: u16,
    physical: Option<u16>,
}

impl HdlcAddress {
    /// A plain (client or logical-only server) address. `None` when the
    /// value exceeds the 14-bit address space.
    pub fn new(logical: u16) -> Option<Self> {
        (logical <= 0x3fff).then_some(Self { logical, physical: None })
    }

    /// A combined server address with logical and physical parts.
    pub fn with_physical(logical: u16, physical: u16) -> Option<Self> {
        (logical <= 0x3fff && physical <= 0x3fff)
            .then_some(Self { logical, physical: Some(physical) })
    }

    pub fn logical(&self) -> u16 {
        self.logical
    }

    pub fn physical(&self) -> Option<u16> {
        self.physical
    }

    pub fn byte_length(&self) -> usize {
        match self.physical {
            None if self.logical <= 0x7f => 1,
            None => 4,
            Some(physical) if self.logical <= 0x7f && physical <= 0x7f => 2,
            Some(_) => 4,
        }
    }

    pub(crate) fn push(&self, buf: &mut Vec<u8>) {
        match self.byte_length() {
            1 => buf.push((self.logical as u8) << 1 | 1),
            2 => {
                buf.push((self.logical as u8) << 1);
                buf.push((self.physical.unwrap_or(0) as u8) << 1 | 1);
            }
            _ => {
                let physical = self.physical.unwrap_or(0);
                buf.push(((self.logical >> 7) as u8) << 1);
                buf.push(((self.logical & 0x7f) as u8) << 1);
                buf.push(((physical >> 7) as u8) << 1);
                buf.push(((physical & 0x7f) as u8) << 1 | 1);
            }
        }
    }

    pub(crate) fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let mut bytes = [0u8; 4];
        let mut count = 0;
        let mut rest = input;

        loop {
            if count == 4 {
                return fail().parse(input);
            }
            let (r, byte) = u8(rest)?;
            rest = r;
            bytes[count] = byte;
            count += 1;
            if byte & 1 != 0 {
                break;
            }
        }

        let address = match count {
            1 => Self { logical: (bytes[0] >> 1) as u16, physical: None },
            2 => Self {
                logical: (bytes[0] >> 1) as u16,
                physical: Some((bytes[1] >> 1) as u16),
            },
            4 => Self {
                logical: ((bytes[0] >> 1) as u16) << 7 | (bytes[1] >> 1) as u16,
                physical: Some(((bytes[2] >> 1) as u16) << 7 | (bytes[3] >> 1) as u16),
            },
            _ => return fail().parse(input),
        };

        Ok((rest, address))
    }
}
