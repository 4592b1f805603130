//! DataNotification APDU (tag 0x0F).
//!
//! Unsolicited push from the server: a 32-bit long-invoke-id-and-priority,
//! an optional capture timestamp and a data tree.

use alloc::vec::Vec;

use nom::{IResult, Parser, bytes::streaming::take, combinator::fail, number::streaming::{be_u32, u8}};

use crate::data::{Data, DateTime, ByteWriter};

pub const DATA_NOTIFICATION_TAG: u8 = 0x0f;

/// The 32-bit invoke-id-and-priority of unsolicited services.
///
/// Bit 31 priority, bit 30 service class, bit 29 processing option, bit 28
/// self-descriptive, bits 0-23 the invoke id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LongInvokeIdAndPriority(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    Unconfirmed,
    Confirmed,
}

impl LongInvokeIdAndPriority {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, id) = be_u32(input)?;
        Ok((input, Self(id)))
    }

    pub fn invoke_id(&self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    pub fn priority(&self) -> Priority {
        if self.0 & (1 << 31) == 0 { Priority::Normal } else { Priority::High }
    }

    pub fn service_class(&self) -> ServiceClass {
        if self.0 & (1 << 30) == 0 { ServiceClass::Unconfirmed } else { ServiceClass::Confirmed }
    }

    pub fn break_on_error(&self) -> bool {
        self.0 & (1 << 29) != 0
    }

    pub fn self_descriptive(&self) -> bool {
        self.0 & (1 << 28) != 0
    }
}

/// A decoded DataNotification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataNotification {
    pub long_invoke_id_and_priority: LongInvokeIdAndPriority,
    pub date_time: Option<DateTime>,
    pub body: Data,
}

impl DataNotification {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(DATA_NOTIFICATION_TAG);
        buf.push_u32(self.long_invoke_id_and_priority.0);
        match &self.date_time {
            Some(dt) => {
                let encoded = dt.encode();
                buf.push(encoded.len() as u8);
                buf.push_bytes(&encoded);
            }
            None => buf.push(0x00),
        }
        self.body.push(&mut buf);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != DATA_NOTIFICATION_TAG {
            return fail().parse(input);
        }
        let (input, long_invoke_id_and_priority) = LongInvokeIdAndPriority::parse(input)?;

        let (input, len) = u8(input)?;
        let (input, date_time) = if len == 0 {
            (input, None)
        } else {
            let (input, bytes) = take(len as usize)(input)?;
            let (_, dt) = DateTime::parse(bytes)?;
            (input, Some(dt))
        };

        let (input, body) = Data::parse(input)?;
        Ok((input, Self { long_invoke_id_and_priority, date_time, body }))
    }
}
