//! RLRQ APDU (A-Release Request), tag 0x62.
//!
//! Reference: DLMS Green Book Ed. 12, Table 146.

use alloc::vec::Vec;

use nom::{
    IResult,
    error::{Error, ErrorKind},
};

use super::ber::{self, Tag, TagClass};
use super::enums::ReleaseRequestReason;

pub const RLRQ_TAG: u8 = 0x62;

#[derive(Debug, Clone, PartialEq)]
pub struct RlrqApdu {
    pub reason: Option<ReleaseRequestReason>,
    /// Ciphered xDLMS payload for protected release.
    pub user_information: Option<Vec<u8>>,
}

impl RlrqApdu {
    pub fn new() -> Self {
        Self { reason: Some(ReleaseRequestReason::Normal), user_information: None }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut content = Vec::new();

        if let Some(reason) = self.reason {
            ber::push_tlv(&mut content, Tag::context(0, false), &[reason as u8]);
        }
        if let Some(info) = &self.user_information {
            ber::push_tlv(&mut content, Tag::context(30, true), &ber::octet_string(info));
        }

        let mut buf = Vec::with_capacity(content.len() + 4);
        ber::push_tlv(
            &mut buf,
            Tag { class: TagClass::Application, constructed: true, number: 2 },
            &content,
        );
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (outer, mut content)) = ber::parse_tlv(input)?;
        if outer.class != TagClass::Application || outer.number != 2 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        let mut reason = None;
        let mut user_information = None;

        while !content.is_empty() {
            let (rest, (tag, field)) = ber::parse_tlv(content)?;
            content = rest;

            match (tag.class, tag.number) {
                (TagClass::ContextSpecific, 0) if field.len() == 1 => {
                    reason = ReleaseRequestReason::try_from(field[0]).ok();
                }
                (TagClass::ContextSpecific, 30) => {
                    let (_, info) = ber::parse_octet_string(field)?;
                    user_information = Some(info.to_vec());
                }
                _ => {}
            }
        }

        Ok((remaining, Self { reason, user_information }))
    }
}

impl Default for RlrqApdu {
    fn default() -> Self {
        Self::new()
    }
}
