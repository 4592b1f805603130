//! RLRE APDU (A-Release Response), tag 0x63.
//!
//! Reference: DLMS Green Book Ed. 12, Table 147.

use alloc::vec::Vec;

use nom::{
    IResult,
    error::{Error, ErrorKind},
};

use super::ber::{self, Tag, TagClass};
use super::enums::ReleaseResponseReason;

pub const RLRE_TAG: u8 = 0x63;

#[derive(Debug, Clone, PartialEq)]
pub struct RlreApdu {
    pub reason: Option<ReleaseResponseReason>,
    pub user_information: Option<Vec<u8>>,
}

impl RlreApdu {
    pub fn new(reason: ReleaseResponseReason) -> Self {
        Self { reason: Some(reason), user_information: None }
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
            Tag { class: TagClass::Application, constructed: true, number: 3 },
            &content,
        );
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (outer, mut content)) = ber::parse_tlv(input)?;
        if outer.class != TagClass::Application || outer.number != 3 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        let mut reason = None;
        let mut user_information = None;

        while !content.is_empty() {
            let (rest, (tag, field)) = ber::parse_tlv(content)?;
            content = rest;

            match (tag.class, tag.number) {
                (TagClass::ContextSpecific, 0) if field.len() == 1 => {
                    reason = ReleaseResponseReason::try_from(field[0]).ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_release_wire_format() {
        let rlre = RlreApdu::new(ReleaseResponseReason::Normal);
        assert_eq!(rlre.encode(), [0x63, 0x03, 0x80, 0x01, 0x00]);
    }

    #[test]
    fn test_roundtrip() {
        let rlre = RlreApdu::new(ReleaseResponseReason::NotFinished);
        let encoded = rlre.encode();
        let (rest, parsed) = RlreApdu::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, rlre);
    }

    #[test]
    fn test_parse_empty_body_means_normal_release() {
        let (_, parsed) = RlreApdu::parse(&[0x63, 0x00]).unwrap();
        assert_eq!(parsed.reason, None);
    }

    #[test]
    fn test_parse_rejects_wrong_tag() {
        assert!(RlreApdu::parse(&[0x62, 0x00]).is_err());
    }
}
