//! Minimal ASN.1 BER helpers for the ACSE APDUs (AARQ/AARE/RLRQ/RLRE).
//!
//! Only single-byte tags and definite lengths up to two octets appear in
//! DLMS association traffic; that is all this module supports.

use alloc::vec::Vec;

use nom::{
    IResult,
    bytes::streaming::take,
    error::{Error, ErrorKind},
    number::streaming::u8 as nom_u8,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

/// A parsed BER tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
    pub class: TagClass,
    pub constructed: bool,
    pub number: u8,
}

impl Tag {
    pub(crate) const fn context(number: u8, constructed: bool) -> Self {
        Self { class: TagClass::ContextSpecific, constructed, number }
    }

    pub(crate) const fn to_byte(self) -> u8 {
        let class = match self.class {
            TagClass::Universal => 0b0000_0000,
            TagClass::Application => 0b0100_0000,
            TagClass::ContextSpecific => 0b1000_0000,
            TagClass::Private => 0b1100_0000,
        };
        class | if self.constructed { 0b0010_0000 } else { 0 } | self.number
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        let number = byte & 0b0001_1111;
        // Multi-byte tag numbers do not occur in DLMS association APDUs.
        if number == 31 {
            return None;
        }
        let class = match byte >> 6 {
            0b00 => TagClass::Universal,
            0b01 => TagClass::Application,
            0b10 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        };
        Some(Self { class, constructed: byte & 0b0010_0000 != 0, number })
    }
}

pub(crate) fn push_len(buf: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= 0xffff);
    if len <= 0x7f {
        buf.push(len as u8);
    } else if len <= 0xff {
        buf.push(0x81);
        buf.push(len as u8);
    } else {
        buf.push(0x82);
        buf.push((len >> 8) as u8);
        buf.push(len as u8);
    }
}

/// Append a full TLV.
pub(crate) fn push_tlv(buf: &mut Vec<u8>, tag: Tag, content: &[u8]) {
    buf.push(tag.to_byte());
    push_len(buf, content.len());
    buf.extend_from_slice(content);
}

/// Universal OCTET STRING TLV.
pub(crate) fn octet_string(content: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(content.len() + 4);
    push_tlv(&mut buf, Tag { class: TagClass::Universal, constructed: false, number: 4 }, content);
    buf
}

/// Universal OBJECT IDENTIFIER TLV around pre-encoded OID bytes.
pub(crate) fn object_identifier(oid: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(oid.len() + 2);
    push_tlv(&mut buf, Tag { class: TagClass::Universal, constructed: false, number: 6 }, oid);
    buf
}

/// Universal INTEGER TLV for a single-byte value.
pub(crate) fn integer_u8(value: u8) -> Vec<u8> {
    alloc::vec![0x02, 0x01, value]
}

pub(crate) fn parse_len(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = nom_u8(input)?;
    if first & 0x80 == 0 {
        return Ok((input, first as usize));
    }
    let count = (first & 0x7f) as usize;
    if count == 0 || count > 2 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
    }
    let (input, bytes) = take(count)(input)?;
    let mut len = 0usize;
    for &b in bytes {
        len = (len << 8) | b as usize;
    }
    Ok((input, len))
}

/// Parse one TLV, handing back the tag and the content slice.
pub(crate) fn parse_tlv(input: &[u8]) -> IResult<&[u8], (Tag, &[u8])> {
    let (input, byte) = nom_u8(input)?;
    let tag =
        Tag::from_byte(byte).ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;
    let (input, len) = parse_len(input)?;
    let (input, content) = take(len)(input)?;
    Ok((input, (tag, content)))
}

/// Unwrap a universal OCTET STRING TLV.
pub(crate) fn parse_octet_string(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, (tag, content)) = parse_tlv(input)?;
    if tag.class != TagClass::Universal || tag.number != 4 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((input, content))
}

/// Extract OID bytes that may arrive either raw (IMPLICIT encoding) or as a
/// nested OBJECT IDENTIFIER TLV. Both shapes occur in the field.
pub(crate) fn oid_bytes(content: &[u8]) -> &[u8] {
    if content.len() >= 2 && content[0] == 0x06 && content[1] as usize == content.len() - 2 {
        &content[2..]
    } else {
        content
    }
}

/// Read the single-byte value of a universal INTEGER TLV.
pub(crate) fn parse_integer_u8(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, (tag, content)) = parse_tlv(input)?;
    if tag.class != TagClass::Universal || tag.number != 2 || content.len() != 1 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((input, content[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_byte_mapping() {
        assert_eq!(
            Tag { class: TagClass::Application, constructed: true, number: 0 }.to_byte(),
            0x60
        );
        assert_eq!(Tag::context(1, true).to_byte(), 0xa1);
        assert_eq!(Tag::context(11, false).to_byte(), 0x8b);
        assert_eq!(Tag::context(30, true).to_byte(), 0xbe);

        let tag = Tag::from_byte(0xbe).unwrap();
        assert_eq!(tag, Tag::context(30, true));
        assert!(Tag::from_byte(0x1f).is_none());
    }

    #[test]
    fn test_length_forms() {
        let mut buf = Vec::new();
        push_len(&mut buf, 0x7f);
        push_len(&mut buf, 0x80);
        push_len(&mut buf, 0x1234);
        assert_eq!(buf, [0x7f, 0x81, 0x80, 0x82, 0x12, 0x34]);

        assert_eq!(parse_len(&[0x7f]).unwrap().1, 0x7f);
        assert_eq!(parse_len(&[0x81, 0x80]).unwrap().1, 0x80);
        assert_eq!(parse_len(&[0x82, 0x12, 0x34]).unwrap().1, 0x1234);
        assert!(parse_len(&[0x83, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_tlv_roundtrip() {
        let mut buf = Vec::new();
        push_tlv(&mut buf, Tag::context(6, true), &octet_string(&[1, 2, 3]));

        let (rest, (tag, content)) = parse_tlv(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tag, Tag::context(6, true));

        let (_, inner) = parse_octet_string(content).unwrap();
        assert_eq!(inner, &[1, 2, 3]);
    }

    #[test]
    fn test_oid_bytes_both_shapes() {
        let raw = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x05];
        assert_eq!(oid_bytes(&raw), &raw);

        let wrapped = object_identifier(&raw);
        assert_eq!(oid_bytes(&wrapped), &raw);
    }

    #[test]
    fn test_integer_helpers() {
        assert_eq!(integer_u8(0), [0x02, 0x01, 0x00]);
        let (_, value) = parse_integer_u8(&[0x02, 0x01, 0x0d]).unwrap();
        assert_eq!(value, 13);
        assert!(parse_integer_u8(&[0x04, 0x01, 0x00]).is_err());
    }
}
