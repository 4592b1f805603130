//! COSEM object references.
//!
//! An attribute or method of a COSEM object is addressed by the triple
//! `(interface class, logical name, index)`. These descriptors appear in
//! every GET/SET/ACTION request and as capture-object keys in selective
//! access.

use core::fmt;

use alloc::vec::Vec;
use nom::{IResult, number::streaming::{be_u16, u8}};

use crate::data::ByteWriter;
use crate::obis_code::ObisCode;

/// Reference to a COSEM attribute: `(class_id, logical name, attribute index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CosemAttribute {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: i8,
}

impl CosemAttribute {
    pub const fn new(class_id: u16, instance_id: ObisCode, attribute_id: i8) -> Self {
        Self { class_id, instance_id, attribute_id }
    }

    /// Wire form: class id (2 BE), logical name (6), attribute index (1).
    pub fn push(&self, buf: &mut Vec<u8>) {
        buf.push_u16(self.class_id);
        buf.push_bytes(&self.instance_id.encode());
        buf.push_i8(self.attribute_id);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, class_id) = be_u16(input)?;
        let (input, instance_id) = ObisCode::parse(input)?;
        let (input, attribute_id) = u8(input)?;
        Ok((input, Self::new(class_id, instance_id, attribute_id as i8)))
    }
}

impl fmt::Display for CosemAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class_id, self.instance_id, self.attribute_id)
    }
}

/// Reference to a COSEM method: `(class_id, logical name, method index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CosemMethod {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub method_id: i8,
}

impl CosemMethod {
    pub const fn new(class_id: u16, instance_id: ObisCode, method_id: i8) -> Self {
        Self { class_id, instance_id, method_id }
    }

    pub fn push(&self, buf: &mut Vec<u8>) {
        buf.push_u16(self.class_id);
        buf.push_bytes(&self.instance_id.encode());
        buf.push_i8(self.method_id);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, class_id) = be_u16(input)?;
        let (input, instance_id) = ObisCode::parse(input)?;
        let (input, method_id) = u8(input)?;
        Ok((input, Self::new(class_id, instance_id, method_id as i8)))
    }
}

impl fmt::Display for CosemMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:m{}", self.class_id, self.instance_id, self.method_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_wire_format() {
        let attr = CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
        let mut buf = Vec::new();
        attr.push(&mut buf);
        assert_eq!(buf, [0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xff, 0x02]);

        let (rest, parsed) = CosemAttribute::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, attr);
    }

    #[test]
    fn test_negative_attribute_index_roundtrip() {
        let attr = CosemAttribute::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), -2);
        let mut buf = Vec::new();
        attr.push(&mut buf);
        assert_eq!(buf[8], 0xfe);

        let (_, parsed) = CosemAttribute::parse(&buf).unwrap();
        assert_eq!(parsed.attribute_id, -2);
    }

    #[test]
    fn test_method_wire_format() {
        let method = CosemMethod::new(15, ObisCode::new(0, 0, 40, 0, 0, 255), 1);
        let mut buf = Vec::new();
        method.push(&mut buf);
        assert_eq!(buf, [0x00, 0x0f, 0x00, 0x00, 0x28, 0x00, 0x00, 0xff, 0x01]);

        let (_, parsed) = CosemMethod::parse(&buf).unwrap();
        assert_eq!(parsed, method);
    }
}
