//! SET service APDUs.
//!
//! Tags: SET-Request 0xC1, SET-Response 0xC5.
//!
//! Large values travel as a first-datablock followed by plain datablocks,
//! each acknowledged by the server before the next chunk is sent.
//!
//! Reference: DLMS Green Book Ed. 12, Tables 71-72.

use alloc::vec::Vec;

use nom::{
    IResult, Parser,
    bytes::streaming::take,
    combinator::fail,
    number::streaming::{be_u32, u8},
};

use crate::cosem::CosemAttribute;
use crate::data::{Data, ByteWriter, parse_length, push_length};
use crate::get::{AccessSelector, DataAccessResult, parse_optional_access};

pub const SET_REQUEST_TAG: u8 = 0xc1;
pub const SET_RESPONSE_TAG: u8 = 0xc5;

/// SET-Request choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SetRequest {
    /// Write a single attribute (choice 1).
    Normal(SetRequestNormal),
    /// Open a block transfer and carry the first chunk (choice 2).
    WithFirstDataBlock(SetRequestWithFirstDataBlock),
    /// Carry a subsequent chunk (choice 3).
    WithDataBlock(SetRequestWithDataBlock),
    /// Write several attributes at once (choice 4).
    WithList(SetRequestWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestNormal {
    pub invoke_id: u8,
    pub attribute: CosemAttribute,
    pub access_selection: Option<AccessSelector>,
    pub value: Data,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithFirstDataBlock {
    pub invoke_id: u8,
    pub attribute: CosemAttribute,
    pub access_selection: Option<AccessSelector>,
    pub last_block: bool,
    pub block_number: u32,
    pub raw_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithDataBlock {
    pub invoke_id: u8,
    pub last_block: bool,
    pub block_number: u32,
    pub raw_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetRequestWithList {
    pub invoke_id: u8,
    pub attributes: Vec<CosemAttribute>,
    pub values: Vec<Data>,
}

fn push_datablock(buf: &mut Vec<u8>, last_block: bool, block_number: u32, raw_data: &[u8]) {
    buf.push(last_block as u8);
    buf.push_u32(block_number);
    push_length(buf, raw_data.len());
    buf.push_bytes(raw_data);
}

fn parse_datablock(input: &[u8]) -> IResult<&[u8], (bool, u32, Vec<u8>)> {
    let (input, last_block) = u8(input)?;
    let (input, block_number) = be_u32(input)?;
    let (input, len) = parse_length(input)?;
    let (input, raw) = take(len)(input)?;
    Ok((input, (last_block != 0, block_number, raw.to_vec())))
}

impl SetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(SET_REQUEST_TAG);

        match self {
            Self::Normal(req) => {
                buf.push(0x01);
                buf.push(req.invoke_id);
                req.attribute.push(&mut buf);
                match &req.access_selection {
                    Some(selector) => {
                        buf.push(0x01);
                        buf.push(selector.selector);
                        selector.parameters.push(&mut buf);
                    }
                    None => buf.push(0x00),
                }
                req.value.push(&mut buf);
            }
            Self::WithFirstDataBlock(req) => {
                buf.push(0x02);
                buf.push(req.invoke_id);
                req.attribute.push(&mut buf);
                match &req.access_selection {
                    Some(selector) => {
                        buf.push(0x01);
                        buf.push(selector.selector);
                        selector.parameters.push(&mut buf);
                    }
                    None => buf.push(0x00),
                }
                push_datablock(&mut buf, req.last_block, req.block_number, &req.raw_data);
            }
            Self::WithDataBlock(req) => {
                buf.push(0x03);
                buf.push(req.invoke_id);
                push_datablock(&mut buf, req.last_block, req.block_number, &req.raw_data);
            }
            Self::WithList(req) => {
                buf.push(0x04);
                buf.push(req.invoke_id);
                push_length(&mut buf, req.attributes.len());
                for attribute in &req.attributes {
                    attribute.push(&mut buf);
                }
                push_length(&mut buf, req.values.len());
                for value in &req.values {
                    value.push(&mut buf);
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != SET_REQUEST_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, attribute) = CosemAttribute::parse(input)?;
                let (input, access_selection) = parse_optional_access(input)?;
                let (input, value) = Data::parse(input)?;
                Ok((
                    input,
                    Self::Normal(SetRequestNormal { invoke_id, attribute, access_selection, value }),
                ))
            }
            0x02 => {
                let (input, attribute) = CosemAttribute::parse(input)?;
                let (input, access_selection) = parse_optional_access(input)?;
                let (input, (last_block, block_number, raw_data)) = parse_datablock(input)?;
                Ok((
                    input,
                    Self::WithFirstDataBlock(SetRequestWithFirstDataBlock {
                        invoke_id,
                        attribute,
                        access_selection,
                        last_block,
                        block_number,
                        raw_data,
                    }),
                ))
            }
            0x03 => {
                let (input, (last_block, block_number, raw_data)) = parse_datablock(input)?;
                Ok((
                    input,
                    Self::WithDataBlock(SetRequestWithDataBlock {
                        invoke_id,
                        last_block,
                        block_number,
                        raw_data,
                    }),
                ))
            }
            0x04 => {
                let (input, count) = parse_length(input)?;
                let mut attributes = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, attribute) = CosemAttribute::parse(rest)?;
                    attributes.push(attribute);
                    rest = r;
                }
                let (rest2, count) = parse_length(rest)?;
                let mut values = Vec::with_capacity(count.min(16));
                let mut rest = rest2;
                for _ in 0..count {
                    let (r, value) = Data::parse(rest)?;
                    values.push(value);
                    rest = r;
                }
                Ok((rest, Self::WithList(SetRequestWithList { invoke_id, attributes, values })))
            }
            _ => fail().parse(input),
        }
    }
}

/// SET-Response choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SetResponse {
    /// Result of a normal write (choice 1).
    Normal(SetResponseNormal),
    /// Acknowledgment of one block (choice 2).
    DataBlock(SetResponseDataBlock),
    /// Result after the final block (choice 3).
    LastDataBlock(SetResponseLastDataBlock),
    /// One result per written attribute (choice 5).
    WithList(SetResponseWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetResponseNormal {
    pub invoke_id: u8,
    pub result: DataAccessResult,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetResponseDataBlock {
    pub invoke_id: u8,
    pub block_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetResponseLastDataBlock {
    pub invoke_id: u8,
    pub result: DataAccessResult,
    pub block_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SetResponseWithList {
    pub invoke_id: u8,
    pub results: Vec<DataAccessResult>,
}

impl SetResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(SET_RESPONSE_TAG);

        match self {
            Self::Normal(resp) => {
                buf.push(0x01);
                buf.push(resp.invoke_id);
                buf.push(resp.result as u8);
            }
            Self::DataBlock(resp) => {
                buf.push(0x02);
                buf.push(resp.invoke_id);
                buf.push_u32(resp.block_number);
            }
            Self::LastDataBlock(resp) => {
                buf.push(0x03);
                buf.push(resp.invoke_id);
                buf.push(resp.result as u8);
                buf.push_u32(resp.block_number);
            }
            Self::WithList(resp) => {
                buf.push(0x05);
                buf.push(resp.invoke_id);
                push_length(&mut buf, resp.results.len());
                for result in &resp.results {
                    buf.push(*result as u8);
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != SET_RESPONSE_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, result) = DataAccessResult::parse(input)?;
                Ok((input, Self::Normal(SetResponseNormal { invoke_id, result })))
            }
            0x02 => {
                let (input, block_number) = be_u32(input)?;
                Ok((input, Self::DataBlock(SetResponseDataBlock { invoke_id, block_number })))
            }
            0x03 => {
                let (input, result) = DataAccessResult::parse(input)?;
                let (input, block_number) = be_u32(input)?;
                Ok((
                    input,
                    Self::LastDataBlock(SetResponseLastDataBlock {
                        invoke_id,
                        result,
                        block_number,
                    }),
                ))
            }
            0x05 => {
                let (input, count) = parse_length(input)?;
                let mut results = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, result) = DataAccessResult::parse(rest)?;
                    results.push(result);
                    rest = r;
                }
                Ok((rest, Self::WithList(SetResponseWithList { invoke_id, results })))
            }
            _ => fail().parse(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obis_code::ObisCode;

    fn register_value() -> CosemAttribute {
        CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
    }

    #[test]
    fn test_request_normal_wire_format() {
        let request = SetRequest::Normal(SetRequestNormal {
            invoke_id: 0xc1,
            attribute: register_value(),
            access_selection: None,
            value: Data::DoubleLongUnsigned(0x3039),
        });

        assert_eq!(
            request.encode(),
            [
                0xc1, 0x01, 0xc1, 0x00, 0x03, 0x01, 0x00, 0x01, 0x08, 0x00, 0xff, 0x02, 0x00,
                0x06, 0x00, 0x00, 0x30, 0x39,
            ]
        );
    }

    #[test]
    fn test_request_normal_roundtrip() {
        let request = SetRequest::Normal(SetRequestNormal {
            invoke_id: 0x41,
            attribute: register_value(),
            access_selection: None,
            value: Data::OctetString(alloc::vec![1, 2, 3]),
        });

        let encoded = request.encode();
        let (rest, parsed) = SetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_first_datablock_roundtrip() {
        let request = SetRequest::WithFirstDataBlock(SetRequestWithFirstDataBlock {
            invoke_id: 0xc1,
            attribute: register_value(),
            access_selection: None,
            last_block: false,
            block_number: 1,
            raw_data: alloc::vec![0xaa; 200],
        });

        let encoded = request.encode();
        assert_eq!(encoded[..3], [0xc1, 0x02, 0xc1]);
        // last-block flag then the block number
        assert_eq!(encoded[13], 0x00);
        assert_eq!(encoded[14..18], [0x00, 0x00, 0x00, 0x01]);

        let (rest, parsed) = SetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_datablock_roundtrip() {
        let request = SetRequest::WithDataBlock(SetRequestWithDataBlock {
            invoke_id: 0xc1,
            last_block: true,
            block_number: 5,
            raw_data: alloc::vec![0x55; 32],
        });

        let encoded = request.encode();
        assert_eq!(encoded[..4], [0xc1, 0x03, 0xc1, 0x01]);

        let (rest, parsed) = SetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_with_list_roundtrip() {
        let request = SetRequest::WithList(SetRequestWithList {
            invoke_id: 0x81,
            attributes: alloc::vec![
                register_value(),
                CosemAttribute::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2),
            ],
            values: alloc::vec![Data::Long(1), Data::Long(2)],
        });

        let encoded = request.encode();
        let (rest, parsed) = SetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_response_normal_roundtrip() {
        let response = SetResponse::Normal(SetResponseNormal {
            invoke_id: 0xc1,
            result: DataAccessResult::Success,
        });
        assert_eq!(response.encode(), [0xc5, 0x01, 0xc1, 0x00]);

        let (_, parsed) = SetResponse::parse(&response.encode()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_response_datablock_roundtrip() {
        let response =
            SetResponse::DataBlock(SetResponseDataBlock { invoke_id: 0xc1, block_number: 3 });
        assert_eq!(response.encode(), [0xc5, 0x02, 0xc1, 0x00, 0x00, 0x00, 0x03]);

        let (_, parsed) = SetResponse::parse(&response.encode()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_response_last_datablock_roundtrip() {
        let response = SetResponse::LastDataBlock(SetResponseLastDataBlock {
            invoke_id: 0xc1,
            result: DataAccessResult::Success,
            block_number: 5,
        });

        let (_, parsed) = SetResponse::parse(&response.encode()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_response_with_list_roundtrip() {
        let response = SetResponse::WithList(SetResponseWithList {
            invoke_id: 0x81,
            results: alloc::vec![
                DataAccessResult::Success,
                DataAccessResult::TypeUnmatched,
                DataAccessResult::Success,
            ],
        });

        let (_, parsed) = SetResponse::parse(&response.encode()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_rejects_wrong_tag_and_choice() {
        assert!(SetRequest::parse(&[0xc0, 0x01, 0x00]).is_err());
        assert!(SetResponse::parse(&[0xc5, 0x04, 0x00, 0x00]).is_err());
    }
}
