//! GET service APDUs.
//!
//! Tags: GET-Request 0xC0, GET-Response 0xC4.
//!
//! Reference: DLMS Green Book Ed. 12, Tables 69-70.

use alloc::vec::Vec;

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::streaming::take,
    combinator::fail,
    number::streaming::{be_u32, u8},
};

use crate::cosem::CosemAttribute;
use crate::data::{Data, ByteWriter, parse_length, push_length};

pub const GET_REQUEST_TAG: u8 = 0xc0;
pub const GET_RESPONSE_TAG: u8 = 0xc4;

/// Typed data-access and service error codes returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongGetAborted = 15,
    NoLongGetInProgress = 16,
    LongSetAborted = 17,
    NoLongSetInProgress = 18,
    DataBlockNumberInvalid = 19,
    OtherReason = 250,
}

impl DataAccessResult {
    pub(crate) fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, code) = u8(input)?;
        match Self::try_from(code) {
            Ok(result) => Ok((input, result)),
            Err(_) => fail().parse(input),
        }
    }
}

/// Selective access selector + parameters, attached to GET/SET requests.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AccessSelector {
    pub selector: u8,
    pub parameters: Data,
}

impl AccessSelector {
    pub fn range(descriptor: &crate::selective_access::RangeDescriptor) -> Self {
        Self {
            selector: crate::selective_access::RangeDescriptor::SELECTOR,
            parameters: descriptor.to_data(),
        }
    }

    pub fn entries(descriptor: &crate::selective_access::EntryDescriptor) -> Self {
        Self {
            selector: crate::selective_access::EntryDescriptor::SELECTOR,
            parameters: descriptor.to_data(),
        }
    }

    fn push(&self, buf: &mut Vec<u8>) {
        buf.push(self.selector);
        self.parameters.push(buf);
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, selector) = u8(input)?;
        let (input, parameters) = Data::parse(input)?;
        Ok((input, Self { selector, parameters }))
    }
}

fn push_optional_access(buf: &mut Vec<u8>, access: &Option<AccessSelector>) {
    match access {
        Some(selector) => {
            buf.push(0x01);
            selector.push(buf);
        }
        None => buf.push(0x00),
    }
}

pub(crate) fn parse_optional_access(input: &[u8]) -> IResult<&[u8], Option<AccessSelector>> {
    let (input, present) = u8(input)?;
    match present {
        0x00 => Ok((input, None)),
        _ => {
            let (input, selector) = AccessSelector::parse(input)?;
            Ok((input, Some(selector)))
        }
    }
}

/// GET-Request choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetRequest {
    /// Read a single attribute (choice 1).
    Normal(GetRequestNormal),
    /// Ask for the next block of a long response (choice 2).
    Next(GetRequestNext),
    /// Read several attributes at once (choice 3).
    WithList(GetRequestWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestNormal {
    pub invoke_id: u8,
    pub attribute: CosemAttribute,
    pub access_selection: Option<AccessSelector>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestNext {
    pub invoke_id: u8,
    pub block_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetRequestWithList {
    pub invoke_id: u8,
    pub attributes: Vec<CosemAttribute>,
}

impl GetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(GET_REQUEST_TAG);

        match self {
            Self::Normal(req) => {
                buf.push(0x01);
                buf.push(req.invoke_id);
                req.attribute.push(&mut buf);
                push_optional_access(&mut buf, &req.access_selection);
            }
            Self::Next(req) => {
                buf.push(0x02);
                buf.push(req.invoke_id);
                buf.push_u32(req.block_number);
            }
            Self::WithList(req) => {
                buf.push(0x03);
                buf.push(req.invoke_id);
                push_length(&mut buf, req.attributes.len());
                for attribute in &req.attributes {
                    attribute.push(&mut buf);
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != GET_REQUEST_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, attribute) = CosemAttribute::parse(input)?;
                let (input, access_selection) = parse_optional_access(input)?;
                Ok((input, Self::Normal(GetRequestNormal { invoke_id, attribute, access_selection })))
            }
            0x02 => {
                let (input, block_number) = be_u32(input)?;
                Ok((input, Self::Next(GetRequestNext { invoke_id, block_number })))
            }
            0x03 => {
                let (input, count) = parse_length(input)?;
                let mut attributes = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, attribute) = CosemAttribute::parse(rest)?;
                    attributes.push(attribute);
                    rest = r;
                }
                Ok((rest, Self::WithList(GetRequestWithList { invoke_id, attributes })))
            }
            _ => fail().parse(input),
        }
    }
}

/// Result carried by a normal or listed GET response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetDataResult {
    Data(Data),
    DataAccessError(DataAccessResult),
}

impl GetDataResult {
    fn push(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Data(data) => {
                buf.push(0x00);
                data.push(buf);
            }
            Self::DataAccessError(error) => {
                buf.push(0x01);
                buf.push(*error as u8);
            }
        }
    }

    pub(crate) fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, choice) = u8(input)?;
        match choice {
            0x00 => {
                let (input, data) = Data::parse(input)?;
                Ok((input, Self::Data(data)))
            }
            0x01 => {
                let (input, error) = DataAccessResult::parse(input)?;
                Ok((input, Self::DataAccessError(error)))
            }
            _ => fail().parse(input),
        }
    }
}

/// Result carried by a block-transfer GET response: raw bytes, not a parsed
/// tree - the blocks only form a decodable value once concatenated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetDataBlockResult {
    RawData(Vec<u8>),
    DataAccessError(DataAccessResult),
}

/// GET-Response choices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum GetResponse {
    /// Single attribute result (choice 1).
    Normal(GetResponseNormal),
    /// One block of a long response (choice 2); `last_block` marks the end.
    WithDataBlock(GetResponseWithDataBlock),
    /// One result per requested attribute (choice 3).
    WithList(GetResponseWithList),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseNormal {
    pub invoke_id: u8,
    pub result: GetDataResult,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseWithDataBlock {
    pub invoke_id: u8,
    pub last_block: bool,
    pub block_number: u32,
    pub result: GetDataBlockResult,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct GetResponseWithList {
    pub invoke_id: u8,
    pub results: Vec<GetDataResult>,
}

impl GetResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(GET_RESPONSE_TAG);

        match self {
            Self::Normal(resp) => {
                buf.push(0x01);
                buf.push(resp.invoke_id);
                resp.result.push(&mut buf);
            }
            Self::WithDataBlock(resp) => {
                buf.push(0x02);
                buf.push(resp.invoke_id);
                buf.push(resp.last_block as u8);
                buf.push_u32(resp.block_number);
                match &resp.result {
                    GetDataBlockResult::RawData(raw) => {
                        buf.push(0x00);
                        push_length(&mut buf, raw.len());
                        buf.push_bytes(raw);
                    }
                    GetDataBlockResult::DataAccessError(error) => {
                        buf.push(0x01);
                        buf.push(*error as u8);
                    }
                }
            }
            Self::WithList(resp) => {
                buf.push(0x03);
                buf.push(resp.invoke_id);
                push_length(&mut buf, resp.results.len());
                for result in &resp.results {
                    result.push(&mut buf);
                }
            }
        }

        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != GET_RESPONSE_TAG {
            return fail().parse(input);
        }
        let (input, choice) = u8(input)?;
        let (input, invoke_id) = u8(input)?;

        match choice {
            0x01 => {
                let (input, result) = GetDataResult::parse(input)?;
                Ok((input, Self::Normal(GetResponseNormal { invoke_id, result })))
            }
            0x02 => {
                let (input, last_block) = u8(input)?;
                let (input, block_number) = be_u32(input)?;
                let (input, result_choice) = u8(input)?;
                let (input, result) = match result_choice {
                    0x00 => {
                        let (input, len) = parse_length(input)?;
                        let (input, raw) = take(len)(input)?;
                        (input, GetDataBlockResult::RawData(raw.to_vec()))
                    }
                    0x01 => {
                        let (input, error) = DataAccessResult::parse(input)?;
                        (input, GetDataBlockResult::DataAccessError(error))
                    }
                    _ => return fail().parse(input),
                };
                Ok((
                    input,
                    Self::WithDataBlock(GetResponseWithDataBlock {
                        invoke_id,
                        last_block: last_block != 0,
                        block_number,
                        result,
                    }),
                ))
            }
            0x03 => {
                let (input, count) = parse_length(input)?;
                let mut results = Vec::with_capacity(count.min(16));
                let mut rest = input;
                for _ in 0..count {
                    let (r, result) = GetDataResult::parse(rest)?;
                    results.push(result);
                    rest = r;
                }
                Ok((rest, Self::WithList(GetResponseWithList { invoke_id, results })))
            }
            _ => fail().parse(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obis_code::ObisCode;

    fn invocation_counter_attribute() -> CosemAttribute {
        CosemAttribute::new(15, ObisCode::new(0, 0, 0x2b, 1, 0, 255), 2)
    }

    #[test]
    fn test_request_normal_wire_format() {
        let request = GetRequest::Normal(GetRequestNormal {
            invoke_id: 0xc1,
            attribute: invocation_counter_attribute(),
            access_selection: None,
        });

        assert_eq!(
            request.encode(),
            [0xc0, 0x01, 0xc1, 0x00, 0x0f, 0x00, 0x00, 0x2b, 0x01, 0x00, 0xff, 0x02, 0x00]
        );
    }

    #[test]
    fn test_request_normal_roundtrip() {
        let request = GetRequest::Normal(GetRequestNormal {
            invoke_id: 0x81,
            attribute: CosemAttribute::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2),
            access_selection: None,
        });

        let encoded = request.encode();
        let (rest, parsed) = GetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_with_range_access_roundtrip() {
        use crate::selective_access::{CaptureObjectDefinition, RangeDescriptor};

        let range = RangeDescriptor {
            restricting_object: CaptureObjectDefinition::new(
                CosemAttribute::new(8, ObisCode::new(0, 0, 1, 0, 0, 255), 2),
                0,
            ),
            from_value: Data::DoubleLongUnsigned(0),
            to_value: Data::DoubleLongUnsigned(100),
            selected_values: Vec::new(),
        };
        let request = GetRequest::Normal(GetRequestNormal {
            invoke_id: 0x41,
            attribute: CosemAttribute::new(7, ObisCode::new(1, 0, 99, 1, 0, 255), 2),
            access_selection: Some(AccessSelector::range(&range)),
        });

        let encoded = request.encode();
        assert_eq!(encoded[12], 0x01);
        assert_eq!(encoded[13], RangeDescriptor::SELECTOR);

        let (rest, parsed) = GetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_next_wire_format() {
        let request = GetRequest::Next(GetRequestNext { invoke_id: 0xc1, block_number: 2 });
        let encoded = request.encode();
        assert_eq!(encoded, [0xc0, 0x02, 0xc1, 0x00, 0x00, 0x00, 0x02]);

        let (_, parsed) = GetRequest::parse(&encoded).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_with_list_roundtrip() {
        let request = GetRequest::WithList(GetRequestWithList {
            invoke_id: 0xc5,
            attributes: alloc::vec![
                CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
                CosemAttribute::new(3, ObisCode::new(1, 0, 2, 8, 0, 255), 2),
            ],
        });

        let encoded = request.encode();
        assert_eq!(encoded[3], 2);

        let (rest, parsed) = GetRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_response_normal_with_data() {
        let bytes = [0xc4, 0x01, 0xc1, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01];
        let (rest, response) = GetResponse::parse(&bytes).unwrap();
        assert!(rest.is_empty());

        let GetResponse::Normal(resp) = response else { panic!("expected normal response") };
        assert_eq!(resp.invoke_id, 0xc1);
        assert_eq!(resp.result, GetDataResult::Data(Data::DoubleLongUnsigned(1)));
    }

    #[test]
    fn test_response_normal_with_error() {
        let bytes = [0xc4, 0x01, 0x81, 0x01, 0x03];
        let (_, response) = GetResponse::parse(&bytes).unwrap();

        let GetResponse::Normal(resp) = response else { panic!("expected normal response") };
        assert_eq!(
            resp.result,
            GetDataResult::DataAccessError(DataAccessResult::ReadWriteDenied)
        );
    }

    #[test]
    fn test_response_rejects_unknown_error_code() {
        let bytes = [0xc4, 0x01, 0x81, 0x01, 0x05];
        assert!(GetResponse::parse(&bytes).is_err());
    }

    #[test]
    fn test_response_with_datablock_roundtrip() {
        let response = GetResponse::WithDataBlock(GetResponseWithDataBlock {
            invoke_id: 0xc1,
            last_block: false,
            block_number: 1,
            result: GetDataBlockResult::RawData(alloc::vec![0x09, 0x82, 0x01]),
        });

        let encoded = response.encode();
        assert_eq!(encoded[..4], [0xc4, 0x02, 0xc1, 0x00]);

        let (rest, parsed) = GetResponse::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_response_with_large_datablock() {
        let response = GetResponse::WithDataBlock(GetResponseWithDataBlock {
            invoke_id: 0x41,
            last_block: true,
            block_number: 3,
            result: GetDataBlockResult::RawData(alloc::vec![0x55; 300]),
        });

        let encoded = response.encode();
        // raw-data length needs the two-byte long form
        assert_eq!(encoded[9..12], [0x82, 0x01, 0x2c]);

        let (_, parsed) = GetResponse::parse(&encoded).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_response_with_list_roundtrip() {
        let response = GetResponse::WithList(GetResponseWithList {
            invoke_id: 0xc5,
            results: alloc::vec![
                GetDataResult::Data(Data::Long(100)),
                GetDataResult::DataAccessError(DataAccessResult::ObjectUnavailable),
            ],
        });

        let encoded = response.encode();
        let (rest, parsed) = GetResponse::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_request_rejects_wrong_tag_and_choice() {
        assert!(GetRequest::parse(&[0xc4, 0x01, 0x00]).is_err());
        assert!(GetRequest::parse(&[0xc0, 0x07, 0x00]).is_err());
    }
}
