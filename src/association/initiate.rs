//! xDLMS InitiateRequest/InitiateResponse, carried in the user-information
//! field of AARQ/AARE.
//!
//! Unlike the surrounding ACSE APDUs these are A-XDR encoded. The
//! conformance block travels as an `5F 1F` (APPLICATION 31) TLV with one
//! unused-bits byte and three value bytes.
//!
//! Reference: DLMS Green Book Ed. 12, Tables 134-135.

use alloc::vec::Vec;

use nom::{
    IResult, Parser,
    bytes::streaming::{tag, take},
    combinator::fail,
    number::streaming::{be_u16, u8},
};

use super::conformance::Conformance;
use crate::data::ByteWriter;

pub const INITIATE_REQUEST_TAG: u8 = 0x01;
pub const INITIATE_RESPONSE_TAG: u8 = 0x08;

/// DLMS version this stack speaks.
pub const DLMS_VERSION: u8 = 6;

/// VAA name reported for logical-name associations.
pub const VAA_NAME_LN: u16 = 0x0007;

fn push_conformance(buf: &mut Vec<u8>, conformance: Conformance) {
    buf.push_bytes(&[0x5f, 0x1f, 0x04, 0x00]);
    buf.push_bytes(&conformance.to_bytes());
}

fn parse_conformance(input: &[u8]) -> IResult<&[u8], Conformance> {
    let (input, _) = tag(&[0x5f, 0x1f, 0x04, 0x00][..]).parse(input)?;
    let (input, bytes) = take(3usize)(input)?;
    Ok((input, Conformance::from_bytes([bytes[0], bytes[1], bytes[2]])))
}

/// xDLMS InitiateRequest: the client's proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateRequest {
    /// Session key for dedicated ciphering, already wrapped by the caller.
    pub dedicated_key: Option<Vec<u8>>,
    pub response_allowed: bool,
    pub proposed_quality_of_service: Option<u8>,
    pub proposed_dlms_version: u8,
    pub proposed_conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
}

impl InitiateRequest {
    pub fn new(proposed_conformance: Conformance, client_max_receive_pdu_size: u16) -> Self {
        Self {
            dedicated_key: None,
            response_allowed: true,
            proposed_quality_of_service: None,
            proposed_dlms_version: DLMS_VERSION,
            proposed_conformance,
            client_max_receive_pdu_size,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(INITIATE_REQUEST_TAG);

        match &self.dedicated_key {
            Some(key) => {
                buf.push(0x01);
                buf.push(key.len() as u8);
                buf.push_bytes(key);
            }
            None => buf.push(0x00),
        }

        // response-allowed defaults to true; the default is encoded as an
        // absent optional.
        if self.response_allowed {
            buf.push(0x00);
        } else {
            buf.push(0x01);
            buf.push(0x00);
        }

        match self.proposed_quality_of_service {
            Some(qos) => {
                buf.push(0x01);
                buf.push(qos);
            }
            None => buf.push(0x00),
        }

        buf.push(self.proposed_dlms_version);
        push_conformance(&mut buf, self.proposed_conformance);
        buf.push_u16(self.client_max_receive_pdu_size);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, apdu_tag) = u8(input)?;
        if apdu_tag != INITIATE_REQUEST_TAG {
            return fail().parse(input);
        }

        let (input, key_present) = u8(input)?;
        let (input, dedicated_key) = if key_present != 0 {
            let (input, len) = u8(input)?;
            let (input, key) = take(len as usize)(input)?;
            (input, Some(key.to_vec()))
        } else {
            (input, None)
        };

        let (input, response_flag) = u8(input)?;
        let (input, response_allowed) = if response_flag != 0 {
            let (input, value) = u8(input)?;
            (input, value != 0)
        } else {
            (input, true)
        };

        let (input, qos_present) = u8(input)?;
        let (input, proposed_quality_of_service) = if qos_present != 0 {
            let (input, qos) = u8(input)?;
            (input, Some(qos))
        } else {
            (input, None)
        };

        let (input, proposed_dlms_version) = u8(input)?;
        let (input, proposed_conformance) = parse_conformance(input)?;
        let (input, client_max_receive_pdu_size) = be_u16(input)?;

        Ok((
            input,
            Self {
                dedicated_key,
                response_allowed,
                proposed_quality_of_service,
                proposed_dlms_version,
                proposed_conformance,
                client_max_receive_pdu_size,
            },
        ))
    }
}

/// xDLMS InitiateResponse: the server's negotiated answer.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateResponse {
    pub negotiated_quality_of_service: Option<u8>,
    pub negotiated_dlms_version: u8,
    pub negotiated_conformance: Conformance,
    pub server_max_receive_pdu_size: u16,
    pub vaa_name: u16,
}

impl InitiateResponse {
    pub fn new(negotiated_conformance: Conformance, server_max_receive_pdu_size: u16) -> Self {
        Self {
            negotiated_quality_of_service: None,
            negotiated_dlms_version: DLMS_VERSION,
            negotiated_conformance,
            server_max_receive_pdu_size,
            vaa_name: VAA_NAME_LN,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(INITIATE_RESPONSE_TAG);

        match self.negotiated_quality_of_service {
            Some(qos) => {
                buf.push(0x01);
                buf.push(qos);
            }
            None => buf.push(0x00),
        }

        buf.push(self.negotiated_dlms_version);
        push_conformance(&mut buf, self.negotiated_conformance);
        buf.push_u16(self.server_max_receive_pdu_size);
        buf.push_u16(self.vaa_name);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, apdu_tag) = u8(input)?;
        if apdu_tag != INITIATE_RESPONSE_TAG {
            return fail().parse(input);
        }

        let (input, qos_present) = u8(input)?;
        let (input, negotiated_quality_of_service) = if qos_present != 0 {
            let (input, qos) = u8(input)?;
            (input, Some(qos))
        } else {
            (input, None)
        };

        let (input, negotiated_dlms_version) = u8(input)?;
        let (input, negotiated_conformance) = parse_conformance(input)?;
        let (input, server_max_receive_pdu_size) = be_u16(input)?;
        let (input, vaa_name) = be_u16(input)?;

        Ok((
            input,
            Self {
                negotiated_quality_of_service,
                negotiated_dlms_version,
                negotiated_conformance,
                server_max_receive_pdu_size,
                vaa_name,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_green_book_shape() {
        let request = InitiateRequest::new(Conformance::CLIENT_LN, 0xffff);
        let encoded = request.encode();

        assert_eq!(encoded[..5], [0x01, 0x00, 0x00, 0x00, 0x06]);
        assert_eq!(encoded[5..9], [0x5f, 0x1f, 0x04, 0x00]);
        assert_eq!(encoded[9..12], Conformance::CLIENT_LN.to_bytes());
        assert_eq!(encoded[12..14], [0xff, 0xff]);
    }

    #[test]
    fn test_request_roundtrip() {
        let request = InitiateRequest::new(Conformance::CLIENT_LN_CIPHERED, 0x0400);
        let encoded = request.encode();
        let (rest, parsed) = InitiateRequest::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_request_with_dedicated_key_roundtrip() {
        let mut request = InitiateRequest::new(Conformance::CLIENT_LN_CIPHERED, 0x0400);
        request.dedicated_key = Some(alloc::vec![0x11; 16]);

        let encoded = request.encode();
        assert_eq!(encoded[1], 0x01);
        assert_eq!(encoded[2], 16);

        let (_, parsed) = InitiateRequest::parse(&encoded).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = InitiateResponse::new(
            Conformance::GET | Conformance::SET | Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ,
            0x0400,
        );
        let encoded = response.encode();

        assert_eq!(encoded[..3], [0x08, 0x00, 0x06]);
        // trailing: pdu size then the LN VAA name
        assert_eq!(encoded[encoded.len() - 4..], [0x04, 0x00, 0x00, 0x07]);

        let (rest, parsed) = InitiateResponse::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_parse_rejects_wrong_tag() {
        assert!(InitiateRequest::parse(&[0x08, 0x00]).is_err());
        assert!(InitiateResponse::parse(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_conformance_tlv() {
        // version byte followed by garbage instead of 5F 1F
        let bytes = [0x01, 0x00, 0x00, 0x00, 0x06, 0x12, 0x34, 0x00, 0x00, 0x00, 0xff, 0xff];
        assert!(InitiateRequest::parse(&bytes).is_err());
    }
}
