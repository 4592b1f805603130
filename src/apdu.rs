//! The APDU registry: a closed union over every application PDU this stack
//! speaks, dispatched on the leading tag byte.
//!
//! The registry is used in both directions: serializing client-originated
//! requests and classifying server-originated bytes before the connection
//! state machine acts on them.

use alloc::vec::Vec;

use nom::IResult;

use crate::action::{ACTION_REQUEST_TAG, ACTION_RESPONSE_TAG, ActionRequest, ActionResponse};
use crate::association::{
    AARE_TAG, AARQ_TAG, AareApdu, AarqApdu, RLRE_TAG, RLRQ_TAG, RlreApdu, RlrqApdu,
};
use crate::ciphering::{GENERAL_GLO_CIPHER_TAG, GeneralGlobalCipher};
use crate::data_notification::{DATA_NOTIFICATION_TAG, DataNotification};
use crate::exception::{EXCEPTION_RESPONSE_TAG, ExceptionResponse};
use crate::get::{GET_REQUEST_TAG, GET_RESPONSE_TAG, GetRequest, GetResponse};
use crate::set::{SET_REQUEST_TAG, SET_RESPONSE_TAG, SetRequest, SetResponse};

/// Any DLMS application PDU.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Apdu {
    Aarq(AarqApdu),
    Aare(AareApdu),
    Rlrq(RlrqApdu),
    Rlre(RlreApdu),
    GetRequest(GetRequest),
    GetResponse(GetResponse),
    SetRequest(SetRequest),
    SetResponse(SetResponse),
    ActionRequest(ActionRequest),
    ActionResponse(ActionResponse),
    DataNotification(DataNotification),
    GeneralGlobalCipher(GeneralGlobalCipher),
    ExceptionResponse(ExceptionResponse),
}

impl Apdu {
    /// Leading wire tag of this APDU.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Aarq(_) => AARQ_TAG,
            Self::Aare(_) => AARE_TAG,
            Self::Rlrq(_) => RLRQ_TAG,
            Self::Rlre(_) => RLRE_TAG,
            Self::GetRequest(_) => GET_REQUEST_TAG,
            Self::GetResponse(_) => GET_RESPONSE_TAG,
            Self::SetRequest(_) => SET_REQUEST_TAG,
            Self::SetResponse(_) => SET_RESPONSE_TAG,
            Self::ActionRequest(_) => ACTION_REQUEST_TAG,
            Self::ActionResponse(_) => ACTION_RESPONSE_TAG,
            Self::DataNotification(_) => DATA_NOTIFICATION_TAG,
            Self::GeneralGlobalCipher(_) => GENERAL_GLO_CIPHER_TAG,
            Self::ExceptionResponse(_) => EXCEPTION_RESPONSE_TAG,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Aarq(apdu) => apdu.encode(),
            Self::Aare(apdu) => apdu.encode(),
            Self::Rlrq(apdu) => apdu.encode(),
            Self::Rlre(apdu) => apdu.encode(),
            Self::GetRequest(apdu) => apdu.encode(),
            Self::GetResponse(apdu) => apdu.encode(),
            Self::SetRequest(apdu) => apdu.encode(),
            Self::SetResponse(apdu) => apdu.encode(),
            Self::ActionRequest(apdu) => apdu.encode(),
            Self::ActionResponse(apdu) => apdu.encode(),
            Self::DataNotification(apdu) => apdu.encode(),
            Self::GeneralGlobalCipher(apdu) => apdu.encode(),
            Self::ExceptionResponse(apdu) => apdu.encode(),
        }
    }

    /// Parse a tag-led APDU; each branch consumes its own tag byte.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let tag = match input.first() {
            Some(&tag) => tag,
            None => {
                return Err(nom::Err::Incomplete(nom::Needed::new(1)));
            }
        };

        match tag {
            AARQ_TAG => {
                let (input, apdu) = AarqApdu::parse(input)?;
                Ok((input, Self::Aarq(apdu)))
            }
            AARE_TAG => {
                let (input, apdu) = AareApdu::parse(input)?;
                Ok((input, Self::Aare(apdu)))
            }
            RLRQ_TAG => {
                let (input, apdu) = RlrqApdu::parse(input)?;
                Ok((input, Self::Rlrq(apdu)))
            }
            RLRE_TAG => {
                let (input, apdu) = RlreApdu::parse(input)?;
                Ok((input, Self::Rlre(apdu)))
            }
            GET_REQUEST_TAG => {
                let (input, apdu) = GetRequest::parse(input)?;
                Ok((input, Self::GetRequest(apdu)))
            }
            GET_RESPONSE_TAG => {
                let (input, apdu) = GetResponse::parse(input)?;
                Ok((input, Self::GetResponse(apdu)))
            }
            SET_REQUEST_TAG => {
                let (input, apdu) = SetRequest::parse(input)?;
                Ok((input, Self::SetRequest(apdu)))
            }
            SET_RESPONSE_TAG => {
                let (input, apdu) = SetResponse::parse(input)?;
                Ok((input, Self::SetResponse(apdu)))
            }
            ACTION_REQUEST_TAG => {
                let (input, apdu) = ActionRequest::parse(input)?;
                Ok((input, Self::ActionRequest(apdu)))
            }
            ACTION_RESPONSE_TAG => {
                let (input, apdu) = ActionResponse::parse(input)?;
                Ok((input, Self::ActionResponse(apdu)))
            }
            DATA_NOTIFICATION_TAG => {
                let (input, apdu) = DataNotification::parse(input)?;
                Ok((input, Self::DataNotification(apdu)))
            }
            GENERAL_GLO_CIPHER_TAG => {
                let (input, apdu) = GeneralGlobalCipher::parse(input)?;
                Ok((input, Self::GeneralGlobalCipher(apdu)))
            }
            EXCEPTION_RESPONSE_TAG => {
                let (input, apdu) = ExceptionResponse::parse(input)?;
                Ok((input, Self::ExceptionResponse(apdu)))
            }
            _ => Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            ))),
        }
    }

    /// Classify and decode server-originated bytes.
    ///
    /// Returns the typed APDU and the number of consumed bytes; the leading
    /// byte decides between `UnknownApdu` and `Malformed`.
    pub fn decode(input: &[u8]) -> Result<(Self, usize), crate::Error> {
        match input.first() {
            None => Err(crate::Error::Malformed),
            Some(&tag) if !is_known_tag(tag) => Err(crate::Error::UnknownApdu(tag)),
            Some(_) => match Self::parse(input) {
                Ok((rest, apdu)) => Ok((apdu, input.len() - rest.len())),
                Err(_) => Err(crate::Error::Malformed),
            },
        }
    }
}

fn is_known_tag(tag: u8) -> bool {
    matches!(
        tag,
        AARQ_TAG
            | AARE_TAG
            | RLRQ_TAG
            | RLRE_TAG
            | GET_REQUEST_TAG
            | GET_RESPONSE_TAG
            | SET_REQUEST_TAG
            | SET_RESPONSE_TAG
            | ACTION_REQUEST_TAG
            | ACTION_RESPONSE_TAG
            | DATA_NOTIFICATION_TAG
            | GENERAL_GLO_CIPHER_TAG
            | EXCEPTION_RESPONSE_TAG
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{Conformance, InitiateRequest};
    use crate::cosem::CosemAttribute;
    use crate::data::Data;
    use crate::get::{GetRequestNormal, GetDataResult, GetResponseNormal};
    use crate::obis_code::ObisCode;

    fn sample_get_request() -> Apdu {
        Apdu::GetRequest(GetRequest::Normal(GetRequestNormal {
            invoke_id: 0xc1,
            attribute: CosemAttribute::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
            access_selection: None,
        }))
    }

    #[test]
    fn test_roundtrip_every_request_direction() {
        let apdus = [
            Apdu::Aarq(AarqApdu::new_public_ln(InitiateRequest::new(
                Conformance::CLIENT_LN,
                0xffff,
            ))),
            Apdu::Rlrq(RlrqApdu::new()),
            sample_get_request(),
        ];

        for apdu in apdus {
            let encoded = apdu.encode();
            assert_eq!(encoded[0], apdu.tag());

            let (apdu_back, consumed) = Apdu::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(apdu_back, apdu);
        }
    }

    #[test]
    fn test_classify_server_bytes() {
        let bytes = [0xc4, 0x01, 0xc1, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01];
        let (apdu, consumed) = Apdu::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());

        let Apdu::GetResponse(GetResponse::Normal(GetResponseNormal { invoke_id, result })) = apdu
        else {
            panic!("expected a GetResponse");
        };
        assert_eq!(invoke_id, 0xc1);
        assert_eq!(result, GetDataResult::Data(Data::DoubleLongUnsigned(1)));
    }

    #[test]
    fn test_unknown_tag_is_distinct_from_malformed() {
        assert_eq!(Apdu::decode(&[0xc2, 0x01]), Err(crate::Error::UnknownApdu(0xc2)));
        assert_eq!(Apdu::decode(&[]), Err(crate::Error::Malformed));
        // a known tag with a truncated body
        assert_eq!(Apdu::decode(&[0xc4, 0x01]), Err(crate::Error::Malformed));
    }

    #[test]
    fn test_decode_reports_residual() {
        let mut bytes = sample_get_request().encode();
        let len = bytes.len();
        bytes.extend_from_slice(&[0xaa, 0xbb]);

        let (_, consumed) = Apdu::decode(&bytes).unwrap();
        assert_eq!(consumed, len);
    }

    #[test]
    fn test_exception_response_classified() {
        let (apdu, _) = Apdu::decode(&[0xd8, 0x02, 0x03]).unwrap();
        assert!(matches!(apdu, Apdu::ExceptionResponse(_)));
    }
}
