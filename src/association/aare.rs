//! AARE APDU (A-Associate Response), tag 0x61.
//!
//! BER structure:
//!
//! ```text
//! 61 len
//!   A1 - application-context-name
//!   A2 - result (INTEGER)
//!   A3 - result-source-diagnostic (acse-service-user CHOICE)
//!   A4 - responding-AP-title (OCTET STRING, the server system-title)
//!   88 - responder-acse-requirements
//!   89 - mechanism-name
//!   AA - responding-authentication-value (server challenge, StoC)
//!   BE - user-information (OCTET STRING holding the InitiateResponse)
//! ```
//!
//! Reference: DLMS Green Book Ed. 12, Table 138.

use alloc::vec::Vec;

use nom::{
    IResult,
    error::{Error, ErrorKind},
};

use super::ber::{self, Tag, TagClass};
use super::enums::{
    AcseServiceUserDiagnostics, ApplicationContextName, AssociationResult, AuthenticationValue,
    MechanismName,
};
use super::initiate::InitiateResponse;

pub const AARE_TAG: u8 = 0x61;

#[derive(Debug, Clone, PartialEq)]
pub struct AareApdu {
    pub application_context_name: ApplicationContextName,
    pub result: AssociationResult,
    pub result_source_diagnostic: AcseServiceUserDiagnostics,
    /// Server system-title; mandatory for ciphered contexts and HLS.
    pub responding_ap_title: Option<Vec<u8>>,
    pub responder_acse_requirements: Option<u8>,
    pub mechanism_name: Option<MechanismName>,
    /// Server challenge (StoC) for HLS mechanisms.
    pub responding_authentication_value: Option<AuthenticationValue>,
    pub user_information: Option<InitiateResponse>,
}

impl AareApdu {
    pub fn new_accepted(
        application_context_name: ApplicationContextName,
        initiate_response: InitiateResponse,
    ) -> Self {
        Self {
            application_context_name,
            result: AssociationResult::Accepted,
            result_source_diagnostic: AcseServiceUserDiagnostics::Null,
            responding_ap_title: None,
            responder_acse_requirements: None,
            mechanism_name: None,
            responding_authentication_value: None,
            user_information: Some(initiate_response),
        }
    }

    pub fn new_rejected(
        application_context_name: ApplicationContextName,
        result: AssociationResult,
        diagnostic: AcseServiceUserDiagnostics,
    ) -> Self {
        Self {
            application_context_name,
            result,
            result_source_diagnostic: diagnostic,
            responding_ap_title: None,
            responder_acse_requirements: None,
            mechanism_name: None,
            responding_authentication_value: None,
            user_information: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == AssociationResult::Accepted
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut content = Vec::new();

        ber::push_tlv(
            &mut content,
            Tag::context(1, true),
            &ber::object_identifier(self.application_context_name.oid_bytes()),
        );

        ber::push_tlv(
            &mut content,
            Tag::context(2, true),
            &ber::integer_u8(self.result as u8),
        );

        // acse-service-user [1] wrapping the diagnostic INTEGER
        let mut diagnostic = Vec::new();
        ber::push_tlv(
            &mut diagnostic,
            Tag::context(1, true),
            &ber::integer_u8(self.result_source_diagnostic as u8),
        );
        ber::push_tlv(&mut content, Tag::context(3, true), &diagnostic);

        if let Some(title) = &self.responding_ap_title {
            ber::push_tlv(&mut content, Tag::context(4, true), &ber::octet_string(title));
        }

        if let Some(requirements) = self.responder_acse_requirements {
            ber::push_tlv(&mut content, Tag::context(8, false), &[0x07, requirements]);
        }

        if let Some(mechanism) = self.mechanism_name {
            ber::push_tlv(&mut content, Tag::context(9, false), &mechanism.oid_bytes());
        }

        if let Some(value) = &self.responding_authentication_value {
            let mut choice = Vec::new();
            match value {
                AuthenticationValue::CharString(bytes) => {
                    ber::push_tlv(&mut choice, Tag::context(0, false), bytes);
                }
                AuthenticationValue::BitString(bytes) => {
                    let mut bits = alloc::vec![0x00];
                    bits.extend_from_slice(bytes);
                    ber::push_tlv(&mut choice, Tag::context(1, false), &bits);
                }
            }
            ber::push_tlv(&mut content, Tag::context(10, true), &choice);
        }

        if let Some(initiate) = &self.user_information {
            ber::push_tlv(
                &mut content,
                Tag::context(30, true),
                &ber::octet_string(&initiate.encode()),
            );
        }

        let mut buf = Vec::with_capacity(content.len() + 4);
        ber::push_tlv(
            &mut buf,
            Tag { class: TagClass::Application, constructed: true, number: 1 },
            &content,
        );
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (outer, mut content)) = ber::parse_tlv(input)?;
        if outer.class != TagClass::Application || outer.number != 1 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        let mut application_context_name = None;
        let mut result = None;
        let mut result_source_diagnostic = None;
        let mut responding_ap_title = None;
        let mut responder_acse_requirements = None;
        let mut mechanism_name = None;
        let mut responding_authentication_value = None;
        let mut user_information = None;

        while !content.is_empty() {
            let (rest, (tag, field)) = ber::parse_tlv(content)?;
            content = rest;

            if tag.class != TagClass::ContextSpecific {
                continue;
            }
            match tag.number {
                1 => {
                    application_context_name =
                        ApplicationContextName::from_oid_bytes(ber::oid_bytes(field));
                }
                2 => {
                    let (_, value) = ber::parse_integer_u8(field)?;
                    result = AssociationResult::try_from(value).ok();
                }
                3 => {
                    // acse-service-user [1] or acse-service-provider [2];
                    // only the former carries a diagnostic we can name.
                    let (_, (choice, inner)) = ber::parse_tlv(field)?;
                    result_source_diagnostic = if choice.number == 1 {
                        let (_, value) = ber::parse_integer_u8(inner)?;
                        AcseServiceUserDiagnostics::try_from(value).ok()
                    } else {
                        Some(AcseServiceUserDiagnostics::NoReasonGiven)
                    };
                }
                4 => {
                    let (_, title) = ber::parse_octet_string(field)?;
                    responding_ap_title = Some(title.to_vec());
                }
                8 => {
                    if field.len() >= 2 {
                        responder_acse_requirements = Some(field[1]);
                    }
                }
                9 => {
                    mechanism_name = MechanismName::from_oid_bytes(ber::oid_bytes(field));
                }
                10 => {
                    let (_, (choice, value)) = ber::parse_tlv(field)?;
                    responding_authentication_value = match choice.number {
                        0 => Some(AuthenticationValue::CharString(value.to_vec())),
                        1 if !value.is_empty() => {
                            Some(AuthenticationValue::BitString(value[1..].to_vec()))
                        }
                        _ => None,
                    };
                }
                30 => {
                    let (_, inner) = ber::parse_octet_string(field)?;
                    user_information = InitiateResponse::parse(inner).ok().map(|(_, resp)| resp);
                }
                _ => {}
            }
        }

        let application_context_name = application_context_name
            .ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;
        let result = result.ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;
        let result_source_diagnostic = result_source_diagnostic
            .ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;

        Ok((
            remaining,
            Self {
                application_context_name,
                result,
                result_source_diagnostic,
                responding_ap_title,
                responder_acse_requirements,
                mechanism_name,
                responding_authentication_value,
                user_information,
            },
        ))
    }
}
