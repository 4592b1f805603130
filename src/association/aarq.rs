//! AARQ APDU (A-Associate Request), tag 0x60.
//!
//! BER structure (optional fields omitted when absent):
//!
//! ```text
//! 60 len
//!   A1 - application-context-name (OBJECT IDENTIFIER)
//!   A6 - calling-AP-title (OCTET STRING, the client system-title)
//!   8A - sender-acse-requirements (BIT STRING, authentication bit)
//!   8B - mechanism-name (OBJECT IDENTIFIER, implicit)
//!   AC - calling-authentication-value (password or HLS challenge)
//!   BE - user-information (OCTET STRING holding the InitiateRequest)
//! ```
//!
//! Reference: DLMS Green Book Ed. 12, Table 136.

use alloc::vec::Vec;

use nom::{
    IResult,
    error::{Error, ErrorKind},
};

use super::ber::{self, Tag, TagClass};
use super::enums::{ApplicationContextName, AuthenticationValue, MechanismName};
use super::initiate::InitiateRequest;

pub const AARQ_TAG: u8 = 0x60;

/// Bit 0 of the ACSE requirements field: authentication functional unit.
pub const ACSE_AUTHENTICATION_BIT: u8 = 0x80;

#[derive(Debug, Clone, PartialEq)]
pub struct AarqApdu {
    pub application_context_name: ApplicationContextName,
    /// Client system-title; mandatory for ciphered contexts.
    pub calling_ap_title: Option<Vec<u8>>,
    pub sender_acse_requirements: Option<u8>,
    pub mechanism_name: Option<MechanismName>,
    /// LLS secret or HLS client challenge (CtoS).
    pub calling_authentication_value: Option<AuthenticationValue>,
    pub user_information: Option<InitiateRequest>,
}

impl AarqApdu {
    /// AARQ for an unauthenticated public-client association.
    pub fn new_public_ln(initiate: InitiateRequest) -> Self {
        Self {
            application_context_name: ApplicationContextName::LogicalNameReferencing,
            calling_ap_title: None,
            sender_acse_requirements: None,
            mechanism_name: None,
            calling_authentication_value: None,
            user_information: Some(initiate),
        }
    }

    /// AARQ using low-level (password) authentication.
    pub fn new_with_password(initiate: InitiateRequest, password: Vec<u8>) -> Self {
        Self {
            application_context_name: ApplicationContextName::LogicalNameReferencing,
            calling_ap_title: None,
            sender_acse_requirements: Some(ACSE_AUTHENTICATION_BIT),
            mechanism_name: Some(MechanismName::LowLevelSecurity),
            calling_authentication_value: Some(AuthenticationValue::CharString(password)),
            user_information: Some(initiate),
        }
    }

    /// AARQ opening an HLS-GMAC association under the ciphered LN context.
    pub fn new_gmac(
        initiate: InitiateRequest,
        system_title: [u8; 8],
        client_challenge: Vec<u8>,
    ) -> Self {
        Self {
            application_context_name: ApplicationContextName::LogicalNameReferencingWithCiphering,
            calling_ap_title: Some(system_title.to_vec()),
            sender_acse_requirements: Some(ACSE_AUTHENTICATION_BIT),
            mechanism_name: Some(MechanismName::HighLevelSecurityGmac),
            calling_authentication_value: Some(AuthenticationValue::CharString(client_challenge)),
            user_information: Some(initiate),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut content = Vec::new();

        ber::push_tlv(
            &mut content,
            Tag::context(1, true),
            &ber::object_identifier(self.application_context_name.oid_bytes()),
        );

        if let Some(title) = &self.calling_ap_title {
            ber::push_tlv(&mut content, Tag::context(6, true), &ber::octet_string(title));
        }

        if let Some(requirements) = self.sender_acse_requirements {
            // BIT STRING with 7 unused bits
            ber::push_tlv(&mut content, Tag::context(10, false), &[0x07, requirements]);
        }

        if let Some(mechanism) = self.mechanism_name {
            ber::push_tlv(&mut content, Tag::context(11, false), &mechanism.oid_bytes());
        }

        if let Some(value) = &self.calling_authentication_value {
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
            ber::push_tlv(&mut content, Tag::context(12, true), &choice);
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
            Tag { class: TagClass::Application, constructed: true, number: 0 },
            &content,
        );
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, (outer, mut content)) = ber::parse_tlv(input)?;
        if outer.class != TagClass::Application || outer.number != 0 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        let mut application_context_name = None;
        let mut calling_ap_title = None;
        let mut sender_acse_requirements = None;
        let mut mechanism_name = None;
        let mut calling_authentication_value = None;
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
                6 => {
                    let (_, title) = ber::parse_octet_string(field)?;
                    calling_ap_title = Some(title.to_vec());
                }
                10 => {
                    if field.len() >= 2 {
                        sender_acse_requirements = Some(field[1]);
                    }
                }
                11 => {
                    mechanism_name = MechanismName::from_oid_bytes(ber::oid_bytes(field));
                }
                12 => {
                    let (_, (choice, value)) = ber::parse_tlv(field)?;
                    calling_authentication_value = match choice.number {
                        0 => Some(AuthenticationValue::CharString(value.to_vec())),
                        1 if !value.is_empty() => {
                            Some(AuthenticationValue::BitString(value[1..].to_vec()))
                        }
                        _ => None,
                    };
                }
                30 => {
                    let (_, inner) = ber::parse_octet_string(field)?;
                    user_information = InitiateRequest::parse(inner).ok().map(|(_, req)| req);
                }
                _ => {}
            }
        }

        let application_context_name = application_context_name
            .ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;

        Ok((
            remaining,
            Self {
                application_context_name,
                calling_ap_title,
                sender_acse_requirements,
                mechanism_name,
                calling_authentication_value,
                user_information,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::conformance::Conformance;

    fn initiate() -> InitiateRequest {
        InitiateRequest::new(Conformance::CLIENT_LN, 0xffff)
    }

    #[test]
    fn test_public_aarq_structure() {
        let aarq = AarqApdu::new_public_ln(initiate());
        let encoded = aarq.encode();

        assert_eq!(encoded[0], AARQ_TAG);
        assert_eq!(encoded[2], 0xa1);
        // LN context OID
        let ln_oid = [0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];
        assert!(encoded.windows(ln_oid.len()).any(|w| w == ln_oid));
        // user information present
        assert!(encoded.contains(&0xbe));
        // no authentication fields
        assert!(!encoded.contains(&0x8b));
    }

    #[test]
    fn test_public_aarq_roundtrip() {
        let aarq = AarqApdu::new_public_ln(initiate());
        let encoded = aarq.encode();
        let (rest, parsed) = AarqApdu::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, aarq);
    }

    #[test]
    fn test_password_aarq_roundtrip() {
        let aarq = AarqApdu::new_with_password(initiate(), b"00000001".to_vec());
        let encoded = aarq.encode();

        // mechanism-name TLV: 8B 07 60 85 74 05 08 02 01
        let lls = [0x8b, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01];
        assert!(encoded.windows(lls.len()).any(|w| w == lls));

        let (_, parsed) = AarqApdu::parse(&encoded).unwrap();
        assert_eq!(parsed, aarq);
        assert_eq!(
            parsed.calling_authentication_value,
            Some(AuthenticationValue::CharString(b"00000001".to_vec()))
        );
    }

    #[test]
    fn test_gmac_aarq_roundtrip() {
        let system_title = [0x4d, 0x4d, 0x4d, 0x00, 0x00, 0xbc, 0x61, 0x4e];
        let challenge = alloc::vec![0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17];
        let aarq = AarqApdu::new_gmac(
            InitiateRequest::new(Conformance::CLIENT_LN_CIPHERED, 0xffff),
            system_title,
            challenge.clone(),
        );

        let encoded = aarq.encode();
        let (rest, parsed) = AarqApdu::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            parsed.application_context_name,
            ApplicationContextName::LogicalNameReferencingWithCiphering
        );
        assert_eq!(parsed.calling_ap_title.as_deref(), Some(&system_title[..]));
        assert_eq!(parsed.mechanism_name, Some(MechanismName::HighLevelSecurityGmac));
        assert_eq!(
            parsed.calling_authentication_value,
            Some(AuthenticationValue::CharString(challenge))
        );
        assert_eq!(parsed, aarq);
    }

    #[test]
    fn test_parse_skips_unknown_fields() {
        let aarq = AarqApdu::new_public_ln(initiate());
        let mut encoded = aarq.encode();

        // splice a called-AP-title (A2) field in after the context name
        let extra = [0xa2, 0x03, 0x04, 0x01, 0x99];
        let splice_at = 2 + 2 + 9; // outer header + A1 TLV
        for (i, b) in extra.iter().enumerate() {
            encoded.insert(splice_at + i, *b);
        }
        encoded[1] += extra.len() as u8;

        let (_, parsed) = AarqApdu::parse(&encoded).unwrap();
        assert_eq!(parsed, aarq);
    }

    #[test]
    fn test_parse_requires_context_name() {
        // AARQ with only a BE field
        let mut buf = Vec::new();
        ber::push_tlv(
            &mut buf,
            Tag { class: TagClass::Application, constructed: true, number: 0 },
            &[0xbe, 0x03, 0x04, 0x01, 0x00],
        );
        assert!(AarqApdu::parse(&buf).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_outer_tag() {
        assert!(AarqApdu::parse(&[0x61, 0x02, 0xa1, 0x00]).is_err());
    }
}
