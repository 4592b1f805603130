//! ACSE enumerations: association results, diagnostics, context and
//! mechanism OIDs, release reasons.

use alloc::vec::Vec;
use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;

/// AARE association-result values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AssociationResult {
    Accepted = 0,
    RejectedPermanent = 1,
    RejectedTransient = 2,
}

/// AARE acse-service-user diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AcseServiceUserDiagnostics {
    Null = 0,
    NoReasonGiven = 1,
    ApplicationContextNameNotSupported = 2,
    CallingApTitleNotRecognized = 3,
    CallingApInvocationIdentifierNotRecognized = 4,
    CallingAeQualifierNotRecognized = 5,
    CallingAeInvocationIdentifierNotRecognized = 6,
    CalledApTitleNotRecognized = 7,
    CalledApInvocationIdentifierNotRecognized = 8,
    CalledAeQualifierNotRecognized = 9,
    CalledAeInvocationIdentifierNotRecognized = 10,
    AuthenticationMechanismNameNotRecognized = 11,
    AuthenticationMechanismNameRequired = 12,
    AuthenticationFailure = 13,
    AuthenticationRequired = 14,
}

/// DLMS application context names (OID arc 2.16.756.5.8.1.x).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationContextName {
    LogicalNameReferencing,
    ShortNameReferencing,
    LogicalNameReferencingWithCiphering,
    ShortNameReferencingWithCiphering,
}

impl ApplicationContextName {
    pub fn oid_bytes(&self) -> &'static [u8] {
        match self {
            Self::LogicalNameReferencing => &[0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01],
            Self::ShortNameReferencing => &[0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x02],
            Self::LogicalNameReferencingWithCiphering => {
                &[0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x03]
            }
            Self::ShortNameReferencingWithCiphering => &[0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x04],
        }
    }

    pub fn from_oid_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01] => Some(Self::LogicalNameReferencing),
            [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x02] => Some(Self::ShortNameReferencing),
            [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x03] => {
                Some(Self::LogicalNameReferencingWithCiphering)
            }
            [0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x04] => {
                Some(Self::ShortNameReferencingWithCiphering)
            }
            _ => None,
        }
    }

    pub const fn uses_ciphering(&self) -> bool {
        matches!(
            self,
            Self::LogicalNameReferencingWithCiphering | Self::ShortNameReferencingWithCiphering
        )
    }
}

/// DLMS authentication mechanism names (OID arc 2.16.756.5.8.2.x).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismName {
    Lowest,
    LowLevelSecurity,
    HighLevelSecurity,
    HighLevelSecurityMd5,
    HighLevelSecuritySha1,
    HighLevelSecurityGmac,
    HighLevelSecuritySha256,
    HighLevelSecurityEcdsa,
}

impl MechanismName {
    const OID_PREFIX: [u8; 6] = [0x60, 0x85, 0x74, 0x05, 0x08, 0x02];

    const fn mechanism_id(&self) -> u8 {
        match self {
            Self::Lowest => 0,
            Self::LowLevelSecurity => 1,
            Self::HighLevelSecurity => 2,
            Self::HighLevelSecurityMd5 => 3,
            Self::HighLevelSecuritySha1 => 4,
            Self::HighLevelSecurityGmac => 5,
            Self::HighLevelSecuritySha256 => 6,
            Self::HighLevelSecurityEcdsa => 7,
        }
    }

    pub fn oid_bytes(&self) -> Vec<u8> {
        let mut oid = Self::OID_PREFIX.to_vec();
        oid.push(self.mechanism_id());
        oid
    }

    pub fn from_oid_bytes(bytes: &[u8]) -> Option<Self> {
        let (prefix, id) = bytes.split_at_checked(6)?;
        if prefix != Self::OID_PREFIX || id.len() != 1 {
            return None;
        }
        Some(match id[0] {
            0 => Self::Lowest,
            1 => Self::LowLevelSecurity,
            2 => Self::HighLevelSecurity,
            3 => Self::HighLevelSecurityMd5,
            4 => Self::HighLevelSecuritySha1,
            5 => Self::HighLevelSecurityGmac,
            6 => Self::HighLevelSecuritySha256,
            7 => Self::HighLevelSecurityEcdsa,
            _ => return None,
        })
    }
}

impl fmt::Display for MechanismName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lowest => "none",
            Self::LowLevelSecurity => "low-level-security",
            Self::HighLevelSecurity => "high-level-security",
            Self::HighLevelSecurityMd5 => "high-level-security-md5",
            Self::HighLevelSecuritySha1 => "high-level-security-sha1",
            Self::HighLevelSecurityGmac => "high-level-security-gmac",
            Self::HighLevelSecuritySha256 => "high-level-security-sha256",
            Self::HighLevelSecurityEcdsa => "high-level-security-ecdsa",
        };
        f.write_str(name)
    }
}

/// The calling/responding authentication value: a password or a challenge.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthenticationValue {
    CharString(Vec<u8>),
    BitString(Vec<u8>),
}

impl AuthenticationValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::CharString(bytes) | Self::BitString(bytes) => bytes,
        }
    }
}

impl fmt::Debug for AuthenticationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secrets and challenges stay out of logs.
        match self {
            Self::CharString(bytes) => write!(f, "CharString({} bytes)", bytes.len()),
            Self::BitString(bytes) => write!(f, "BitString({} bytes)", bytes.len()),
        }
    }
}

/// RLRQ release-request-reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ReleaseRequestReason {
    Normal = 0,
    Urgent = 1,
    UserDefined = 30,
}

/// RLRE release-response-reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ReleaseResponseReason {
    Normal = 0,
    NotFinished = 1,
    UserDefined = 30,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_result_codes() {
        assert_eq!(AssociationResult::try_from(0), Ok(AssociationResult::Accepted));
        assert_eq!(AssociationResult::try_from(1), Ok(AssociationResult::RejectedPermanent));
        assert_eq!(AssociationResult::try_from(2), Ok(AssociationResult::RejectedTransient));
        assert!(AssociationResult::try_from(3).is_err());
    }

    #[test]
    fn test_context_name_oids() {
        for context in [
            ApplicationContextName::LogicalNameReferencing,
            ApplicationContextName::ShortNameReferencing,
            ApplicationContextName::LogicalNameReferencingWithCiphering,
            ApplicationContextName::ShortNameReferencingWithCiphering,
        ] {
            assert_eq!(ApplicationContextName::from_oid_bytes(context.oid_bytes()), Some(context));
        }
        assert_eq!(ApplicationContextName::from_oid_bytes(&[0x01]), None);
    }

    #[test]
    fn test_ciphering_contexts() {
        assert!(!ApplicationContextName::LogicalNameReferencing.uses_ciphering());
        assert!(ApplicationContextName::LogicalNameReferencingWithCiphering.uses_ciphering());
    }

    #[test]
    fn test_mechanism_name_oids() {
        let gmac = MechanismName::HighLevelSecurityGmac;
        assert_eq!(gmac.oid_bytes(), [0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x05]);
        assert_eq!(MechanismName::from_oid_bytes(&gmac.oid_bytes()), Some(gmac));

        assert_eq!(MechanismName::from_oid_bytes(&[0x60, 0x85]), None);
        assert_eq!(
            MechanismName::from_oid_bytes(&[0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x09]),
            None
        );
    }

    #[test]
    fn test_authentication_value_debug_redacts() {
        let value = AuthenticationValue::CharString(b"secret00".to_vec());
        assert_eq!(alloc::format!("{:?}", value), "CharString(8 bytes)");
        assert_eq!(value.as_bytes(), b"secret00");
    }

    #[test]
    fn test_release_reasons() {
        assert_eq!(ReleaseRequestReason::try_from(0), Ok(ReleaseRequestReason::Normal));
        assert_eq!(ReleaseResponseReason::try_from(1), Ok(ReleaseResponseReason::NotFinished));
        assert_eq!(ReleaseResponseReason::try_from(30), Ok(ReleaseResponseReason::UserDefined));
        assert!(ReleaseResponseReason::try_from(2).is_err());
    }
}
