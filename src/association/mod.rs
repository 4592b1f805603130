//! Application association establishment and release.
//!
//! The ACSE layer of DLMS: AARQ/AARE negotiate an application association
//! (context, authentication mechanism, conformance, PDU sizes), RLRQ/RLRE
//! tear it down. The ACSE APDUs are BER-encoded; the xDLMS
//! InitiateRequest/Response they carry is A-XDR.
//!
//! Reference: DLMS Green Book Ed. 12, Section 11.

pub use self::{
    aare::{AARE_TAG, AareApdu},
    aarq::{AARQ_TAG, ACSE_AUTHENTICATION_BIT, AarqApdu},
    conformance::Conformance,
    enums::{
        AcseServiceUserDiagnostics, ApplicationContextName, AssociationResult,
        AuthenticationValue, MechanismName, ReleaseRequestReason, ReleaseResponseReason,
    },
    initiate::{DLMS_VERSION, InitiateRequest, InitiateResponse, VAA_NAME_LN},
    rlre::{RLRE_TAG, RlreApdu},
    rlrq::{RLRQ_TAG, RlrqApdu},
};

mod aare;
mod aarq;
mod ber;
mod conformance;
mod enums;
mod initiate;
mod rlre;
mod rlrq;

#[cfg(test)]
mod tests {
    use super::*;

    /// Full handshake: the client proposes, the server narrows, both ends
    /// agree on the intersection.
    #[test]
    fn test_association_handshake_negotiation() {
        let aarq =
            AarqApdu::new_public_ln(InitiateRequest::new(Conformance::CLIENT_LN, 0xffff));
        let (_, received_aarq) = AarqApdu::parse(&aarq.encode()).unwrap();

        let proposed = received_aarq.user_information.unwrap().proposed_conformance;
        let server_supports =
            Conformance::GET | Conformance::SET | Conformance::BLOCK_TRANSFER_WITH_GET_OR_READ;
        let negotiated = proposed & server_supports;

        let aare = AareApdu::new_accepted(
            ApplicationContextName::LogicalNameReferencing,
            InitiateResponse::new(negotiated, 0x0400),
        );
        let (_, received_aare) = AareApdu::parse(&aare.encode()).unwrap();

        assert!(received_aare.is_accepted());
        let info = received_aare.user_information.unwrap();
        assert!(info.negotiated_conformance.contains(Conformance::GET));
        assert!(info.negotiated_conformance.contains(Conformance::SET));
        assert!(!info.negotiated_conformance.contains(Conformance::ACTION));
        assert_eq!(info.server_max_receive_pdu_size, 0x0400);
    }

    #[test]
    fn test_release_handshake() {
        let rlrq = RlrqApdu::new();
        let (_, received) = RlrqApdu::parse(&rlrq.encode()).unwrap();
        assert_eq!(received.reason, Some(ReleaseRequestReason::Normal));

        let rlre = RlreApdu::new(ReleaseResponseReason::Normal);
        let (_, received) = RlreApdu::parse(&rlre.encode()).unwrap();
        assert_eq!(received.reason, Some(ReleaseResponseReason::Normal));
    }

    #[test]
    fn test_acse_tags() {
        assert_eq!(AARQ_TAG, 0x60);
        assert_eq!(AARE_TAG, 0x61);
        assert_eq!(RLRQ_TAG, 0x62);
        assert_eq!(RLRE_TAG, 0x63);
    }
}
