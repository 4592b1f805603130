//! Synchronous DLMS client: the association state machine and the blocking
//! facade that drives it over a transport.

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;

use crate::action::{ActionRequest, ActionRequestNormal, ActionResponse, ActionResult};
use crate::apdu::Apdu;
use crate::association::{
    AarqApdu, AcseServiceUserDiagnostics, AssociationResult, AuthenticationValue, Conformance,
    InitiateRequest, ReleaseResponseReason, RlrqApdu,
};
use crate::ciphering::{CipherKeys, GENERAL_GLO_CIPHER_TAG, GeneralGlobalCipher};
use crate::client::{
    ASSOCIATION_LN_CLASS_ID, ASSOCIATION_LN_OBIS, MAX_CHALLENGE_LEN, MIN_CHALLENGE_LEN,
    REPLY_TO_HLS_METHOD_ID, SET_BLOCK_OVERHEAD,
};
use crate::cosem::{CosemAttribute, CosemMethod};
use crate::data::Data;
use crate::data_notification::DataNotification;
use crate::exception::{EXCEPTION_RESPONSE_TAG, ExceptionResponse};
use crate::get::{
    AccessSelector, DataAccessResult, GetDataBlockResult, GetDataResult, GetRequest,
    GetRequestNext, GetRequestNormal, GetRequestWithList, GetResponse,
};
use crate::security_control::SecurityControl;
use crate::set::{
    SetRequest, SetRequestNormal, SetRequestWithDataBlock, SetRequestWithFirstDataBlock,
    SetResponse,
};
use crate::transport::Transport;

#[cfg(feature = "heapless-buffer")]
use heapless::Vec as HeaplessVec;

/// Errors surfaced by the client, parameterized over the transport error.
#[derive(Debug)]
pub enum ClientError<E> {
    /// Error from the underlying transport.
    Transport(E),
    /// A transport-level read or connect timeout. The session state is
    /// undefined afterwards; release or re-associate before continuing.
    Timeout,
    /// The peer closed the connection.
    ConnectionClosed,
    /// Codec or cryptographic failure (malformed bytes, unknown tags,
    /// failed decryption, counter rollback).
    Codec(crate::Error),
    /// The server rejected the association.
    AssociationRefused {
        result: AssociationResult,
        diagnostic: AcseServiceUserDiagnostics,
    },
    /// HLS challenge verification failed on either side.
    AuthenticationFailed,
    /// The server answered the release with a reason other than normal.
    ReleaseRejected(ReleaseResponseReason),
    /// A response inconsistent with the connection state (wrong block
    /// number, unexpected APDU type, invoke-id mismatch).
    ProtocolError,
    /// The operation is not allowed in the current association state.
    PreconditionFailed,
    /// Typed data-access error from the server.
    ServiceError(DataAccessResult),
    /// Typed method-invocation error from the server.
    ActionError(ActionResult),
    /// The server answered with an ExceptionResponse.
    Exception(ExceptionResponse),
}

impl<E> From<crate::Error> for ClientError<E> {
    fn from(error: crate::Error) -> Self {
        match error {
            crate::Error::AuthenticationFailed => Self::AuthenticationFailed,
            other => Self::Codec(other),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for ClientError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {:?}", e),
            Self::Timeout => write!(f, "transport timeout"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Codec(e) => write!(f, "{}", e),
            Self::AssociationRefused { result, diagnostic } => {
                write!(f, "association refused: {:?} ({:?})", result, diagnostic)
            }
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::ReleaseRejected(reason) => write!(f, "release rejected: {:?}", reason),
            Self::ProtocolError => write!(f, "protocol error"),
            Self::PreconditionFailed => write!(f, "operation not allowed in current state"),
            Self::ServiceError(error) => write!(f, "service error: {:?}", error),
            Self::ActionError(error) => write!(f, "action error: {:?}", error),
            Self::Exception(e) => write!(f, "exception response: {:?}", e),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for ClientError<E> {}

/// Association lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    NoAssociation,
    AwaitingResponse,
    Associated,
    AwaitingReleaseResponse,
    Released,
    /// Pre-established association: usable immediately, never released.
    Ready,
}

/// Authentication profile for the association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// No authentication (public client).
    None,
    /// Low-level security: a password in the AARQ.
    LowLevelSecurity { password: Vec<u8> },
    /// High-level security with GMAC challenge exchange; requires
    /// [`SecuritySettings`].
    HighLevelSecurityGmac,
}

/// Suite-0 key material and ciphering policy for one association.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub keys: CipherKeys,
    pub client_system_title: [u8; 8],
    /// First outbound invocation counter value. Persist the counter after
    /// use and pass it back in so a new session continues above the last
    /// used value.
    pub initial_invocation_counter: u32,
    /// Control byte applied to outbound service APDUs
    /// (authenticated-and-encrypted by default).
    pub policy: SecurityControl,
    /// Peer system-title, normally learned from the AARE. Pre-established
    /// associations must provide it up front to decipher inbound traffic.
    pub server_system_title: Option<[u8; 8]>,
}

impl SecuritySettings {
    pub fn new(keys: CipherKeys, client_system_title: [u8; 8]) -> Self {
        Self {
            keys,
            client_system_title,
            initial_invocation_counter: 0,
            policy: SecurityControl::authenticated_and_encrypted(),
            server_system_title: None,
        }
    }

    pub fn with_invocation_counter(mut self, counter: u32) -> Self {
        self.initial_invocation_counter = counter;
        self
    }

    pub fn with_server_system_title(mut self, title: [u8; 8]) -> Self {
        self.server_system_title = Some(title);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub authentication: Authentication,
    pub security: Option<SecuritySettings>,
    /// PDU size proposed in the InitiateRequest.
    pub max_pdu_size: u16,
    /// Client challenge length for HLS (8 to 64 bytes).
    pub challenge_length: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            authentication: Authentication::None,
            security: None,
            max_pdu_size: 0xffff,
            challenge_length: 16,
        }
    }
}

/// Negotiated association parameters handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationSummary {
    pub conformance: Conformance,
    pub server_max_pdu_size: u16,
}

/// Outcome of processing an AARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationOutcome {
    Established(AssociationSummary),
    /// The server challenge arrived; `reply_to_hls` must complete the
    /// association.
    HlsChallenge,
}

/// Outcome of processing one GET response.
#[derive(Debug, Clone, PartialEq)]
pub enum GetServiceOutcome {
    Data(Data),
    Block { last_block: bool, block_number: u32, raw_data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingService {
    Get,
    GetWithList,
    Set,
    Action,
}

/// The transport-free connection state machine.
///
/// Generates request bytes and digests response bytes; enforces the
/// association lifecycle, one-outstanding-service ordering, block transfer
/// sequencing and the ciphering policy. The facade below owns the I/O.
#[derive(Debug)]
pub struct DlmsSession {
    settings: ClientSettings,
    state: AssociationState,
    ciphered: bool,
    invoke_counter: u8,
    last_invoke_id: u8,
    pending: Option<PendingService>,
    expected_block: u32,
    negotiated_conformance: Conformance,
    server_max_pdu_size: u16,
    client_challenge: Option<Vec<u8>>,
    server_challenge: Option<Vec<u8>>,
    server_system_title: Option<[u8; 8]>,
    client_invocation_counter: u32,
    server_invocation_counter: Option<u32>,
}

impl DlmsSession {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_state(settings, AssociationState::NoAssociation)
    }

    /// A pre-established association: no AARQ/AARE, services allowed at
    /// once, release refused.
    pub fn pre_established(settings: ClientSettings) -> Self {
        Self::with_state(settings, AssociationState::Ready)
    }

    fn with_state(settings: ClientSettings, state: AssociationState) -> Self {
        let ciphered = settings.security.is_some();
        let client_invocation_counter =
            settings.security.as_ref().map(|s| s.initial_invocation_counter).unwrap_or(0);
        let server_system_title =
            settings.security.as_ref().and_then(|s| s.server_system_title);
        Self {
            settings,
            state,
            ciphered,
            invoke_counter: 0,
            last_invoke_id: 0,
            pending: None,
            expected_block: 0,
            negotiated_conformance: Conformance::EMPTY,
            server_max_pdu_size: 0,
            client_challenge: None,
            server_challenge: None,
            server_system_title,
            client_invocation_counter,
            server_invocation_counter: None,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn negotiated_conformance(&self) -> Conformance {
        self.negotiated_conformance
    }

    pub fn server_max_pdu_size(&self) -> u16 {
        self.server_max_pdu_size
    }

    pub fn server_system_title(&self) -> Option<[u8; 8]> {
        self.server_system_title
    }

    /// Next outbound invocation counter value, for external persistence.
    pub fn invocation_counter(&self) -> u32 {
        self.client_invocation_counter
    }

    fn next_invoke_id(&mut self) -> u8 {
        self.invoke_counter = if self.invoke_counter >= 15 { 1 } else { self.invoke_counter + 1 };
        // high priority, confirmed service class
        self.last_invoke_id = 0xc0 | self.invoke_counter;
        self.last_invoke_id
    }

    fn in_session(&self) -> bool {
        matches!(self.state, AssociationState::Associated | AssociationState::Ready)
    }

    fn begin_service<E>(&mut self, service: PendingService) -> Result<(), ClientError<E>> {
        if !self.in_session() || self.pending.is_some() {
            return Err(ClientError::PreconditionFailed);
        }
        self.pending = Some(service);
        Ok(())
    }

    fn expect_pending<E>(&self, service: PendingService) -> Result<(), ClientError<E>> {
        if self.pending != Some(service) {
            return Err(ClientError::PreconditionFailed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ciphering
    // ------------------------------------------------------------------

    fn wrap_apdu<E>(&mut self, plaintext: Vec<u8>) -> Result<Vec<u8>, ClientError<E>> {
        if !self.ciphered {
            return Ok(plaintext);
        }
        let security =
            self.settings.security.as_ref().ok_or(ClientError::PreconditionFailed)?;
        let envelope = GeneralGlobalCipher::protect(
            &security.keys,
            security.policy,
            security.client_system_title,
            self.client_invocation_counter,
            plaintext,
        );
        self.client_invocation_counter = self.client_invocation_counter.wrapping_add(1);
        Ok(envelope.encode())
    }

    fn unwrap_apdu<E>(&mut self, bytes: &[u8]) -> Result<Vec<u8>, ClientError<E>> {
        match bytes.first() {
            None => Err(ClientError::Codec(crate::Error::Malformed)),
            Some(&GENERAL_GLO_CIPHER_TAG) => {
                let security = self
                    .settings
                    .security
                    .as_ref()
                    .ok_or(ClientError::Codec(crate::Error::DecryptionError))?;
                let (_, envelope) = GeneralGlobalCipher::parse(bytes)
                    .map_err(|_| ClientError::Codec(crate::Error::Malformed))?;

                let expected_title =
                    self.server_system_title.ok_or(ClientError::ProtocolError)?;
                if envelope.system_title != expected_title {
                    return Err(ClientError::Codec(crate::Error::DecryptionError));
                }
                if let Some(last) = self.server_invocation_counter {
                    if envelope.invocation_counter <= last {
                        return Err(ClientError::Codec(crate::Error::DecryptionError));
                    }
                }

                let inner = envelope.unprotect(&security.keys)?;
                self.server_invocation_counter = Some(envelope.invocation_counter);
                Ok(inner)
            }
            Some(&EXCEPTION_RESPONSE_TAG) => Ok(bytes.to_vec()),
            Some(_) if self.ciphered => Err(ClientError::ProtocolError),
            Some(_) => Ok(bytes.to_vec()),
        }
    }

    fn decode_service_apdu<E>(&mut self, bytes: &[u8]) -> Result<Apdu, ClientError<E>> {
        let plain = self.unwrap_apdu(bytes)?;
        let (apdu, _) = Apdu::decode(&plain)?;
        if let Apdu::ExceptionResponse(exception) = apdu {
            self.pending = None;
            return Err(ClientError::Exception(exception));
        }
        Ok(apdu)
    }

    // ------------------------------------------------------------------
    // Association
    // ------------------------------------------------------------------

    /// Build the AARQ and enter `AwaitingResponse`.
    pub fn aarq<E>(&mut self) -> Result<Vec<u8>, ClientError<E>> {
        if self.state != AssociationState::NoAssociation {
            return Err(ClientError::PreconditionFailed);
        }

        let conformance = if self.ciphered {
            Conformance::CLIENT_LN_CIPHERED
        } else {
            Conformance::CLIENT_LN
        };
        let initiate = InitiateRequest::new(conformance, self.settings.max_pdu_size);

        let aarq = match &self.settings.authentication {
            Authentication::None => AarqApdu::new_public_ln(initiate),
            Authentication::LowLevelSecurity { password } => {
                AarqApdu::new_with_password(initiate, password.clone())
            }
            Authentication::HighLevelSecurityGmac => {
                let security = self
                    .settings
                    .security
                    .as_ref()
                    .ok_or(ClientError::PreconditionFailed)?;
                if !(MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN)
                    .contains(&self.settings.challenge_length)
                {
                    return Err(ClientError::PreconditionFailed);
                }
                let mut challenge = alloc::vec![0u8; self.settings.challenge_length];
                getrandom::getrandom(&mut challenge)
                    .map_err(|_| ClientError::ProtocolError)?;
                let title = security.client_system_title;
                self.client_challenge = Some(challenge.clone());
                AarqApdu::new_gmac(initiate, title, challenge)
            }
        };

        self.state = AssociationState::AwaitingResponse;
        log::debug!("association requested ({:?})", self.settings.authentication);
        Ok(aarq.encode())
    }

    /// Digest the AARE. For HLS profiles the association is only complete
    /// after [`Self::reply_to_hls`] / [`Self::handle_hls_result`].
    pub fn handle_aare<E>(&mut self, bytes: &[u8]) -> Result<AssociationOutcome, ClientError<E>> {
        if self.state != AssociationState::AwaitingResponse {
            return Err(ClientError::PreconditionFailed);
        }

        let aare = match Apdu::decode(bytes) {
            Ok((Apdu::Aare(aare), _)) => aare,
            Ok(_) => {
                self.state = AssociationState::NoAssociation;
                return Err(ClientError::ProtocolError);
            }
            Err(error) => {
                self.state = AssociationState::NoAssociation;
                return Err(error.into());
            }
        };

        if !aare.is_accepted() {
            self.state = AssociationState::NoAssociation;
            return Err(ClientError::AssociationRefused {
                result: aare.result,
                diagnostic: aare.result_source_diagnostic,
            });
        }

        let info = aare.user_information.as_ref().ok_or_else(|| {
            self.state = AssociationState::NoAssociation;
            ClientError::ProtocolError
        })?;
        self.negotiated_conformance = info.negotiated_conformance;
        self.server_max_pdu_size = info.server_max_receive_pdu_size;

        self.server_system_title = aare
            .responding_ap_title
            .as_deref()
            .and_then(|title| <[u8; 8]>::try_from(title).ok());

        if self.ciphered && self.server_system_title.is_none() {
            self.state = AssociationState::NoAssociation;
            return Err(ClientError::ProtocolError);
        }

        if self.settings.authentication == Authentication::HighLevelSecurityGmac {
            let challenge = match aare.responding_authentication_value {
                Some(AuthenticationValue::CharString(bytes))
                | Some(AuthenticationValue::BitString(bytes)) => bytes,
                None => {
                    self.state = AssociationState::NoAssociation;
                    return Err(ClientError::ProtocolError);
                }
            };
            self.server_challenge = Some(challenge);
            log::debug!("AARE accepted, HLS challenge pending");
            return Ok(AssociationOutcome::HlsChallenge);
        }

        self.state = AssociationState::Associated;
        log::debug!(
            "associated, conformance {:?}, server pdu {}",
            self.negotiated_conformance,
            self.server_max_pdu_size
        );
        Ok(AssociationOutcome::Established(self.summary()))
    }

    fn summary(&self) -> AssociationSummary {
        AssociationSummary {
            conformance: self.negotiated_conformance,
            server_max_pdu_size: self.server_max_pdu_size,
        }
    }

    /// Build the HLS pass-3 ActionRequest carrying `f(StoC)`.
    pub fn reply_to_hls<E>(&mut self) -> Result<Vec<u8>, ClientError<E>> {
        if self.state != AssociationState::AwaitingResponse {
            return Err(ClientError::PreconditionFailed);
        }
        let security =
            self.settings.security.as_ref().ok_or(ClientError::PreconditionFailed)?;
        let challenge =
            self.server_challenge.as_ref().ok_or(ClientError::PreconditionFailed)?;

        let reply = security.keys.gmac_challenge_response(
            security.client_system_title,
            self.client_invocation_counter,
            challenge,
        );
        self.client_invocation_counter = self.client_invocation_counter.wrapping_add(1);

        let request = ActionRequest::Normal(ActionRequestNormal {
            invoke_id: self.next_invoke_id(),
            method: CosemMethod::new(
                ASSOCIATION_LN_CLASS_ID,
                ASSOCIATION_LN_OBIS,
                REPLY_TO_HLS_METHOD_ID,
            ),
            parameters: Some(Data::OctetString(reply)),
        });
        self.wrap_apdu(request.encode())
    }

    /// Verify the server's `f(CtoS)` from the HLS pass-4 response.
    pub fn handle_hls_result<E>(
        &mut self,
        bytes: &[u8],
    ) -> Result<AssociationSummary, ClientError<E>> {
        if self.state != AssociationState::AwaitingResponse {
            return Err(ClientError::PreconditionFailed);
        }

        let result = self.verify_hls_response(bytes);
        match result {
            Ok(()) => {
                self.state = AssociationState::Associated;
                log::debug!("HLS-GMAC association established");
                Ok(self.summary())
            }
            Err(error) => {
                self.state = AssociationState::NoAssociation;
                Err(error)
            }
        }
    }

    fn verify_hls_response<E>(&mut self, bytes: &[u8]) -> Result<(), ClientError<E>> {
        let plain = self.unwrap_apdu(bytes)?;
        let (apdu, _) = Apdu::decode(&plain)?;

        let Apdu::ActionResponse(ActionResponse::Normal(response)) = apdu else {
            return Err(ClientError::ProtocolError);
        };
        if response.result != ActionResult::Success {
            return Err(ClientError::AuthenticationFailed);
        }
        let Some(GetDataResult::Data(Data::OctetString(reply))) = response.return_parameters
        else {
            return Err(ClientError::AuthenticationFailed);
        };

        let security =
            self.settings.security.as_ref().ok_or(ClientError::PreconditionFailed)?;
        let server_title = self.server_system_title.ok_or(ClientError::ProtocolError)?;
        let challenge =
            self.client_challenge.as_ref().ok_or(ClientError::PreconditionFailed)?;

        security
            .keys
            .verify_gmac_response(server_title, challenge, &reply)
            .map_err(ClientError::from)
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Build the RLRQ. Pre-established sessions cannot be released.
    pub fn release_request<E>(&mut self) -> Result<Vec<u8>, ClientError<E>> {
        if self.state != AssociationState::Associated || self.pending.is_some() {
            return Err(ClientError::PreconditionFailed);
        }
        self.state = AssociationState::AwaitingReleaseResponse;
        Ok(RlrqApdu::new().encode())
    }

    pub fn handle_release_response<E>(&mut self, bytes: &[u8]) -> Result<(), ClientError<E>> {
        if self.state != AssociationState::AwaitingReleaseResponse {
            return Err(ClientError::PreconditionFailed);
        }

        let (apdu, _) = Apdu::decode(bytes)?;
        let Apdu::Rlre(rlre) = apdu else {
            return Err(ClientError::ProtocolError);
        };

        self.state = AssociationState::Released;
        match rlre.reason {
            Some(ReleaseResponseReason::Normal) | None => Ok(()),
            Some(reason) => Err(ClientError::ReleaseRejected(reason)),
        }
    }

    // ------------------------------------------------------------------
    // GET
    // ------------------------------------------------------------------

    pub fn get_request<E>(
        &mut self,
        attribute: CosemAttribute,
        access_selection: Option<AccessSelector>,
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.begin_service(PendingService::Get)?;
        self.expected_block = 1;

        let request = GetRequest::Normal(GetRequestNormal {
            invoke_id: self.next_invoke_id(),
            attribute,
            access_selection,
        });
        self.wrap_apdu(request.encode())
    }

    /// Ask for the next response block.
    pub fn get_next_request<E>(&mut self, block_number: u32) -> Result<Vec<u8>, ClientError<E>> {
        self.expect_pending(PendingService::Get)?;
        let request = GetRequest::Next(GetRequestNext {
            invoke_id: self.last_invoke_id,
            block_number,
        });
        self.wrap_apdu(request.encode())
    }

    pub fn handle_get_response<E>(
        &mut self,
        bytes: &[u8],
    ) -> Result<GetServiceOutcome, ClientError<E>> {
        self.expect_pending(PendingService::Get)?;
        let apdu = self.decode_service_apdu(bytes)?;

        let Apdu::GetResponse(response) = apdu else {
            self.pending = None;
            return Err(ClientError::ProtocolError);
        };

        match response {
            GetResponse::Normal(normal) => {
                self.pending = None;
                if normal.invoke_id != self.last_invoke_id {
                    return Err(ClientError::ProtocolError);
                }
                match normal.result {
                    GetDataResult::Data(data) => Ok(GetServiceOutcome::Data(data)),
                    GetDataResult::DataAccessError(error) => {
                        Err(ClientError::ServiceError(error))
                    }
                }
            }
            GetResponse::WithDataBlock(block) => {
                if block.invoke_id != self.last_invoke_id
                    || block.block_number != self.expected_block
                {
                    self.pending = None;
                    return Err(ClientError::ProtocolError);
                }
                self.expected_block += 1;

                match block.result {
                    GetDataBlockResult::RawData(raw_data) => {
                        if block.last_block {
                            self.pending = None;
                        }
                        Ok(GetServiceOutcome::Block {
                            last_block: block.last_block,
                            block_number: block.block_number,
                            raw_data,
                        })
                    }
                    GetDataBlockResult::DataAccessError(error) => {
                        self.pending = None;
                        Err(ClientError::ServiceError(error))
                    }
                }
            }
            GetResponse::WithList(_) => {
                self.pending = None;
                Err(ClientError::ProtocolError)
            }
        }
    }

    /// Decode the bytes assembled from a block transfer. A stream that was
    /// ciphered as a whole carries the envelope tag up front.
    pub fn decode_block_data<E>(&mut self, assembled: Vec<u8>) -> Result<Data, ClientError<E>> {
        let plain = if assembled.first() == Some(&GENERAL_GLO_CIPHER_TAG) {
            let inner = self.unwrap_apdu(&assembled)?;
            match Apdu::decode(&inner) {
                Ok((Apdu::GetResponse(GetResponse::Normal(normal)), _)) => {
                    return match normal.result {
                        GetDataResult::Data(data) => Ok(data),
                        GetDataResult::DataAccessError(error) => {
                            Err(ClientError::ServiceError(error))
                        }
                    };
                }
                _ => inner,
            }
        } else {
            assembled
        };

        let (data, _) = Data::decode(&plain)?;
        Ok(data)
    }

    pub fn get_with_list_request<E>(
        &mut self,
        attributes: &[CosemAttribute],
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.begin_service(PendingService::GetWithList)?;
        let request = GetRequest::WithList(GetRequestWithList {
            invoke_id: self.next_invoke_id(),
            attributes: attributes.to_vec(),
        });
        self.wrap_apdu(request.encode())
    }

    pub fn handle_get_with_list_response<E>(
        &mut self,
        bytes: &[u8],
        expected: usize,
    ) -> Result<Vec<GetDataResult>, ClientError<E>> {
        self.expect_pending(PendingService::GetWithList)?;
        let apdu = self.decode_service_apdu(bytes)?;
        self.pending = None;

        let Apdu::GetResponse(GetResponse::WithList(list)) = apdu else {
            return Err(ClientError::ProtocolError);
        };
        if list.invoke_id != self.last_invoke_id || list.results.len() != expected {
            return Err(ClientError::ProtocolError);
        }
        Ok(list.results)
    }

    // ------------------------------------------------------------------
    // SET
    // ------------------------------------------------------------------

    /// Usable data bytes per SET block under the negotiated PDU size.
    pub fn set_block_capacity(&self) -> usize {
        let pdu = if self.server_max_pdu_size == 0 {
            self.settings.max_pdu_size
        } else {
            self.server_max_pdu_size
        };
        (pdu as usize).saturating_sub(SET_BLOCK_OVERHEAD).max(1)
    }

    pub fn set_request<E>(
        &mut self,
        attribute: CosemAttribute,
        access_selection: Option<AccessSelector>,
        value: Data,
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.begin_service(PendingService::Set)?;
        self.expected_block = 1;

        let request = SetRequest::Normal(SetRequestNormal {
            invoke_id: self.next_invoke_id(),
            attribute,
            access_selection,
            value,
        });
        self.wrap_apdu(request.encode())
    }

    /// Open a SET block transfer with the first chunk of the encoded value.
    pub fn set_first_block_request<E>(
        &mut self,
        attribute: CosemAttribute,
        access_selection: Option<AccessSelector>,
        chunk: Vec<u8>,
        last_block: bool,
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.begin_service(PendingService::Set)?;
        self.expected_block = 1;

        let request = SetRequest::WithFirstDataBlock(SetRequestWithFirstDataBlock {
            invoke_id: self.next_invoke_id(),
            attribute,
            access_selection,
            last_block,
            block_number: 1,
            raw_data: chunk,
        });
        self.wrap_apdu(request.encode())
    }

    /// Continue the SET block transfer with the next chunk.
    pub fn set_block_request<E>(
        &mut self,
        chunk: Vec<u8>,
        last_block: bool,
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.expect_pending(PendingService::Set)?;
        let request = SetRequest::WithDataBlock(SetRequestWithDataBlock {
            invoke_id: self.last_invoke_id,
            last_block,
            block_number: self.expected_block,
            raw_data: chunk,
        });
        self.wrap_apdu(request.encode())
    }

    /// Digest the acknowledgment of a non-final SET block.
    pub fn handle_set_block_ack<E>(&mut self, bytes: &[u8]) -> Result<(), ClientError<E>> {
        self.expect_pending(PendingService::Set)?;
        let apdu = self.decode_service_apdu(bytes)?;

        let Apdu::SetResponse(SetResponse::DataBlock(ack)) = apdu else {
            self.pending = None;
            return Err(ClientError::ProtocolError);
        };
        if ack.invoke_id != self.last_invoke_id || ack.block_number != self.expected_block {
            self.pending = None;
            return Err(ClientError::ProtocolError);
        }
        self.expected_block += 1;
        Ok(())
    }

    /// Digest the final SET response (normal write or last block).
    pub fn handle_set_response<E>(&mut self, bytes: &[u8]) -> Result<(), ClientError<E>> {
        self.expect_pending(PendingService::Set)?;
        let apdu = self.decode_service_apdu(bytes)?;
        self.pending = None;

        let result = match apdu {
            Apdu::SetResponse(SetResponse::Normal(normal)) => {
                if normal.invoke_id != self.last_invoke_id {
                    return Err(ClientError::ProtocolError);
                }
                normal.result
            }
            Apdu::SetResponse(SetResponse::LastDataBlock(last)) => {
                if last.invoke_id != self.last_invoke_id
                    || last.block_number != self.expected_block
                {
                    return Err(ClientError::ProtocolError);
                }
                last.result
            }
            _ => return Err(ClientError::ProtocolError),
        };

        match result {
            DataAccessResult::Success => Ok(()),
            error => Err(ClientError::ServiceError(error)),
        }
    }

    // ------------------------------------------------------------------
    // ACTION
    // ------------------------------------------------------------------

    pub fn action_request<E>(
        &mut self,
        method: CosemMethod,
        parameters: Option<Data>,
    ) -> Result<Vec<u8>, ClientError<E>> {
        self.begin_service(PendingService::Action)?;
        let request = ActionRequest::Normal(ActionRequestNormal {
            invoke_id: self.next_invoke_id(),
            method,
            parameters,
        });
        self.wrap_apdu(request.encode())
    }

    pub fn handle_action_response<E>(
        &mut self,
        bytes: &[u8],
    ) -> Result<Option<Data>, ClientError<E>> {
        self.expect_pending(PendingService::Action)?;
        let apdu = self.decode_service_apdu(bytes)?;
        self.pending = None;

        let Apdu::ActionResponse(ActionResponse::Normal(response)) = apdu else {
            return Err(ClientError::ProtocolError);
        };
        if response.invoke_id != self.last_invoke_id {
            return Err(ClientError::ProtocolError);
        }
        if response.result != ActionResult::Success {
            return Err(ClientError::ActionError(response.result));
        }
        match response.return_parameters {
            None => Ok(None),
            Some(GetDataResult::Data(data)) => Ok(Some(data)),
            Some(GetDataResult::DataAccessError(error)) => {
                Err(ClientError::ServiceError(error))
            }
        }
    }

    // ------------------------------------------------------------------
    // DataNotification
    // ------------------------------------------------------------------

    /// Decode an unsolicited DataNotification, deciphering when needed.
    pub fn receive_data_notification<E>(
        &mut self,
        bytes: &[u8],
    ) -> Result<DataNotification, ClientError<E>> {
        let plain = if bytes.first() == Some(&GENERAL_GLO_CIPHER_TAG) {
            self.unwrap_apdu(bytes)?
        } else {
            bytes.to_vec()
        };

        match Apdu::decode(&plain)? {
            (Apdu::DataNotification(notification), _) => Ok(notification),
            _ => Err(ClientError::ProtocolError),
        }
    }
}

// ======================================================================
// Facade
// ======================================================================

/// Receive-buffer abstraction so the client can run on heap or fixed
/// stack storage.
pub trait Buffer: AsMut<[u8]> + AsRef<[u8]> + Debug {
    fn capacity(&self) -> usize;
}

impl Buffer for Vec<u8> {
    fn capacity(&self) -> usize {
        self.len()
    }
}

#[cfg(feature = "heapless-buffer")]
impl<const N: usize> Buffer for HeaplessVec<u8, N> {
    fn capacity(&self) -> usize {
        N
    }
}

/// Blocking DLMS client: a [`DlmsSession`] bound to a transport.
#[derive(Debug)]
pub struct DlmsClient<T: Transport, B: Buffer> {
    transport: T,
    session: DlmsSession,
    buffer: B,
}

/// Builder choosing the buffer allocation strategy.
#[derive(Debug)]
pub struct ClientBuilder<T: Transport> {
    transport: T,
    settings: ClientSettings,
    pre_established: bool,
}

impl<T: Transport> ClientBuilder<T> {
    pub fn new(transport: T, settings: ClientSettings) -> Self {
        Self { transport, settings, pre_established: false }
    }

    /// Start in the `Ready` state without an AARQ/AARE exchange.
    pub fn pre_established(mut self) -> Self {
        self.pre_established = true;
        self
    }

    fn session(&self) -> DlmsSession {
        if self.pre_established {
            DlmsSession::pre_established(self.settings.clone())
        } else {
            DlmsSession::new(self.settings.clone())
        }
    }

    pub fn build_with_heap(self, buffer_size: usize) -> DlmsClient<T, Vec<u8>> {
        let session = self.session();
        DlmsClient { transport: self.transport, session, buffer: alloc::vec![0u8; buffer_size] }
    }

    #[cfg(feature = "heapless-buffer")]
    pub fn build_with_heapless<const N: usize>(self) -> DlmsClient<T, HeaplessVec<u8, N>> {
        let session = self.session();
        let mut buffer = HeaplessVec::new();
        buffer.resize(N, 0).expect("resize to capacity cannot fail");
        DlmsClient { transport: self.transport, session, buffer }
    }
}

impl<T: Transport, B: Buffer> DlmsClient<T, B> {
    pub fn session(&self) -> &DlmsSession {
        &self.session
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn map_transport_error(error: T::Error) -> ClientError<T::Error> {
        if T::is_timeout(&error) { ClientError::Timeout } else { ClientError::Transport(error) }
    }

    /// One synchronous round trip: send the request, block for the response.
    fn transceive(&mut self, request: &[u8]) -> Result<Vec<u8>, ClientError<T::Error>> {
        self.transport.send(request).map_err(Self::map_transport_error)?;
        let n =
            self.transport.recv(self.buffer.as_mut()).map_err(Self::map_transport_error)?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(self.buffer.as_ref()[..n].to_vec())
    }

    /// Establish the application association, running the HLS challenge
    /// exchange when the profile asks for it.
    pub fn associate(&mut self) -> Result<AssociationSummary, ClientError<T::Error>> {
        let aarq = self.session.aarq()?;
        let response = self.transceive(&aarq)?;

        match self.session.handle_aare(&response)? {
            AssociationOutcome::Established(summary) => Ok(summary),
            AssociationOutcome::HlsChallenge => {
                let reply = self.session.reply_to_hls()?;
                let response = self.transceive(&reply)?;
                self.session.handle_hls_result(&response)
            }
        }
    }

    /// Gracefully release the association.
    pub fn release_association(&mut self) -> Result<(), ClientError<T::Error>> {
        let rlrq = self.session.release_request()?;
        let response = self.transceive(&rlrq)?;
        self.session.handle_release_response(&response)
    }

    /// Read one attribute, transparently following GET block transfers.
    pub fn get(
        &mut self,
        attribute: CosemAttribute,
        access_selection: Option<AccessSelector>,
    ) -> Result<Data, ClientError<T::Error>> {
        let mut request = self.session.get_request(attribute, access_selection)?;
        let mut assembled: Vec<u8> = Vec::new();

        loop {
            let response = self.transceive(&request)?;
            match self.session.handle_get_response(&response)? {
                GetServiceOutcome::Data(data) => return Ok(data),
                GetServiceOutcome::Block { last_block, block_number, raw_data } => {
                    assembled.extend_from_slice(&raw_data);
                    if last_block {
                        return self.session.decode_block_data(assembled);
                    }
                    request = self.session.get_next_request(block_number + 1)?;
                }
            }
        }
    }

    /// Read several attributes in one request.
    pub fn get_with_list(
        &mut self,
        attributes: &[CosemAttribute],
    ) -> Result<Vec<GetDataResult>, ClientError<T::Error>> {
        let request = self.session.get_with_list_request(attributes)?;
        let response = self.transceive(&request)?;
        self.session.handle_get_with_list_response(&response, attributes.len())
    }

    /// Write one attribute, chunking into a block transfer when the encoded
    /// value exceeds the negotiated PDU size.
    pub fn set(
        &mut self,
        attribute: CosemAttribute,
        access_selection: Option<AccessSelector>,
        value: Data,
    ) -> Result<(), ClientError<T::Error>> {
        let capacity = self.session.set_block_capacity();
        let encoded = value.encode();

        if encoded.len() <= capacity {
            let request = self.session.set_request(attribute, access_selection, value)?;
            let response = self.transceive(&request)?;
            return self.session.handle_set_response(&response);
        }

        let mut chunks = encoded.chunks(capacity).peekable();
        let first = chunks.next().expect("chunks of a non-empty value");
        let mut request = self.session.set_first_block_request(
            attribute,
            access_selection,
            first.to_vec(),
            chunks.peek().is_none(),
        )?;

        while let Some(chunk) = chunks.next() {
            let ack = self.transceive(&request)?;
            self.session.handle_set_block_ack(&ack)?;
            request =
                self.session.set_block_request(chunk.to_vec(), chunks.peek().is_none())?;
        }

        let response = self.transceive(&request)?;
        self.session.handle_set_response(&response)
    }

    /// Invoke a method; returns its optional return parameters.
    pub fn action(
        &mut self,
        method: CosemMethod,
        parameters: Option<Data>,
    ) -> Result<Option<Data>, ClientError<T::Error>> {
        let request = self.session.action_request(method, parameters)?;
        let response = self.transceive(&request)?;
        self.session.handle_action_response(&response)
    }

    /// Block for one unsolicited DataNotification on the transport.
    pub fn receive_data_notification(
        &mut self,
    ) -> Result<DataNotification, ClientError<T::Error>> {
        let n =
            self.transport.recv(self.buffer.as_mut()).map_err(Self::map_transport_error)?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        let bytes = self.buffer.as_ref()[..n].to_vec();
        self.session.receive_data_notification(&bytes)
    }
}
