//! AES-GCM-128 ciphering (security suite 0) and HLS-GMAC authentication.
//!
//! Ciphered APDUs travel inside a GeneralGlobalCipher envelope (tag 0xDB):
//! originator system-title, then `SC || IC(4 BE) || ciphertext || tag(12)`.
//! The GCM nonce is `system_title(8) || IC(4 BE)`; the associated data is
//! `SC || AK`, with the payload itself appended in authentication-only mode.
//!
//! Reference: DLMS Green Book Ed. 12, Section 9.2.7.

use alloc::vec::Vec;
use core::fmt;

use aes::Aes128;
use aes_gcm::AesGcm;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use cipher::Key;
use nom::{IResult, Parser, bytes::streaming::take, combinator::fail, number::streaming::{be_u32, u8}};

use crate::data::{ByteWriter, length_size, parse_length, push_length};
use crate::security_control::SecurityControl;

pub const GENERAL_GLO_CIPHER_TAG: u8 = 0xdb;

/// GCM tag length mandated by DLMS (12 bytes, not the GCM default of 16).
pub const GCM_TAG_LEN: usize = 12;

type Gcm = AesGcm<Aes128, U12, U12>;

/// Suite-0 key material: the (global or dedicated) encryption key and the
/// authentication key.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKeys {
    encryption_key: Key<Aes128>,
    authentication_key: [u8; 16],
}

impl CipherKeys {
    pub fn new(encryption_key: [u8; 16], authentication_key: [u8; 16]) -> Self {
        Self { encryption_key: encryption_key.into(), authentication_key }
    }

    fn cipher(&self) -> Gcm {
        Gcm::new(&self.encryption_key)
    }

    fn nonce(system_title: [u8; 8], invocation_counter: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&system_title);
        nonce[8..].copy_from_slice(&invocation_counter.to_be_bytes());
        nonce
    }

    fn associated_data(&self, security_control: SecurityControl, payload: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(1 + self.authentication_key.len() + payload.len());
        aad.push(security_control.to_byte());
        aad.extend_from_slice(&self.authentication_key);
        aad.extend_from_slice(payload);
        aad
    }

    /// Compute the HLS-GMAC reply for a received challenge:
    /// `SC(0x10) || IC(4 BE) || GMAC tag(12)`.
    pub fn gmac_challenge_response(
        &self,
        system_title: [u8; 8],
        invocation_counter: u32,
        challenge: &[u8],
    ) -> Vec<u8> {
        let security_control = SecurityControl::authenticated_only();
        let aad = self.associated_data(security_control, challenge);
        let nonce = Self::nonce(system_title, invocation_counter);

        let mut empty = [0u8; 0];
        let tag = self
            .cipher()
            .encrypt_in_place_detached(&nonce.into(), &aad, &mut empty)
            .expect("GMAC over empty plaintext cannot fail");

        let mut reply = Vec::with_capacity(5 + GCM_TAG_LEN);
        reply.push(security_control.to_byte());
        reply.push_u32(invocation_counter);
        reply.push_bytes(&tag);
        reply
    }

    /// Verify a peer's `f(challenge)` reply (`SC || IC || tag`) against the
    /// challenge we issued and the peer's system-title.
    pub fn verify_gmac_response(
        &self,
        peer_system_title: [u8; 8],
        challenge: &[u8],
        reply: &[u8],
    ) -> Result<(), crate::Error> {
        if reply.len() != 5 + GCM_TAG_LEN {
            return Err(crate::Error::AuthenticationFailed);
        }
        let security_control = SecurityControl::from_byte(reply[0]);
        if !security_control.authenticated() {
            return Err(crate::Error::AuthenticationFailed);
        }
        let invocation_counter = u32::from_be_bytes([reply[1], reply[2], reply[3], reply[4]]);

        let aad = self.associated_data(security_control, challenge);
        let nonce = Self::nonce(peer_system_title, invocation_counter);
        let tag = aes_gcm::Tag::<U12>::from_slice(&reply[5..]);

        let mut empty = [0u8; 0];
        self.cipher()
            .decrypt_in_place_detached(&nonce.into(), &aad, &mut empty, tag)
            .map_err(|_| crate::Error::AuthenticationFailed)
    }
}

impl fmt::Debug for CipherKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("CipherKeys").finish_non_exhaustive()
    }
}

/// GeneralGlobalCipher APDU: the ciphering envelope around any xDLMS APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralGlobalCipher {
    pub system_title: [u8; 8],
    pub security_control: SecurityControl,
    pub invocation_counter: u32,
    /// `ciphertext || tag` when authenticated; plain ciphertext otherwise.
    pub ciphertext: Vec<u8>,
}

impl GeneralGlobalCipher {
    /// Wrap `plaintext` for transmission under the given control byte.
    pub fn protect(
        keys: &CipherKeys,
        security_control: SecurityControl,
        system_title: [u8; 8],
        invocation_counter: u32,
        plaintext: Vec<u8>,
    ) -> Self {
        let nonce = CipherKeys::nonce(system_title, invocation_counter);
        let mut buffer = plaintext;

        let ciphertext = match (security_control.authenticated(), security_control.encrypted()) {
            (true, true) => {
                let aad = keys.associated_data(security_control, &[]);
                let tag = keys
                    .cipher()
                    .encrypt_in_place_detached(&nonce.into(), &aad, &mut buffer)
                    .expect("AES-GCM encryption cannot fail for in-memory buffers");
                buffer.extend_from_slice(&tag);
                buffer
            }
            (true, false) => {
                // Authentication only: the payload stays in clear and is
                // covered by the GMAC via the associated data.
                let aad = keys.associated_data(security_control, &buffer);
                let mut empty = [0u8; 0];
                let tag = keys
                    .cipher()
                    .encrypt_in_place_detached(&nonce.into(), &aad, &mut empty)
                    .expect("GMAC over empty plaintext cannot fail");
                buffer.extend_from_slice(&tag);
                buffer
            }
            (false, true) => {
                let tag_discarded = keys
                    .cipher()
                    .encrypt_in_place_detached(&nonce.into(), &[], &mut buffer)
                    .expect("AES-GCM encryption cannot fail for in-memory buffers");
                let _ = tag_discarded;
                buffer
            }
            (false, false) => buffer,
        };

        Self { system_title, security_control, invocation_counter, ciphertext }
    }

    /// Recover and verify the inner APDU bytes.
    ///
    /// Any authentication-tag mismatch surfaces as `DecryptionError`; callers
    /// never see the underlying cipher error.
    pub fn unprotect(&self, keys: &CipherKeys) -> Result<Vec<u8>, crate::Error> {
        let nonce = CipherKeys::nonce(self.system_title, self.invocation_counter);

        match (self.security_control.authenticated(), self.security_control.encrypted()) {
            (true, true) => {
                if self.ciphertext.len() < GCM_TAG_LEN {
                    return Err(crate::Error::DecryptionError);
                }
                let split = self.ciphertext.len() - GCM_TAG_LEN;
                let mut buffer = self.ciphertext[..split].to_vec();
                let tag = aes_gcm::Tag::<U12>::from_slice(&self.ciphertext[split..]);
                let aad = keys.associated_data(self.security_control, &[]);
                keys.cipher()
                    .decrypt_in_place_detached(&nonce.into(), &aad, &mut buffer, tag)
                    .map_err(|_| crate::Error::DecryptionError)?;
                Ok(buffer)
            }
            (true, false) => {
                if self.ciphertext.len() < GCM_TAG_LEN {
                    return Err(crate::Error::DecryptionError);
                }
                let split = self.ciphertext.len() - GCM_TAG_LEN;
                let payload = &self.ciphertext[..split];
                let tag = aes_gcm::Tag::<U12>::from_slice(&self.ciphertext[split..]);
                let aad = keys.associated_data(self.security_control, payload);
                let mut empty = [0u8; 0];
                keys.cipher()
                    .decrypt_in_place_detached(&nonce.into(), &aad, &mut empty, tag)
                    .map_err(|_| crate::Error::DecryptionError)?;
                Ok(payload.to_vec())
            }
            (false, true) => {
                // The GCM keystream is its own inverse; re-encrypting the
                // ciphertext yields the plaintext.
                let mut buffer = self.ciphertext.clone();
                keys.cipher()
                    .encrypt_in_place_detached(&nonce.into(), &[], &mut buffer)
                    .map_err(|_| crate::Error::DecryptionError)?;
                Ok(buffer)
            }
            (false, false) => Ok(self.ciphertext.clone()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = 5 + self.ciphertext.len();
        let mut buf = Vec::with_capacity(10 + length_size(body_len) + body_len);
        buf.push(GENERAL_GLO_CIPHER_TAG);
        buf.push(8);
        buf.push_bytes(&self.system_title);
        push_length(&mut buf, body_len);
        buf.push(self.security_control.to_byte());
        buf.push_u32(self.invocation_counter);
        buf.push_bytes(&self.ciphertext);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, tag) = u8(input)?;
        if tag != GENERAL_GLO_CIPHER_TAG {
            return fail().parse(input);
        }
        let (input, title_len) = u8(input)?;
        if title_len != 8 {
            return fail().parse(input);
        }
        let (input, title) = take(8usize)(input)?;
        let mut system_title = [0u8; 8];
        system_title.copy_from_slice(title);

        let (input, body_len) = parse_length(input)?;
        if body_len < 5 {
            return fail().parse(input);
        }
        let (input, security_control) = SecurityControl::parse(input)?;
        let (input, invocation_counter) = be_u32(input)?;
        let (input, ciphertext) = take(body_len - 5)(input)?;

        Ok((
            input,
            Self {
                system_title,
                security_control,
                invocation_counter,
                ciphertext: ciphertext.to_vec(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EK: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];
    const AK: [u8; 16] = [
        0xd0, 0xd1, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xdb, 0xdc, 0xdd, 0xde,
        0xdf,
    ];
    const SYSTEM_TITLE: [u8; 8] = [0x4d, 0x4d, 0x4d, 0x00, 0x00, 0xbc, 0x61, 0x4e];

    fn keys() -> CipherKeys {
        CipherKeys::new(EK, AK)
    }

    #[test]
    fn test_protect_unprotect_authenticated_encrypted() {
        let plaintext = alloc::vec![0xc0, 0x01, 0xc1, 0x00, 0x0f];
        let envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_and_encrypted(),
            SYSTEM_TITLE,
            1,
            plaintext.clone(),
        );

        assert_eq!(envelope.ciphertext.len(), plaintext.len() + GCM_TAG_LEN);
        assert_ne!(&envelope.ciphertext[..plaintext.len()], plaintext.as_slice());
        assert_eq!(envelope.unprotect(&keys()).unwrap(), plaintext);
    }

    #[test]
    fn test_tampered_ciphertext_is_decryption_error() {
        let mut envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_and_encrypted(),
            SYSTEM_TITLE,
            7,
            alloc::vec![1, 2, 3, 4],
        );
        envelope.ciphertext[0] ^= 0x80;

        assert_eq!(envelope.unprotect(&keys()), Err(crate::Error::DecryptionError));
    }

    #[test]
    fn test_wrong_invocation_counter_fails_authentication() {
        let mut envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_and_encrypted(),
            SYSTEM_TITLE,
            7,
            alloc::vec![1, 2, 3, 4],
        );
        envelope.invocation_counter = 8;

        assert_eq!(envelope.unprotect(&keys()), Err(crate::Error::DecryptionError));
    }

    #[test]
    fn test_authenticated_only_keeps_payload_clear() {
        let plaintext = alloc::vec![0xc0, 0x01, 0x81, 0x00, 0x01];
        let envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_only(),
            SYSTEM_TITLE,
            3,
            plaintext.clone(),
        );

        assert_eq!(&envelope.ciphertext[..plaintext.len()], plaintext.as_slice());
        assert_eq!(envelope.unprotect(&keys()).unwrap(), plaintext);

        let mut tampered = envelope.clone();
        tampered.ciphertext[1] ^= 0x01;
        assert_eq!(tampered.unprotect(&keys()), Err(crate::Error::DecryptionError));
    }

    #[test]
    fn test_encrypted_only_roundtrip() {
        let plaintext = alloc::vec![0xaa; 40];
        let mut security_control = SecurityControl::new();
        security_control.set_encrypted(true);

        let envelope = GeneralGlobalCipher::protect(
            &keys(),
            security_control,
            SYSTEM_TITLE,
            9,
            plaintext.clone(),
        );

        assert_eq!(envelope.ciphertext.len(), plaintext.len());
        assert_ne!(envelope.ciphertext, plaintext);
        assert_eq!(envelope.unprotect(&keys()).unwrap(), plaintext);
    }

    #[test]
    fn test_envelope_wire_roundtrip() {
        let envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_and_encrypted(),
            SYSTEM_TITLE,
            0x0102_0304,
            alloc::vec![0x11; 20],
        );

        let encoded = envelope.encode();
        assert_eq!(encoded[0], GENERAL_GLO_CIPHER_TAG);
        assert_eq!(encoded[1], 8);
        assert_eq!(&encoded[2..10], &SYSTEM_TITLE);
        // body = SC + IC + 20 ciphertext bytes + 12 tag bytes
        assert_eq!(encoded[10] as usize, 5 + 32);
        assert_eq!(encoded[11], 0x30);
        assert_eq!(&encoded[12..16], &[0x01, 0x02, 0x03, 0x04]);

        let (rest, parsed) = GeneralGlobalCipher::parse(&encoded).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_envelope_long_payload_roundtrip() {
        let envelope = GeneralGlobalCipher::protect(
            &keys(),
            SecurityControl::authenticated_and_encrypted(),
            SYSTEM_TITLE,
            2,
            alloc::vec![0x22; 300],
        );

        let encoded = envelope.encode();
        // length of SC + IC + ciphertext + tag needs the two-byte long form
        assert_eq!(encoded[10], 0x82);

        let (_, parsed) = GeneralGlobalCipher::parse(&encoded).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.unprotect(&keys()).unwrap(), alloc::vec![0x22; 300]);
    }

    #[test]
    fn test_envelope_parse_rejects_bad_header() {
        assert!(GeneralGlobalCipher::parse(&[0xda, 0x08]).is_err());
        assert!(GeneralGlobalCipher::parse(&[0xdb, 0x07, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_gmac_challenge_reply_verifies() {
        let challenge = [0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57];
        let reply = keys().gmac_challenge_response(SYSTEM_TITLE, 42, &challenge);

        assert_eq!(reply.len(), 17);
        assert_eq!(reply[0], 0x10);
        assert_eq!(&reply[1..5], &[0, 0, 0, 42]);

        assert!(keys().verify_gmac_response(SYSTEM_TITLE, &challenge, &reply).is_ok());
    }

    #[test]
    fn test_gmac_reply_fails_for_wrong_challenge() {
        let reply = keys().gmac_challenge_response(SYSTEM_TITLE, 42, b"challenge");
        assert_eq!(
            keys().verify_gmac_response(SYSTEM_TITLE, b"different", &reply),
            Err(crate::Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_gmac_reply_fails_for_wrong_title_or_shape() {
        let challenge = b"challenge";
        let reply = keys().gmac_challenge_response(SYSTEM_TITLE, 1, challenge);

        let mut other_title = SYSTEM_TITLE;
        other_title[7] ^= 0xff;
        assert_eq!(
            keys().verify_gmac_response(other_title, challenge, &reply),
            Err(crate::Error::AuthenticationFailed)
        );
        assert_eq!(
            keys().verify_gmac_response(SYSTEM_TITLE, challenge, &reply[..16]),
            Err(crate::Error::AuthenticationFailed)
        );
    }
}
