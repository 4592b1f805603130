//! A client-side DLMS/COSEM (IEC 62056) protocol engine.
//!
//! The crate is layered the way the protocol is:
//!
//! - [`data`] - the A-XDR codec: the recursive `Data` tree, DLMS length
//!   encoding and the COSEM date-time formats.
//! - [`apdu`] and the service modules ([`get`], [`set`], [`action`],
//!   [`data_notification`], [`exception`], [`association`]) - the closed
//!   registry of application PDUs.
//! - [`ciphering`] and [`security_control`] - AES-GCM-128 protection
//!   (security suite 0) and HLS-GMAC authentication.
//! - [`client`] - the association state machine and the synchronous facade.
//! - [`hdlc`], [`wrapper`], [`transport`] - HDLC framing, the 8-byte TCP
//!   wrapper and the blocking transport contract underneath both.
//!
//! Everything below the client facade is `no_std` (alloc only); the facade
//! and the TCP transport require `std`.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_debug_implementations)]

extern crate alloc;

use core::fmt;

pub mod action;
pub mod apdu;
pub mod association;
pub mod ciphering;
pub mod client;
pub mod cosem;
pub mod data;
pub mod data_notification;
pub mod exception;
pub mod get;
pub mod hdlc;
pub mod obis_code;
pub mod security_control;
pub mod selective_access;
pub mod set;
pub mod transport;
pub mod wrapper;

pub use apdu::Apdu;
pub use association::Conformance;
pub use ciphering::{CipherKeys, GeneralGlobalCipher};
pub use cosem::{CosemAttribute, CosemMethod};
pub use data::{BitString, Data, DataType, Date, DateTime, Time};
pub use data_notification::DataNotification;
pub use obis_code::ObisCode;
pub use security_control::SecurityControl;

/// Codec and security failures of the protocol core.
///
/// Transport and state-machine failures live in
/// [`client::sync::ClientError`], which embeds this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Bytes do not parse under the expected grammar.
    Malformed,
    /// Leading APDU tag has no registered decoder.
    UnknownApdu(u8),
    /// Data tag has no registered decoder.
    UnknownTag(u8),
    /// AES-GCM tag verification failed, or an invocation counter rolled
    /// back.
    DecryptionError,
    /// HLS challenge verification failed.
    AuthenticationFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed input"),
            Self::UnknownApdu(tag) => write!(f, "unknown APDU tag {:#04x}", tag),
            Self::UnknownTag(tag) => write!(f, "unknown data tag {:#04x}", tag),
            Self::DecryptionError => write!(f, "decryption failed"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(all(test, feature = "client", feature = "transport-hdlc"))]
mod lib_tests;
