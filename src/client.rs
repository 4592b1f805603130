//! DLMS client: association state machine and synchronous facade.
//!
//! [`sync::DlmsSession`] is the transport-free state machine - it produces
//! request bytes and consumes response bytes while enforcing association
//! state, service ordering and the ciphering policy.
//! [`sync::DlmsClient`] glues a session to a blocking [`crate::transport::Transport`].

use crate::obis_code::ObisCode;

/// Interface class of "Association LN" objects.
pub const ASSOCIATION_LN_CLASS_ID: u16 = 15;

/// The current association object.
pub const ASSOCIATION_LN_OBIS: ObisCode = ObisCode::new(0, 0, 40, 0, 0, 255);

/// Association LN method invoked with `f(StoC)` during HLS pass 3.
pub const REPLY_TO_HLS_METHOD_ID: i8 = 1;

/// Default receive buffer for APDU responses.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Framing headroom reserved when chunking SET block transfers against the
/// negotiated PDU size.
pub const SET_BLOCK_OVERHEAD: usize = 32;

/// Bounds for HLS challenge lengths.
pub const MIN_CHALLENGE_LEN: usize = 8;
pub const MAX_CHALLENGE_LEN: usize = 64;

#[cfg(feature = "client")]
pub mod sync;

#[cfg(feature = "client")]
pub use sync::{
    AssociationState, AssociationSummary, Authentication, Buffer, ClientBuilder, ClientError,
    ClientSettings, DlmsClient, DlmsSession, SecuritySettings,
};
