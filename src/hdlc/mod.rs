//! HDLC data-link layer (IEC 62056-46).
//!
//! [`frame`] encodes and decodes single frames, [`address`] the 1/2/4-byte
//! station addresses, [`fcs`] the CRC-16/X.25 check sequences and
//! [`connection`] drives a connected link over any byte transport.

pub use self::address::{HdlcAddress, reserved};
#[cfg(feature = "transport-hdlc")]
pub use self::connection::{DEFAULT_MAX_INFORMATION, HdlcError, HdlcLink, HdlcSettings};
pub use self::frame::{Control, HDLC_FLAG, HdlcFrame};

pub mod address;
#[cfg(feature = "transport-hdlc")]
pub mod connection;
mod fcs;
pub mod frame;
