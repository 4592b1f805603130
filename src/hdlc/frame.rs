//! HDLC frame codec (ISO/IEC 13239, DLMS type-3 profile).
//!
//! ```text
//! 7E | format(2) | dest addr | src addr | control | [HCS(2)] | info | FCS(2) | 7E
//! ```
//!
//! The format field packs `(type=0xA : 4 | segmentation : 1 | length : 11)`;
//! `length` counts everything between the flags. The HCS is present only
//! when an information field follows. Both check sequences cover the frame
//! from the first format byte and travel little-endian.

use alloc::vec::Vec;

use nom::{
    IResult,
    error::{Error, ErrorKind},
};

use super::address::HdlcAddress;
use super::fcs::checksum;

pub const HDLC_FLAG: u8 = 0x7e;

/// Frame format type of the DLMS profile.
const FORMAT_TYPE: u16 = 0xa;
const SEGMENTATION_BIT: u16 = 0x0800;

/// LLC header prepended to outbound (command) information fields.
pub(crate) const LLC_REQUEST: [u8; 3] = [0xe6, 0xe6, 0x00];
/// LLC header expected on inbound (response) information fields.
pub(crate) const LLC_RESPONSE: [u8; 3] = [0xe6, 0xe7, 0x00];

/// The HDLC control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// I-frame with send/receive sequence numbers.
    Information { send_sequence: u8, receive_sequence: u8, poll_final: bool },
    ReceiveReady { receive_sequence: u8, poll_final: bool },
    ReceiveNotReady { receive_sequence: u8, poll_final: bool },
    /// Set Normal Response Mode - opens the connection.
    Snrm { poll_final: bool },
    Disconnect { poll_final: bool },
    UnnumberedAcknowledge { poll_final: bool },
    DisconnectedMode { poll_final: bool },
    FrameReject { poll_final: bool },
    /// Unnumbered information - a payload outside the sequenced flow.
    UnnumberedInformation { poll_final: bool },
}

impl Control {
    const POLL_FINAL_BIT: u8 = 0x10;

    pub fn to_byte(self) -> u8 {
        let pf = |on: bool| if on { Self::POLL_FINAL_BIT } else { 0 };
        match self {
            Self::Information { send_sequence, receive_sequence, poll_final } => {
                (receive_sequence & 7) << 5 | pf(poll_final) | (send_sequence & 7) << 1
            }
            Self::ReceiveReady { receive_sequence, poll_final } => {
                (receive_sequence & 7) << 5 | pf(poll_final) | 0x01
            }
            Self::ReceiveNotReady { receive_sequence, poll_final } => {
                (receive_sequence & 7) << 5 | pf(poll_final) | 0x05
            }
            Self::Snrm { poll_final } => 0x83 | pf(poll_final),
            Self::Disconnect { poll_final } => 0x43 | pf(poll_final),
            Self::UnnumberedAcknowledge { poll_final } => 0x63 | pf(poll_final),
            Self::DisconnectedMode { poll_final } => 0x0f | pf(poll_final),
            Self::FrameReject { poll_final } => 0x87 | pf(poll_final),
            Self::UnnumberedInformation { poll_final } => 0x03 | pf(poll_final),
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        let poll_final = byte & Self::POLL_FINAL_BIT != 0;
        if byte & 0x01 == 0 {
            return Some(Self::Information {
                send_sequence: (byte >> 1) & 7,
                receive_sequence: (byte >> 5) & 7,
                poll_final,
            });
        }
        if byte & 0x03 == 0x01 {
            let receive_sequence = (byte >> 5) & 7;
            return match byte & 0x0f {
                0x01 => Some(Self::ReceiveReady { receive_sequence, poll_final }),
                0x05 => Some(Self::ReceiveNotReady { receive_sequence, poll_final }),
                _ => None,
            };
        }
        match byte & !Self::POLL_FINAL_BIT {
            0x83 => Some(Self::Snrm { poll_final }),
            0x43 => Some(Self::Disconnect { poll_final }),
            0x63 => Some(Self::UnnumberedAcknowledge { poll_final }),
            0x0f => Some(Self::DisconnectedMode { poll_final }),
            0x87 => Some(Self::FrameReject { poll_final }),
            0x03 => Some(Self::UnnumberedInformation { poll_final }),
            _ => None,
        }
    }
}

/// One decoded HDLC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub destination: HdlcAddress,
    pub source: HdlcAddress,
    pub control: Control,
    pub segmented: bool,
    pub information: Vec<u8>,
}

impl HdlcFrame {
    pub fn new(
        destination: HdlcAddress,
        source: HdlcAddress,
        control: Control,
        segmented: bool,
        information: Vec<u8>,
    ) -> Self {
        Self { destination, source, control, segmented, information }
    }

    /// Encode the frame including both flag bytes.
    pub fn encode(&self) -> Vec<u8> {
        let header_len =
            2 + self.destination.byte_length() + self.source.byte_length() + 1;
        let hcs_len = if self.information.is_empty() { 0 } else { 2 };
        let frame_len = header_len + hcs_len + self.information.len() + 2;

        let mut buf = Vec::with_capacity(frame_len + 2);
        buf.push(HDLC_FLAG);

        let format = FORMAT_TYPE << 12
            | if self.segmented { SEGMENTATION_BIT } else { 0 }
            | (frame_len as u16 & 0x07ff);
        buf.extend_from_slice(&format.to_be_bytes());
        self.destination.push(&mut buf);
        self.source.push(&mut buf);
        buf.push(self.control.to_byte());

        if !self.information.is_empty() {
            let hcs = checksum(&buf[1..]);
            buf.extend_from_slice(&hcs.to_le_bytes());
            buf.extend_from_slice(&self.information);
        }

        let fcs = checksum(&buf[1..]);
        buf.extend_from_slice(&fcs.to_le_bytes());
        buf.push(HDLC_FLAG);
        buf
    }

    /// Parse one flag-delimited frame; returns `Incomplete` until the whole
    /// frame (including the closing flag) is available.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        if input.is_empty() {
            return Err(nom::Err::Incomplete(nom::Needed::new(1)));
        }
        if input[0] != HDLC_FLAG {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }
        if input.len() < 3 {
            return Err(nom::Err::Incomplete(nom::Needed::new(3 - input.len())));
        }

        let format = u16::from_be_bytes([input[1], input[2]]);
        if format >> 12 != FORMAT_TYPE {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }
        let segmented = format & SEGMENTATION_BIT != 0;
        let frame_len = (format & 0x07ff) as usize;

        let total = frame_len + 2;
        if input.len() < total {
            return Err(nom::Err::Incomplete(nom::Needed::new(total - input.len())));
        }
        if frame_len < 7 || input[total - 1] != HDLC_FLAG {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
        }

        // Everything between the flags.
        let body = &input[1..1 + frame_len];

        let fcs = u16::from_le_bytes([body[frame_len - 2], body[frame_len - 1]]);
        if checksum(&body[..frame_len - 2]) != fcs {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
        }

        let after_format = &body[2..frame_len - 2];
        let (rest, destination) = HdlcAddress::parse(after_format)?;
        let (rest, source) = HdlcAddress::parse(rest)?;
        let (rest, control_byte) = match rest.split_first() {
            Some((&byte, rest)) => (rest, byte),
            None => return Err(nom::Err::Error(Error::new(input, ErrorKind::Eof))),
        };
        let control = Control::from_byte(control_byte)
            .ok_or(nom::Err::Error(Error::new(input, ErrorKind::Tag)))?;

        let information = if rest.is_empty() {
            Vec::new()
        } else {
            if rest.len() < 2 {
                return Err(nom::Err::Error(Error::new(input, ErrorKind::Eof)));
            }
            // format + addresses + control, i.e. everything before the HCS
            let header_len = frame_len - 2 - rest.len();
            let hcs = u16::from_le_bytes([rest[0], rest[1]]);
            if checksum(&body[..header_len]) != hcs {
                return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
            }
            rest[2..].to_vec()
        };

        Ok((
            &input[total..],
            Self { destination, source, control, segmented, information },
        ))
    }
}
