//! The HDLC link engine: connection establishment (SNRM/UA), modulo-8
//! I-frame sequencing, segmentation and reassembly.
//!
//! The engine layers over any byte [`Transport`] and is itself a
//! [`Transport`]: `send` frames an APDU into one or more I-frames, `recv`
//! reassembles the peer's I-frames into one APDU.

use alloc::vec::Vec;
use core::fmt;

use super::address::{HdlcAddress, reserved};
use super::frame::{Control, HdlcFrame, LLC_REQUEST, LLC_RESPONSE};
use crate::transport::Transport;

/// Modulus of the N(S)/N(R) counters.
const SEQUENCE_MODULO: u8 = 8;

/// Default information-field limit before negotiation.
pub const DEFAULT_MAX_INFORMATION: u16 = 128;

#[derive(Debug, Clone)]
pub struct HdlcSettings {
    pub client_address: HdlcAddress,
    pub server_address: HdlcAddress,
    pub max_information_transmit: u16,
    pub max_information_receive: u16,
    pub window_transmit: u8,
    pub window_receive: u8,
}

impl Default for HdlcSettings {
    fn default() -> Self {
        Self {
            client_address: HdlcAddress::new(reserved::CLIENT_PUBLIC).unwrap(),
            server_address: HdlcAddress::new(reserved::SERVER_MANAGEMENT_LOGICAL_DEVICE).unwrap(),
            max_information_transmit: DEFAULT_MAX_INFORMATION,
            max_information_receive: DEFAULT_MAX_INFORMATION,
            window_transmit: 1,
            window_receive: 1,
        }
    }
}

/// Errors of the HDLC link, parameterized by the byte-transport error.
#[derive(Debug)]
pub enum HdlcError<E> {
    Transport(E),
    ConnectionClosed,
    /// Frame failed checksum verification or could not be parsed.
    InvalidFrame,
    /// An I-frame arrived with `N(S) != V(R)`; it was not delivered.
    SequenceMismatch { expected: u8, received: u8 },
    /// A frame type the current link state cannot use (including DM/FRMR).
    UnexpectedFrame,
    NotConnected,
}

impl<E: fmt::Debug> fmt::Display for HdlcError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {:?}", e),
            Self::ConnectionClosed => write!(f, "link closed by peer"),
            Self::InvalidFrame => write!(f, "invalid HDLC frame"),
            Self::SequenceMismatch { expected, received } => {
                write!(f, "sequence mismatch: expected N(S)={}, got {}", expected, received)
            }
            Self::UnexpectedFrame => write!(f, "unexpected frame for link state"),
            Self::NotConnected => write!(f, "link not connected"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for HdlcError<E> {}

/// The SNRM/UA parameter group (format id 0x81, group id 0x80).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NegotiationParameters {
    max_information_transmit: u16,
    max_information_receive: u16,
    window_transmit: u8,
    window_receive: u8,
}

impl NegotiationParameters {
    const FORMAT_ID: u8 = 0x81;
    const GROUP_ID: u8 = 0x80;

    const MAX_INFO_TRANSMIT: u8 = 0x05;
    const MAX_INFO_RECEIVE: u8 = 0x06;
    const WINDOW_TRANSMIT: u8 = 0x07;
    const WINDOW_RECEIVE: u8 = 0x08;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        buf.push(Self::FORMAT_ID);
        buf.push(Self::GROUP_ID);
        buf.push(14);
        for (id, value) in [
            (Self::MAX_INFO_TRANSMIT, self.max_information_transmit),
            (Self::MAX_INFO_RECEIVE, self.max_information_receive),
        ] {
            buf.push(id);
            buf.push(2);
            buf.extend_from_slice(&value.to_be_bytes());
        }
        for (id, value) in [
            (Self::WINDOW_TRANSMIT, self.window_transmit),
            (Self::WINDOW_RECEIVE, self.window_receive),
        ] {
            buf.push(id);
            buf.push(1);
            buf.push(value);
        }
        buf
    }

    /// Overlay the parameters present in `info` onto `self`. Meters answer
    /// with one-, two- or four-byte values; all are accepted.
    fn parse_into(&mut self, info: &[u8]) {
        let Some((&format_id, rest)) = info.split_first() else { return };
        if format_id != Self::FORMAT_ID || rest.len() < 2 || rest[0] != Self::GROUP_ID {
            return;
        }
        let group_len = rest[1] as usize;
        let Some(mut group) = rest.get(2..2 + group_len) else { return };

        while let [id, len, tail @ ..] = group {
            let len = *len as usize;
            if len == 0 || len > 4 || tail.len() < len {
                return;
            }
            let mut value = 0u32;
            for &b in &tail[..len] {
                value = value << 8 | b as u32;
            }
            match *id {
                Self::MAX_INFO_TRANSMIT => self.max_information_transmit = value as u16,
                Self::MAX_INFO_RECEIVE => self.max_information_receive = value as u16,
                Self::WINDOW_TRANSMIT => self.window_transmit = value as u8,
                Self::WINDOW_RECEIVE => self.window_receive = value as u8,
                _ => {}
            }
            group = &tail[len..];
        }
    }
}

/// A connected HDLC data link over a byte transport.
#[derive(Debug)]
pub struct HdlcLink<T: Transport> {
    transport: T,
    settings: HdlcSettings,
    connected: bool,
    /// V(S): sequence number of the next I-frame to send.
    send_sequence: u8,
    /// V(R): sequence number of the next expected I-frame.
    receive_sequence: u8,
    max_information_transmit: u16,
    max_information_receive: u16,
    rx_buffer: Vec<u8>,
}

impl<T: Transport> HdlcLink<T> {
    pub fn new(transport: T, settings: HdlcSettings) -> Self {
        let max_information_transmit = settings.max_information_transmit;
        let max_information_receive = settings.max_information_receive;
        Self {
            transport,
            settings,
            connected: false,
            send_sequence: 0,
            receive_sequence: 0,
            max_information_transmit,
            max_information_receive,
            rx_buffer: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Negotiated outbound information-field limit.
    pub fn max_information_transmit(&self) -> u16 {
        self.max_information_transmit
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Open the link: SNRM with our parameter proposal, UA with the peer's.
    pub fn connect(&mut self) -> Result<(), HdlcError<T::Error>> {
        let mut proposal = NegotiationParameters {
            max_information_transmit: self.settings.max_information_transmit,
            max_information_receive: self.settings.max_information_receive,
            window_transmit: self.settings.window_transmit,
            window_receive: self.settings.window_receive,
        };

        self.send_frame(&HdlcFrame::new(
            self.settings.server_address,
            self.settings.client_address,
            Control::Snrm { poll_final: true },
            false,
            proposal.encode(),
        ))?;

        let frame = self.next_frame()?;
        match frame.control {
            Control::UnnumberedAcknowledge { .. } => {
                proposal.parse_into(&frame.information);
                self.max_information_transmit =
                    proposal.max_information_transmit.min(self.settings.max_information_transmit);
                self.max_information_receive = proposal.max_information_receive;
                self.send_sequence = 0;
                self.receive_sequence = 0;
                self.connected = true;
                log::debug!(
                    "HDLC link up, max info tx {} rx {}",
                    self.max_information_transmit,
                    self.max_information_receive
                );
                Ok(())
            }
            Control::DisconnectedMode { .. } | Control::FrameReject { .. } => {
                Err(HdlcError::UnexpectedFrame)
            }
            _ => Err(HdlcError::UnexpectedFrame),
        }
    }

    /// Close the link with DISC; UA and DM both count as closed.
    pub fn disconnect(&mut self) -> Result<(), HdlcError<T::Error>> {
        self.send_frame(&HdlcFrame::new(
            self.settings.server_address,
            self.settings.client_address,
            Control::Disconnect { poll_final: true },
            false,
            Vec::new(),
        ))?;

        let frame = self.next_frame()?;
        self.connected = false;
        match frame.control {
            Control::UnnumberedAcknowledge { .. } | Control::DisconnectedMode { .. } => Ok(()),
            _ => Err(HdlcError::UnexpectedFrame),
        }
    }

    /// Send one APDU, segmenting against the negotiated limit. Every
    /// non-final segment is acknowledged with RR before the next is sent
    /// (the negotiated window is 1).
    pub fn send_payload(&mut self, apdu: &[u8]) -> Result<(), HdlcError<T::Error>> {
        if !self.connected {
            return Err(HdlcError::NotConnected);
        }

        let mut payload = LLC_REQUEST.to_vec();
        payload.extend_from_slice(apdu);

        let limit = self.max_information_transmit.max(1) as usize;
        let mut chunks = payload.chunks(limit).peekable();

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let frame = HdlcFrame::new(
                self.settings.server_address,
                self.settings.client_address,
                Control::Information {
                    send_sequence: self.send_sequence,
                    receive_sequence: self.receive_sequence,
                    poll_final: true,
                },
                !last,
                chunk.to_vec(),
            );
            self.send_frame(&frame)?;
            self.send_sequence = (self.send_sequence + 1) % SEQUENCE_MODULO;

            if !last {
                self.wait_for_ack()?;
            }
        }

        Ok(())
    }

    /// Receive one APDU, reassembling segmented I-frames. A UI frame is
    /// delivered as-is, outside the sequenced flow.
    pub fn recv_payload(&mut self) -> Result<Vec<u8>, HdlcError<T::Error>> {
        if !self.connected {
            return Err(HdlcError::NotConnected);
        }

        let mut assembled: Vec<u8> = Vec::new();
        let mut first = true;

        loop {
            let frame = self.next_frame()?;
            match frame.control {
                Control::Information { send_sequence, .. } => {
                    if send_sequence != self.receive_sequence {
                        return Err(HdlcError::SequenceMismatch {
                            expected: self.receive_sequence,
                            received: send_sequence,
                        });
                    }
                    self.receive_sequence = (self.receive_sequence + 1) % SEQUENCE_MODULO;

                    let info = if first {
                        first = false;
                        strip_llc(&frame.information)?
                    } else {
                        &frame.information[..]
                    };
                    assembled.extend_from_slice(info);

                    if frame.segmented {
                        // poll for the next segment
                        self.send_frame(&HdlcFrame::new(
                            self.settings.server_address,
                            self.settings.client_address,
                            Control::ReceiveReady {
                                receive_sequence: self.receive_sequence,
                                poll_final: true,
                            },
                            false,
                            Vec::new(),
                        ))?;
                    } else {
                        return Ok(assembled);
                    }
                }
                Control::UnnumberedInformation { .. } if first => {
                    return Ok(strip_llc(&frame.information)?.to_vec());
                }
                Control::ReceiveReady { .. } => {}
                Control::Disconnect { .. } | Control::DisconnectedMode { .. } => {
                    self.connected = false;
                    return Err(HdlcError::ConnectionClosed);
                }
                _ => return Err(HdlcError::UnexpectedFrame),
            }
        }
    }

    fn wait_for_ack(&mut self) -> Result<(), HdlcError<T::Error>> {
        let frame = self.next_frame()?;
        match frame.control {
            Control::ReceiveReady { .. } => Ok(()),
            Control::ReceiveNotReady { .. } => Err(HdlcError::UnexpectedFrame),
            _ => Err(HdlcError::UnexpectedFrame),
        }
    }

    fn send_frame(&mut self, frame: &HdlcFrame) -> Result<(), HdlcError<T::Error>> {
        log::trace!("HDLC tx {:?}", frame.control);
        self.transport.send(&frame.encode()).map_err(HdlcError::Transport)
    }

    /// Extract the next well-formed frame from the byte stream, reading more
    /// bytes as needed and resynchronizing on framing errors.
    fn next_frame(&mut self) -> Result<HdlcFrame, HdlcError<T::Error>> {
        loop {
            // drop leading noise up to a flag byte
            if let Some(start) = self.rx_buffer.iter().position(|&b| b == super::frame::HDLC_FLAG)
            {
                if start > 0 {
                    self.rx_buffer.drain(..start);
                }
            } else {
                self.rx_buffer.clear();
            }

            // adjacent closing/opening flags collapse into one
            while self.rx_buffer.len() >= 2 && self.rx_buffer[1] == super::frame::HDLC_FLAG {
                self.rx_buffer.remove(0);
            }

            if !self.rx_buffer.is_empty() {
                let parsed = match HdlcFrame::parse(&self.rx_buffer) {
                    Ok((rest, frame)) => Some((self.rx_buffer.len() - rest.len(), frame)),
                    Err(nom::Err::Incomplete(_)) => None,
                    Err(_) => {
                        // corrupt frame: drop the opening flag and resync
                        self.rx_buffer.remove(0);
                        continue;
                    }
                };
                if let Some((consumed, frame)) = parsed {
                    self.rx_buffer.drain(..consumed);
                    log::trace!("HDLC rx {:?}", frame.control);
                    return Ok(frame);
                }
            }

            let mut chunk = [0u8; 2048];
            let n = self.transport.recv(&mut chunk).map_err(HdlcError::Transport)?;
            if n == 0 {
                self.connected = false;
                return Err(HdlcError::ConnectionClosed);
            }
            self.rx_buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn strip_llc<E>(information: &[u8]) -> Result<&[u8], HdlcError<E>> {
    information.strip_prefix(&LLC_RESPONSE[..]).ok_or(HdlcError::InvalidFrame)
}

impl<T: Transport> Transport for HdlcLink<T> {
    type Error = HdlcError<T::Error>;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_payload(data)
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let payload = self.recv_payload()?;
        if payload.len() > buffer.len() {
            return Err(HdlcError::InvalidFrame);
        }
        buffer[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    fn is_timeout(error: &Self::Error) -> bool {
        match error {
            HdlcError::Transport(inner) => T::is_timeout(inner),
            _ => false,
        }
    }
}
