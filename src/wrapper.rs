//! DLMS-over-TCP wrapper framing (IEC 62056-47).
//!
//! Every application payload is prefixed by an 8-byte header:
//! `version(2 BE) | source wPort(2 BE) | destination wPort(2 BE) | length(2 BE)`.
//! TCP delivers arbitrary chunks, so the reader loops until the header and
//! the full `length` bytes have arrived; short reads never fail a decode.

use alloc::vec::Vec;

use crate::data::ByteWriter;
use crate::transport::Transport;

pub const WRAPPER_VERSION: u16 = 0x0001;
pub const WRAPPER_HEADER_LEN: usize = 8;

/// The 8-byte wrapper header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    pub source_wport: u16,
    pub destination_wport: u16,
    pub length: u16,
}

impl WrapperHeader {
    pub fn encode(&self) -> [u8; WRAPPER_HEADER_LEN] {
        let mut header = [0u8; WRAPPER_HEADER_LEN];
        header[..2].copy_from_slice(&WRAPPER_VERSION.to_be_bytes());
        header[2..4].copy_from_slice(&self.source_wport.to_be_bytes());
        header[4..6].copy_from_slice(&self.destination_wport.to_be_bytes());
        header[6..].copy_from_slice(&self.length.to_be_bytes());
        header
    }

    pub fn decode(bytes: &[u8; WRAPPER_HEADER_LEN]) -> Result<Self, crate::Error> {
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version != WRAPPER_VERSION {
            return Err(crate::Error::Malformed);
        }
        Ok(Self {
            source_wport: u16::from_be_bytes([bytes[2], bytes[3]]),
            destination_wport: u16::from_be_bytes([bytes[4], bytes[5]]),
            length: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }
}

/// Errors of the wrapper layer, parameterized by the inner transport error.
#[derive(Debug)]
pub enum WrapperError<E> {
    Transport(E),
    /// Peer closed the stream mid-message.
    ConnectionClosed,
    /// Bad version or port mismatch.
    InvalidHeader,
}

impl<E: core::fmt::Debug + core::fmt::Display> core::fmt::Display for WrapperError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::InvalidHeader => write!(f, "invalid wrapper header"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: core::fmt::Debug + core::fmt::Display> std::error::Error for WrapperError<E> {}

/// Wrapper framing layered over a raw stream transport.
///
/// `client_wport` is the client SAP, `server_wport` the logical device;
/// outbound headers carry `(client, server)`, inbound frames are expected
/// with the ports mirrored.
#[derive(Debug)]
pub struct WrapperTransport<T: Transport> {
    inner: T,
    client_wport: u16,
    server_wport: u16,
}

impl<T: Transport> WrapperTransport<T> {
    pub fn new(inner: T, client_wport: u16, server_wport: u16) -> Self {
        Self { inner, client_wport, server_wport }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Read exactly `target.len()` bytes, looping over partial reads.
    fn recv_exact(&mut self, target: &mut [u8]) -> Result<(), WrapperError<T::Error>> {
        let mut filled = 0;
        while filled < target.len() {
            let n =
                self.inner.recv(&mut target[filled..]).map_err(WrapperError::Transport)?;
            if n == 0 {
                return Err(WrapperError::ConnectionClosed);
            }
            filled += n;
        }
        Ok(())
    }

    /// Receive one wrapper-framed payload.
    pub fn recv_payload(&mut self) -> Result<Vec<u8>, WrapperError<T::Error>> {
        let mut header_bytes = [0u8; WRAPPER_HEADER_LEN];
        self.recv_exact(&mut header_bytes)?;
        let header =
            WrapperHeader::decode(&header_bytes).map_err(|_| WrapperError::InvalidHeader)?;

        let mut payload = alloc::vec![0u8; header.length as usize];
        self.recv_exact(&mut payload)?;

        log::trace!(
            "wrapper rx: {} bytes from wport {}",
            payload.len(),
            header.source_wport
        );
        Ok(payload)
    }
}

impl<T: Transport> Transport for WrapperTransport<T> {
    type Error = WrapperError<T::Error>;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let header = WrapperHeader {
            source_wport: self.client_wport,
            destination_wport: self.server_wport,
            length: data.len() as u16,
        };

        let mut message = Vec::with_capacity(WRAPPER_HEADER_LEN + data.len());
        message.push_bytes(&header.encode());
        message.push_bytes(data);

        log::trace!("wrapper tx: {} bytes to wport {}", data.len(), self.server_wport);
        self.inner.send(&message).map_err(WrapperError::Transport)
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let payload = self.recv_payload()?;
        if payload.len() > buffer.len() {
            return Err(WrapperError::InvalidHeader);
        }
        buffer[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    fn is_timeout(error: &Self::Error) -> bool {
        match error {
            WrapperError::Transport(inner) => T::is_timeout(inner),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;

    /// Stream mock that hands out reads in scripted chunk sizes.
    #[derive(Debug, Default)]
    struct ChunkedStream {
        rx: VecDeque<u8>,
        chunk_sizes: VecDeque<usize>,
        tx: Vec<u8>,
    }

    impl Transport for ChunkedStream {
        type Error = ();

        fn send(&mut self, data: &[u8]) -> Result<(), ()> {
            self.tx.extend_from_slice(data);
            Ok(())
        }

        fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, ()> {
            if self.rx.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunk_sizes.pop_front().unwrap_or(usize::MAX);
            let n = chunk.min(buffer.len()).min(self.rx.len());
            for slot in buffer.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let header = WrapperHeader {
            source_wport: 0x0001,
            destination_wport: 0x0010,
            length: payload.len() as u16,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_header_roundtrip() {
        let header = WrapperHeader { source_wport: 0x10, destination_wport: 1, length: 0x0b };
        let encoded = header.encode();
        assert_eq!(encoded, [0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x0b]);
        assert_eq!(WrapperHeader::decode(&encoded), Ok(header));
    }

    #[test]
    fn test_header_rejects_wrong_version() {
        let bytes = [0x00, 0x02, 0, 1, 0, 1, 0, 0];
        assert_eq!(WrapperHeader::decode(&bytes), Err(crate::Error::Malformed));
    }

    #[test]
    fn test_send_prefixes_header() {
        let mut wrapper = WrapperTransport::new(ChunkedStream::default(), 0x10, 0x01);
        wrapper.send(&[0xc0, 0x01, 0xc1]).unwrap();

        assert_eq!(
            wrapper.inner_mut().tx,
            [0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x03, 0xc0, 0x01, 0xc1]
        );
    }

    #[test]
    fn test_recv_collects_partial_reads() {
        // 200-byte payload delivered as 64 + 64 + 72 after the header
        let payload: Vec<u8> = (0..200u8).collect();
        let mut stream = ChunkedStream::default();
        stream.rx.extend(framed(&payload));
        stream.chunk_sizes.extend([8, 64, 64, 72]);

        let mut wrapper = WrapperTransport::new(stream, 0x10, 0x01);
        assert_eq!(wrapper.recv_payload().unwrap(), payload);
    }

    #[test]
    fn test_recv_header_split_across_reads() {
        let mut stream = ChunkedStream::default();
        stream.rx.extend(framed(&[0xaa, 0xbb]));
        stream.chunk_sizes.extend([3, 5, 2]);

        let mut wrapper = WrapperTransport::new(stream, 0x10, 0x01);
        assert_eq!(wrapper.recv_payload().unwrap(), [0xaa, 0xbb]);
    }

    #[test]
    fn test_recv_reports_closed_stream() {
        let mut stream = ChunkedStream::default();
        stream.rx.extend(&framed(&[1, 2, 3, 4])[..10]);

        let mut wrapper = WrapperTransport::new(stream, 0x10, 0x01);
        assert!(matches!(wrapper.recv_payload(), Err(WrapperError::ConnectionClosed)));
    }

    #[test]
    fn test_zero_length_payload() {
        let mut stream = ChunkedStream::default();
        stream.rx.extend(framed(&[]));

        let mut wrapper = WrapperTransport::new(stream, 0x10, 0x01);
        assert_eq!(wrapper.recv_payload().unwrap(), Vec::<u8>::new());
    }
}
