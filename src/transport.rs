//! The blocking byte-transport contract consumed by the protocol core.
//!
//! A transport delivers opaque byte messages: the TCP wrapper reads
//! length-prefixed payloads, the HDLC link delivers reassembled information
//! fields. The client facade only ever calls `send`/`recv`.

#[cfg(feature = "std")]
use std::time::Duration;

/// A blocking, message-oriented transport.
pub trait Transport: core::fmt::Debug {
    type Error: core::fmt::Debug;

    /// Send one complete outbound message.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive one inbound message into `buffer`, returning its length.
    /// Returns 0 when the peer closed the connection.
    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Receive with an explicit timeout. The default ignores the timeout;
    /// transports that can honor one override this.
    #[cfg(feature = "std")]
    fn recv_timeout(&mut self, buffer: &mut [u8], _timeout: Duration) -> Result<usize, Self::Error> {
        self.recv(buffer)
    }

    /// Whether an error is a read/connect timeout. Lets the connection layer
    /// surface timeouts distinctly from other transport failures.
    fn is_timeout(_error: &Self::Error) -> bool {
        false
    }
}

#[cfg(feature = "transport-tcp")]
pub mod tcp;
