//! Synchronous TCP transport.
//!
//! Carries raw stream bytes; pair it with [`crate::wrapper::WrapperTransport`]
//! for DLMS-over-TCP or with [`crate::hdlc::HdlcLink`] for HDLC-over-TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::transport::Transport;

/// IANA port registered for DLMS/COSEM over TCP.
pub const DEFAULT_DLMS_TCP_PORT: u16 = 4059;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect with the default timeouts and Nagle disabled.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_WRITE_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Orderly shutdown of both directions. Stateful meter modems leak
    /// half-open sessions when the socket is closed without one.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl Transport for TcpTransport {
    type Error = io::Error;

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream.read(buffer)
    }

    fn recv_timeout(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        let previous = self.stream.read_timeout()?;
        self.stream.set_read_timeout(Some(timeout))?;
        let result = self.stream.read(buffer);
        let restore = self.stream.set_read_timeout(previous);

        match (result, restore) {
            (Ok(n), Ok(())) => Ok(n),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    fn is_timeout(error: &Self::Error) -> bool {
        matches!(error.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_send_recv_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut transport = TcpTransport::connect(addr).unwrap();
        transport.send(&[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 16];
        let n = transport.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 4]);

        transport.shutdown().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut transport = TcpTransport::connect(addr).unwrap();
        let mut buf = [0u8; 8];
        let err = transport.recv_timeout(&mut buf, Duration::from_millis(50)).unwrap_err();
        assert!(TcpTransport::is_timeout(&err));

        drop(listener);
    }
}
