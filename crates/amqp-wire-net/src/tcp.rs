use std::{
    io::{self, IoSlice, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use amqp_wire_util::{WireError, WireResult};
use tracing::{debug, warn};

use crate::ByteTransport;

/// Plain-TCP byte transport.
///
/// A thin, blocking wrapper around `std::net::TcpStream`: no internal
/// framing, no event loop. Connect timeouts and kernel socket-buffer
/// sizing are its only responsibilities beyond send/recv.
pub struct TcpByteTransport {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl TcpByteTransport {
    /// Default kernel socket buffer size applied to both directions;
    /// matches the donor's `TcpStream::SEND_BUF_SIZE` convention of
    /// tuning both send and receive buffers together.
    pub const SOCKET_BUF_SIZE: usize = 32 * 1024;

    /// `open(host, port, timeout)` from the wire spec's Byte Transport
    /// capability set.
    pub fn open(host: &str, port: u16, timeout: Duration) -> WireResult<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|err| {
                warn!(?err, host, port, "tcp: failed to resolve address");
                WireError::SocketError
            })?
            .next()
            .ok_or(WireError::SocketError)?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|err| {
            warn!(?err, %addr, "tcp: connect failed");
            WireError::SocketError
        })?;

        stream.set_nodelay(true).map_err(|_| WireError::SocketError)?;
        set_socket_buf_size(&stream, Self::SOCKET_BUF_SIZE);

        let peer_addr = stream.peer_addr().map_err(|_| WireError::SocketError)?;
        Ok(Self { stream, peer_addr })
    }

    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl ByteTransport for TcpByteTransport {
    fn send(&mut self, buf: &[u8]) -> WireResult<()> {
        self.stream.write_all(buf).map_err(|err| {
            debug!(?err, "tcp: send failed");
            WireError::SocketError
        })
    }

    fn scatter_send(&mut self, parts: &[IoSlice<'_>]) -> WireResult<()> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        loop {
            match self.stream.write_vectored(parts) {
                Ok(0) if total > 0 => return Err(WireError::SocketError),
                Ok(n) if n >= total => return Ok(()),
                Ok(n) => {
                    // Short vectored write: flatten the unwritten
                    // remainder and finish with a plain send. A short
                    // write here is rare enough (kernel socket buffer
                    // pressure) that copying the remainder is fine.
                    let remainder: Vec<u8> =
                        parts.iter().flat_map(|p| p.iter().copied()).skip(n).collect();
                    return self.send(&remainder);
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(?err, "tcp: scatter_send failed");
                    return Err(WireError::SocketError);
                }
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> WireResult<usize> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => return Ok(n),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(?err, "tcp: recv failed");
                    return Err(WireError::SocketError);
                }
            }
        }
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn get_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Drop for TcpByteTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sets kernel `SO_SNDBUF` and `SO_RCVBUF` on a raw TCP stream.
fn set_socket_buf_size(stream: &TcpStream, size: usize) {
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&size as *const libc::c_int).cast::<libc::c_void>(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            (&size as *const libc::c_int).cast::<libc::c_void>(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read as _, net::TcpListener, thread};

    use super::*;

    #[test]
    fn open_connects_and_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            buf
        });

        let mut transport =
            TcpByteTransport::open("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
        transport.send(b"hello").unwrap();

        assert_eq!(&server.join().unwrap(), b"hello");
    }

    #[test]
    fn recv_reports_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (_sock, _) = listener.accept().unwrap();
            // dropping sock closes immediately
        });

        let mut transport =
            TcpByteTransport::open("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
        server.join().unwrap();

        let mut buf = [0u8; 16];
        let mut last = Ok(0);
        for _ in 0..100 {
            last = transport.recv(&mut buf);
            if last.is_err() {
                break;
            }
        }
        assert_eq!(last, Err(WireError::ConnectionClosed));
    }
}
