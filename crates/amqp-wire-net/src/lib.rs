//! Byte Transport capability set: a small send/recv/open/close surface
//! with two implementations, plain TCP and TLS. This crate has no
//! notion of AMQP framing; it moves bytes for `amqp-wire`'s connection
//! engine and translates OS/TLS errors into the shared [`WireError`]
//! taxonomy.

mod tcp;
mod tls;

use std::{io::IoSlice, os::fd::RawFd, time::Duration};

pub use amqp_wire_util::{WireError, WireResult};
pub use tcp::TcpByteTransport;
pub use tls::{TlsByteTransport, TlsConfig};

/// `{send, scatter_send, recv, open, close, get_fd, destroy}` from the
/// wire spec, minus `open` and `destroy`: `open` is a constructor on
/// each concrete type (the signature differs per transport — TLS needs
/// a `TlsConfig`, plain TCP doesn't), and `destroy` is simply dropping
/// the value; both concrete types additionally implement `Drop` to
/// close the underlying socket.
pub trait ByteTransport {
    /// Writes all of `buf`, or returns an error. Never a partial write
    /// from the caller's perspective.
    fn send(&mut self, buf: &[u8]) -> WireResult<()>;

    /// Scatter/gather send of `parts` concatenated logically, without
    /// copying them together first. Used for BODY frames: header,
    /// body fragment, footer.
    fn scatter_send(&mut self, parts: &[IoSlice<'_>]) -> WireResult<()>;

    /// Reads at least one byte into `buf`, returning the number read.
    /// A return of `Err(WireError::ConnectionClosed)` signals the peer
    /// closed the stream (maps the `0` return of a raw `recv`).
    fn recv(&mut self, buf: &mut [u8]) -> WireResult<usize>;

    /// Closes the transport. Idempotent.
    fn close(&mut self);

    fn get_fd(&self) -> RawFd;
}

/// External byte source for a connection engine's streaming send path:
/// lets a large message body be produced lazily instead of being
/// fully materialized before the send call.
pub trait BodySource {
    /// Bytes immediately available from `peek`, or a negative value if
    /// the source has failed.
    fn available(&mut self) -> i32;

    /// The bytes currently available; valid until the next `consume`.
    fn peek(&self) -> &[u8];

    /// Marks `n` bytes (`n <= peek().len()`) as sent.
    fn consume(&mut self, n: usize);
}

/// Cumulative wall-clock budget for a single blocked `send`/`recv`
/// call on the TLS transport before it gives up and reports
/// `SocketError`, per spec.md §4.7 and grounded in
/// `amqp_ssl_socket_send_inner`'s ~1000ms cutoff.
const TLS_IO_TIMEOUT: Duration = Duration::from_millis(1000);
