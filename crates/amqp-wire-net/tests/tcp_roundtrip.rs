use std::{
    io::{IoSlice, Read, Write},
    net::TcpListener,
    thread,
    time::Duration,
};

use amqp_wire_net::{ByteTransport, TcpByteTransport};

/// Loopback round-trip: a plain `std` listener plays the server side so
/// the test exercises `TcpByteTransport` the way a real peer would see
/// it on the wire, not just against another `TcpByteTransport`.
#[test]
fn tcp_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();

        let mut header = [0u8; 7];
        sock.read_exact(&mut header).unwrap();
        assert_eq!(&header, b"AMQPhdr");

        sock.write_all(b"server-reply").unwrap();
    });

    let mut client =
        TcpByteTransport::open("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
    client.send(b"AMQPhdr").unwrap();

    server.join().unwrap();

    let mut buf = [0u8; 32];
    let n = client.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"server-reply");
}

/// `scatter_send` must deliver the concatenation of its parts, not each
/// part framed separately — this is how `Connection::send_frame` builds
/// a BODY frame out of header/fragment/footer without copying them
/// together first.
#[test]
fn tcp_scatter_send_concatenates_parts() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 11];
        sock.read_exact(&mut buf).unwrap();
        buf
    });

    let mut client =
        TcpByteTransport::open("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
    client
        .scatter_send(&[IoSlice::new(b"head:"), IoSlice::new(b"ABC"), IoSlice::new(b":end")])
        .unwrap();

    assert_eq!(&server.join().unwrap(), b"head:ABC:end");
}

/// The peer closing its half of the connection surfaces as
/// `ConnectionClosed`, not a silent zero-length read.
#[test]
fn tcp_recv_after_peer_shutdown_reports_connection_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        drop(sock);
    });

    let mut client =
        TcpByteTransport::open("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
    server.join().unwrap();

    let mut buf = [0u8; 16];
    let mut result = client.recv(&mut buf);
    for _ in 0..100 {
        if result.is_err() {
            break;
        }
        result = client.recv(&mut buf);
    }
    assert_eq!(result, Err(amqp_wire_net::WireError::ConnectionClosed));
}
