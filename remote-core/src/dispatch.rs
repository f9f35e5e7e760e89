//! The inbound-client handshake decoder and the business entry dispatcher:
//! the single hook the hosting event loop calls when bytes arrive on a
//! socket. Everything here is pure state-machine logic over the connection
//! table; the only side effect that reaches outside the table is the one
//! `connect_to` call made while opening a target.

use crate::cipher::Key;
use crate::connector::Connector;
use crate::frame::{self, FrameResult};
use crate::protocol::{self, ParseError};
use crate::rbtree::ConnTable;
use crate::record::{ConnRecord, Stage};
use crate::Fd;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

/// Outcome of one dispatch call. Carries a typed payload rather than a raw
/// integer since the caller also needs the freshly opened target socket to
/// register it for polling.
pub enum DispatchResult {
    /// Not enough bytes buffered yet for a complete frame.
    NeedMore,
    /// `consumed` bytes processed, no new connection opened.
    Consumed(usize),
    /// A target connection was opened and paired during this call. The
    /// event loop must register `stream` for polling under `target_fd` and
    /// flush the inbound-client's `send_buf` (now carrying the encrypted
    /// success reply) once writable.
    Opened {
        consumed: usize,
        target_fd: Fd,
        stream: TcpStream,
    },
    /// Fatal: the event loop must close and untrack `fd`, and (if teardown
    /// found a paired record) the returned peer fd too.
    Fatal { peer: Option<Fd> },
}

/// Dispatches `buf` (bytes newly arrived on `fd`) against the record's
/// current stage. Returns `Fatal` if `fd` has no record — that is an event
/// loop bug (dispatching on an untracked socket), not a protocol condition.
pub fn dispatch(
    table: &mut ConnTable<ConnRecord>,
    connector: &mut dyn Connector,
    key: &Key,
    fd: Fd,
    buf: &[u8],
) -> DispatchResult {
    let stage = match table.lookup(fd) {
        Some(rec) => rec.stage,
        None => return DispatchResult::Fatal { peer: None },
    };

    match stage {
        Stage::ExpectMethod => dispatch_handshake(table, connector, key, fd, buf),
        Stage::Stream => dispatch_stream(table, fd, buf),
        Stage::Closed => DispatchResult::Fatal { peer: None },
    }
}

fn dispatch_handshake(
    table: &mut ConnTable<ConnRecord>,
    connector: &mut dyn Connector,
    key: &Key,
    fd: Fd,
    buf: &[u8],
) -> DispatchResult {
    let (consumed, plaintext) = match frame::decode(buf, key) {
        FrameResult::NeedMore => return DispatchResult::NeedMore,
        FrameResult::Fatal => return DispatchResult::Fatal { peer: teardown(table, fd) },
        FrameResult::Consumed { consumed, plaintext } => (consumed, plaintext),
    };

    let body = match protocol::split_nonce(&plaintext) {
        Some((_, body)) => body,
        None => return DispatchResult::Fatal { peer: teardown(table, fd) },
    };

    let request = match protocol::parse_request(body) {
        Ok(request) => request,
        Err(ParseError::Truncated) | Err(ParseError::UnsupportedIpv6) | Err(ParseError::UnknownAddressType(_)) => {
            return DispatchResult::Fatal { peer: teardown(table, fd) }
        }
    };

    let host = request.address.host_string();

    let stream = match connector.connect_to(&host, request.port) {
        Ok(stream) => stream,
        Err(_) => return DispatchResult::Fatal { peer: teardown(table, fd) },
    };

    let target_fd = stream.as_raw_fd();
    table.insert(target_fd, ConnRecord::outbound_target(target_fd, fd, host.clone()));

    let reply_plaintext = protocol::build_reply(&request);
    let reply_frame = frame::encode(&reply_plaintext, key);

    let client = table
        .lookup_mut(fd)
        .expect("client record must still exist: only this call can have removed it, and it hasn't returned yet");
    client.peer = Some(target_fd);
    client.stage = Stage::Stream;
    client.host = host;
    client.send_buf.append(&reply_frame);

    DispatchResult::Opened { consumed, target_fd, stream }
}

fn dispatch_stream(table: &mut ConnTable<ConnRecord>, fd: Fd, buf: &[u8]) -> DispatchResult {
    // A stream-stage record with no peer is an internal inconsistency:
    // treated as fatal rather than guessing at retry semantics.
    let peer_fd = match table.lookup(fd).and_then(|rec| rec.peer) {
        Some(peer_fd) => peer_fd,
        None => return DispatchResult::Fatal { peer: teardown(table, fd) },
    };

    match table.lookup_mut(peer_fd) {
        Some(peer) => peer.send_buf.append(buf),
        None => return DispatchResult::Fatal { peer: teardown(table, fd) },
    }

    DispatchResult::Consumed(buf.len())
}

/// Removes `fd`'s record and, if it was paired, its peer's record too —
/// both halves of a tunnel close together. Returns the peer fd so the event
/// loop can shut down and deregister that socket as well; `None` means only
/// `fd` itself needed tearing down.
pub fn teardown(table: &mut ConnTable<ConnRecord>, fd: Fd) -> Option<Fd> {
    let peer = table.delete(fd).and_then(|rec| rec.peer);
    if let Some(peer_fd) = peer {
        table.delete(peer_fd);
    }
    peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Key;
    use byteorder::{BigEndian, ByteOrder};
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    struct LoopbackConnector {
        listener: TcpListener,
    }

    impl LoopbackConnector {
        fn new() -> LoopbackConnector {
            LoopbackConnector { listener: TcpListener::bind("127.0.0.1:0").unwrap() }
        }

        fn port(&self) -> u16 {
            self.listener.local_addr().unwrap().port()
        }
    }

    impl Connector for LoopbackConnector {
        fn connect_to(&mut self, _host: &str, port: u16) -> std::io::Result<StdTcpStream> {
            StdTcpStream::connect(("127.0.0.1", port)).map(|stream| {
                let _ = self.listener.accept();
                stream
            })
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        fn connect_to(&mut self, _host: &str, _port: u16) -> std::io::Result<StdTcpStream> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    fn test_key() -> Key {
        Key::from_password("dispatch test password")
    }

    fn ipv4_request_frame(key: &Key, port: u16) -> Vec<u8> {
        let mut plain = vec![0u8; protocol::NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, protocol::ATYP_IPV4]);
        plain.extend_from_slice(&[127, 0, 0, 1]);
        let mut port_bytes = [0u8; 2];
        BigEndian::write_u16(&mut port_bytes, port);
        plain.extend_from_slice(&port_bytes);
        frame::encode(&plain, key)
    }

    #[test]
    fn handshake_need_more_on_partial_frame() {
        let key = test_key();
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        let mut connector = FailingConnector;

        let result = dispatch(&mut table, &mut connector, &key, 10, &[0, 1, 2]);
        assert!(matches!(result, DispatchResult::NeedMore));
        assert_eq!(table.lookup(10).unwrap().stage, Stage::ExpectMethod);
    }

    #[test]
    fn handshake_ipv4_opens_and_pairs() {
        let key = test_key();
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        let mut connector = LoopbackConnector::new();
        let port = connector.port();

        let frame = ipv4_request_frame(&key, port);
        let result = dispatch(&mut table, &mut connector, &key, 10, &frame);

        match result {
            DispatchResult::Opened { consumed, target_fd, .. } => {
                assert_eq!(consumed, frame.len());

                let client = table.lookup(10).unwrap();
                assert_eq!(client.stage, Stage::Stream);
                assert_eq!(client.peer, Some(target_fd));
                assert_eq!(client.host, "127.0.0.1");
                assert!(!client.send_buf.is_empty());

                let target = table.lookup(target_fd).unwrap();
                assert_eq!(target.stage, Stage::Stream);
                assert_eq!(target.peer, Some(10));
                assert_eq!(target.host, "127.0.0.1");
            }
            _ => panic!("expected Opened"),
        }
    }

    #[test]
    fn handshake_ipv6_is_fatal_and_removes_record() {
        let key = test_key();
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        let mut connector = FailingConnector;

        let mut plain = vec![0u8; protocol::NONCE_SIZE];
        plain.extend_from_slice(&[0x05, 0x01, 0x00, protocol::ATYP_IPV6]);
        plain.extend_from_slice(&[0u8; 18]);
        let frame = frame::encode(&plain, &key);

        let result = dispatch(&mut table, &mut connector, &key, 10, &frame);
        assert!(matches!(result, DispatchResult::Fatal { peer: None }));
        assert!(table.lookup(10).is_none());
    }

    #[test]
    fn handshake_connect_failure_is_fatal() {
        let key = test_key();
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        let mut connector = FailingConnector;

        let frame = ipv4_request_frame(&key, 1);
        let result = dispatch(&mut table, &mut connector, &key, 10, &frame);

        assert!(matches!(result, DispatchResult::Fatal { peer: None }));
        assert!(table.lookup(10).is_none());
    }

    #[test]
    fn stream_stage_relays_bytes_to_peer_verbatim() {
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        {
            let client = table.lookup_mut(10).unwrap();
            client.stage = Stage::Stream;
            client.peer = Some(20);
        }
        table.insert(20, ConnRecord::outbound_target(20, 10, "example.com".into()));

        let key = test_key();
        let mut connector = FailingConnector;
        let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
        let result = dispatch(&mut table, &mut connector, &key, 10, &payload);

        assert!(matches!(result, DispatchResult::Consumed(4)));
        let peer = table.lookup(20).unwrap();
        assert_eq!(peer.send_buf.len(), 4);
    }

    #[test]
    fn stream_stage_with_missing_peer_is_fatal() {
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        {
            let client = table.lookup_mut(10).unwrap();
            client.stage = Stage::Stream;
            client.peer = None;
        }

        let key = test_key();
        let mut connector = FailingConnector;
        let result = dispatch(&mut table, &mut connector, &key, 10, &[1, 2, 3]);

        assert!(matches!(result, DispatchResult::Fatal { peer: None }));
        assert!(table.lookup(10).is_none());
    }

    #[test]
    fn teardown_removes_both_halves_of_a_pair() {
        let mut table = ConnTable::new();
        table.insert(10, ConnRecord::inbound_client(10));
        {
            let client = table.lookup_mut(10).unwrap();
            client.stage = Stage::Stream;
            client.peer = Some(20);
        }
        table.insert(20, ConnRecord::outbound_target(20, 10, "example.com".into()));

        let peer = teardown(&mut table, 10);
        assert_eq!(peer, Some(20));
        assert!(table.lookup(10).is_none());
        assert!(table.lookup(20).is_none());
    }
}
