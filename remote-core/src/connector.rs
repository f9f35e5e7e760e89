//! The connector collaborator: DNS resolution and the outbound `connect`
//! live outside this crate entirely. The dispatcher only needs a seam to
//! call through to reach them, supplied by whatever binary hosts the event
//! loop — this crate never depends on a concrete transport.

use std::io;
use std::net::TcpStream;

/// Establishes an outbound TCP connection to `host:port`. `host` is either
/// a dotted-quad or a DNS name (the core never parses it itself — see
/// `protocol::Address::host_string`). Must return a definite success or a
/// definite failure; the dispatcher has no suspension point to wait on a
/// pending connect.
pub trait Connector {
    fn connect_to(&mut self, host: &str, port: u16) -> io::Result<TcpStream>;
}
