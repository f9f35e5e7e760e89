//! The default connector collaborator: blocking DNS resolution plus
//! `connect_timeout`. The core's `Connector` trait only demands a definite
//! result before the dispatcher returns; a non-blocking connector that
//! hands the dispatcher a pending record is a plausible future alternative
//! (see DESIGN.md), but this blocking implementation satisfies the trait
//! directly and is swappable without touching `remote_core` at all.

use remote_core::connector::Connector;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub struct BlockingConnector {
    timeout: Duration,
}

impl BlockingConnector {
    pub fn new(timeout: Duration) -> BlockingConnector {
        BlockingConnector { timeout }
    }
}

impl Connector for BlockingConnector {
    fn connect_to(&mut self, host: &str, port: u16) -> io::Result<TcpStream> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "DNS resolution returned no addresses"))?;

        TcpStream::connect_timeout(&addr, self.timeout)
    }
}
