//! The process-level event loop: accept handling, readiness notification
//! and read/write buffering. This module owns sockets and polling and
//! contains no protocol decisions of its own. Every decision (how to
//! interpret bytes, when a connection is paired, when it dies) is made by
//! `remote_core::dispatch`; this module only shuttles bytes between sockets
//! and that function.

use crate::connector::BlockingConnector;
use flux::logging::{self, Logger};
use hashbrown::HashMap;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use remote_core::cipher::Key;
use remote_core::dispatch::{self, DispatchResult};
use remote_core::rbtree::ConnTable;
use remote_core::record::ConnRecord;
use remote_core::Fd;
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(usize::MAX);
const READ_CHUNK_SIZE: usize = 16 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-threaded worker: one `mio::Poll`, one connection table. No locks,
/// no suspension inside the dispatcher; running more than one of these
/// (one per thread, each with its own listener) is left to whoever deploys
/// it, not handled here.
pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    key: Key,
    max_frame_size: usize,
    connector: BlockingConnector,
    table: ConnTable<ConnRecord>,
    sockets: HashMap<Fd, TcpStream>,
    read_bufs: HashMap<Fd, Vec<u8>>,
    write_interest: HashMap<Fd, bool>,
    log: Logger,
}

impl EventLoop {
    pub fn bind(listen_addr: &str, key: Key, max_frame_size: u32, log: Logger) -> io::Result<EventLoop> {
        let addr: std::net::SocketAddr = listen_addr
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid listen_addr"))?;

        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(EventLoop {
            poll,
            listener,
            key,
            max_frame_size: max_frame_size as usize,
            connector: BlockingConnector::new(CONNECT_TIMEOUT),
            table: ConnTable::new(),
            sockets: HashMap::new(),
            read_bufs: HashMap::new(),
            write_interest: HashMap::new(),
            log,
        })
    }

    /// Runs the accept/dispatch loop forever.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            self.poll.poll(&mut events, None)?;

            // Collect tokens up front: handling an event can mutate `sockets`
            // (new outbound connections get inserted), and `events` borrows
            // from a previous poll, not from `self`, so there's no actual
            // aliasing hazard — but cloning tokens keeps the loop body free
            // to call `&mut self` methods without fighting the borrow checker.
            let ready: Vec<(Token, bool, bool)> =
                events.iter().map(|event: &Event| (event.token(), event.is_readable(), event.is_writable())).collect();

            for (token, readable, writable) in ready {
                if token == LISTENER_TOKEN {
                    self.accept_loop();
                    continue;
                }

                let fd = token.0 as Fd;

                if writable {
                    self.handle_writable(fd);
                }
                if readable {
                    self.handle_readable(fd);
                }
            }
        }
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.register_inbound(stream, addr),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::error!(self.log, "accept failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn register_inbound(&mut self, mut stream: TcpStream, addr: std::net::SocketAddr) {
        let fd = stream.as_raw_fd();

        if let Err(err) = self.poll.registry().register(&mut stream, Token(fd as usize), Interest::READABLE) {
            logging::error!(self.log, "failed to register inbound socket"; "error" => %err);
            return;
        }

        logging::debug!(self.log, "accepted connection"; "fd" => fd, "peer_addr" => %addr);

        self.table.insert(fd, ConnRecord::inbound_client(fd));
        self.sockets.insert(fd, stream);
        self.read_bufs.insert(fd, Vec::new());
        self.write_interest.insert(fd, false);
    }

    fn handle_readable(&mut self, fd: Fd) {
        if !self.drain_socket_into_buffer(fd) {
            return;
        }

        self.process_buffered_frames(fd);
    }

    /// Reads everything currently available on `fd`'s socket into its
    /// accumulated read buffer. Returns `false` if the connection died
    /// (EOF or a real error) and was already torn down.
    fn drain_socket_into_buffer(&mut self, fd: Fd) -> bool {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let read_result = match self.sockets.get_mut(&fd) {
                Some(socket) => socket.read(&mut chunk),
                None => return false,
            };

            match read_result {
                Ok(0) => {
                    self.teardown(fd, None);
                    return false;
                }
                Ok(count) => {
                    if let Some(buf) = self.read_bufs.get_mut(&fd) {
                        buf.extend_from_slice(&chunk[..count]);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.teardown(fd, None);
                    return false;
                }
            }
        }
    }

    /// Repeatedly hands buffered bytes to `dispatch` until it reports
    /// `NeedMore` or a fatal condition. The event loop, not the dispatcher,
    /// is what loops over multiple frames sitting in one buffer.
    fn process_buffered_frames(&mut self, fd: Fd) {
        let mut buf = match self.read_bufs.remove(&fd) {
            Some(buf) => buf,
            None => return,
        };

        let mut cursor = 0;

        loop {
            if cursor >= buf.len() {
                break;
            }

            let outcome = dispatch::dispatch(&mut self.table, &mut self.connector, &self.key, fd, &buf[cursor..]);

            match outcome {
                DispatchResult::NeedMore => {
                    if buf.len() - cursor > self.max_frame_size + FRAME_LEN_PREFIX_SIZE {
                        // The core never validates the length prefix itself,
                        // so an oversized or malicious frame would otherwise
                        // buffer forever; enforce the bound here instead.
                        logging::debug!(self.log, "frame exceeds max_frame_size, closing"; "fd" => fd);
                        self.teardown(fd, None);
                        return;
                    }
                    break;
                }
                DispatchResult::Consumed(consumed) => {
                    cursor += consumed;
                    self.try_flush_peer_of(fd);
                }
                DispatchResult::Opened { consumed, target_fd, stream } => {
                    cursor += consumed;
                    if !self.register_outbound(target_fd, stream) {
                        // Registration failure after a successful connect is
                        // treated the same as a connect failure: both halves
                        // of the pair the dispatcher just committed need to
                        // come back down together.
                        self.teardown(fd, Some(target_fd));
                        return;
                    }
                    self.try_flush(fd);
                }
                DispatchResult::Fatal { peer } => {
                    self.teardown(fd, peer);
                    return;
                }
            }
        }

        buf.drain(..cursor);
        self.read_bufs.insert(fd, buf);
    }

    /// Registers the just-opened outbound socket for polling. Returns
    /// `false` on failure, leaving table cleanup to the caller (which knows
    /// about the client half of the pair too).
    fn register_outbound(&mut self, target_fd: Fd, stream: std::net::TcpStream) -> bool {
        if let Err(err) = stream.set_nonblocking(true) {
            logging::error!(self.log, "failed to set outbound socket nonblocking"; "error" => %err);
            return false;
        }

        let mut mio_stream = TcpStream::from_std(stream);

        if let Err(err) = self.poll.registry().register(&mut mio_stream, Token(target_fd as usize), Interest::READABLE) {
            logging::error!(self.log, "failed to register outbound socket"; "error" => %err);
            return false;
        }

        self.sockets.insert(target_fd, mio_stream);
        self.read_bufs.insert(target_fd, Vec::new());
        self.write_interest.insert(target_fd, false);
        true
    }

    fn handle_writable(&mut self, fd: Fd) {
        self.try_flush(fd);
    }

    /// Looks up `fd`'s current peer and attempts to flush the peer's
    /// `send_buf` — used after a stream-stage relay, which appends to the
    /// peer's buffer, not the dispatching fd's own.
    fn try_flush_peer_of(&mut self, fd: Fd) {
        let peer = self.table.lookup(fd).and_then(|rec| rec.peer);
        if let Some(peer_fd) = peer {
            self.try_flush(peer_fd);
        }
    }

    /// Best-effort flush of `fd`'s staged `send_buf`. Toggles write-interest
    /// registration so the poll only wakes on writability while there is
    /// still something buffered; the flush itself never blocks and any
    /// remainder is retried on the next writability event.
    fn try_flush(&mut self, fd: Fd) {
        let socket = match self.sockets.get_mut(&fd) {
            Some(socket) => socket,
            None => return,
        };

        let record = match self.table.lookup_mut(fd) {
            Some(record) => record,
            None => return,
        };

        match record.send_buf.flush(socket) {
            Ok(_) => {
                let now_empty = record.send_buf.is_empty();
                self.update_write_interest(fd, !now_empty);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.update_write_interest(fd, true);
            }
            Err(_) => {
                self.teardown(fd, None);
            }
        }
    }

    fn update_write_interest(&mut self, fd: Fd, want_writable: bool) {
        let currently_writable = *self.write_interest.get(&fd).unwrap_or(&false);
        if currently_writable == want_writable {
            return;
        }

        let socket = match self.sockets.get_mut(&fd) {
            Some(socket) => socket,
            None => return,
        };

        let interest = if want_writable { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };

        if self.poll.registry().reregister(socket, Token(fd as usize), interest).is_ok() {
            self.write_interest.insert(fd, want_writable);
        }
    }

    /// Tears down `fd` and, if it had a live peer, that peer too — both
    /// sockets shut down and deregistered. On any fatal error or EOF, both
    /// halves of a pair transition to closed together.
    fn teardown(&mut self, fd: Fd, known_peer: Option<Fd>) {
        let peer = known_peer.or_else(|| self.table.lookup(fd).and_then(|rec| rec.peer));
        dispatch::teardown(&mut self.table, fd);

        self.close_socket(fd);
        if let Some(peer_fd) = peer {
            self.close_socket(peer_fd);
        }
    }

    fn close_socket(&mut self, fd: Fd) {
        if let Some(mut socket) = self.sockets.remove(&fd) {
            let _ = self.poll.registry().deregister(&mut socket);
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.read_bufs.remove(&fd);
        self.write_interest.remove(&fd);
    }
}

const FRAME_LEN_PREFIX_SIZE: usize = 4;
