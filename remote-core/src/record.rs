//! The connection record: per-socket state tracked by the connection table,
//! and the pairing rules that tie an inbound-client record to the
//! outbound-target record it tunnels to.

use crate::buffer::SendBuf;
use crate::Fd;

/// Which side of a tunnel a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    InboundClient,
    OutboundTarget,
}

/// Protocol stage for a record. `Closed` is terminal and never observed by
/// the dispatcher — a closed record is removed from the table, not left
/// behind in this stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExpectMethod,
    Stream,
    Closed,
}

/// Per-socket state owned by the connection table. `peer` is a lookup key
/// back into the table, never a strong reference — the table is the sole
/// owner of both halves of a pair, which sidesteps the reference cycle a
/// pair's mutual `peer` links would otherwise form.
pub struct ConnRecord {
    pub fd: Fd,
    pub role: Role,
    pub stage: Stage,
    pub send_buf: SendBuf,
    pub peer: Option<Fd>,
    /// Resolved destination host, set at pairing time; diagnostics only.
    pub host: String,
}

impl ConnRecord {
    /// A freshly accepted inbound-client socket, before its handshake frame
    /// has arrived. Unpaired until the handshake succeeds.
    pub fn inbound_client(fd: Fd) -> ConnRecord {
        ConnRecord {
            fd,
            role: Role::InboundClient,
            stage: Stage::ExpectMethod,
            send_buf: SendBuf::new(),
            peer: None,
            host: String::new(),
        }
    }

    /// An outbound-target socket, created only after `connect()` to the
    /// requested destination has already succeeded — it is born paired and
    /// streaming, never passes through `expect-method`.
    pub fn outbound_target(fd: Fd, peer: Fd, host: String) -> ConnRecord {
        ConnRecord {
            fd,
            role: Role::OutboundTarget,
            stage: Stage::Stream,
            send_buf: SendBuf::new(),
            peer: Some(peer),
            host,
        }
    }
}
