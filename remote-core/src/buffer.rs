//! The "send-buffer collaborator" from the external interfaces: a growable
//! FIFO byte queue staged onto each connection record and drained into the
//! record's socket as the kernel accepts writes.
//!
//! Grounded on the neighboring game server's `net::buffer::Buffer`, trimmed
//! down: that buffer is bounded to a fixed capacity (flow control for a
//! game's payload channel); a tunnel's `send_buf` has no such cap in the
//! spec, so growth here is unbounded and backed by a `SliceDeque` purely for
//! its contiguous-slice, append-at-tail/drain-at-head shape.

use slice_deque::SliceDeque;
use std::io::{self, Write};

/// Ordered byte buffer staged on a connection record. Bytes are appended at
/// the tail (arriving from the peer or the encoded reply) and drained from
/// the head as the underlying socket accepts writes.
pub struct SendBuf {
    data: SliceDeque<u8>,
}

impl SendBuf {
    pub fn new() -> SendBuf {
        SendBuf { data: SliceDeque::new() }
    }

    /// Number of bytes currently staged.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stages `bytes` at the tail of the buffer. Mirrors the neighboring
    /// game server's `Buffer::ingress` use of `tail_head_slice`/`move_tail`
    /// to write into the deque's free capacity directly, rather than
    /// assuming a `Vec`-style `extend_from_slice` inherent method exists.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.reserve(bytes.len());
        unsafe {
            self.data.tail_head_slice()[..bytes.len()].copy_from_slice(bytes);
            self.data.move_tail(bytes.len() as isize);
        }
    }

    /// Writes as much of the buffer as `writer` will accept, draining what
    /// was written from the head and leaving the remainder staged for the
    /// next writability event. A `WouldBlock` (or any other) error from the
    /// writer stops the drain and is propagated; whatever was already
    /// written before the error stays drained.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;

        while !self.data.is_empty() {
            let count = writer.write(&self.data)?;

            if count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            unsafe { self.data.move_head(count as isize) };
            written += count;
        }

        Ok(written)
    }
}

impl Default for SendBuf {
    fn default() -> Self {
        SendBuf::new()
    }
}
