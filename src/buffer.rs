//! Per-connection growable byte buffer with consume-prefix semantics (C4).

use crate::error::ProtocolError;

/// Capacity doubles on demand up to `MAX_BUFFER_SIZE`; growing past that is
/// reported to the caller as `ProtocolError::CommandTooLarge`.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// A single parsed command may not exceed this size even if the connection
/// buffer itself has room.
pub const MAX_COMMAND_SIZE: usize = 512 * 1024; // 512 KiB

pub struct ConnBuffer {
    data: Vec<u8>,
}

impl ConnBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(4096),
        }
    }

    /// Append freshly-read bytes. Errors if the buffer would exceed the
    /// hard ceiling.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.data.len() + bytes.len() > MAX_BUFFER_SIZE {
            return Err(ProtocolError::CommandTooLarge);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Drop the first `n` bytes, shifting the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        self.data.drain(..n);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for ConnBuffer {
    fn default() -> Self {
        Self::new()
    }
}
