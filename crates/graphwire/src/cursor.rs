//! Bounded read/write cursors with checkpoint/rollback.
//!
//! Exhaustion is a value, not an error: a failed write/read leaves the
//! cursor untouched and the phase returns "blocked", to be retried after
//! the caller drains or refills the buffer. Checkpoints mark the last
//! completed unit (object or phase header) so a partial unit never leaks
//! into the stream accounting.

/// Write cursor over a caller-provided destination buffer.
#[derive(Debug)]
pub struct WriteCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
    mark: usize,
}

impl<'a> WriteCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            mark: 0,
        }
    }

    /// Record the current position as the last completed unit.
    pub fn checkpoint(&mut self) {
        self.mark = self.pos;
    }

    /// Restore the position to the last checkpoint.
    pub fn rollback(&mut self) {
        self.pos = self.mark;
    }

    /// Copy `src` in if it fits; `false` leaves the cursor unmoved.
    pub fn write(&mut self, src: &[u8]) -> bool {
        match self.reserve(src.len()) {
            Some(dest) => {
                dest.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    pub fn write_u8(&mut self, value: u8) -> bool {
        self.write(&[value])
    }

    /// Claim the next `len` bytes for in-place writing (custom copy
    /// callbacks transform straight into the stream).
    pub fn reserve(&mut self, len: usize) -> Option<&mut [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        let dest = &mut self.buf[self.pos..end];
        self.pos = end;
        Some(dest)
    }

    /// Bytes written so far in this call.
    pub fn produced(&self) -> usize {
        self.pos
    }
}

/// Read cursor over a caller-provided source buffer.
#[derive(Debug)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    mark: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            mark: 0,
        }
    }

    /// Record the current position as the last completed unit.
    pub fn checkpoint(&mut self) {
        self.mark = self.pos;
    }

    /// Restore the position to the last checkpoint.
    pub fn rollback(&mut self) {
        self.pos = self.mark;
    }

    /// Take the next `len` bytes; `None` leaves the cursor unmoved.
    pub fn read(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        let src = &self.buf[self.pos..end];
        self.pos = end;
        Some(src)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    /// Bytes consumed so far in this call.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}
