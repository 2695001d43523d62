//! Reassembly of arbitrarily chunked byte streams into discrete lines.

use bytes::BytesMut;

/// Turns a sequence of asynchronously arriving byte chunks into complete
/// lines, no matter where the chunk boundaries fall.
///
/// Each `\n` fires the sink synchronously with one complete line; the
/// terminator and a trailing `\r` are stripped. Bytes after the last
/// terminator stay buffered until the next [LineBuffer::append] or the
/// mandatory final [LineBuffer::flush].
///
/// The pending buffer holds raw bytes, so a multi-byte UTF-8 sequence split
/// across chunks is reassembled byte-exact before the lossy conversion at
/// the line edge.
pub struct LineBuffer<F>
where
    F: FnMut(&str),
{
    pending: BytesMut,
    sink: F,
}

impl<F> LineBuffer<F>
where
    F: FnMut(&str),
{
    pub fn new(sink: F) -> Self {
        Self {
            pending: BytesMut::new(),
            sink,
        }
    }

    /// Feed one chunk. The chunk may contain zero, one or many terminators,
    /// or cut a `\r\n` pair in half; no data is dropped or duplicated.
    pub fn append(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (until_terminator, after) = rest.split_at(pos);
            self.pending.extend_from_slice(until_terminator);
            if self.pending.last() == Some(&b'\r') {
                let len = self.pending.len();
                self.pending.truncate(len - 1);
            }
            {
                let line = String::from_utf8_lossy(&self.pending);
                (self.sink)(line.as_ref());
            }
            self.pending.clear();
            rest = &after[1..];
        }
        self.pending.extend_from_slice(rest);
    }

    /// Emit any remaining partial line exactly once and clear state.
    /// Idempotent when nothing is pending.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        {
            let line = String::from_utf8_lossy(&self.pending);
            (self.sink)(line.as_ref());
        }
        self.pending.clear();
    }
}
