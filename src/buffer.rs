//! Append-only document buffer with object-number allocation and byte
//! offset tracking.

use crate::error::QuireError;
use crate::syntax::encode_latin1;

/// The main document buffer. Object ids are allocated sequentially from 1;
/// the offset for an object is captured at the instant its header line is
/// written, before any of its body. Reserved ids may have their headers
/// written later than higher ids (the Pages root is written after the
/// page objects), so offsets are tracked per id.
pub(crate) struct ObjectBuffer {
    buf: Vec<u8>,
    // offsets[id - 1] = byte position of "<id> 0 obj" once written.
    offsets: Vec<Option<usize>>,
    next_id: usize,
}

impl ObjectBuffer {
    pub(crate) fn new() -> Self {
        ObjectBuffer {
            buf: Vec::new(),
            offsets: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Count of object ids handed out so far (reserved or written).
    pub(crate) fn object_count(&self) -> usize {
        self.next_id - 1
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Hands out `count` consecutive object ids without writing anything.
    pub(crate) fn reserve(&mut self, count: usize) -> usize {
        let first = self.next_id;
        self.next_id += count;
        self.offsets.resize(self.next_id - 1, None);
        first
    }

    /// Allocates the next id and opens its object in one step.
    pub(crate) fn new_object(&mut self) -> Result<usize, QuireError> {
        let id = self.reserve(1);
        self.begin_object(id)?;
        Ok(id)
    }

    /// Records the offset for a reserved id and writes its `"<id> 0 obj"`
    /// header. Each id is opened exactly once.
    pub(crate) fn begin_object(&mut self, id: usize) -> Result<(), QuireError> {
        if id == 0 || id >= self.next_id {
            return Err(QuireError::InvalidState(format!(
                "object {} opened before being reserved",
                id
            )));
        }
        if self.offsets[id - 1].is_some() {
            return Err(QuireError::InvalidState(format!(
                "object {} opened twice",
                id
            )));
        }
        self.offsets[id - 1] = Some(self.buf.len());
        self.put_line(&format!("{} 0 obj", id));
        Ok(())
    }

    pub(crate) fn offset_of(&self, id: usize) -> Option<usize> {
        self.offsets.get(id.checked_sub(1)?).copied().flatten()
    }

    /// All offsets in id order for the xref table; fails if any reserved
    /// object was never written.
    pub(crate) fn offsets_for_xref(&self) -> Result<Vec<usize>, QuireError> {
        let mut out = Vec::with_capacity(self.offsets.len());
        for (index, offset) in self.offsets.iter().enumerate() {
            match offset {
                Some(offset) => out.push(*offset),
                None => {
                    return Err(QuireError::InvalidState(format!(
                        "object {} reserved but never emitted",
                        index + 1
                    )));
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn put_line(&mut self, text: &str) {
        self.buf.extend_from_slice(&encode_latin1(text));
        self.buf.push(b'\n');
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.buf.push(b'\n');
    }

    /// Writes a complete stream object body between an already-open header
    /// and `endobj`. `dict_entries` is the dictionary without `/Length`.
    pub(crate) fn put_stream(&mut self, dict_entries: &str, data: &[u8]) {
        if dict_entries.is_empty() {
            self.put_line(&format!("<< /Length {} >>", data.len()));
        } else {
            self.put_line(&format!("<< {} /Length {} >>", dict_entries, data.len()));
        }
        self.put_line("stream");
        self.put_bytes(data);
        self.put_line("endstream");
        self.put_line("endobj");
    }

    pub(crate) fn end_object(&mut self) {
        self.put_line("endobj");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }

    #[test]
    fn offsets_match_header_positions() {
        let mut buf = ObjectBuffer::new();
        buf.put_line("%PDF-1.3");
        let a = buf.new_object().unwrap();
        buf.put_line("<< /Type /Catalog >>");
        buf.end_object();
        let b = buf.new_object().unwrap();
        buf.put_line("<< >>");
        buf.end_object();

        assert_eq!((a, b), (1, 2));
        let bytes = buf.as_slice();
        assert_eq!(buf.offset_of(1), find(bytes, b"1 0 obj"));
        assert_eq!(buf.offset_of(2), find(bytes, b"2 0 obj"));
    }

    #[test]
    fn reserve_hands_out_consecutive_ids() {
        let mut buf = ObjectBuffer::new();
        let first = buf.reserve(3);
        assert_eq!(first, 1);
        assert_eq!(buf.reserve(1), 4);
        assert_eq!(buf.object_count(), 4);
    }

    #[test]
    fn reserved_ids_may_be_written_late() {
        let mut buf = ObjectBuffer::new();
        let root = buf.reserve(1);
        let leaf = buf.reserve(1);
        buf.begin_object(leaf).unwrap();
        buf.put_line("<< >>");
        buf.end_object();
        buf.begin_object(root).unwrap();
        buf.put_line(&format!("<< /Kids [{} 0 R] >>", leaf));
        buf.end_object();

        let bytes = buf.as_slice();
        assert_eq!(buf.offset_of(1), find(bytes, b"1 0 obj"));
        assert!(buf.offset_of(1).unwrap() > buf.offset_of(2).unwrap());
        assert_eq!(buf.offsets_for_xref().unwrap().len(), 2);
    }

    #[test]
    fn unreserved_or_repeated_open_is_rejected() {
        let mut buf = ObjectBuffer::new();
        assert!(buf.begin_object(1).is_err());
        buf.reserve(1);
        buf.begin_object(1).unwrap();
        assert!(buf.begin_object(1).is_err());
    }

    #[test]
    fn missing_object_fails_the_xref() {
        let mut buf = ObjectBuffer::new();
        buf.reserve(2);
        buf.begin_object(1).unwrap();
        buf.put_line("<< >>");
        buf.end_object();
        assert!(buf.offsets_for_xref().is_err());
    }

    #[test]
    fn stream_length_is_exact() {
        let mut buf = ObjectBuffer::new();
        buf.new_object().unwrap();
        buf.put_stream("", b"0 0 m");
        let text = String::from_utf8(buf.into_bytes()).unwrap();
        assert!(text.contains("<< /Length 5 >>"));
        assert!(text.contains("stream\n0 0 m\nendstream"));
    }
}
