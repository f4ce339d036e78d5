//! The unit of data that flows through the bridge.

use bytes::Bytes;

/// An ordered sequence of one or more opaque byte parts.
///
/// Part count is intrinsic: outputs encode a single-part message differently
/// from a multi-part one, so the distinction is preserved end-to-end.
/// Messages are not modified after a producer emits them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<Bytes>,
}

impl Message {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// A message with exactly one part.
    pub fn from_part(part: impl Into<Bytes>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    pub fn from_parts(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    pub fn push_part(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
