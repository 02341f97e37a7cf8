//! Scratch arenas for engine outputs.
//!
//! Every engine call writes its outputs into the arena handed to it. The
//! buffers stay valid until the next call on the same arena, which lets the
//! dispatcher marshal a response while holding the session lock without
//! copying inside the engine. Arenas are pooled by the session manager and
//! reused across operations; `reset` drops contents but keeps capacity.

/// Output buffers for one engine call.
#[derive(Debug, Default)]
pub struct Arena {
    /// Packed presence bitmap, one bit per task.
    pub presences: Vec<u8>,
    /// 32-bit offsets framing `values`, one more entry than there are rows.
    pub offsets: Vec<u32>,
    /// Per-task value lengths; `LENGTH_MISSING` for absent keys.
    pub lengths: Vec<u32>,
    /// Concatenated value or path bytes.
    pub values: Vec<u8>,
    /// Concatenated result keys for scans and samples.
    pub keys: Vec<i64>,
    /// Per-task prefix sums over `keys`, one more entry than there are tasks.
    pub key_offsets: Vec<i64>,
    /// Per-task result counts.
    pub counts: Vec<u32>,
    /// Collection or snapshot identifiers for listings.
    pub ids: Vec<u64>,
}

impl Arena {
    pub fn reset(&mut self) {
        self.presences.clear();
        self.offsets.clear();
        self.lengths.clear();
        self.values.clear();
        self.keys.clear();
        self.key_offsets.clear();
        self.counts.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_contents_but_keeps_capacity() {
        let mut arena = Arena::default();
        arena.values.extend_from_slice(&[1, 2, 3]);
        arena.offsets.extend_from_slice(&[0, 3]);
        let capacity = arena.values.capacity();
        arena.reset();
        assert!(arena.values.is_empty());
        assert!(arena.offsets.is_empty());
        assert_eq!(arena.values.capacity(), capacity);
    }
}
