//! Local document edits as seen by the region store.
//!
//! The host reports every document change as a single replacement: `old_length` characters at
//! `offset` were replaced by `new_length` characters. No text is carried; the store only needs
//! the geometry to keep cached regions aligned.

/// A single replacement expressed in document offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentEdit {
    /// Start offset of the replaced range in the pre-edit document.
    pub offset: usize,
    /// Length of the replaced range.
    pub old_length: usize,
    /// Length of the inserted text.
    pub new_length: usize,
}

impl DocumentEdit {
    /// Create a new edit.
    pub const fn new(offset: usize, old_length: usize, new_length: usize) -> Self {
        Self {
            offset,
            old_length,
            new_length,
        }
    }

    /// Pure insertion of `len` characters at `offset`.
    pub const fn insertion(offset: usize, len: usize) -> Self {
        Self::new(offset, 0, len)
    }

    /// Pure deletion of `len` characters at `offset`.
    pub const fn deletion(offset: usize, len: usize) -> Self {
        Self::new(offset, len, 0)
    }

    /// Net change in document length (`new_length - old_length`).
    pub fn delta(&self) -> isize {
        self.new_length as isize - self.old_length as isize
    }

    /// Exclusive end of the replaced range in the pre-edit document.
    pub fn old_end(&self) -> usize {
        self.offset.saturating_add(self.old_length)
    }
}
