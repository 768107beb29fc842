//! Append-only container pairing entries with one derived 64 bit value.
//!
//! Plugins use this to attach per-entry numerical data (latencies, field
//! values) without growing the entry itself. The container owns a snapshot
//! of each entry, so it stays valid independently of the loaded arrays.

use crate::entry::Entry;

/// The capacity of a [`DataContainer`] after initialization.
pub const CONTAINER_DEFAULT_SIZE: usize = 1024;

/// An entry plus one additional 64 bit integer data field.
#[derive(Debug, Clone, Copy)]
pub struct DataFieldInt64 {
    /// Snapshot of the trace record the field belongs to.
    pub entry: Entry,

    /// The derived data field.
    pub field: i64,
}

/// Growable array of entry/field pairs, sortable in time.
#[derive(Debug)]
pub struct DataContainer {
    data: Vec<DataFieldInt64>,
    sorted: bool,
}

impl DataContainer {
    /// An empty container with the default capacity.
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(CONTAINER_DEFAULT_SIZE),
            sorted: false,
        }
    }

    /// Append an entry/field pair. Amortized O(1); clears the sorted flag.
    pub fn append(&mut self, entry: Entry, field: i64) {
        if self.data.len() == self.data.capacity() {
            self.data.reserve_exact(self.data.capacity());
        }

        self.data.push(DataFieldInt64 { entry, field });
        self.sorted = false;
    }

    /// Stable-sort the pairs by the timestamp of the entry and trim the
    /// capacity down to the size.
    pub fn sort(&mut self) {
        self.data.sort_by_key(|df| df.entry.ts);
        self.data.shrink_to_fit();
        self.sorted = true;
    }

    /// True after [`sort`](Self::sort), until the next append.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Number of stored pairs.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current memory capacity, in pairs.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The stored pairs. Sorted in time only if [`is_sorted`] holds.
    ///
    /// [`is_sorted`]: Self::is_sorted
    pub fn data(&self) -> &[DataFieldInt64] {
        &self.data
    }
}

impl Default for DataContainer {
    fn default() -> Self {
        Self::new()
    }
}
