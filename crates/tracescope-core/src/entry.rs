//! The normalized in-memory trace record.
//!
//! An [`Entry`] contains everything needed to place one trace record on a
//! time axis. Data not required for that (event info strings, latency,
//! field values) stays in the file and is available on demand through the
//! stream's readout interface, via the record locator in `offset`.

/// Visibility in the textual listing.
pub const TEXT_VIEW_MASK: u8 = 1 << 0;

/// Visibility in the graphical timeline.
pub const GRAPH_VIEW_MASK: u8 = 1 << 1;

/// Special mask consumed when filtering by event.
pub const EVENT_VIEW_MASK: u8 = 1 << 2;

/* Bits 3 - 6 are reserved for more view masks. */

/// Clear iff the content of the entry has been mutated by a plugin-defined
/// function.
pub const PLUGIN_UNTOUCHED_MASK: u8 = 1 << 7;

/// Bin identifier meaning "no entry here".
pub const EMPTY_BIN: isize = -1;

/// Bin identifier meaning "only filtered entries here".
pub const FILTERED_BIN: isize = -2;

/// Event id of the synthetic record reporting a hole of missed events.
/// All synthetic entries have negative event identifiers.
pub const EVENT_OVERFLOW: i16 = -(libc::EOVERFLOW as i16);

/// How far (in nanoseconds) a missed-events entry is placed before the
/// record that reported the hole.
pub const MISSED_EVENTS_TIME_SHIFT: i64 = 10;

/// One normalized trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Bit mask controlling where the entry is visible. `0xFF` means
    /// visible everywhere.
    pub visible: u8,

    /// Identifier of the owning data stream.
    pub stream_id: i16,

    /// Backend-specific event kind. Negative values are reserved for
    /// synthetic kinds such as [`EVENT_OVERFLOW`].
    pub event_id: i16,

    /// CPU core that produced the record.
    pub cpu: i16,

    /// Process Id of the task that generated the record.
    pub pid: i32,

    /// Backend-defined record locator within the trace file. The
    /// missed-events entry repurposes this as the count of lost records.
    pub offset: i64,

    /// Timestamp in nanoseconds, post-calibration.
    pub ts: i64,
}

impl Entry {
    /// A fresh entry, visible everywhere and untouched by plugins.
    pub fn new() -> Self {
        Self {
            visible: 0xFF,
            stream_id: 0,
            event_id: 0,
            cpu: 0,
            pid: 0,
            offset: 0,
            ts: 0,
        }
    }

    /// Raise all visibility bits, preserving the plugin-untouched flag.
    pub fn set_all_visible(&mut self) {
        self.visible |= 0xFF & !PLUGIN_UNTOUCHED_MASK;
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// The sentinel returned when a search finds only filtered-out matches.
pub const DUMMY_ENTRY: Entry = Entry {
    visible: 0x00,
    stream_id: 0,
    event_id: -1,
    cpu: FILTERED_BIN as i16,
    pid: FILTERED_BIN as i32,
    offset: 0,
    ts: 0,
};

/// Split a nanosecond timestamp into seconds and microseconds.
pub fn convert_nano(time: u64) -> (u64, u64) {
    let sec = time / 1_000_000_000;
    let usec = (time - sec * 1_000_000_000) / 1000;

    (sec, usec)
}
