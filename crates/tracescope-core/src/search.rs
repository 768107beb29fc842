//! Time binary search and entry requests.
//!
//! Entries in a loaded array are time-sorted, so position lookups are
//! binary searches. "Find the next entry like this" queries go through
//! [`EntryRequest`] objects, which scan forward or backward honoring the
//! entry visibility set by the filters.

use crate::container::DataFieldInt64;
use crate::context::Context;
use crate::entry::{DUMMY_ENTRY, EMPTY_BIN, Entry, FILTERED_BIN};

/// Result of a binary search over a time-sorted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePos {
    /// All entries in the range have greater timestamps.
    AllGreater,

    /// All entries in the range have smaller timestamps.
    AllSmaller,

    /// Index of the first entry with a timestamp not smaller than the
    /// searched time.
    At(usize),
}

impl TimePos {
    /// The found index, if the search succeeded.
    pub fn index(self) -> Option<usize> {
        match self {
            TimePos::At(i) => Some(i),
            _ => None,
        }
    }
}

fn lower_bound_by<F: Fn(usize) -> i64>(time: i64, ts_at: F, l: usize, h: usize) -> TimePos {
    if ts_at(l) > time {
        return TimePos::AllGreater;
    }

    if ts_at(h) < time {
        return TimePos::AllSmaller;
    }

    /* Keep the invariant ts(l) < time <= ts(h). */
    let (mut l, mut h) = (l, h);
    if ts_at(l) >= time {
        return TimePos::At(l);
    }

    while h - l > 1 {
        let mid = (l + h) / 2;
        if ts_at(mid) < time {
            l = mid;
        } else {
            h = mid;
        }
    }

    TimePos::At(h)
}

/// Binary search inside a time-sorted array of entries, over the index
/// range `l..=h`.
pub fn find_entry_by_time(time: i64, data: &[Entry], l: usize, h: usize) -> TimePos {
    lower_bound_by(time, |i| data[i].ts, l, h)
}

/// Binary search inside a time-sorted array of entry/field pairs, over
/// the index range `l..=h`.
pub fn find_entry_field_by_time(
    time: i64,
    data: &[DataFieldInt64],
    l: usize,
    h: usize,
) -> TimePos {
    lower_bound_by(time, |i| data[i].entry.ts, l, h)
}

/// Matching condition function used by data requests and collections.
pub type MatchFn = fn(&Context, &Entry, i16, &[i32]) -> bool;

/// Matches entries of stream `sd` with the pid in `values[0]`.
pub fn match_pid(_ctx: &Context, e: &Entry, sd: i16, values: &[i32]) -> bool {
    e.stream_id == sd && e.pid == values[0]
}

/// Matches entries of stream `sd` with the cpu in `values[0]`.
pub fn match_cpu(_ctx: &Context, e: &Entry, sd: i16, values: &[i32]) -> bool {
    e.stream_id == sd && i32::from(e.cpu) == values[0]
}

/// Matches entries of stream `sd` with the event id in `values[0]`.
pub fn match_event_id(_ctx: &Context, e: &Entry, sd: i16, values: &[i32]) -> bool {
    e.stream_id == sd && i32::from(e.event_id) == values[0]
}

/// Matches entries of stream `sd` with the event id in `values[0]` and
/// the pid in `values[1]`.
pub fn match_event_and_pid(_ctx: &Context, e: &Entry, sd: i16, values: &[i32]) -> bool {
    e.stream_id == sd && i32::from(e.event_id) == values[0] && e.pid == values[1]
}

/// Matches entries of stream `sd` with the event id in `values[0]` and
/// the cpu in `values[1]`.
pub fn match_event_and_cpu(_ctx: &Context, e: &Entry, sd: i16, values: &[i32]) -> bool {
    e.stream_id == sd
        && i32::from(e.event_id) == values[0]
        && i32::from(e.cpu) == values[1]
}

/// Data request, defining the properties of the searched entry.
///
/// Requests compose: a consumer building per-cpu or per-stream queries
/// keeps an ordered list of them and evaluates one after the other.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    /// Position inside the data array from where the search starts.
    pub first: usize,

    /// Number of array elements to search in.
    pub n: usize,

    /// Matching condition function.
    pub cond: MatchFn,

    /// Data stream identifier.
    pub sd: i16,

    /// Values consumed by the matching condition function.
    pub values: Vec<i32>,

    /// If true, only visible entries qualify.
    pub vis_only: bool,

    /// Visibility bits consulted when `vis_only` is set.
    pub vis_mask: u8,
}

impl EntryRequest {
    pub fn new(
        first: usize,
        n: usize,
        cond: MatchFn,
        sd: i16,
        values: Vec<i32>,
        vis_only: bool,
        vis_mask: u8,
    ) -> Self {
        Self {
            first,
            n,
            cond,
            sd,
            values,
            vis_only,
            vis_mask,
        }
    }
}

/// Outcome of a data request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMatch<'a> {
    /// An entry satisfying the request.
    Found {
        entry: &'a Entry,
        index: usize,
    },

    /// Matches exist, but all of them are filtered out.
    Filtered,

    /// Nothing matched at all.
    Empty,
}

impl<'a> EntryMatch<'a> {
    /// The matched entry; the sentinel dummy entry when every match was
    /// filtered out.
    pub fn entry(&self) -> Option<&'a Entry> {
        match self {
            EntryMatch::Found { entry, .. } => Some(entry),
            EntryMatch::Filtered => Some(&DUMMY_ENTRY),
            EntryMatch::Empty => None,
        }
    }

    /// The index of the match, or one of the negative bin sentinels.
    pub fn bin(&self) -> isize {
        match self {
            EntryMatch::Found { index, .. } => *index as isize,
            EntryMatch::Filtered => FILTERED_BIN,
            EntryMatch::Empty => EMPTY_BIN,
        }
    }
}

/// Scan a closed index range in one direction. Returns the index of the
/// first qualifying entry, plus whether a filtered-out match was seen.
pub(crate) fn scan_range(
    ctx: &Context,
    req: &EntryRequest,
    data: &[Entry],
    start: usize,
    end: usize,
    forward: bool,
) -> (Option<usize>, bool) {
    let mut filtered_seen = false;

    let mut scan = |i: usize| -> Option<usize> {
        if (req.cond)(ctx, &data[i], req.sd, &req.values) {
            if req.vis_only && data[i].visible & req.vis_mask == 0 {
                filtered_seen = true;
            } else {
                return Some(i);
            }
        }
        None
    };

    if forward {
        for i in start..=end {
            if let Some(found) = scan(i) {
                return (Some(found), filtered_seen);
            }
        }
    } else {
        for i in (end..=start).rev() {
            if let Some(found) = scan(i) {
                return (Some(found), filtered_seen);
            }
        }
    }

    (None, filtered_seen)
}

fn result_from(data: &[Entry], found: Option<usize>, filtered: bool) -> EntryMatch<'_> {
    match found {
        Some(index) => EntryMatch::Found {
            entry: &data[index],
            index,
        },
        None if filtered => EntryMatch::Filtered,
        None => EntryMatch::Empty,
    }
}

/// Search in the direction of increasing timestamps, starting at
/// `req.first` and visiting at most `req.n` positions.
pub fn get_entry_front<'a>(
    ctx: &Context,
    req: &EntryRequest,
    data: &'a [Entry],
) -> EntryMatch<'a> {
    if data.is_empty() || req.n == 0 || req.first >= data.len() {
        return EntryMatch::Empty;
    }

    let end = (req.first + req.n - 1).min(data.len() - 1);
    let (found, filtered) = scan_range(ctx, req, data, req.first, end, true);

    result_from(data, found, filtered)
}

/// Search in the direction of decreasing timestamps, starting at
/// `req.first` and visiting at most `req.n` positions.
pub fn get_entry_back<'a>(
    ctx: &Context,
    req: &EntryRequest,
    data: &'a [Entry],
) -> EntryMatch<'a> {
    if data.is_empty() || req.n == 0 || req.first >= data.len() {
        return EntryMatch::Empty;
    }

    let end = req.first.saturating_sub(req.n - 1);
    let (found, filtered) = scan_range(ctx, req, data, req.first, end, false);

    result_from(data, found, filtered)
}
