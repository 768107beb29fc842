//! Data collections: cached skip-interval indexes over loaded data.
//!
//! A collection captures, for one matching condition, the minimal set of
//! closed index intervals guaranteed to contain every matching entry.
//! Searches that honor a collection jump over the gaps between intervals,
//! eliminating the linear worst case of "next matching entry" queries.
//! The intervals may (will) also contain entries that do not match.

use crate::context::Context;
use crate::entry::Entry;
use crate::search::{EntryMatch, EntryRequest, MatchFn, scan_range};

/// Skip-interval index for one matching condition over one data array.
pub struct EntryCollection {
    /// Matching condition function defining the collection.
    pub cond: MatchFn,

    /// Data stream identifier.
    pub stream_id: i16,

    /// Values consumed by the matching condition function.
    pub values: Vec<i32>,

    /// Index of the first entry of each data interval.
    resume_points: Vec<usize>,

    /// Index of the last entry of each data interval.
    break_points: Vec<usize>,
}

impl EntryCollection {
    /// Number of data intervals.
    pub fn size(&self) -> usize {
        self.resume_points.len()
    }

    /// The `(resume, break)` bounds of one interval.
    pub fn interval(&self, i: usize) -> (usize, usize) {
        (self.resume_points[i], self.break_points[i])
    }

    fn matches_fingerprint(&self, cond: MatchFn, sd: i16, values: &[i32]) -> bool {
        self.cond == cond && self.stream_id == sd && self.values == values
    }

    /// Drop the interval data, keeping the identity of the collection.
    pub fn reset(&mut self) {
        self.resume_points.clear();
        self.break_points.clear();
    }
}

/// Scan `data` and compute the margin-extended intervals enclosing all
/// entries matching the condition. Overlapping intervals are merged.
fn collect_intervals(
    ctx: &Context,
    data: &[Entry],
    cond: MatchFn,
    sd: i16,
    values: &[i32],
    margin: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut resume = Vec::new();
    let mut brk: Vec<usize> = Vec::new();

    let mut i = 0;
    while i < data.len() {
        if !cond(ctx, &data[i], sd, values) {
            i += 1;
            continue;
        }

        /* A maximal run of matches starts here. */
        let run_start = i;
        while i < data.len() && cond(ctx, &data[i], sd, values) {
            i += 1;
        }

        let lo = run_start.saturating_sub(margin);
        let hi = (i - 1 + margin).min(data.len() - 1);

        match brk.last_mut() {
            Some(last) if lo <= *last => *last = (*last).max(hi),
            _ => {
                resume.push(lo);
                brk.push(hi);
            }
        }
    }

    (resume, brk)
}

impl Context {
    /// Register a data collection, or rebuild the existing one with the
    /// same condition, stream and values. Returns its index in the
    /// context's collection list.
    pub fn register_data_collection(
        &mut self,
        data: &[Entry],
        cond: MatchFn,
        sd: i16,
        values: &[i32],
        margin: usize,
    ) -> usize {
        let (resume, brk) = collect_intervals(self, data, cond, sd, values, margin);

        if let Some(pos) = self.find_data_collection_idx(cond, sd, values) {
            let col = &mut self.collections[pos];
            col.resume_points = resume;
            col.break_points = brk;
            return pos;
        }

        self.collections.push(EntryCollection {
            cond,
            stream_id: sd,
            values: values.to_vec(),
            resume_points: resume,
            break_points: brk,
        });

        self.collections.len() - 1
    }

    /// Remove the collection with the given identity, if registered.
    pub fn unregister_data_collection(&mut self, cond: MatchFn, sd: i16, values: &[i32]) {
        self.collections
            .retain(|col| !col.matches_fingerprint(cond, sd, values));
    }

    /// Remove all collections defined over stream `sd`.
    pub fn unregister_stream_collections(&mut self, sd: i16) {
        self.collections.retain(|col| col.stream_id != sd);
    }

    fn find_data_collection_idx(
        &self,
        cond: MatchFn,
        sd: i16,
        values: &[i32],
    ) -> Option<usize> {
        self.collections
            .iter()
            .position(|col| col.matches_fingerprint(cond, sd, values))
    }

    /// Find the collection with the given identity.
    pub fn find_data_collection(
        &self,
        cond: MatchFn,
        sd: i16,
        values: &[i32],
    ) -> Option<&EntryCollection> {
        self.collections
            .iter()
            .find(|col| col.matches_fingerprint(cond, sd, values))
    }

    /// Drop the interval data of every registered collection. Done before
    /// the loaded data changes; the collections are rebuilt against the
    /// new data afterwards.
    pub fn reset_all_collections(&mut self) {
        for col in &mut self.collections {
            col.reset();
        }
    }
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

/// Index of the first interval whose break point is not before `pos`.
fn first_interval_from(col: &EntryCollection, pos: usize) -> usize {
    col.break_points.partition_point(|&b| b < pos)
}

/// Index of the last interval whose resume point is not after `pos`,
/// or None if every interval starts after `pos`.
fn last_interval_until(col: &EntryCollection, pos: usize) -> Option<usize> {
    let n = col.resume_points.partition_point(|&r| r <= pos);
    n.checked_sub(1)
}

/// Search front, visiting only the intervals of a collection.
pub fn get_collection_entry_front<'a>(
    ctx: &Context,
    req: &EntryRequest,
    data: &'a [Entry],
    col: &EntryCollection,
) -> EntryMatch<'a> {
    if data.is_empty() || req.n == 0 || req.first >= data.len() || col.size() == 0 {
        return EntryMatch::Empty;
    }

    let req_end = (req.first + req.n - 1).min(data.len() - 1);
    let mut filtered_seen = false;

    for i in first_interval_from(col, req.first)..col.size() {
        let (resume, brk) = col.interval(i);
        if resume > req_end {
            break;
        }

        let start = resume.max(req.first);
        let end = brk.min(req_end);
        let (found, filtered) = scan_range(ctx, req, data, start, end, true);
        filtered_seen |= filtered;

        if found.is_some() {
            return result_from(data, found, filtered_seen);
        }
    }

    result_from(data, None, filtered_seen)
}

/// Search back, visiting only the intervals of a collection.
pub fn get_collection_entry_back<'a>(
    ctx: &Context,
    req: &EntryRequest,
    data: &'a [Entry],
    col: &EntryCollection,
) -> EntryMatch<'a> {
    if data.is_empty() || req.n == 0 || req.first >= data.len() || col.size() == 0 {
        return EntryMatch::Empty;
    }

    let req_end = req.first.saturating_sub(req.n - 1);
    let mut filtered_seen = false;

    let mut i = match last_interval_until(col, req.first) {
        Some(i) => i as isize,
        None => return EntryMatch::Empty,
    };

    while i >= 0 {
        let (resume, brk) = col.interval(i as usize);
        if brk < req_end {
            break;
        }

        let start = brk.min(req.first);
        let end = resume.max(req_end);
        let (found, filtered) = scan_range(ctx, req, data, start, end, false);
        filtered_seen |= filtered;

        if found.is_some() {
            return result_from(data, found, filtered_seen);
        }

        i -= 1;
    }

    result_from(data, None, filtered_seen)
}
