//! Cross-stream merge and whole-context load operations.
//!
//! Backends deliver per-stream arrays that are already time-sorted. The
//! functions here combine such arrays into one globally ordered sequence,
//! stably: ties resolve by stream id, then by the original intra-stream
//! order.

use std::any::Any;

use crate::context::Context;
use crate::entry::Entry;
use crate::error::Result;
use crate::plugin::{EventHandler, run_event_hooks};
use crate::readout::DataMatrix;
use crate::stream::{DataStream, offset_calib};

/// Post-process one freshly produced entry: apply the stream's time
/// calibration, then all matching plugin event actions.
pub fn postprocess_entry(
    stream: &DataStream,
    handlers: &[EventHandler],
    record: &dyn Any,
    entry: &mut Entry,
) {
    stream.calib_entry(entry);
    run_event_hooks(handlers, stream, record, entry);
}

/// Merge per-stream, time-sorted entry arrays into one globally sorted
/// array. Stable: ties break by stream id, then input order.
pub fn merge_data_entries(buffers: Vec<Vec<Entry>>) -> Vec<Entry> {
    let total: usize = buffers.iter().map(Vec::len).sum();
    let mut rows = Vec::with_capacity(total);
    let mut heads: Vec<usize> = vec![0; buffers.len()];

    for _ in 0..total {
        let mut next: Option<usize> = None;

        for buf in 0..buffers.len() {
            if heads[buf] == buffers[buf].len() {
                continue;
            }

            next = match next {
                None => Some(buf),
                Some(best) => {
                    let a = &buffers[buf][heads[buf]];
                    let b = &buffers[best][heads[best]];
                    if (a.ts, a.stream_id) < (b.ts, b.stream_id) {
                        Some(buf)
                    } else {
                        Some(best)
                    }
                }
            };
        }

        let buf = next.expect("merge head exists while rows remain");
        rows.push(buffers[buf][heads[buf]]);
        heads[buf] += 1;
    }

    rows
}

/// Merge per-stream data matrices into one, ordered by the timestamp
/// column. The per-row stream identity is not part of a matrix, so ties
/// keep the buffer input order.
pub fn merge_data_matrices(buffers: Vec<DataMatrix>) -> DataMatrix {
    let total: usize = buffers.iter().map(DataMatrix::n_rows).sum();
    let mut merged = DataMatrix::with_capacity(total);
    let mut heads: Vec<usize> = vec![0; buffers.len()];

    for _ in 0..total {
        let mut next: Option<usize> = None;

        for buf in 0..buffers.len() {
            if heads[buf] == buffers[buf].n_rows() {
                continue;
            }

            next = match next {
                None => Some(buf),
                Some(best) => {
                    if buffers[buf].ts[heads[buf]] < buffers[best].ts[heads[best]] {
                        Some(buf)
                    } else {
                        Some(best)
                    }
                }
            };
        }

        let buf = next.expect("merge head exists while rows remain");
        let head = heads[buf];
        merged.event_id.push(buffers[buf].event_id[head]);
        merged.cpu.push(buffers[buf].cpu[head]);
        merged.pid.push(buffers[buf].pid[head]);
        merged.offset.push(buffers[buf].offset[head]);
        merged.ts.push(buffers[buf].ts[head]);
        heads[buf] += 1;
    }

    merged
}

/// Merge a previously merged array with the freshly loaded array of one
/// added stream, in a single linear pass.
pub fn append_entries(prior: Vec<Entry>, fresh: Vec<Entry>) -> Vec<Entry> {
    let mut rows = Vec::with_capacity(prior.len() + fresh.len());
    let mut prior = prior.into_iter().peekable();
    let mut fresh = fresh.into_iter().peekable();

    loop {
        match (prior.peek(), fresh.peek()) {
            (Some(a), Some(b)) => {
                if (b.ts, b.stream_id) < (a.ts, a.stream_id) {
                    rows.push(fresh.next().unwrap());
                } else {
                    rows.push(prior.next().unwrap());
                }
            }
            (Some(_), None) => rows.push(prior.next().unwrap()),
            (None, Some(_)) => rows.push(fresh.next().unwrap()),
            (None, None) => break,
        }
    }

    rows
}

impl Context {
    /// Load the data of every open stream and merge it into one globally
    /// time-ordered array. All registered collections are reset first;
    /// rebuild them against the returned data.
    pub fn load_all_entries(&mut self) -> Result<Vec<Entry>> {
        self.reset_all_collections();

        let mut buffers = Vec::new();
        for sd in self.all_streams() {
            buffers.push(self.load_entries(sd)?);
        }

        Ok(merge_data_entries(buffers))
    }

    /// Load the data of every open stream in columnar form and merge it.
    pub fn load_all_matrices(&mut self) -> Result<DataMatrix> {
        self.reset_all_collections();

        let mut buffers = Vec::new();
        for sd in self.all_streams() {
            buffers.push(self.load_matrix(sd)?);
        }

        Ok(merge_data_matrices(buffers))
    }

    /// Load the freshly added stream `sd` and merge its rows into a
    /// previously merged array. The model for incrementally appending
    /// trace files. Collections are reset first.
    pub fn append_all_entries(&mut self, prior: Vec<Entry>, sd: i16) -> Result<Vec<Entry>> {
        self.reset_all_collections();

        let fresh = self.load_entries(sd)?;
        Ok(append_entries(prior, fresh))
    }

    /// Install an offset calibration on stream `sd` and shift its rows
    /// inside an already merged array accordingly. The array is restored
    /// to global time order.
    pub fn set_clock_offset(
        &mut self,
        entries: &mut Vec<Entry>,
        sd: i16,
        offset: i64,
    ) -> Result<()> {
        let stream = self
            .get_stream_mut(sd)
            .ok_or(crate::error::Error::BadHandle(sd))?;

        let applied = if stream.calib.is_some() {
            stream.calib_array.first().copied().unwrap_or(0)
        } else {
            0
        };

        stream.calib = Some(offset_calib);
        stream.calib_array = vec![offset];

        let delta = offset - applied;
        for entry in entries.iter_mut().filter(|e| e.stream_id == sd) {
            entry.ts += delta;
        }

        entries.sort_by_key(|e| (e.ts, e.stream_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_rows(sd: i16, start_ts: i64, step: i64, n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| {
                let mut e = Entry::new();
                e.stream_id = sd;
                e.ts = start_ts + step * i as i64;
                e.offset = i as i64;
                e
            })
            .collect()
    }

    #[test]
    fn merge_is_globally_sorted() {
        let a = stream_rows(0, 1000, 7, 200);
        let b = stream_rows(1, 990, 11, 150);
        let c = stream_rows(2, 2000, 3, 100);

        let merged = merge_data_entries(vec![a, b, c]);
        assert_eq!(merged.len(), 450);
        assert!(merged.windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[test]
    fn merge_ties_break_by_stream_id() {
        let a = stream_rows(1, 1000, 10, 5);
        let b = stream_rows(0, 1000, 10, 5);

        let merged = merge_data_entries(vec![a, b]);
        for pair in merged.chunks(2) {
            assert_eq!(pair[0].ts, pair[1].ts);
            assert_eq!(pair[0].stream_id, 0);
            assert_eq!(pair[1].stream_id, 1);
        }
    }

    #[test]
    fn merge_keeps_intra_stream_order() {
        let mut a = stream_rows(0, 1000, 0, 10);
        for (i, e) in a.iter_mut().enumerate() {
            e.offset = i as i64;
        }

        let merged = merge_data_entries(vec![a]);
        let offsets: Vec<i64> = merged.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn append_equals_full_merge() {
        let a = stream_rows(0, 1000, 7, 100);
        let b = stream_rows(1, 1203, 5, 80);

        let merged = merge_data_entries(vec![a.clone(), b.clone()]);
        let appended = append_entries(a, b);

        assert_eq!(merged, appended);
    }

    #[test]
    fn append_to_empty() {
        let b = stream_rows(1, 10, 5, 4);
        assert_eq!(append_entries(Vec::new(), b.clone()), b);
        assert_eq!(append_entries(b.clone(), Vec::new()), b);
    }
}
