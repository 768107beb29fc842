//! Per-stream Id filters and the visibility policy.
//!
//! Each stream carries six Id sets, three `show`/`hide` pairs for the
//! event, task and cpu dimensions. Filtering never removes entries; it
//! clears bits of the entry's `visible` mask, as selected by the
//! context-wide filter mask.

use crate::entry::{self, Entry};
use crate::hashid::{FILTER_HASH_NBITS, HashIdSet};

/// Identifier of one of the six per-stream Id filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    ShowEvent,
    HideEvent,
    ShowTask,
    HideTask,
    ShowCpu,
    HideCpu,
}

impl FilterKind {
    /// The name of this filter in session documents.
    pub fn doc_name(self) -> &'static str {
        match self {
            FilterKind::ShowEvent => "show event filter",
            FilterKind::HideEvent => "hide event filter",
            FilterKind::ShowTask => "show task filter",
            FilterKind::HideTask => "hide task filter",
            FilterKind::ShowCpu => "show cpu filter",
            FilterKind::HideCpu => "hide cpu filter",
        }
    }
}

/// The six Id filters of one data stream.
#[derive(Debug)]
pub struct StreamFilters {
    pub show_event: HashIdSet,
    pub hide_event: HashIdSet,
    pub show_task: HashIdSet,
    pub hide_task: HashIdSet,
    pub show_cpu: HashIdSet,
    pub hide_cpu: HashIdSet,
}

impl StreamFilters {
    pub fn new() -> Self {
        Self {
            show_event: HashIdSet::with_bits(FILTER_HASH_NBITS),
            hide_event: HashIdSet::with_bits(FILTER_HASH_NBITS),
            show_task: HashIdSet::with_bits(FILTER_HASH_NBITS),
            hide_task: HashIdSet::with_bits(FILTER_HASH_NBITS),
            show_cpu: HashIdSet::with_bits(FILTER_HASH_NBITS),
            hide_cpu: HashIdSet::with_bits(FILTER_HASH_NBITS),
        }
    }

    /// Access one filter by its identifier.
    pub fn get(&self, kind: FilterKind) -> &HashIdSet {
        match kind {
            FilterKind::ShowEvent => &self.show_event,
            FilterKind::HideEvent => &self.hide_event,
            FilterKind::ShowTask => &self.show_task,
            FilterKind::HideTask => &self.hide_task,
            FilterKind::ShowCpu => &self.show_cpu,
            FilterKind::HideCpu => &self.hide_cpu,
        }
    }

    /// Mutable access to one filter by its identifier.
    pub fn get_mut(&mut self, kind: FilterKind) -> &mut HashIdSet {
        match kind {
            FilterKind::ShowEvent => &mut self.show_event,
            FilterKind::HideEvent => &mut self.hide_event,
            FilterKind::ShowTask => &mut self.show_task,
            FilterKind::HideTask => &mut self.hide_task,
            FilterKind::ShowCpu => &mut self.show_cpu,
            FilterKind::HideCpu => &mut self.hide_cpu,
        }
    }

    /// True if at least one of the six filters holds an Id.
    pub fn is_set(&self) -> bool {
        self.show_event.is_set()
            || self.hide_event.is_set()
            || self.show_task.is_set()
            || self.hide_task.is_set()
            || self.show_cpu.is_set()
            || self.hide_cpu.is_set()
    }

    /// Drop the contents of all six filters.
    pub fn clear_all(&mut self) {
        self.show_event.clear();
        self.hide_event.clear();
        self.show_task.clear();
        self.hide_task.clear();
        self.show_cpu.clear();
        self.hide_cpu.clear();
    }
}

impl Default for StreamFilters {
    fn default() -> Self {
        Self::new()
    }
}

/// One show/hide pair lets a value through when the show set is empty or
/// contains it, and the hide set does not contain it.
fn filter_pass(show: &HashIdSet, hide: &HashIdSet, v: i32) -> bool {
    (!show.is_set() || show.find(v)) && !(hide.is_set() && hide.find(v))
}

/// Clear the visibility bits selected for entries filtered out by event.
///
/// Entries dropped by the event filters are treated differently when
/// visualized: the graph-view bit of the user mask is ignored and the
/// event-view bit is consumed instead.
pub fn unset_event_filter_flag(filter_mask: u8, entry: &mut Entry) {
    let event_mask = filter_mask & !entry::GRAPH_VIEW_MASK;

    entry.visible &= !event_mask;
}

/// Set the `visible` field of one entry according to the stream's Id
/// filters and the context-wide `filter_mask`.
pub fn apply_filters(filter_mask: u8, filters: &StreamFilters, entry: &mut Entry) {
    /* Start from an entry which is visible everywhere. */
    entry.set_all_visible();

    if !filter_pass(
        &filters.show_event,
        &filters.hide_event,
        i32::from(entry.event_id),
    ) {
        unset_event_filter_flag(filter_mask, entry);
    }

    if !filter_pass(&filters.show_task, &filters.hide_task, entry.pid) {
        entry.visible &= !filter_mask;
    }

    if !filter_pass(
        &filters.show_cpu,
        &filters.hide_cpu,
        i32::from(entry.cpu),
    ) {
        entry.visible &= !filter_mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EVENT_VIEW_MASK, GRAPH_VIEW_MASK, TEXT_VIEW_MASK};

    fn entry(event_id: i16, pid: i32, cpu: i16) -> Entry {
        Entry {
            event_id,
            pid,
            cpu,
            ..Entry::new()
        }
    }

    #[test]
    fn no_filter_set_means_fully_visible() {
        let filters = StreamFilters::new();
        let mask = TEXT_VIEW_MASK | GRAPH_VIEW_MASK | EVENT_VIEW_MASK;

        let mut e = entry(1, 2, 3);
        e.visible = 0;
        apply_filters(mask, &filters, &mut e);
        assert_eq!(e.visible, 0xFF & !crate::entry::PLUGIN_UNTOUCHED_MASK);
        assert!(!filters.is_set());
    }

    #[test]
    fn show_task_filter_hides_other_pids() {
        let mut filters = StreamFilters::new();
        filters.show_task.add(42);
        let mask = TEXT_VIEW_MASK | GRAPH_VIEW_MASK;

        let mut kept = entry(1, 42, 0);
        apply_filters(mask, &filters, &mut kept);
        assert_eq!(kept.visible & mask, mask);

        let mut dropped = entry(1, 43, 0);
        apply_filters(mask, &filters, &mut dropped);
        assert_eq!(dropped.visible & mask, 0);
    }

    #[test]
    fn hide_beats_show() {
        let mut filters = StreamFilters::new();
        filters.show_cpu.add(1);
        filters.hide_cpu.add(1);
        let mask = GRAPH_VIEW_MASK;

        let mut e = entry(1, 0, 1);
        apply_filters(mask, &filters, &mut e);
        assert_eq!(e.visible & mask, 0);
    }

    #[test]
    fn event_filter_keeps_graph_bit() {
        let mut filters = StreamFilters::new();
        filters.show_event.add(100);
        let mask = TEXT_VIEW_MASK | GRAPH_VIEW_MASK | EVENT_VIEW_MASK;

        let mut e = entry(5, 0, 0);
        apply_filters(mask, &filters, &mut e);

        // The graph-view bit survives an event-filter clear; text and
        // event view bits are consumed.
        assert_ne!(e.visible & GRAPH_VIEW_MASK, 0);
        assert_eq!(e.visible & TEXT_VIEW_MASK, 0);
        assert_eq!(e.visible & EVENT_VIEW_MASK, 0);
    }
}
