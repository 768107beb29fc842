//! Pluggable readout interfaces.
//!
//! A [`ReadoutInterface`] knows how to detect and open one trace file
//! format. Once it has initialized a stream, the stream carries a
//! [`StreamInterface`] — the per-stream method table used for everything
//! else: entry metadata, event field access and data loading.
//!
//! Every [`StreamInterface`] method is optional; the defaults report
//! "not supported" (`None` / [`FieldFormat::Invalid`]). Callers must be
//! prepared for either. Strings are returned by value; the caller owns
//! them.
//!
//! Backends serialize all file access for one stream on an internal mutex,
//! so concurrent readers of different entries are safe. Raw record handles
//! must not outlive the interface call that produced them.

use std::any::Any;
use std::path::Path;

use crate::entry::Entry;
use crate::error::Result;
use crate::stream::DataStream;

/// The limit in size of the data format identifier string.
pub const DATA_FORMAT_SIZE: usize = 15;

/// Data format identifier of a stream no backend has claimed yet.
pub const INVALID_DATA_FORMAT: &str = "invalid data";

/// Value type of an event data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// A field of unknown type.
    Invalid,

    /// Integer number.
    Integer,

    /// Floating-point number.
    Float,
}

/// Trace data in columnar form: five parallel arrays of equal length.
#[derive(Debug, Default)]
pub struct DataMatrix {
    pub event_id: Vec<i16>,
    pub cpu: Vec<i16>,
    pub pid: Vec<i32>,
    pub offset: Vec<i64>,
    pub ts: Vec<i64>,
}

impl DataMatrix {
    pub fn with_capacity(n_rows: usize) -> Self {
        Self {
            event_id: Vec::with_capacity(n_rows),
            cpu: Vec::with_capacity(n_rows),
            pid: Vec::with_capacity(n_rows),
            offset: Vec::with_capacity(n_rows),
            ts: Vec::with_capacity(n_rows),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.ts.len()
    }

    pub fn push(&mut self, entry: &Entry) {
        self.event_id.push(entry.event_id);
        self.cpu.push(entry.cpu);
        self.pid.push(entry.pid);
        self.offset.push(entry.offset);
        self.ts.push(entry.ts);
    }
}

/// Per-load bookkeeping reported by the backend alongside the data.
#[derive(Debug, Default)]
pub struct LoadStats {
    /// Pids of all tasks observed in the loaded data.
    pub task_pids: Vec<i32>,

    /// CPUs that produced no records.
    pub idle_cpus: Vec<i32>,
}

/// Result of loading a stream as normalized entries.
#[derive(Debug, Default)]
pub struct LoadOutput {
    /// The entries, time-sorted.
    pub entries: Vec<Entry>,

    /// Observed tasks and idle cpus.
    pub stats: LoadStats,
}

/// Result of loading a stream in columnar form.
#[derive(Debug, Default)]
pub struct MatrixOutput {
    /// The five data columns.
    pub matrix: DataMatrix,

    /// Observed tasks and idle cpus.
    pub stats: LoadStats,
}

/// A data readout: detects and opens trace files of one format.
pub trait ReadoutInterface: Send + Sync {
    /// A short name for this data input.
    fn name(&self) -> &str;

    /// Data format identifier, at most [`DATA_FORMAT_SIZE`] bytes, unique
    /// across all registered inputs.
    fn data_format(&self) -> &str;

    /// Cheap sniff deciding whether `path` is in this input's format.
    fn check_data(&self, path: &Path) -> bool;

    /// Open the stream's file and attach a [`StreamInterface`] to it.
    /// Populates `n_cpus`, `n_events` and `idle_pid` of the stream.
    ///
    /// Backend state is released when the attached interface is dropped.
    fn init_stream(&self, stream: &mut DataStream) -> Result<()>;

    /// Open one named sub-buffer of the stream's file instead of the
    /// top-level buffer. Backends without multi-buffer support keep the
    /// default.
    fn init_buffer(&self, stream: &mut DataStream, name: &str) -> Result<()> {
        let _ = name;
        Err(crate::error::Error::Backend(format!(
            "{}: no sub-buffer support",
            stream.file.display()
        )))
    }
}

/// The interface of methods used to operate over the data of one stream.
///
/// Backends override the methods they support. `stream` is the owning
/// stream; it is passed back so that a method can reach stream metadata
/// without holding its own reference.
#[allow(unused_variables)]
pub trait StreamInterface: Send + Sync {
    /// Process Id of the entry, as recorded in the trace file. Differs
    /// from `entry.pid` only if a plugin rewrote the entry.
    fn get_pid(&self, stream: &DataStream, entry: &Entry) -> Option<i32> {
        None
    }

    /// Event Id of the entry, as recorded in the trace file.
    fn get_event_id(&self, stream: &DataStream, entry: &Entry) -> Option<i32> {
        None
    }

    /// Name of the entry's event.
    fn get_event_name(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        None
    }

    /// Name of the entry's task.
    fn get_task(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        None
    }

    /// The info text of the entry.
    fn get_info(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        None
    }

    /// Unspecified auxiliary info of the raw record (latency data for
    /// tracepoint backends).
    fn aux_info(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        None
    }

    /// Event Id corresponding to an event name.
    fn find_event_id(&self, stream: &DataStream, name: &str) -> Option<i32> {
        None
    }

    /// Ids of all event kinds in this stream.
    fn all_event_ids(&self, stream: &DataStream) -> Option<Vec<i32>> {
        None
    }

    /// One-line summary of the entry.
    fn dump_entry(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        None
    }

    /// Names of all data fields of the entry's event.
    fn all_event_field_names(
        &self,
        stream: &DataStream,
        entry: &Entry,
    ) -> Option<Vec<String>> {
        None
    }

    /// Value type of one data field of the entry's event.
    fn event_field_type(
        &self,
        stream: &DataStream,
        entry: &Entry,
        field: &str,
    ) -> FieldFormat {
        FieldFormat::Invalid
    }

    /// Read an integer field of the entry's event, going back to the
    /// record in the file via the entry's offset.
    fn read_event_field_i64(
        &self,
        stream: &DataStream,
        entry: &Entry,
        field: &str,
    ) -> Option<i64> {
        None
    }

    /// Read an integer field directly from a raw record handle.
    fn read_record_field_i64(
        &self,
        stream: &DataStream,
        record: &dyn Any,
        field: &str,
    ) -> Option<i64> {
        None
    }

    /// Names of all sub-buffers of the stream's file, excluding the top
    /// buffer.
    fn buffer_names(&self, stream: &DataStream) -> Vec<String> {
        Vec::new()
    }

    /// Load the stream's data as normalized entries, time-sorted.
    fn load_entries(&self, stream: &DataStream, filter_mask: u8) -> Result<LoadOutput>;

    /// Load the stream's data in columnar form.
    fn load_matrix(&self, stream: &DataStream, filter_mask: u8) -> Result<MatrixOutput>;

    /// Install an advanced filter, given as `event name:condition`.
    /// Requires a reload to take effect on the `visible` fields.
    fn add_adv_filter(&self, stream: &DataStream, filter: &str) -> Result<()> {
        Err(crate::error::Error::Backend(format!(
            "stream {} supports no advanced filtering",
            stream.stream_id
        )))
    }

    /// Drop all advanced filters of this stream.
    fn clear_adv_filters(&self, stream: &DataStream) {}

    /// The installed advanced filters as (event name, condition) pairs.
    fn adv_filters(&self, stream: &DataStream) -> Vec<(String, String)> {
        Vec::new()
    }
}
