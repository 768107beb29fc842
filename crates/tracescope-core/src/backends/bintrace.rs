//! The built-in binary trace format.
//!
//! A `bintrace` file is a self-contained container: a shared event table
//! (event names plus named integer fields), a task name table, and one or
//! more buffers of per-cpu, time-ordered records. The first buffer with
//! an empty name is the *top* buffer; further named buffers open as
//! separate streams.
//!
//! All numbers are little-endian. Layout:
//!
//! ```text
//! magic "TRACEBIN", version u32, idle_pid i32
//! n_events u32, then per event: id i16, name, n_fields u16, field names
//! n_tasks u32, then per task: pid i32, comm
//! n_buffers u32, then per buffer:
//!     name, n_cpus u32, n_records u64,
//!     then per record: cpu u16, event id i16, pid i32,
//!                      missed u32, ts i64, one i64 per event field
//! ```
//!
//! Strings are a u16 length followed by UTF-8 bytes. A record's locator
//! (`Entry::offset`) is its byte position in the file.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::entry::{EVENT_OVERFLOW, Entry, MISSED_EVENTS_TIME_SHIFT, PLUGIN_UNTOUCHED_MASK};
use crate::error::{Error, Result};
use crate::filter::unset_event_filter_flag;
use crate::load::postprocess_entry;
use crate::readout::{
    DataMatrix, FieldFormat, LoadOutput, LoadStats, MatrixOutput, ReadoutInterface,
    StreamInterface,
};
use crate::stream::DataStream;

/// Data format identifier of this backend.
pub const BINTRACE_FORMAT: &str = "bintrace";

const MAGIC: &[u8; 8] = b"TRACEBIN";
const VERSION: u32 = 1;

/// One record as stored in the file. Event actions receive these as
/// their raw-record argument.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Byte position of the record in the file.
    pub offset: i64,

    /// CPU core that produced the record.
    pub cpu: i16,

    /// Event kind, resolved against the file's event table.
    pub event_id: i16,

    /// Process Id.
    pub pid: i32,

    /// Number of records lost just before this one.
    pub missed_events: u32,

    /// Timestamp in nanoseconds, uncalibrated.
    pub ts: i64,

    /// Values of the event's data fields, in table order.
    pub fields: Vec<i64>,
}

#[derive(Debug, Clone)]
struct EventDesc {
    id: i16,
    name: String,
    fields: Vec<String>,
}

/// Immutable per-file metadata, shared outside the data lock so that
/// plugin actions may resolve fields while a load is in flight.
struct TraceMeta {
    path: PathBuf,
    idle_pid: i32,
    n_cpus: i32,
    events: Vec<EventDesc>,
    by_event_id: HashMap<i16, usize>,
    tasks: HashMap<i32, String>,
    buffer_names: Vec<String>,
}

impl TraceMeta {
    fn event(&self, id: i16) -> Option<&EventDesc> {
        self.by_event_id.get(&id).map(|&i| &self.events[i])
    }

    fn field_index(&self, event_id: i16, field: &str) -> Option<usize> {
        self.event(event_id)?.fields.iter().position(|f| f == field)
    }
}

/// The parsed records of one buffer.
struct TraceData {
    records: Arc<Vec<RawRecord>>,
    per_cpu: Arc<Vec<Vec<usize>>>,
    by_offset: Arc<HashMap<i64, usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

/// One compiled advanced-filter condition.
#[derive(Debug, Clone)]
struct AdvFilter {
    event_id: i16,
    event_name: String,
    field_index: usize,
    op: CmpOp,
    value: i64,
    condition: String,
}

impl AdvFilter {
    fn matches(&self, record: &RawRecord) -> bool {
        if record.event_id != self.event_id {
            return true;
        }

        let Some(&field) = record.fields.get(self.field_index) else {
            return false;
        };

        match self.op {
            CmpOp::Eq => field == self.value,
            CmpOp::Ne => field != self.value,
            CmpOp::Le => field <= self.value,
            CmpOp::Ge => field >= self.value,
            CmpOp::Lt => field < self.value,
            CmpOp::Gt => field > self.value,
        }
    }
}

/* ---------------------------------------------------------------------
 * Parsing
 * --------------------------------------------------------------------- */

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], path: &'a Path) -> Self {
        Self { buf, pos: 0, path }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(Error::InvalidFormat(format!(
            "{}: truncated at byte {}",
            self.path.display(),
            self.pos
        )))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return self.fail();
        }

        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;

        String::from_utf8(raw.to_vec()).map_err(|_| {
            Error::InvalidFormat(format!(
                "{}: bad string at byte {}",
                self.path.display(),
                self.pos
            ))
        })
    }
}

struct ParsedFile {
    meta: TraceMeta,
    data: TraceData,
}

/// Parse the file, keeping the records of the buffer with the given
/// name. `None` selects the top (unnamed) buffer.
fn parse_file(path: &Path, buffer: Option<&str>) -> Result<ParsedFile> {
    let raw = std::fs::read(path)?;
    let mut r = Reader::new(&raw, path);

    if r.bytes(8)? != &MAGIC[..] {
        return Err(Error::InvalidFormat(format!(
            "{}: not a {} file",
            path.display(),
            BINTRACE_FORMAT
        )));
    }

    let version = r.u32()?;
    if version != VERSION {
        return Err(Error::InvalidFormat(format!(
            "{}: unsupported version {}",
            path.display(),
            version
        )));
    }

    let idle_pid = r.i32()?;

    let n_events = r.u32()? as usize;
    let mut events = Vec::with_capacity(n_events);
    let mut by_event_id = HashMap::new();
    for _ in 0..n_events {
        let id = r.i16()?;
        let name = r.string()?;
        let n_fields = r.u16()? as usize;
        let mut fields = Vec::with_capacity(n_fields);
        for _ in 0..n_fields {
            fields.push(r.string()?);
        }

        by_event_id.insert(id, events.len());
        events.push(EventDesc { id, name, fields });
    }

    let n_tasks = r.u32()? as usize;
    let mut tasks = HashMap::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        let pid = r.i32()?;
        let comm = r.string()?;
        tasks.insert(pid, comm);
    }

    let wanted = buffer.unwrap_or("");
    let mut buffer_names = Vec::new();
    let mut selected: Option<(i32, Vec<RawRecord>)> = None;

    let n_buffers = r.u32()? as usize;
    for _ in 0..n_buffers {
        let name = r.string()?;
        let n_cpus = r.u32()? as i32;
        let n_records = r.u64()? as usize;
        let keep = name == wanted && selected.is_none();

        let mut records = Vec::with_capacity(if keep { n_records } else { 0 });
        for _ in 0..n_records {
            let offset = r.pos as i64;
            let cpu = r.u16()? as i16;
            let event_id = r.i16()?;
            let pid = r.i32()?;
            let missed_events = r.u32()?;
            let ts = r.i64()?;

            let n_fields = by_event_id
                .get(&event_id)
                .map(|&i| events[i].fields.len())
                .unwrap_or(0);
            let mut fields = Vec::with_capacity(n_fields);
            for _ in 0..n_fields {
                fields.push(r.i64()?);
            }

            if keep {
                if i32::from(cpu) >= n_cpus {
                    return Err(Error::InvalidFormat(format!(
                        "{}: record on cpu {} of {}",
                        path.display(),
                        cpu,
                        n_cpus
                    )));
                }

                records.push(RawRecord {
                    offset,
                    cpu,
                    event_id,
                    pid,
                    missed_events,
                    ts,
                    fields,
                });
            }
        }

        if !name.is_empty() {
            buffer_names.push(name.clone());
        }

        if keep {
            selected = Some((n_cpus, records));
        }
    }

    let Some((n_cpus, records)) = selected else {
        return Err(Error::NotFound(format!(
            "{}: no buffer named {:?}",
            path.display(),
            wanted
        )));
    };

    let mut per_cpu: Vec<Vec<usize>> = vec![Vec::new(); n_cpus as usize];
    let mut by_offset = HashMap::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        per_cpu[rec.cpu as usize].push(i);
        by_offset.insert(rec.offset, i);
    }

    debug!(
        "{}: buffer {:?}, {} cpus, {} records",
        path.display(),
        wanted,
        n_cpus,
        records.len()
    );

    Ok(ParsedFile {
        meta: TraceMeta {
            path: path.to_path_buf(),
            idle_pid,
            n_cpus,
            events,
            by_event_id,
            tasks,
            buffer_names,
        },
        data: TraceData {
            records: Arc::new(records),
            per_cpu: Arc::new(per_cpu),
            by_offset: Arc::new(by_offset),
        },
    })
}

/* ---------------------------------------------------------------------
 * The readout
 * --------------------------------------------------------------------- */

/// Readout interface of the built-in binary trace format.
pub struct BintraceInput;

impl ReadoutInterface for BintraceInput {
    fn name(&self) -> &str {
        "bintrace"
    }

    fn data_format(&self) -> &str {
        BINTRACE_FORMAT
    }

    fn check_data(&self, path: &Path) -> bool {
        let mut magic = [0u8; 8];
        match std::fs::File::open(path) {
            Ok(mut file) => {
                use std::io::Read;
                file.read_exact(&mut magic).is_ok() && &magic == MAGIC
            }
            Err(_) => false,
        }
    }

    fn init_stream(&self, stream: &mut DataStream) -> Result<()> {
        let parsed = parse_file(&stream.file, None)?;
        attach(stream, parsed);
        Ok(())
    }

    fn init_buffer(&self, stream: &mut DataStream, name: &str) -> Result<()> {
        let parsed = parse_file(&stream.file, Some(name))?;
        attach(stream, parsed);
        Ok(())
    }
}

fn attach(stream: &mut DataStream, parsed: ParsedFile) {
    stream.n_cpus = parsed.meta.n_cpus;
    stream.n_events = parsed.meta.events.len() as i32;
    stream.idle_pid = parsed.meta.idle_pid;

    stream.interface = Some(Box::new(BintraceInterface {
        meta: parsed.meta,
        data: Mutex::new(parsed.data),
        adv: Mutex::new(Vec::new()),
    }));
}

/// Per-stream method table of the binary trace backend.
///
/// `data` is behind the stream's input lock: every method that touches
/// the file-backed records serializes on it. The event/task tables are
/// immutable and live outside the lock, so plugin event actions may
/// resolve record fields while a load holds the lock.
struct BintraceInterface {
    meta: TraceMeta,
    data: Mutex<TraceData>,
    adv: Mutex<Vec<AdvFilter>>,
}

impl BintraceInterface {
    fn record_by_offset(&self, offset: i64) -> Option<RawRecord> {
        let data = self.data.lock().unwrap();
        let idx = *data.by_offset.get(&offset)?;
        Some(data.records[idx].clone())
    }

    fn record_pid(&self, entry: &Entry) -> Option<i32> {
        if entry.visible & PLUGIN_UNTOUCHED_MASK != 0 {
            return Some(entry.pid);
        }

        /* The entry has been touched by a plugin; do not trust its pid,
         * go back to the record. */
        Some(self.record_by_offset(entry.offset)?.pid)
    }

    fn record_event_id(&self, entry: &Entry) -> Option<i32> {
        if entry.visible & PLUGIN_UNTOUCHED_MASK != 0 {
            return Some(i32::from(entry.event_id));
        }

        Some(i32::from(self.record_by_offset(entry.offset)?.event_id))
    }

    fn comm(&self, pid: i32) -> String {
        match self.meta.tasks.get(&pid) {
            Some(comm) => comm.clone(),
            None => format!("task-{pid}"),
        }
    }

    fn load_pipeline(&self, stream: &DataStream, filter_mask: u8) -> Result<LoadOutput> {
        let (records, per_cpu) = {
            let data = self.data.lock().unwrap();
            (Arc::clone(&data.records), Arc::clone(&data.per_cpu))
        };
        let adv: Vec<AdvFilter> = self.adv.lock().unwrap().clone();
        let handlers = stream.event_handlers.clone();

        let n_cpus = per_cpu.len();
        let mut cpu_rows: Vec<Vec<Entry>> = vec![Vec::new(); n_cpus];
        let mut stats = LoadStats::default();
        let mut seen_pids: Vec<i32> = Vec::new();

        for cpu in 0..n_cpus {
            for &ri in &per_cpu[cpu] {
                let rec = &records[ri];

                if rec.missed_events > 0 {
                    /* Insert a custom missed-events entry just before
                     * this record. */
                    let mut entry = Entry::new();
                    entry.offset = i64::from(rec.missed_events);
                    entry.cpu = rec.cpu;
                    entry.ts = rec.ts - MISSED_EVENTS_TIME_SHIFT;
                    entry.event_id = EVENT_OVERFLOW;
                    entry.pid = rec.pid;
                    entry.stream_id = stream.stream_id;
                    postprocess_entry(stream, &handlers, rec, &mut entry);
                    cpu_rows[cpu].push(entry);
                }

                let mut entry = Entry::new();
                entry.offset = rec.offset;
                entry.cpu = rec.cpu;
                entry.ts = rec.ts;
                entry.event_id = rec.event_id;
                entry.pid = rec.pid;
                entry.stream_id = stream.stream_id;

                postprocess_entry(stream, &handlers, rec, &mut entry);
                let pid = entry.pid;

                stream.apply_filters(filter_mask, &mut entry);
                if !adv.is_empty() && !adv.iter().all(|f| f.matches(rec)) {
                    unset_event_filter_flag(filter_mask, &mut entry);
                }

                seen_pids.push(pid);
                cpu_rows[cpu].push(entry);
            }

            if per_cpu[cpu].is_empty() {
                stats.idle_cpus.push(cpu as i32);
            }
        }

        seen_pids.sort_unstable();
        seen_pids.dedup();
        stats.task_pids = seen_pids;

        /* Records are time-sorted within each cpu; merge the cpus,
         * always taking the smallest head timestamp. Ties go to the
         * lower cpu index. */
        let total: usize = cpu_rows.iter().map(Vec::len).sum();
        let mut rows = Vec::with_capacity(total);
        let mut heads = vec![0usize; n_cpus];
        for _ in 0..total {
            let mut next: Option<usize> = None;
            for cpu in 0..n_cpus {
                if heads[cpu] == cpu_rows[cpu].len() {
                    continue;
                }

                next = match next {
                    None => Some(cpu),
                    Some(best) => {
                        if cpu_rows[cpu][heads[cpu]].ts < cpu_rows[best][heads[best]].ts {
                            Some(cpu)
                        } else {
                            Some(best)
                        }
                    }
                };
            }

            let cpu = next.expect("cpu head exists while rows remain");
            rows.push(cpu_rows[cpu][heads[cpu]]);
            heads[cpu] += 1;
        }

        Ok(LoadOutput {
            entries: rows,
            stats,
        })
    }
}

impl StreamInterface for BintraceInterface {
    fn get_pid(&self, _stream: &DataStream, entry: &Entry) -> Option<i32> {
        self.record_pid(entry)
    }

    fn get_event_id(&self, _stream: &DataStream, entry: &Entry) -> Option<i32> {
        self.record_event_id(entry)
    }

    fn get_event_name(&self, _stream: &DataStream, entry: &Entry) -> Option<String> {
        let event_id = self.record_event_id(entry)?;
        if event_id < 0 {
            if event_id == i32::from(EVENT_OVERFLOW) {
                return Some(String::from("missed_events"));
            }

            return None;
        }

        self.meta
            .event(event_id as i16)
            .map(|desc| desc.name.clone())
    }

    fn get_task(&self, _stream: &DataStream, entry: &Entry) -> Option<String> {
        Some(self.comm(self.record_pid(entry)?))
    }

    fn get_info(&self, _stream: &DataStream, entry: &Entry) -> Option<String> {
        if entry.event_id == EVENT_OVERFLOW {
            return Some(format!("missed_events={}", entry.offset));
        }

        let rec = self.record_by_offset(entry.offset)?;
        let desc = self.meta.event(rec.event_id)?;
        let info = desc
            .fields
            .iter()
            .zip(&rec.fields)
            .map(|(name, val)| format!("{name}={val}"))
            .collect::<Vec<_>>()
            .join(" ");

        Some(info)
    }

    fn find_event_id(&self, _stream: &DataStream, name: &str) -> Option<i32> {
        self.meta
            .events
            .iter()
            .find(|desc| desc.name == name)
            .map(|desc| i32::from(desc.id))
    }

    fn all_event_ids(&self, _stream: &DataStream) -> Option<Vec<i32>> {
        let mut ids: Vec<i32> = self.meta.events.iter().map(|d| i32::from(d.id)).collect();
        ids.sort_unstable();
        Some(ids)
    }

    fn dump_entry(&self, stream: &DataStream, entry: &Entry) -> Option<String> {
        let task = self.get_task(stream, entry)?;
        let event = self.get_event_name(stream, entry)?;
        let info = self.get_info(stream, entry).unwrap_or_default();

        Some(format!(
            "{}; {}-{}; CPU {}; ; {}; {}",
            entry.ts, task, entry.pid, entry.cpu, event, info
        ))
    }

    fn all_event_field_names(
        &self,
        _stream: &DataStream,
        entry: &Entry,
    ) -> Option<Vec<String>> {
        Some(self.meta.event(entry.event_id)?.fields.clone())
    }

    fn event_field_type(
        &self,
        _stream: &DataStream,
        entry: &Entry,
        field: &str,
    ) -> FieldFormat {
        match self.meta.field_index(entry.event_id, field) {
            Some(_) => FieldFormat::Integer,
            None => FieldFormat::Invalid,
        }
    }

    fn read_event_field_i64(
        &self,
        _stream: &DataStream,
        entry: &Entry,
        field: &str,
    ) -> Option<i64> {
        let idx = self.meta.field_index(entry.event_id, field)?;
        let rec = self.record_by_offset(entry.offset)?;

        rec.fields.get(idx).copied()
    }

    fn read_record_field_i64(
        &self,
        _stream: &DataStream,
        record: &dyn Any,
        field: &str,
    ) -> Option<i64> {
        let rec = record.downcast_ref::<RawRecord>()?;
        let idx = self.meta.field_index(rec.event_id, field)?;

        rec.fields.get(idx).copied()
    }

    fn buffer_names(&self, _stream: &DataStream) -> Vec<String> {
        self.meta.buffer_names.clone()
    }

    fn load_entries(&self, stream: &DataStream, filter_mask: u8) -> Result<LoadOutput> {
        self.load_pipeline(stream, filter_mask)
    }

    fn load_matrix(&self, stream: &DataStream, filter_mask: u8) -> Result<MatrixOutput> {
        let out = self.load_pipeline(stream, filter_mask)?;

        let mut matrix = DataMatrix::with_capacity(out.entries.len());
        for entry in &out.entries {
            matrix.push(entry);
        }

        Ok(MatrixOutput {
            matrix,
            stats: out.stats,
        })
    }

    fn add_adv_filter(&self, _stream: &DataStream, filter: &str) -> Result<()> {
        let parsed = self.parse_adv_filter(filter)?;
        self.adv.lock().unwrap().push(parsed);
        Ok(())
    }

    fn clear_adv_filters(&self, _stream: &DataStream) {
        self.adv.lock().unwrap().clear();
    }

    fn adv_filters(&self, _stream: &DataStream) -> Vec<(String, String)> {
        self.adv
            .lock()
            .unwrap()
            .iter()
            .map(|f| (f.event_name.clone(), f.condition.clone()))
            .collect()
    }
}

impl BintraceInterface {
    /// Compile an `event name:field OP value` expression.
    fn parse_adv_filter(&self, filter: &str) -> Result<AdvFilter> {
        let bad = |why: &str| {
            Error::InvalidFormat(format!(
                "{}: advanced filter {:?}: {}",
                self.meta.path.display(),
                filter,
                why
            ))
        };

        let (event_name, condition) = filter.split_once(':').ok_or_else(|| bad("no ':'"))?;

        let ops = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        let (field, op, value) = ops
            .iter()
            .find_map(|(sym, op)| {
                condition
                    .split_once(sym)
                    .map(|(f, v)| (f.trim(), *op, v.trim()))
            })
            .ok_or_else(|| bad("no comparison operator"))?;

        let desc = self
            .meta
            .events
            .iter()
            .find(|d| d.name == event_name)
            .ok_or_else(|| bad("unknown event"))?;
        let field_index = desc
            .fields
            .iter()
            .position(|f| f == field)
            .ok_or_else(|| bad("unknown field"))?;
        let value: i64 = value.parse().map_err(|_| bad("bad value"))?;

        Ok(AdvFilter {
            event_id: desc.id,
            event_name: event_name.to_string(),
            field_index,
            op,
            value,
            condition: condition.to_string(),
        })
    }
}

/* ---------------------------------------------------------------------
 * Writing
 * --------------------------------------------------------------------- */

/// Generation of `bintrace` files, used by tooling and tests to produce
/// synthetic traces.
pub mod writer {
    use super::{MAGIC, VERSION};
    use crate::error::Result;
    use std::path::Path;

    /// One record to be written.
    #[derive(Debug, Clone)]
    pub struct RecordSpec {
        pub cpu: u16,
        pub event_id: i16,
        pub pid: i32,
        pub missed_events: u32,
        pub ts: i64,
        pub fields: Vec<i64>,
    }

    struct EventSpec {
        id: i16,
        name: String,
        fields: Vec<String>,
    }

    struct BufferSpec {
        name: String,
        n_cpus: u32,
        records: Vec<RecordSpec>,
    }

    /// Builder for a complete trace file.
    pub struct TraceWriter {
        idle_pid: i32,
        events: Vec<EventSpec>,
        tasks: Vec<(i32, String)>,
        buffers: Vec<BufferSpec>,
    }

    impl TraceWriter {
        pub fn new() -> Self {
            Self {
                idle_pid: 0,
                events: Vec::new(),
                tasks: Vec::new(),
                buffers: Vec::new(),
            }
        }

        pub fn idle_pid(&mut self, pid: i32) -> &mut Self {
            self.idle_pid = pid;
            self
        }

        /// Declare an event kind with its data fields.
        pub fn event(&mut self, id: i16, name: &str, fields: &[&str]) -> &mut Self {
            self.events.push(EventSpec {
                id,
                name: name.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            });
            self
        }

        /// Record a task name.
        pub fn task(&mut self, pid: i32, comm: &str) -> &mut Self {
            self.tasks.push((pid, comm.to_string()));
            self
        }

        /// Add a buffer. The empty name marks the top buffer. Returns
        /// the buffer's index for [`record`](Self::record).
        pub fn buffer(&mut self, name: &str, n_cpus: u32) -> usize {
            self.buffers.push(BufferSpec {
                name: name.to_string(),
                n_cpus,
                records: Vec::new(),
            });

            self.buffers.len() - 1
        }

        /// Queue one record into a buffer.
        pub fn record(&mut self, buffer: usize, rec: RecordSpec) -> &mut Self {
            self.buffers[buffer].records.push(rec);
            self
        }

        fn put_str(out: &mut Vec<u8>, s: &str) {
            out.extend_from_slice(&(s.len() as u16).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }

        /// Serialize to `path`. Records are stable-sorted by timestamp
        /// inside each buffer, which keeps every per-cpu sequence
        /// time-ordered as the format requires.
        pub fn write(&mut self, path: &Path) -> Result<()> {
            let mut out = Vec::new();
            out.extend_from_slice(MAGIC);
            out.extend_from_slice(&VERSION.to_le_bytes());
            out.extend_from_slice(&self.idle_pid.to_le_bytes());

            out.extend_from_slice(&(self.events.len() as u32).to_le_bytes());
            for event in &self.events {
                out.extend_from_slice(&event.id.to_le_bytes());
                Self::put_str(&mut out, &event.name);
                out.extend_from_slice(&(event.fields.len() as u16).to_le_bytes());
                for field in &event.fields {
                    Self::put_str(&mut out, field);
                }
            }

            out.extend_from_slice(&(self.tasks.len() as u32).to_le_bytes());
            for (pid, comm) in &self.tasks {
                out.extend_from_slice(&pid.to_le_bytes());
                Self::put_str(&mut out, comm);
            }

            out.extend_from_slice(&(self.buffers.len() as u32).to_le_bytes());
            for buffer in &mut self.buffers {
                buffer.records.sort_by_key(|rec| rec.ts);

                Self::put_str(&mut out, &buffer.name);
                out.extend_from_slice(&buffer.n_cpus.to_le_bytes());
                out.extend_from_slice(&(buffer.records.len() as u64).to_le_bytes());
                for rec in &buffer.records {
                    out.extend_from_slice(&rec.cpu.to_le_bytes());
                    out.extend_from_slice(&rec.event_id.to_le_bytes());
                    out.extend_from_slice(&rec.pid.to_le_bytes());
                    out.extend_from_slice(&rec.missed_events.to_le_bytes());
                    out.extend_from_slice(&rec.ts.to_le_bytes());
                    for field in &rec.fields {
                        out.extend_from_slice(&field.to_le_bytes());
                    }
                }
            }

            std::fs::write(path, out)?;
            Ok(())
        }
    }

    impl Default for TraceWriter {
        fn default() -> Self {
            Self::new()
        }
    }
}
