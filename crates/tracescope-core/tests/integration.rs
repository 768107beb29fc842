//! Integration tests for tracescope-core.
//!
//! These tests drive the full engine pipeline over synthetic trace
//! files: open → stream registry → load → merge → filter → search,
//! plus readout registration and session round-trips.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use tracescope_core::backends::bintrace::writer::{RecordSpec, TraceWriter};
use tracescope_core::context::PluginRecord;
use tracescope_core::entry::Entry;
use tracescope_core::error::Error;
use tracescope_core::plugin::{PLUGIN_ENABLED, PLUGIN_LOADED};
use tracescope_core::plugins::sched::SchedEvents;
use tracescope_core::readout::{
    LoadOutput, LoadStats, MatrixOutput, ReadoutInterface, StreamInterface,
};
use tracescope_core::search::{EntryRequest, get_entry_front, match_pid};
use tracescope_core::session;
use tracescope_core::stream::DataStream;
use tracescope_core::{Context, FilterKind};

const N_RECORDS_TEST1: usize = 1530;
const N_RECORDS_TEST2: usize = 73945;

/// A trace with 8 cpus, 46 tasks and 40 event types, one of which is
/// `sched/sched_switch` with id 323.
fn write_test1(path: &Path) {
    let mut w = TraceWriter::new();

    for id in 300..340i16 {
        if id == 323 {
            w.event(id, "sched/sched_switch", &["prev_pid", "next_pid", "prev_state"]);
        } else {
            w.event(id, &format!("test/event-{id}"), &["common_field"]);
        }
    }

    let pids: Vec<i32> = (100..146).collect();
    for &pid in &pids {
        w.task(pid, &format!("proc-{pid}"));
    }

    let top = w.buffer("", 8);
    for i in 0..N_RECORDS_TEST1 {
        let event_id = 300 + (i % 40) as i16;
        w.record(
            top,
            RecordSpec {
                cpu: (i % 8) as u16,
                event_id,
                pid: pids[i % pids.len()],
                missed_events: 0,
                ts: 1_000_000_000 + 2_000 * i as i64,
                fields: if event_id == 323 {
                    vec![pids[i % pids.len()] as i64, pids[(i + 1) % pids.len()] as i64, 0]
                } else {
                    vec![i as i64]
                },
            },
        );
    }

    w.write(path).unwrap();
}

/// A much larger second trace, overlapping the first in time.
fn write_test2(path: &Path) {
    let mut w = TraceWriter::new();
    w.event(1, "probe/tick", &["seq"]);
    w.task(9000, "burner");

    let top = w.buffer("", 4);
    for i in 0..N_RECORDS_TEST2 {
        w.record(
            top,
            RecordSpec {
                cpu: (i % 4) as u16,
                event_id: 1,
                pid: 9000 + (i % 3) as i32,
                missed_events: 0,
                ts: 1_000_500_000 + 40 * i as i64,
                fields: vec![i as i64],
            },
        );
    }

    w.write(path).unwrap();
}

#[test]
fn single_file_default_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    let sd = ctx.open(&path).unwrap();
    assert_eq!(sd, 0);
    assert_eq!(ctx.all_streams(), vec![0]);

    let entries = ctx.load_entries(sd).unwrap();
    assert_eq!(entries.len(), N_RECORDS_TEST1);

    let stream = ctx.get_stream(sd).unwrap();
    assert_eq!(stream.n_cpus, 8);
    assert_eq!(stream.n_events, 40);
    assert_eq!(ctx.task_pids(sd).unwrap().len(), 46);
    assert_eq!(ctx.find_event_id(sd, "sched/sched_switch"), Some(323));
    assert_eq!(ctx.event_from_id(sd, 323).unwrap(), "sched/sched_switch");

    // Time order, globally and per cpu.
    assert!(entries.windows(2).all(|w| w[0].ts <= w[1].ts));
    for cpu in 0..8i32 {
        let mut last = i64::MIN;
        for e in entries.iter().filter(|e| i32::from(e.cpu) == cpu) {
            assert!(e.ts >= last);
            last = e.ts;
        }
    }

    // Without filters everything is fully visible.
    assert!(!ctx.filter_is_set(sd));
    assert!(entries.iter().all(|e| e.visible == 0xFF));

    // Every entry points back to a live, claimed stream.
    assert!(entries.iter().all(|e| ctx.get_stream(e.stream_id).is_some()));
}

#[test]
fn append_two_files() {
    let dir = TempDir::new().unwrap();
    let path1 = dir.path().join("trace_test1.dat");
    let path2 = dir.path().join("trace_test2.dat");
    write_test1(&path1);
    write_test2(&path2);

    let mut ctx = Context::new();
    let sd1 = ctx.open(&path1).unwrap();
    let prior = ctx.load_entries(sd1).unwrap();
    assert_eq!(prior.len(), N_RECORDS_TEST1);

    let sd2 = ctx.open(&path2).unwrap();
    assert_eq!((sd1, sd2), (0, 1));
    assert_eq!(ctx.all_streams(), vec![0, 1]);

    let merged = ctx.append_all_entries(prior, sd2).unwrap();
    assert_eq!(merged.len(), N_RECORDS_TEST1 + N_RECORDS_TEST2);
    assert!(merged.windows(2).all(|w| w[0].ts <= w[1].ts));

    // The append path must agree with a full reload.
    let reloaded = ctx.load_all_entries().unwrap();
    assert_eq!(merged, reloaded);
}

#[test]
fn event_show_filter_controls_visibility() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    ctx.filter_mask =
        tracescope_core::TEXT_VIEW_MASK | tracescope_core::EVENT_VIEW_MASK;
    let sd = ctx.open(&path).unwrap();

    ctx.filter_add_id(sd, FilterKind::ShowEvent, 323).unwrap();
    assert!(ctx.filter_is_set(sd));

    let entries = ctx.load_entries(sd).unwrap();
    for e in &entries {
        let visible = e.visible & tracescope_core::EVENT_VIEW_MASK != 0;
        assert_eq!(visible, e.event_id == 323);
    }

    // Re-filtering in place reaches the same state after a clear.
    let mut entries = entries;
    ctx.filter_clear(sd, FilterKind::ShowEvent).unwrap();
    ctx.filter_add_id(sd, FilterKind::HideEvent, 300).unwrap();
    ctx.filter_stream_entries(sd, &mut entries);
    for e in &entries {
        let visible = e.visible & tracescope_core::EVENT_VIEW_MASK != 0;
        assert_eq!(visible, e.event_id != 300);
    }

    ctx.clear_all_filters(&mut entries);
    assert!(entries.iter().all(|e| e.visible & 0x7F == 0x7F));
}

#[test]
fn stream_close_recycles_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    let sd = ctx.open(&path).unwrap();
    assert!(ctx.get_stream(sd).is_some());

    ctx.close(sd).unwrap();
    assert!(ctx.get_stream(sd).is_none());
    assert_eq!(ctx.n_streams(), 0);

    // The id is reused by the next open.
    let sd2 = ctx.open(&path).unwrap();
    assert_eq!(sd2, sd);
}

#[test]
fn unknown_format_is_rejected_and_rolled_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not-a-trace.bin");
    std::fs::write(&path, b"plain text, nothing else").unwrap();

    let mut ctx = Context::new();
    let err = ctx.open(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
    assert_eq!(ctx.n_streams(), 0);
}

#[test]
fn collection_accelerated_search_matches_linear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    let sd = ctx.open(&path).unwrap();
    let entries = ctx.load_entries(sd).unwrap();

    let pid = 117;
    ctx.register_data_collection(&entries, match_pid, sd, &[pid], 2);
    let col = ctx.find_data_collection(match_pid, sd, &[pid]).unwrap();

    let req = EntryRequest::new(0, entries.len(), match_pid, sd, vec![pid], false, 0);
    let plain = get_entry_front(&ctx, &req, &entries);
    let fast = tracescope_core::collection::get_collection_entry_front(
        &ctx, &req, &entries, col,
    );
    assert_eq!(plain.bin(), fast.bin());
    assert_eq!(plain.entry().unwrap().pid, pid);
}

/* -------------------------------------------------------------------
 * A minimal readout, registered as a plugin (the dynamic-input path).
 * ------------------------------------------------------------------- */

struct FakeInput {
    format: &'static str,
    ext: &'static str,
    size: usize,
}

struct FakeInterface {
    size: usize,
}

impl StreamInterface for FakeInterface {
    fn get_pid(&self, _stream: &DataStream, entry: &Entry) -> Option<i32> {
        Some(entry.pid)
    }

    fn get_event_name(&self, _stream: &DataStream, entry: &Entry) -> Option<String> {
        Some(format!("fake/event-{}", entry.event_id))
    }

    fn get_task(&self, _stream: &DataStream, _entry: &Entry) -> Option<String> {
        Some(String::from("fake/test"))
    }

    fn dump_entry(&self, _stream: &DataStream, entry: &Entry) -> Option<String> {
        Some(format!(
            "e: time={} evt={} s_id={}",
            entry.ts, entry.event_id, entry.stream_id
        ))
    }

    fn load_entries(
        &self,
        stream: &DataStream,
        _filter_mask: u8,
    ) -> tracescope_core::Result<LoadOutput> {
        let entries = (0..self.size)
            .map(|i| {
                let mut e = Entry::new();
                e.ts = 1_000_000 + 10_000 * i as i64;
                e.stream_id = stream.stream_id;
                e.event_id = (i % 5) as i16;
                e.pid = 10 + (i % 2) as i32;
                e.cpu = (i % 2) as i16;
                e
            })
            .collect();

        Ok(LoadOutput {
            entries,
            stats: LoadStats {
                task_pids: vec![10, 11],
                idle_cpus: vec![],
            },
        })
    }

    fn load_matrix(
        &self,
        stream: &DataStream,
        filter_mask: u8,
    ) -> tracescope_core::Result<MatrixOutput> {
        let out = self.load_entries(stream, filter_mask)?;
        let mut matrix = tracescope_core::readout::DataMatrix::with_capacity(out.entries.len());
        for e in &out.entries {
            matrix.push(e);
        }

        Ok(MatrixOutput {
            matrix,
            stats: out.stats,
        })
    }
}

impl ReadoutInterface for FakeInput {
    fn name(&self) -> &str {
        self.format
    }

    fn data_format(&self) -> &str {
        self.format
    }

    fn check_data(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.ext)
    }

    fn init_stream(&self, stream: &mut DataStream) -> tracescope_core::Result<()> {
        stream.n_cpus = 2;
        stream.n_events = 5;
        stream.idle_pid = 0;
        stream.interface = Some(Box::new(FakeInterface { size: self.size }));
        Ok(())
    }
}

#[test]
fn registered_readouts_serve_their_formats() {
    let dir = TempDir::new().unwrap();
    let file_a = dir.path().join("test.ta");
    let file_b = dir.path().join("test.tb");
    std::fs::write(&file_a, b"a").unwrap();
    std::fs::write(&file_b, b"b").unwrap();

    let mut ctx = Context::new();
    ctx.register_plugin(PluginRecord {
        name: String::from("fake_input_a"),
        file: PathBuf::from("/plugins/input-a.so"),
        process: None,
        readout: Some(Arc::new(FakeInput {
            format: "format_a",
            ext: "ta",
            size: 200,
        })),
        ctrl: None,
    })
    .unwrap();
    ctx.register_plugin(PluginRecord {
        name: String::from("fake_input_b"),
        file: PathBuf::from("/plugins/input-b.so"),
        process: None,
        readout: Some(Arc::new(FakeInput {
            format: "format_b",
            ext: "tb",
            size: 100,
        })),
        ctrl: None,
    })
    .unwrap();
    assert_eq!(ctx.n_inputs(), 2);

    let sd_a = ctx.open(&file_a).unwrap();
    assert_eq!(sd_a, 0);
    assert_eq!(ctx.get_stream(sd_a).unwrap().data_format, "format_a");

    let sd_b = ctx.open(&file_b).unwrap();
    assert_eq!(sd_b, 1);
    assert_eq!(ctx.get_stream(sd_b).unwrap().data_format, "format_b");

    let entries = ctx.load_all_entries().unwrap();
    assert_eq!(entries.len(), 300);
    assert!(entries.windows(2).all(|w| w[0].ts <= w[1].ts));

    let dump = ctx.dump_entry(&entries[0]).unwrap();
    assert!(dump.starts_with("e: time=1000000"));
}

#[test]
fn conflicting_input_registration_fails() {
    let mut ctx = Context::new();
    ctx.register_input(Arc::new(FakeInput {
        format: "format_a",
        ext: "ta",
        size: 1,
    }))
    .unwrap();

    // Same data format, different name: rejected.
    let err = ctx
        .register_input(Arc::new(FakeInput {
            format: "format_a",
            ext: "tx",
            size: 1,
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Colliding with the built-in backend: rejected too.
    let err = ctx
        .register_input(Arc::new(FakeInput {
            format: "bintrace",
            ext: "ty",
            size: 1,
        }))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn plugin_name_conflict_is_asymmetric() {
    // A plugin with only a readout interface does not collide by name
    // with a pure processing plugin: unregistering by name consults the
    // processing interface only.
    let mut ctx = Context::new();
    let file = PathBuf::from("/plugins/input-only.so");

    ctx.register_plugin(PluginRecord {
        name: String::from("sched_events"),
        file: file.clone(),
        process: None,
        readout: Some(Arc::new(FakeInput {
            format: "format_x",
            ext: "tx",
            size: 1,
        })),
        ctrl: None,
    })
    .unwrap();

    ctx.unregister_plugin("sched_events", &file);
    assert_eq!(ctx.plugins().len(), 1, "readout-only plugin must survive");
    assert_eq!(ctx.n_inputs(), 1);
}

/* -------------------------------------------------------------------
 * Sessions
 * ------------------------------------------------------------------- */

fn register_sched(ctx: &mut Context, dir: &Path) -> Arc<SchedEvents> {
    let plugin_file = dir.join("plugin-sched_events.so");
    if !plugin_file.exists() {
        std::fs::write(&plugin_file, b"\x7fELF fake").unwrap();
    }

    let sched = SchedEvents::new();
    ctx.register_plugin(PluginRecord {
        name: String::from("sched_events"),
        file: plugin_file,
        process: Some(sched.clone()),
        readout: None,
        ctrl: None,
    })
    .unwrap();

    sched
}

#[test]
fn session_round_trip_restores_filters_and_plugins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    ctx.filter_mask = tracescope_core::GRAPH_VIEW_MASK;
    register_sched(&mut ctx, dir.path());

    let sd = ctx.open(&path).unwrap();
    ctx.filter_add_id(sd, FilterKind::ShowTask, 314).unwrap();
    ctx.filter_add_id(sd, FilterKind::ShowTask, 42).unwrap();
    ctx.filter_add_id(sd, FilterKind::HideCpu, 7).unwrap();
    ctx.filter_add_id(sd, FilterKind::ShowEvent, 323).unwrap();

    {
        let process = ctx
            .find_plugin_by_name("sched_events")
            .and_then(|p| p.process.clone())
            .unwrap();
        let stream = ctx.get_stream_mut(sd).unwrap();
        let idx = stream.register_plugin(process, true);
        tracescope_core::handle_plugin(stream, idx, tracescope_core::PluginAction::Init);
    }

    let conf = session::export_session(&ctx).unwrap();
    let session_file = dir.path().join("session.json");
    session::save_config_file(&session_file, &conf).unwrap();

    // A brand-new context with the same compiled-in plugin.
    let mut restored = Context::new();
    register_sched(&mut restored, dir.path());
    let conf = session::open_config_file(&session_file, "kshark.config.session").unwrap();
    let entries = session::import_session(&mut restored, &conf).unwrap();

    assert_eq!(restored.n_streams(), 1);
    assert_eq!(entries.len(), N_RECORDS_TEST1);

    assert_eq!(
        restored.get_filter_ids(0, FilterKind::ShowTask).unwrap(),
        vec![42, 314]
    );
    assert_eq!(
        restored.get_filter_ids(0, FilterKind::HideCpu).unwrap(),
        vec![7]
    );
    assert_eq!(
        restored.get_filter_ids(0, FilterKind::ShowEvent).unwrap(),
        vec![323]
    );
    assert_eq!(restored.filter_mask, tracescope_core::GRAPH_VIEW_MASK);

    let stream = restored.get_stream(0).unwrap();
    assert_eq!(stream.n_plugins(), 1);
    assert_eq!(stream.plugins[0].interface.name(), "sched_events");
    assert_eq!(
        stream.plugins[0].status & (PLUGIN_ENABLED | PLUGIN_LOADED),
        PLUGIN_ENABLED | PLUGIN_LOADED
    );

    // Export of the restored context matches the original document for
    // the parts that round-trip.
    let conf2 = session::export_session(&restored).unwrap();
    assert_eq!(
        conf.doc.get("data streams").unwrap()[0]["filters"],
        conf2.doc.get("data streams").unwrap()[0]["filters"]
    );
}

#[test]
fn session_import_refuses_stale_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    ctx.open(&path).unwrap();
    let mut conf = session::export_session(&ctx).unwrap();

    // Tamper with the recorded mtime.
    conf.doc["data streams"][0]["data"]["time"] = serde_json::json!(1);

    let mut restored = Context::new();
    let err = session::import_session(&mut restored, &conf).unwrap_err();
    assert!(matches!(err, Error::Session(_)));

    // A failed import leaves the context empty.
    assert_eq!(restored.n_streams(), 0);
}

#[test]
fn calibration_round_trip_shifts_time() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    let sd = ctx.open(&path).unwrap();
    let mut entries = ctx.load_entries(sd).unwrap();
    let first_ts = entries[0].ts;

    ctx.set_clock_offset(&mut entries, sd, -500).unwrap();
    assert_eq!(entries[0].ts, first_ts - 500);

    let conf = session::export_dstream(&ctx, sd).unwrap();
    assert_eq!(conf.doc.get("calib. array"), Some(&serde_json::json!([-500])));

    let mut restored = Context::new();
    let sd2 = session::import_dstream(&mut restored, &conf).unwrap();
    let restored_entries = restored.load_entries(sd2).unwrap();
    assert_eq!(restored_entries[0].ts, first_ts - 500);
}

#[test]
fn sub_buffer_streams_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("multi.dat");

    let mut w = TraceWriter::new();
    w.event(1, "probe/hit", &["n"]);
    let top = w.buffer("", 1);
    let timer = w.buffer("timer", 1);
    for i in 0..10 {
        w.record(
            top,
            RecordSpec {
                cpu: 0,
                event_id: 1,
                pid: 1,
                missed_events: 0,
                ts: 1000 + i,
                fields: vec![i],
            },
        );
        w.record(
            timer,
            RecordSpec {
                cpu: 0,
                event_id: 1,
                pid: 2,
                missed_events: 0,
                ts: 1005 + i,
                fields: vec![i],
            },
        );
    }
    w.write(&path).unwrap();

    let mut ctx = Context::new();
    let top_sd = ctx.open(&path).unwrap();
    let sub_sd = ctx.open_buffer(top_sd, "timer").unwrap();
    assert_eq!(ctx.get_stream(sub_sd).unwrap().name, "timer");

    let conf = session::export_session(&ctx).unwrap();

    let mut restored = Context::new();
    let entries = session::import_session(&mut restored, &conf).unwrap();
    assert_eq!(restored.n_streams(), 2);
    assert_eq!(entries.len(), 20);
    assert_eq!(restored.get_stream(1).unwrap().name, "timer");
    assert!(restored.get_stream(0).unwrap().is_top());
}

#[test]
fn adv_filter_round_trips_through_session() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    ctx.filter_mask = tracescope_core::EVENT_VIEW_MASK;
    let sd = ctx.open(&path).unwrap();
    ctx.add_adv_filter(sd, "sched/sched_switch:next_pid>120").unwrap();

    let conf = session::export_dstream(&ctx, sd).unwrap();
    let adv = &conf.doc["filters"]["adv event filter"];
    assert_eq!(adv[0]["name"], serde_json::json!("sched/sched_switch"));
    assert_eq!(adv[0]["condition"], serde_json::json!("next_pid>120"));

    let mut restored = Context::new();
    let sd2 = session::import_dstream(&mut restored, &conf).unwrap();
    assert_eq!(
        restored.adv_filters(sd2).unwrap(),
        vec![(
            String::from("sched/sched_switch"),
            String::from("next_pid>120")
        )]
    );

    // The restored filter is live: switch records with next_pid <= 120
    // lose their event-view bit.
    let entries = restored.load_entries(sd2).unwrap();
    for e in entries.iter().filter(|e| e.event_id == 323) {
        let next_pid = restored
            .get_stream(sd2)
            .unwrap()
            .read_event_field_i64(e, "next_pid")
            .unwrap();
        let visible = e.visible & tracescope_core::EVENT_VIEW_MASK != 0;
        assert_eq!(visible, next_pid > 120);
    }
}

#[test]
fn matrix_load_matches_entry_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trace_test1.dat");
    write_test1(&path);

    let mut ctx = Context::new();
    let sd = ctx.open(&path).unwrap();

    let entries = ctx.load_entries(sd).unwrap();
    let matrix = ctx.load_matrix(sd).unwrap();

    assert_eq!(matrix.n_rows(), entries.len());
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(matrix.ts[i], e.ts);
        assert_eq!(matrix.cpu[i], e.cpu);
        assert_eq!(matrix.pid[i], e.pid);
        assert_eq!(matrix.event_id[i], e.event_id);
        assert_eq!(matrix.offset[i], e.offset);
    }
}
