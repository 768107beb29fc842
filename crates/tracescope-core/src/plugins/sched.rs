//! Scheduler-events processing plugin.
//!
//! Rewrites context-switch entries to carry the pid of the task being
//! switched *in* (so task plots show where a task starts running) and
//! wakeup entries to carry the pid of the task being woken. A post-load
//! pass then pairs each wakeup with the next switch-in of the same task
//! and collects the wakeup latency into a [`DataContainer`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::container::DataContainer;
use crate::entry::Entry;
use crate::plugin::{EventHookFn, ProcessInterface};
use crate::stream::DataStream;

/// The plugin's registered name.
pub const PLUGIN_NAME: &str = "sched_events";

struct StreamCtx {
    switch_id: i32,
    wakeup_id: i32,
    switch_hook: EventHookFn,
    wakeup_hook: Option<EventHookFn>,
    latencies: DataContainer,
}

/// The scheduler plugin. One instance serves any number of streams,
/// keeping its state per stream id.
pub struct SchedEvents {
    contexts: Mutex<HashMap<i16, StreamCtx>>,
}

impl SchedEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` over the wakeup-latency container collected for stream
    /// `sd`, if the plugin is initialized there.
    pub fn with_latencies<R>(&self, sd: i16, f: impl FnOnce(&DataContainer) -> R) -> Option<R> {
        let contexts = self.contexts.lock().unwrap();
        contexts.get(&sd).map(|ctx| f(&ctx.latencies))
    }
}

fn switch_hook() -> EventHookFn {
    Arc::new(|stream: &DataStream, record, entry: &mut Entry| {
        let next_pid = stream
            .interface
            .as_deref()
            .and_then(|iface| iface.read_record_field_i64(stream, record, "next_pid"));

        if let Some(pid) = next_pid {
            if pid >= 0 {
                entry.pid = pid as i32;
            }
        }
    })
}

fn wakeup_hook() -> EventHookFn {
    Arc::new(|stream: &DataStream, record, entry: &mut Entry| {
        let pid = stream
            .interface
            .as_deref()
            .and_then(|iface| iface.read_record_field_i64(stream, record, "pid"));

        if let Some(pid) = pid {
            if pid >= 0 {
                entry.pid = pid as i32;
            }
        }
    })
}

impl ProcessInterface for SchedEvents {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn init(&self, stream: &mut DataStream) -> i32 {
        let Some(switch_id) = stream.find_event_id("sched/sched_switch") else {
            return 0;
        };
        let wakeup_id = stream.find_event_id("sched/sched_wakeup");

        let switch = switch_hook();
        stream.register_event_handler(switch_id, Arc::clone(&switch));
        let mut handler_count = 1;

        let wakeup = wakeup_id.map(|id| {
            let hook = wakeup_hook();
            stream.register_event_handler(id, Arc::clone(&hook));
            handler_count += 1;
            hook
        });

        self.contexts.lock().unwrap().insert(
            stream.stream_id,
            StreamCtx {
                switch_id,
                wakeup_id: wakeup_id.unwrap_or(-1),
                switch_hook: switch,
                wakeup_hook: wakeup,
                latencies: DataContainer::new(),
            },
        );

        handler_count
    }

    fn close(&self, stream: &mut DataStream) -> i32 {
        let Some(ctx) = self.contexts.lock().unwrap().remove(&stream.stream_id) else {
            return 0;
        };

        stream.unregister_event_handler(ctx.switch_id, &ctx.switch_hook);
        let mut handler_count = 1;
        if let Some(hook) = ctx.wakeup_hook {
            stream.unregister_event_handler(ctx.wakeup_id, &hook);
            handler_count += 1;
        }

        handler_count
    }

    fn post_load(&self, stream: &DataStream, entries: &mut [Entry]) {
        let mut contexts = self.contexts.lock().unwrap();
        let Some(ctx) = contexts.get_mut(&stream.stream_id) else {
            return;
        };

        /* Pair each wakeup with the next switch-in of the same task.
         * Both hook rewrites already happened, so the pid of a wakeup
         * entry is the woken task and the pid of a switch entry is the
         * task being scheduled in. */
        let mut pending: HashMap<i32, i64> = HashMap::new();
        for entry in entries.iter().filter(|e| e.stream_id == stream.stream_id) {
            let event_id = i32::from(entry.event_id);

            if event_id == ctx.wakeup_id {
                pending.entry(entry.pid).or_insert(entry.ts);
            } else if event_id == ctx.switch_id {
                if let Some(wakeup_ts) = pending.remove(&entry.pid) {
                    ctx.latencies.append(*entry, entry.ts - wakeup_ts);
                }
            }
        }

        ctx.latencies.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::bintrace::writer::{RecordSpec, TraceWriter};
    use crate::backends::bintrace::BintraceInput;
    use crate::plugin::{self, PLUGIN_FAILED, PLUGIN_LOADED, PluginAction};
    use crate::readout::ReadoutInterface;

    fn sched_trace(path: &std::path::Path) {
        let mut w = TraceWriter::new();
        w.event(323, "sched/sched_switch", &["prev_pid", "next_pid", "prev_state"])
            .event(324, "sched/sched_wakeup", &["pid", "success"])
            .task(10, "loop")
            .task(20, "worker");

        let top = w.buffer("", 1);
        // Wakeup of 20 at t=1000, switched in at t=1400.
        w.record(
            top,
            RecordSpec {
                cpu: 0,
                event_id: 324,
                pid: 10,
                missed_events: 0,
                ts: 1000,
                fields: vec![20, 1],
            },
        );
        w.record(
            top,
            RecordSpec {
                cpu: 0,
                event_id: 323,
                pid: 10,
                missed_events: 0,
                ts: 1400,
                fields: vec![10, 20, 0],
            },
        );
        // A switch with no prior wakeup contributes no latency.
        w.record(
            top,
            RecordSpec {
                cpu: 0,
                event_id: 323,
                pid: 20,
                missed_events: 0,
                ts: 2000,
                fields: vec![20, 10, 0],
            },
        );
        w.write(path).unwrap();
    }

    #[test]
    fn rewrites_pids_and_collects_latency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.dat");
        sched_trace(&path);

        let mut ctx = crate::context::Context::new();
        let sd = ctx.open(&path).unwrap();

        let sched = SchedEvents::new();
        let stream = ctx.get_stream_mut(sd).unwrap();
        let idx = stream.register_plugin(sched.clone(), true);
        let ret = plugin::handle_plugin(stream, idx, PluginAction::Init);
        assert_eq!(ret, 2);
        assert_eq!(
            stream.plugins[idx].status & PLUGIN_LOADED,
            PLUGIN_LOADED
        );

        let entries = ctx.load_entries(sd).unwrap();

        // The wakeup entry carries the woken pid, the switch entries
        // the pid switched in; all were touched by a hook.
        assert_eq!(entries[0].pid, 20);
        assert_eq!(entries[1].pid, 20);
        assert_eq!(entries[2].pid, 10);
        for e in &entries {
            assert_eq!(e.visible & crate::entry::PLUGIN_UNTOUCHED_MASK, 0);
        }

        sched
            .with_latencies(sd, |latencies| {
                assert_eq!(latencies.size(), 1);
                let df = latencies.data()[0];
                assert_eq!(df.field, 400);
                assert_eq!(df.entry.ts, 1400);
            })
            .unwrap();
    }

    #[test]
    fn fails_without_sched_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nosched.dat");

        let mut w = TraceWriter::new();
        w.event(1, "probe/hit", &[]);
        let top = w.buffer("", 1);
        w.record(
            top,
            RecordSpec {
                cpu: 0,
                event_id: 1,
                pid: 1,
                missed_events: 0,
                ts: 10,
                fields: vec![],
            },
        );
        w.write(&path).unwrap();

        let mut stream = DataStream::new();
        stream.file = path;
        BintraceInput.init_stream(&mut stream).unwrap();

        let sched = SchedEvents::new();
        let idx = stream.register_plugin(sched, true);
        let ret = plugin::handle_plugin(&mut stream, idx, PluginAction::Init);

        assert_eq!(ret, 0);
        assert_eq!(
            stream.plugins[idx].status & PLUGIN_FAILED,
            PLUGIN_FAILED
        );
        assert!(stream.event_handlers.is_empty());
    }

    #[test]
    fn close_removes_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sched.dat");
        sched_trace(&path);

        let mut stream = DataStream::new();
        stream.file = path;
        BintraceInput.init_stream(&mut stream).unwrap();

        let sched = SchedEvents::new();
        let idx = stream.register_plugin(sched, true);
        plugin::handle_plugin(&mut stream, idx, PluginAction::Init);
        assert_eq!(stream.event_handlers.len(), 2);

        let ret = plugin::handle_plugin(&mut stream, idx, PluginAction::Close);
        assert_eq!(ret, -2);
        assert!(stream.event_handlers.is_empty());
    }
}
