//! Synthetic demo-trace generation.
//!
//! Produces a small but representative file: scheduler and interrupt
//! events over several cpus, a couple of tasks, and one missed-events
//! hole. Handy for trying the engine without recorded data.

use std::path::Path;

use tracescope_core::Result;
use tracescope_core::backends::bintrace::writer::{RecordSpec, TraceWriter};

const N_CPUS: u16 = 4;
const N_TICKS: i64 = 400;

pub fn write_demo_trace(path: &Path) -> Result<()> {
    let mut w = TraceWriter::new();
    w.event(323, "sched/sched_switch", &["prev_pid", "next_pid", "prev_state"])
        .event(324, "sched/sched_wakeup", &["pid", "success"])
        .event(100, "irq/irq_handler_entry", &["irq"])
        .task(0, "swapper")
        .task(2001, "reader")
        .task(2002, "writer")
        .task(2003, "flusher");

    let top = w.buffer("", u32::from(N_CPUS));
    let pids = [0, 2001, 2002, 2003];

    let mut ts = 1_000_000_000i64;
    for tick in 0..N_TICKS {
        let cpu = (tick % i64::from(N_CPUS)) as u16;
        let prev = pids[(tick % 4) as usize];
        let next = pids[((tick + 1) % 4) as usize];

        if tick % 4 == 0 {
            w.record(
                top,
                RecordSpec {
                    cpu,
                    event_id: 324,
                    pid: prev,
                    missed_events: 0,
                    ts,
                    fields: vec![i64::from(next), 1],
                },
            );
            ts += 1_300;
        }

        w.record(
            top,
            RecordSpec {
                cpu,
                event_id: 323,
                pid: prev,
                missed_events: if tick == N_TICKS / 2 { 12 } else { 0 },
                ts,
                fields: vec![i64::from(prev), i64::from(next), 0],
            },
        );
        ts += 2_100;

        w.record(
            top,
            RecordSpec {
                cpu: (tick % 2) as u16,
                event_id: 100,
                pid: next,
                missed_events: 0,
                ts,
                fields: vec![tick % 16],
            },
        );
        ts += 1_700;
    }

    w.write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracescope_core::Context;

    #[test]
    fn demo_trace_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.dat");
        write_demo_trace(&path).unwrap();

        let mut ctx = Context::new();
        let sd = ctx.open(&path).unwrap();
        let entries = ctx.load_entries(sd).unwrap();

        // All ticks plus the wakeups plus one missed-events entry.
        assert!(entries.len() as i64 > 2 * N_TICKS);
        assert!(entries.windows(2).all(|w| w[0].ts <= w[1].ts));
        assert!(
            entries
                .iter()
                .any(|e| e.event_id == tracescope_core::EVENT_OVERFLOW)
        );
    }
}
