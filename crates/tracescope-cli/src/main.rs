//! Command-line frontend for the tracescope data engine.
//!
//! Opens trace files (or whole sessions), merges their streams, applies
//! initial filters and prints the result. The session is persisted to
//! the cache directory on exit, so `-l` picks up where the last run
//! left off.

mod session_io;
mod synth;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, warn};

use tracescope_core::plugins::sched::SchedEvents;
use tracescope_core::session;
use tracescope_core::{Context, Entry, FilterKind, PluginRecord};

#[derive(Parser)]
#[command(name = "tracescope")]
#[command(about = "tracescope — trace data inspection from the command line")]
#[command(version = tracescope_core::VERSION)]
struct Cli {
    /// Trace file(s) to open.
    #[arg(short = 'i', value_name = "FILE")]
    input: Vec<PathBuf>,

    /// Trace file(s) to append to the already opened data.
    #[arg(short = 'a', value_name = "FILE")]
    append: Vec<PathBuf>,

    /// Register a plugin by name.
    #[arg(short = 'p', value_name = "PLUGIN")]
    plugin: Vec<String>,

    /// Unregister a plugin by name.
    #[arg(short = 'u', value_name = "PLUGIN")]
    unregister: Vec<String>,

    /// Import a session document.
    #[arg(short = 's', value_name = "JSON")]
    session: Option<PathBuf>,

    /// Restore the last session.
    #[arg(short = 'l')]
    last: bool,

    /// Show only these CPUs (comma-separated).
    #[arg(long, value_name = "CPUS")]
    cpu: Option<String>,

    /// Show only these Process Ids (comma-separated).
    #[arg(long, value_name = "PIDS")]
    pid: Option<String>,

    /// Show only these tasks, by name (comma-separated).
    #[arg(long, value_name = "TASKS")]
    task: Option<String>,

    /// Number of entries to print.
    #[arg(long, default_value_t = 25)]
    rows: usize,

    /// Write a synthetic demo trace to FILE and exit.
    #[arg(long, value_name = "FILE")]
    synth: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(path) = &cli.synth {
        return match synth::write_demo_trace(path) {
            Ok(()) => {
                println!("wrote {}", path.display());
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    let mut ctx = Context::new();
    register_builtin_plugins(&mut ctx, &cli.plugin);
    for name in &cli.unregister {
        unregister_by_name(&mut ctx, name);
    }

    match run(&mut ctx, &cli) {
        Ok(entries) => {
            report(&ctx, &entries, cli.rows);

            if let Err(err) = session_io::save_last_session(&ctx) {
                warn!("could not save the session: {err}");
            }

            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err} (errno {})", err.errno());
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &mut Context, cli: &Cli) -> tracescope_core::Result<Vec<Entry>> {
    let mut entries = Vec::new();

    if let Some(path) = &cli.session {
        let conf = session::open_config_file(path, "kshark.config.session")?;
        entries = session::import_session(ctx, &conf)?;
    } else if cli.last {
        entries = session_io::load_last_session(ctx)?;
    }

    for path in &cli.input {
        let sd = ctx.open(path)?;
        attach_plugins(ctx, sd);
        entries = ctx.append_all_entries(entries, sd)?;
    }

    for path in &cli.append {
        let sd = ctx.open(path)?;
        attach_plugins(ctx, sd);
        entries = ctx.append_all_entries(entries, sd)?;
    }

    if entries.is_empty() {
        return Err(tracescope_core::Error::NoData(PathBuf::from("(no input)")));
    }

    apply_initial_filters(ctx, cli, &mut entries);

    Ok(entries)
}

/// The plugins compiled into this binary, registered on demand.
fn register_builtin_plugins(ctx: &mut Context, names: &[String]) {
    let file = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("tracescope"));

    for name in names {
        match name.as_str() {
            tracescope_core::plugins::sched::PLUGIN_NAME => {
                let record = PluginRecord {
                    name: name.clone(),
                    file: file.clone(),
                    process: Some(SchedEvents::new()),
                    readout: None,
                    ctrl: None,
                };

                if let Err(err) = ctx.register_plugin(record) {
                    warn!("plugin {name}: {err}");
                }
            }
            other => warn!("unknown plugin \"{other}\""),
        }
    }
}

fn unregister_by_name(ctx: &mut Context, name: &str) {
    let file = ctx.find_plugin_by_name(name).map(|p| p.file.clone());
    match file {
        Some(file) => ctx.unregister_plugin(name, &file),
        None => warn!("plugin \"{name}\" is not registered"),
    }
}

/// Attach every registered processing plugin to a new stream.
fn attach_plugins(ctx: &mut Context, sd: i16) {
    let processes: Vec<_> = ctx
        .plugins()
        .iter()
        .filter_map(|p| p.process.clone())
        .collect();

    if let Some(stream) = ctx.get_stream_mut(sd) {
        for process in processes {
            let idx = stream.register_plugin(process, true);
            tracescope_core::handle_plugin(stream, idx, tracescope_core::PluginAction::Init);
        }
    }
}

fn parse_id_list(list: &str) -> Vec<i32> {
    list.split(',')
        .filter_map(|tok| tok.trim().parse().ok())
        .collect()
}

/// Translate `--cpu`, `--pid` and `--task` into show filters on every
/// stream and re-filter the merged data.
fn apply_initial_filters(ctx: &mut Context, cli: &Cli, entries: &mut [Entry]) {
    ctx.filter_mask = tracescope_core::TEXT_VIEW_MASK
        | tracescope_core::GRAPH_VIEW_MASK
        | tracescope_core::EVENT_VIEW_MASK;

    let cpus = cli.cpu.as_deref().map(parse_id_list).unwrap_or_default();
    let pids = cli.pid.as_deref().map(parse_id_list).unwrap_or_default();

    let tasks: Vec<String> = cli
        .task
        .as_deref()
        .map(|list| list.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();

    if cpus.is_empty() && pids.is_empty() && tasks.is_empty() {
        return;
    }

    for sd in ctx.all_streams() {
        for &cpu in &cpus {
            let _ = ctx.filter_add_id(sd, FilterKind::ShowCpu, cpu);
        }
        for &pid in &pids {
            let _ = ctx.filter_add_id(sd, FilterKind::ShowTask, pid);
        }

        // Task names resolve per stream through the observed pid set.
        let named: Vec<i32> = ctx
            .task_pids(sd)
            .unwrap_or_default()
            .into_iter()
            .filter(|&pid| {
                ctx.comm_from_pid(sd, pid)
                    .is_some_and(|comm| tasks.iter().any(|t| *t == comm))
            })
            .collect();
        for pid in named {
            let _ = ctx.filter_add_id(sd, FilterKind::ShowTask, pid);
        }

        ctx.filter_stream_entries(sd, entries);
    }
}

fn report(ctx: &Context, entries: &[Entry], rows: usize) {
    for sd in ctx.all_streams() {
        let Some(stream) = ctx.get_stream(sd) else {
            continue;
        };

        let name = if stream.is_top() {
            String::from("top buffer")
        } else {
            stream.name.clone()
        };

        println!(
            "stream {sd}: {} [{}] ({}), {} cpus, {} event types, {} tasks",
            stream.file.display(),
            name,
            stream.data_format,
            stream.n_cpus,
            stream.n_events,
            stream.tasks.count()
        );
    }

    println!("{} entries", entries.len());

    for entry in entries
        .iter()
        .filter(|e| e.visible & tracescope_core::TEXT_VIEW_MASK != 0)
        .take(rows)
    {
        match ctx.dump_entry(entry) {
            Some(line) => println!("{line}"),
            None => println!(
                "{}; cpu {}; pid {}; event {}",
                entry.ts, entry.cpu, entry.pid, entry.event_id
            ),
        }
    }
}
