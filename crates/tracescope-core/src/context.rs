//! The session context: the handle owning streams, inputs, plugins and
//! collections.
//!
//! One context per process is the norm, but nothing stops a caller from
//! keeping several. All engine state hangs off this handle; dropping it
//! closes every stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::collection::EntryCollection;
use crate::entry::{Entry, PLUGIN_UNTOUCHED_MASK};
use crate::error::{Error, Result};
use crate::filter::FilterKind;
use crate::plugin::{
    self, CtrlFn, PLUGIN_LOADED, PluginAction, ProcessInterface,
};
use crate::readout::{DataMatrix, ReadoutInterface};
use crate::registry::StreamRegistry;
use crate::stream::DataStream;

/// One plugin known to the context: its name, the object file it was
/// loaded from, and whichever interfaces it provides.
pub struct PluginRecord {
    /// The plugin's short name.
    pub name: String,

    /// The plugin object file.
    pub file: PathBuf,

    /// Data-processing interface, if the plugin has one.
    pub process: Option<Arc<dyn ProcessInterface>>,

    /// Data-readout interface, if the plugin has one.
    pub readout: Option<Arc<dyn ReadoutInterface>>,

    /// Configuration/control function, held for the GUI collaborator.
    pub ctrl: Option<CtrlFn>,
}

/// The session context.
pub struct Context {
    pub(crate) registry: StreamRegistry,

    /// Bit mask controlling which visibility bits filtering consumes.
    pub filter_mask: u8,

    inputs: Vec<Arc<dyn ReadoutInterface>>,
    builtin_inputs: Vec<Arc<dyn ReadoutInterface>>,
    plugins: Vec<PluginRecord>,
    pub(crate) collections: Vec<EntryCollection>,
}

impl Context {
    /// A fresh context: empty stream registry, the built-in readouts,
    /// no plugins, no collections, filter mask zero.
    pub fn new() -> Self {
        Self {
            registry: StreamRegistry::new(),
            filter_mask: 0,
            inputs: Vec::new(),
            builtin_inputs: crate::backends::builtin_inputs(),
            plugins: Vec::new(),
            collections: Vec::new(),
        }
    }

    /* ---------------------------------------------------------------
     * Streams
     * --------------------------------------------------------------- */

    /// Allocate a new, unclaimed stream slot. Returns its id.
    pub fn add_stream(&mut self) -> Result<i16> {
        self.registry.add()
    }

    /// Remove a stream, recycling its slot.
    pub fn remove_stream(&mut self, sd: i16) -> Result<()> {
        self.registry.remove(sd).map(drop)
    }

    /// The stream with id `sd`, if live and claimed by a readout.
    pub fn get_stream(&self, sd: i16) -> Option<&DataStream> {
        self.registry.get(sd)
    }

    /// Mutable access to the stream with id `sd`.
    pub fn get_stream_mut(&mut self, sd: i16) -> Option<&mut DataStream> {
        self.registry.get_mut(sd)
    }

    /// Like [`get_stream`](Self::get_stream), but failing with a
    /// bad-handle error.
    pub fn stream(&self, sd: i16) -> Result<&DataStream> {
        self.get_stream(sd).ok_or(Error::BadHandle(sd))
    }

    /// The stream owning an entry.
    pub fn stream_from_entry(&self, entry: &Entry) -> Option<&DataStream> {
        self.get_stream(entry.stream_id)
    }

    /// Ids of all open streams, ascending.
    pub fn all_streams(&self) -> Vec<i16> {
        self.registry.all_streams()
    }

    /// The number of open streams.
    pub fn n_streams(&self) -> usize {
        self.registry.n_streams()
    }

    /// Open a trace file and prepare it for reading. Returns the id of
    /// the data stream associated with the file.
    pub fn open<P: AsRef<Path>>(&mut self, file: P) -> Result<i16> {
        let sd = self.add_stream()?;

        match self.stream_open(sd, file.as_ref()) {
            Ok(()) => Ok(sd),
            Err(err) => {
                let _ = self.registry.remove(sd);
                Err(err)
            }
        }
    }

    fn stream_open(&mut self, sd: i16, file: &Path) -> Result<()> {
        if !file.exists() {
            return Err(Error::NotFound(file.display().to_string()));
        }

        /* Probe the registered readouts newest-first, then the built-in
         * ones. The first acceptor wins. */
        let input = self
            .inputs
            .iter()
            .rev()
            .chain(self.builtin_inputs.iter())
            .find(|input| input.check_data(file))
            .cloned()
            .ok_or_else(|| Error::InvalidFormat(file.display().to_string()))?;

        let stream = self
            .registry
            .slot_mut(sd)
            .ok_or(Error::BadHandle(sd))?;
        stream.file = file.to_path_buf();
        stream.set_data_format(input.data_format());

        input.init_stream(stream)
    }

    /// Open one named sub-buffer of an already open file as a new
    /// stream. `top_sd` is the stream of the file's top-level buffer.
    pub fn open_buffer(&mut self, top_sd: i16, name: &str) -> Result<i16> {
        let (file, format) = {
            let top = self.stream(top_sd)?;
            (top.file.clone(), top.data_format.clone())
        };

        let input = self
            .input_by_format(&format)
            .ok_or_else(|| Error::InvalidFormat(format.clone()))?;

        let sd = self.add_stream()?;
        let setup = || -> Result<()> {
            let stream = self
                .registry
                .slot_mut(sd)
                .ok_or(Error::BadHandle(sd))?;
            stream.file = file;
            stream.name = name.to_string();
            stream.set_data_format(input.data_format());

            input.init_buffer(stream, name)
        };

        match setup() {
            Ok(()) => Ok(sd),
            Err(err) => {
                let _ = self.registry.remove(sd);
                Err(err)
            }
        }
    }

    /// The open top-buffer stream of `file`, if any.
    pub fn find_top_stream(&self, file: &Path) -> Option<i16> {
        self.all_streams()
            .into_iter()
            .find(|&sd| {
                self.registry
                    .slot(sd)
                    .is_some_and(|s| s.is_top() && s.file == file)
            })
    }

    /// Close one stream: unload its plugins, release the backend and
    /// recycle the slot. The stream's filters die with it; Ids from one
    /// file must not leak into another.
    pub fn close(&mut self, sd: i16) -> Result<()> {
        let stream = self
            .registry
            .slot_mut(sd)
            .ok_or(Error::BadHandle(sd))?;

        plugin::handle_all_plugins(stream, PluginAction::Close);
        stream.filters.clear_all();
        stream.interface = None;

        self.registry.remove(sd).map(drop)
    }

    /// Close every open stream and restart stream id assignment.
    pub fn close_all(&mut self) {
        for sd in self.all_streams() {
            let _ = self.close(sd);
        }

        self.registry.reset();
    }

    /* ---------------------------------------------------------------
     * Loading
     * --------------------------------------------------------------- */

    /// Load the data of one stream as an array of entries.
    ///
    /// The `visible` field of each entry is set according to the
    /// stream's filters, consuming the bits of the context's
    /// `filter_mask`. All matching plugin event actions are executed,
    /// then the post-load pass of every loaded plugin.
    pub fn load_entries(&mut self, sd: i16) -> Result<Vec<Entry>> {
        let mask = self.filter_mask;
        let stream = self.registry.get_mut(sd).ok_or(Error::BadHandle(sd))?;

        let out = stream.interface()?.load_entries(&*stream, mask)?;

        for pid in &out.stats.task_pids {
            stream.tasks.add(*pid);
        }
        for cpu in &out.stats.idle_cpus {
            stream.idle_cpus.add(*cpu);
        }

        let mut entries = out.entries;
        let loaded: Vec<Arc<dyn ProcessInterface>> = stream
            .plugins
            .iter()
            .filter(|p| p.status & PLUGIN_LOADED != 0)
            .map(|p| Arc::clone(&p.interface))
            .collect();
        for plugin in loaded {
            plugin.post_load(stream, &mut entries);
        }

        if entries.is_empty() {
            let stream = self.registry.get(sd).ok_or(Error::BadHandle(sd))?;
            return Err(Error::NoData(stream.file.clone()));
        }

        Ok(entries)
    }

    /// Load the data of one stream in columnar form.
    pub fn load_matrix(&mut self, sd: i16) -> Result<DataMatrix> {
        let mask = self.filter_mask;
        let stream = self.registry.get_mut(sd).ok_or(Error::BadHandle(sd))?;

        let out = stream.interface()?.load_matrix(&*stream, mask)?;

        for pid in &out.stats.task_pids {
            stream.tasks.add(*pid);
        }
        for cpu in &out.stats.idle_cpus {
            stream.idle_cpus.add(*cpu);
        }

        Ok(out.matrix)
    }

    /* ---------------------------------------------------------------
     * Inputs
     * --------------------------------------------------------------- */

    /// Register a data readout interface. Rejects name and data-format
    /// collisions, including collisions with the built-in readouts.
    pub fn register_input(&mut self, input: Arc<dyn ReadoutInterface>) -> Result<()> {
        for other in self.inputs.iter().chain(self.builtin_inputs.iter()) {
            if other.name() == input.name() || other.data_format() == input.data_format() {
                return Err(Error::Conflict(format!(
                    "readout name='{}' data_format='{}' collides with \
                     name='{}' data_format='{}'",
                    input.name(),
                    input.data_format(),
                    other.name(),
                    other.data_format()
                )));
            }
        }

        self.inputs.push(input);
        Ok(())
    }

    /// Unregister a data readout interface by name.
    pub fn unregister_input(&mut self, name: &str) {
        self.inputs.retain(|input| input.name() != name);
    }

    /// The number of registered (non-built-in) readout interfaces.
    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn input_by_format(&self, format: &str) -> Option<Arc<dyn ReadoutInterface>> {
        self.inputs
            .iter()
            .rev()
            .chain(self.builtin_inputs.iter())
            .find(|input| input.data_format() == format)
            .cloned()
    }

    /* ---------------------------------------------------------------
     * Plugins
     * --------------------------------------------------------------- */

    /// Register a plugin. Its readout interface, if any, is registered
    /// as an input in the same step.
    pub fn register_plugin(&mut self, record: PluginRecord) -> Result<()> {
        if self.find_plugin(&record.file).is_some() {
            return Err(Error::Conflict(format!(
                "plugin file {} is already loaded",
                record.file.display()
            )));
        }

        if record.process.is_none() && record.readout.is_none() && record.ctrl.is_none() {
            return Err(Error::Backend(format!(
                "no interfaces found in plugin {}",
                record.name
            )));
        }

        if let Some(readout) = &record.readout {
            self.register_input(Arc::clone(readout))?;
        }

        self.plugins.push(record);
        Ok(())
    }

    /// Unregister a plugin. The name is compared against the plugin's
    /// processing interface, so a readout-only plugin can only be
    /// removed through its file.
    pub fn unregister_plugin(&mut self, name: &str, file: &Path) {
        let found = self.plugins.iter().position(|p| {
            p.file == file
                && p.process
                    .as_ref()
                    .is_some_and(|process| process.name() == name)
        });

        if let Some(idx) = found {
            let record = self.plugins.remove(idx);
            if let Some(readout) = record.readout {
                let readout_name = readout.name().to_string();
                self.unregister_input(&readout_name);
            }
        }
    }

    /// Find a plugin by its object file.
    pub fn find_plugin(&self, file: &Path) -> Option<&PluginRecord> {
        self.plugins.iter().find(|p| p.file == file)
    }

    /// Find a plugin by its name.
    pub fn find_plugin_by_name(&self, name: &str) -> Option<&PluginRecord> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// All registered plugins.
    pub fn plugins(&self) -> &[PluginRecord] {
        &self.plugins
    }

    /* ---------------------------------------------------------------
     * Filters
     * --------------------------------------------------------------- */

    /// Add an Id to one of the filters of stream `sd`.
    pub fn filter_add_id(&mut self, sd: i16, kind: FilterKind, id: i32) -> Result<()> {
        let stream = self.registry.get_mut(sd).ok_or(Error::BadHandle(sd))?;
        stream.filters.get_mut(kind).add(id);
        Ok(())
    }

    /// The Ids of one filter of stream `sd`, sorted ascending.
    pub fn get_filter_ids(&self, sd: i16, kind: FilterKind) -> Result<Vec<i32>> {
        Ok(self.stream(sd)?.filters.get(kind).ids())
    }

    /// Clear one filter of stream `sd`.
    pub fn filter_clear(&mut self, sd: i16, kind: FilterKind) -> Result<()> {
        let stream = self.registry.get_mut(sd).ok_or(Error::BadHandle(sd))?;
        stream.filters.get_mut(kind).clear();
        Ok(())
    }

    /// True if at least one Id filter of stream `sd` is set.
    pub fn filter_is_set(&self, sd: i16) -> bool {
        self.get_stream(sd).is_some_and(|s| s.filter_is_set())
    }

    /// Install an advanced filter on stream `sd`, given as
    /// `event name:condition`. Takes effect on the next reload.
    pub fn add_adv_filter(&mut self, sd: i16, filter: &str) -> Result<()> {
        let stream = self.stream(sd)?;
        stream.interface()?.add_adv_filter(stream, filter)
    }

    /// Drop all advanced filters of stream `sd`.
    pub fn clear_adv_filters(&mut self, sd: i16) -> Result<()> {
        let stream = self.stream(sd)?;
        stream.interface()?.clear_adv_filters(stream);
        Ok(())
    }

    /// The advanced filters of stream `sd`, as (event name, condition)
    /// pairs.
    pub fn adv_filters(&self, sd: i16) -> Result<Vec<(String, String)>> {
        let stream = self.stream(sd)?;
        Ok(stream.interface()?.adv_filters(stream))
    }

    /// Re-evaluate the `visible` fields of the entries of stream `sd`
    /// against its current Id filters, without reloading.
    ///
    /// Not usable while an advanced filter is installed: that filter
    /// inspects raw records, so the data has to be reloaded instead.
    pub fn filter_stream_entries(&self, sd: i16, data: &mut [Entry]) {
        let Some(stream) = self.get_stream(sd) else {
            return;
        };

        let has_adv = stream
            .interface
            .as_deref()
            .is_some_and(|iface| !iface.adv_filters(stream).is_empty());
        if has_adv {
            warn!("failed to filter: reset the advanced filter or reload the data");
            return;
        }

        for entry in data.iter_mut().filter(|e| e.stream_id == sd) {
            stream.apply_filters(self.filter_mask, entry);
        }
    }

    /// Re-evaluate the `visible` fields of all entries against the
    /// current Id filters of their streams.
    pub fn filter_all_entries(&self, data: &mut [Entry]) {
        for sd in self.all_streams() {
            self.filter_stream_entries(sd, data);
        }
    }

    /// Reset the `visible` field of every entry to fully visible.
    pub fn clear_all_filters(&self, data: &mut [Entry]) {
        for entry in data {
            entry.set_all_visible();
        }
    }

    /* ---------------------------------------------------------------
     * Entry accessors
     * --------------------------------------------------------------- */

    /// Process Id of the entry as recorded in the trace file. Matters
    /// only when plugins may have overwritten `entry.pid`.
    pub fn get_pid(&self, entry: &Entry) -> Option<i32> {
        let stream = self.stream_from_entry(entry)?;
        stream.interface.as_deref()?.get_pid(stream, entry)
    }

    /// Event Id of the entry as recorded in the trace file.
    pub fn get_event_id(&self, entry: &Entry) -> Option<i32> {
        let stream = self.stream_from_entry(entry)?;
        stream.interface.as_deref()?.get_event_id(stream, entry)
    }

    /// Name of the entry's event.
    pub fn event_name(&self, entry: &Entry) -> Option<String> {
        self.stream_from_entry(entry)?.event_name(entry)
    }

    /// Name of the entry's task.
    pub fn task(&self, entry: &Entry) -> Option<String> {
        self.stream_from_entry(entry)?.task(entry)
    }

    /// The info text of the entry.
    pub fn info(&self, entry: &Entry) -> Option<String> {
        self.stream_from_entry(entry)?.info(entry)
    }

    /// One-line summary of the entry.
    pub fn dump_entry(&self, entry: &Entry) -> Option<String> {
        self.stream_from_entry(entry)?.dump_entry(entry)
    }

    /// Name of the command/task with Process Id `pid` on stream `sd`.
    pub fn comm_from_pid(&self, sd: i16, pid: i32) -> Option<String> {
        let stream = self.get_stream(sd)?;
        let entry = Entry {
            visible: PLUGIN_UNTOUCHED_MASK,
            pid,
            ..Entry::new()
        };

        stream.interface.as_deref()?.get_task(stream, &entry)
    }

    /// Name of the event with Id `event_id` on stream `sd`.
    pub fn event_from_id(&self, sd: i16, event_id: i16) -> Option<String> {
        let stream = self.get_stream(sd)?;
        let entry = Entry {
            visible: PLUGIN_UNTOUCHED_MASK,
            event_id,
            ..Entry::new()
        };

        stream.interface.as_deref()?.get_event_name(stream, &entry)
    }

    /// Event Id corresponding to an event name on stream `sd`.
    pub fn find_event_id(&self, sd: i16, event_name: &str) -> Option<i32> {
        self.get_stream(sd)?.find_event_id(event_name)
    }

    /// Pids of all tasks observed in stream `sd`, sorted ascending.
    pub fn task_pids(&self, sd: i16) -> Result<Vec<i32>> {
        Ok(self.stream(sd)?.task_pids())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close_all();
    }
}
