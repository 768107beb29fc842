//! Typed configuration documents and the session serializer.
//!
//! Everything the engine can persist — stream references, filters,
//! plugins, calibration, the GUI's model and markers — round-trips
//! through [`ConfigDoc`] values. A document carries a format and a JSON
//! body whose `type` key starts with `kshark.config.` (the on-disk
//! format identifier this engine stays compatible with). On disk,
//! documents are pretty-printed JSON with two-space indent.

use std::path::{Path, PathBuf};

use log::warn;
use serde_json::{Value, json};

use crate::context::Context;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::FilterKind;
use crate::hashid::HashIdSet;
use crate::plugin::{PLUGIN_ENABLED, PluginAction, handle_plugin};
use crate::stream::{UNNAMED, file_mtime, offset_calib};

/// Name of the filter-mask field in filter documents.
pub const USER_FILTER_MASK_NAME: &str = "filter mask";

/// Name of the advanced-filter field in filter documents.
pub const ADV_EVENT_FILTER_NAME: &str = "adv event filter";

/// Key of the stream array in session documents.
pub const DSTREAMS_NAME: &str = "data streams";

/// Buffer name used in documents for the top buffer of a file.
const TOP_BUFF_NAME: &str = "top buffer";

/// Configuration document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// Format chosen by the implementation.
    Auto,

    /// A plain string document.
    Str,

    /// A JSON document.
    Json,
}

/// A typed configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDoc {
    /// Document format. Only [`ConfigFormat::Json`] documents nest.
    pub format: ConfigFormat,

    /// The document body.
    pub doc: Value,
}

impl ConfigDoc {
    /// A new JSON document with the given `kshark.config.` type string.
    pub fn new(type_str: &str) -> Self {
        Self {
            format: ConfigFormat::Json,
            doc: json!({ "type": type_str }),
        }
    }

    /// A plain string document.
    pub fn from_str_value(val: &str) -> Self {
        Self {
            format: ConfigFormat::Str,
            doc: Value::String(val.to_string()),
        }
    }

    /// Wrap an existing JSON value.
    pub fn from_json(doc: Value) -> Self {
        Self {
            format: ConfigFormat::Json,
            doc,
        }
    }

    /// True if the document's `type` equals `type_str`.
    pub fn type_check(&self, type_str: &str) -> bool {
        self.doc.get("type").and_then(Value::as_str) == Some(type_str)
    }

    /// Add (or replace) a sub-document under `key`.
    pub fn add(&mut self, key: &str, val: ConfigDoc) -> bool {
        match self.doc.as_object_mut() {
            Some(map) => {
                map.insert(key.to_string(), val.doc);
                true
            }
            None => false,
        }
    }

    /// Extract the sub-document under `key`.
    pub fn get(&self, key: &str) -> Option<ConfigDoc> {
        self.doc.get(key).cloned().map(ConfigDoc::from_json)
    }

    /// The document as pretty JSON (two-space indent).
    pub fn to_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.doc).unwrap_or_default()
    }
}

/// New document describing a recorded data file.
pub fn record_config_new() -> ConfigDoc {
    ConfigDoc::new("kshark.config.record")
}

/// New document describing a data stream.
pub fn stream_config_new() -> ConfigDoc {
    ConfigDoc::new("kshark.config.stream")
}

/// New document describing filters.
pub fn filter_config_new() -> ConfigDoc {
    ConfigDoc::new("kshark.config.filter")
}

/// New document describing a whole session.
pub fn session_config_new() -> ConfigDoc {
    ConfigDoc::new("kshark.config.session")
}

/* ---------------------------------------------------------------------
 * Data file references
 * --------------------------------------------------------------------- */

/// Record the name of a trace data file, a buffer name and the file's
/// modification time into a `kshark.config.data` document.
pub fn export_trace_file(file: &Path, name: &str) -> Result<ConfigDoc> {
    let abs = std::fs::canonicalize(file)
        .map_err(|_| Error::NotFound(file.display().to_string()))?;
    let mtime = file_mtime(&abs)?;

    let mut conf = ConfigDoc::new("kshark.config.data");
    conf.add("file", ConfigDoc::from_json(json!(abs.display().to_string())));
    conf.add("name", ConfigDoc::from_json(json!(name)));
    conf.add("time", ConfigDoc::from_json(json!(mtime)));

    Ok(conf)
}

fn trace_file_from_doc(conf: &ConfigDoc, type_str: Option<&str>) -> Result<(PathBuf, String)> {
    if let Some(t) = type_str {
        if !conf.type_check(&format!("kshark.config.{t}")) {
            return Err(Error::Session(String::from(
                "data file document has a wrong type",
            )));
        }
    }

    let file = conf
        .doc
        .get("file")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Session(String::from("data file document: no 'file'")))?;
    let name = conf
        .doc
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Session(String::from("data file document: no 'name'")))?;
    let time = conf
        .doc
        .get("time")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Session(String::from("data file document: no 'time'")))?;

    let path = PathBuf::from(file);
    let mtime = file_mtime(&path)?;
    if mtime != time {
        return Err(Error::Session(format!(
            "timestamp mismatch ({time} != {mtime}), file {file}"
        )));
    }

    Ok((path, name.to_string()))
}

/// Open the trace file described by a `kshark.config.data` document.
/// The top buffer re-opens through format probing; a named buffer opens
/// as a sub-buffer of the file's top stream, initializing that stream
/// first when needed.
pub fn import_trace_file(ctx: &mut Context, conf: &ConfigDoc) -> Result<i16> {
    let (file, name) = trace_file_from_doc(conf, Some("data"))?;

    if name == UNNAMED || name == TOP_BUFF_NAME {
        return ctx.open(&file);
    }

    let top_sd = match ctx.find_top_stream(&file) {
        Some(sd) => sd,
        None => ctx.open(&file)?,
    };

    ctx.open_buffer(top_sd, &name)
}

/* ---------------------------------------------------------------------
 * Plugins
 * --------------------------------------------------------------------- */

/// Record one plugin's object file into a `kshark.config.library`
/// document.
pub fn export_plugin_file(name: &str, file: &Path) -> Result<ConfigDoc> {
    let mut conf = export_trace_file(file, name)?;
    conf.doc["type"] = json!("kshark.config.library");
    conf.add("name", ConfigDoc::from_json(json!(name)));

    Ok(conf)
}

/// Record the list of registered plugins into a `kshark.config.plugins`
/// document, under `obj. files`.
pub fn export_all_plugins(ctx: &Context) -> Result<ConfigDoc> {
    let mut files = Vec::new();
    for plugin in ctx.plugins() {
        let entry = export_trace_file(&plugin.file, &plugin.name)?;
        files.push(entry.doc);
    }

    let mut conf = ConfigDoc::new("kshark.config.plugins");
    conf.add("obj. files", ConfigDoc::from_json(Value::Array(files)));

    Ok(conf)
}

/// Load the list of registered plugins from a document. Plugins are
/// matched by name against what is compiled into (or already registered
/// with) this process; unknown names are reported and skipped.
pub fn import_all_plugins(ctx: &mut Context, conf: &ConfigDoc) -> bool {
    if !conf.type_check("kshark.config.plugins") {
        return false;
    }

    let Some(list) = conf.doc.get("obj. files").and_then(Value::as_array) else {
        return false;
    };

    for file in list {
        let doc = ConfigDoc::from_json(file.clone());
        let Ok((path, name)) = trace_file_from_doc(&doc, None) else {
            warn!("failed to import plugin");
            continue;
        };

        if ctx.find_plugin_by_name(&name).is_none() && ctx.find_plugin(&path).is_none() {
            warn!("plugin \"{name}\" ({}) is not available", path.display());
        }
    }

    true
}

/// Record the plugins registered on one stream into a
/// `kshark.config.plugins` document, under `registered`, as
/// `[name, enabled]` pairs.
pub fn export_stream_plugins(ctx: &Context, sd: i16) -> Result<ConfigDoc> {
    let stream = ctx.stream(sd)?;

    let mut list = Vec::new();
    for attachment in &stream.plugins {
        let active = attachment.status & PLUGIN_ENABLED != 0;
        list.push(json!([attachment.interface.name(), active]));
    }

    let mut conf = ConfigDoc::new("kshark.config.plugins");
    conf.add("registered", ConfigDoc::from_json(Value::Array(list)));

    Ok(conf)
}

/// Attach to stream `sd` every plugin recorded in the document that is
/// also registered with the context, with the recorded enabled state,
/// and initialize it.
pub fn import_stream_plugins(ctx: &mut Context, sd: i16, conf: &ConfigDoc) -> bool {
    if !conf.type_check("kshark.config.plugins") {
        return false;
    }

    let Some(list) = conf.doc.get("registered").and_then(Value::as_array) else {
        return false;
    };

    for item in list {
        let (Some(name), Some(active)) = (
            item.get(0).and_then(Value::as_str),
            item.get(1).and_then(Value::as_bool),
        ) else {
            return false;
        };

        let process = ctx
            .find_plugin_by_name(name)
            .and_then(|p| p.process.clone());

        if let Some(process) = process {
            let Some(stream) = ctx.get_stream_mut(sd) else {
                return false;
            };
            let idx = stream.register_plugin(process, active);
            handle_plugin(stream, idx, PluginAction::Init);
        }
    }

    true
}

/* ---------------------------------------------------------------------
 * Filters
 * --------------------------------------------------------------------- */

/// Record an event Id filter into a filter document, by event *name*.
pub fn export_event_filter(
    ctx: &Context,
    sd: i16,
    kind: FilterKind,
    conf: &mut ConfigDoc,
) -> Result<()> {
    let stream = ctx.stream(sd)?;
    let ids = stream.filters.get(kind).ids();
    if ids.is_empty() {
        return Ok(());
    }

    let names: Vec<Value> = ids
        .iter()
        .filter_map(|&id| ctx.event_from_id(sd, id as i16))
        .map(Value::String)
        .collect();

    conf.add(kind.doc_name(), ConfigDoc::from_json(Value::Array(names)));
    Ok(())
}

/// Load an event Id filter from a filter document. Returns the number
/// of event names resolved and added; the count is negative if some
/// names in the document did not resolve.
pub fn import_event_filter(
    ctx: &mut Context,
    sd: i16,
    kind: FilterKind,
    conf: &ConfigDoc,
) -> i32 {
    let Some(list) = conf.doc.get(kind.doc_name()).and_then(Value::as_array) else {
        return 0;
    };

    if !conf.type_check("kshark.config.filter") {
        warn!("failed to load event filter from document");
        return 0;
    }

    let length = list.len() as i32;
    let ids: Vec<i32> = list
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|name| ctx.find_event_id(sd, name))
        .collect();

    let count = ids.len() as i32;
    let Some(stream) = ctx.get_stream_mut(sd) else {
        return 0;
    };
    for id in ids {
        stream.filters.get_mut(kind).add(id);
    }

    if count != length { -count } else { count }
}

/// Record a simple Id filter into a filter document, as integers.
pub fn export_filter_array(filter: &HashIdSet, name: &str, conf: &mut ConfigDoc) {
    if !filter.is_set() {
        return;
    }

    let ids: Vec<Value> = filter.ids().into_iter().map(|id| json!(id)).collect();
    conf.add(name, ConfigDoc::from_json(Value::Array(ids)));
}

/// Load a simple Id filter from a filter document. Returns true if the
/// document holds data for this filter.
pub fn import_filter_array(filter: &mut HashIdSet, name: &str, conf: &ConfigDoc) -> bool {
    let Some(list) = conf.doc.get(name).and_then(Value::as_array) else {
        return false;
    };

    if !conf.type_check("kshark.config.filter") {
        warn!("failed to load Id filter from document");
        return false;
    }

    for id in list.iter().filter_map(Value::as_i64) {
        filter.add(id as i32);
    }

    true
}

/// Record the user filter mask into a filter document.
pub fn export_user_mask(ctx: &Context, conf: &mut ConfigDoc) {
    conf.add(
        USER_FILTER_MASK_NAME,
        ConfigDoc::from_json(json!(ctx.filter_mask)),
    );
}

/// Load the user filter mask from a filter document.
pub fn import_user_mask(ctx: &mut Context, conf: &ConfigDoc) -> bool {
    if !conf.type_check("kshark.config.filter") {
        return false;
    }

    match conf.doc.get(USER_FILTER_MASK_NAME).and_then(Value::as_u64) {
        Some(mask) => {
            ctx.filter_mask = mask as u8;
            true
        }
        None => false,
    }
}

/// Record the advanced filters of stream `sd` into a filter document,
/// as `{name, condition}` pairs.
pub fn export_adv_filters(ctx: &Context, sd: i16, conf: &mut ConfigDoc) -> Result<()> {
    let stream = ctx.stream(sd)?;
    let filters = match stream.interface.as_deref() {
        Some(iface) => iface.adv_filters(stream),
        None => Vec::new(),
    };
    if filters.is_empty() {
        return Ok(());
    }

    let list: Vec<Value> = filters
        .into_iter()
        .map(|(name, condition)| json!({ "name": name, "condition": condition }))
        .collect();

    conf.add(ADV_EVENT_FILTER_NAME, ConfigDoc::from_json(Value::Array(list)));
    Ok(())
}

/// Load the advanced filters of stream `sd` from a filter document.
/// Each entry is reassembled as `name:condition` and handed to the
/// stream's backend.
pub fn import_adv_filters(ctx: &mut Context, sd: i16, conf: &ConfigDoc) -> bool {
    let Some(list) = conf.doc.get(ADV_EVENT_FILTER_NAME).and_then(Value::as_array) else {
        return false;
    };

    let Some(stream) = ctx.get_stream(sd) else {
        return false;
    };
    let Some(iface) = stream.interface.as_deref() else {
        return false;
    };

    let mut loaded = false;
    for item in list {
        let (Some(name), Some(condition)) = (
            item.get("name").and_then(Value::as_str),
            item.get("condition").and_then(Value::as_str),
        ) else {
            warn!("failed to load advanced filters");
            continue;
        };

        let filter = format!("{name}:{condition}");
        match iface.add_adv_filter(stream, &filter) {
            Ok(()) => loaded = true,
            Err(err) => warn!("advanced filter {filter:?} rejected: {err}"),
        }
    }

    loaded
}

/// Record the calibration constants of stream `sd` into a document.
pub fn export_calib_array(ctx: &Context, sd: i16, conf: &mut ConfigDoc) -> Result<()> {
    let stream = ctx.stream(sd)?;
    if stream.calib_array.is_empty() {
        return Ok(());
    }

    let list: Vec<Value> = stream.calib_array.iter().map(|&v| json!(v)).collect();
    conf.add("calib. array", ConfigDoc::from_json(Value::Array(list)));

    Ok(())
}

/// Load the calibration constants of stream `sd` from a document and
/// install the offset calibration function.
pub fn import_calib_array(ctx: &mut Context, sd: i16, conf: &ConfigDoc) -> bool {
    let Some(list) = conf.doc.get("calib. array").and_then(Value::as_array) else {
        return false;
    };

    let calib: Vec<i64> = list.iter().filter_map(Value::as_i64).collect();
    if calib.is_empty() {
        return false;
    }

    let Some(stream) = ctx.get_stream_mut(sd) else {
        return false;
    };
    stream.calib = Some(offset_calib);
    stream.calib_array = calib;

    true
}

/// Record all six Id filters of stream `sd` into one filter document,
/// together with the user mask and the advanced filters.
pub fn export_all_filters(ctx: &Context, sd: i16) -> Result<ConfigDoc> {
    let mut conf = filter_config_new();

    export_event_filter(ctx, sd, FilterKind::ShowEvent, &mut conf)?;
    export_event_filter(ctx, sd, FilterKind::HideEvent, &mut conf)?;

    let stream = ctx.stream(sd)?;
    export_filter_array(
        &stream.filters.show_task,
        FilterKind::ShowTask.doc_name(),
        &mut conf,
    );
    export_filter_array(
        &stream.filters.hide_task,
        FilterKind::HideTask.doc_name(),
        &mut conf,
    );
    export_filter_array(
        &stream.filters.show_cpu,
        FilterKind::ShowCpu.doc_name(),
        &mut conf,
    );
    export_filter_array(
        &stream.filters.hide_cpu,
        FilterKind::HideCpu.doc_name(),
        &mut conf,
    );

    export_user_mask(ctx, &mut conf);
    export_adv_filters(ctx, sd, &mut conf)?;

    Ok(conf)
}

/// Load every filter of stream `sd` from one filter document.
pub fn import_all_filters(ctx: &mut Context, sd: i16, conf: &ConfigDoc) -> bool {
    let mut ret = false;

    for kind in [
        FilterKind::ShowTask,
        FilterKind::HideTask,
        FilterKind::ShowCpu,
        FilterKind::HideCpu,
    ] {
        if let Some(stream) = ctx.get_stream_mut(sd) {
            ret |= import_filter_array(
                stream.filters.get_mut(kind),
                kind.doc_name(),
                conf,
            );
        }
    }

    ret |= import_event_filter(ctx, sd, FilterKind::HideEvent, conf) != 0;
    ret |= import_event_filter(ctx, sd, FilterKind::ShowEvent, conf) != 0;
    ret |= import_user_mask(ctx, conf);
    ret |= import_adv_filters(ctx, sd, conf);

    ret
}

/* ---------------------------------------------------------------------
 * Streams and sessions
 * --------------------------------------------------------------------- */

/// Record everything about stream `sd` into a `kshark.config.stream`
/// document: id, data file, filters, plugins and calibration.
pub fn export_dstream(ctx: &Context, sd: i16) -> Result<ConfigDoc> {
    let stream = ctx.stream(sd)?;

    let name = if stream.is_top() {
        TOP_BUFF_NAME.to_string()
    } else {
        stream.name.clone()
    };
    let file_conf = export_trace_file(&stream.file, &name)?;
    let filter_conf = export_all_filters(ctx, sd)?;
    let plugin_conf = export_stream_plugins(ctx, sd)?;

    let mut conf = stream_config_new();
    conf.add("stream id", ConfigDoc::from_json(json!(sd)));
    conf.add("data", file_conf);
    conf.add("filters", filter_conf);
    conf.add("plugins", plugin_conf);
    export_calib_array(ctx, sd, &mut conf)?;

    Ok(conf)
}

/// Load one data stream from a `kshark.config.stream` document. On
/// failure the half-loaded stream is closed before returning.
pub fn import_dstream(ctx: &mut Context, conf: &ConfigDoc) -> Result<i16> {
    if !conf.type_check("kshark.config.stream") {
        return Err(Error::InvalidFormat(String::from(
            "stream document has a wrong type",
        )));
    }

    let file_conf = conf
        .get("data")
        .ok_or_else(|| Error::Session(String::from("stream document: no 'data'")))?;
    let filter_conf = conf
        .get("filters")
        .ok_or_else(|| Error::Session(String::from("stream document: no 'filters'")))?;
    let plugin_conf = conf
        .get("plugins")
        .ok_or_else(|| Error::Session(String::from("stream document: no 'plugins'")))?;

    let sd = import_trace_file(ctx, &file_conf)?;

    import_calib_array(ctx, sd, conf);

    if !import_all_filters(ctx, sd, &filter_conf) {
        let _ = ctx.close(sd);
        return Err(Error::Session(String::from("failed to import filters")));
    }

    if !import_stream_plugins(ctx, sd, &plugin_conf) {
        let _ = ctx.close(sd);
        return Err(Error::Session(String::from(
            "failed to import stream plugins",
        )));
    }

    Ok(sd)
}

/// Record all open streams into a session document, under
/// `data streams`.
pub fn export_all_dstreams(ctx: &Context, conf: &mut ConfigDoc) -> Result<()> {
    let mut streams = Vec::new();
    for sd in ctx.all_streams() {
        streams.push(export_dstream(ctx, sd)?.doc);
    }

    conf.add(DSTREAMS_NAME, ConfigDoc::from_json(Value::Array(streams)));
    Ok(())
}

/// Load all data streams of a session document, then load and merge
/// their data.
pub fn import_all_dstreams(ctx: &mut Context, conf: &ConfigDoc) -> Result<Vec<Entry>> {
    let streams = conf
        .doc
        .get(DSTREAMS_NAME)
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty())
        .ok_or_else(|| Error::Session(format!("no '{DSTREAMS_NAME}' in document")))?;

    for stream in streams {
        import_dstream(ctx, &ConfigDoc::from_json(stream.clone()))?;
    }

    ctx.load_all_entries()
}

/// Record the whole session: every stream plus the global plugin list.
pub fn export_session(ctx: &Context) -> Result<ConfigDoc> {
    let mut conf = session_config_new();

    conf.add("User Plugins", export_all_plugins(ctx)?);
    export_all_dstreams(ctx, &mut conf)?;

    Ok(conf)
}

/// Restore a session: plugins first, then streams (their filters load
/// after the stream exists), then the merged data. A failure leaves the
/// context empty instead of partially populated.
pub fn import_session(ctx: &mut Context, conf: &ConfigDoc) -> Result<Vec<Entry>> {
    if !conf.type_check("kshark.config.session") {
        return Err(Error::InvalidFormat(String::from(
            "session document has a wrong type",
        )));
    }

    if let Some(plugins) = conf.get("User Plugins") {
        import_all_plugins(ctx, &plugins);
    }

    match import_all_dstreams(ctx, conf) {
        Ok(entries) => Ok(entries),
        Err(err) => {
            ctx.close_all();
            Err(err)
        }
    }
}

/* ---------------------------------------------------------------------
 * Model and markers (persisted for the GUI collaborator)
 * --------------------------------------------------------------------- */

/// State of the visualization model: a time range and a bin count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoModel {
    pub min: i64,
    pub max: i64,
    pub n_bins: usize,
}

/// Record the model state into a `kshark.config.model` document.
pub fn export_model(model: &HistoModel) -> ConfigDoc {
    let mut conf = ConfigDoc::new("kshark.config.model");
    conf.add("range", ConfigDoc::from_json(json!([model.min, model.max])));
    conf.add("bins", ConfigDoc::from_json(json!(model.n_bins)));

    conf
}

/// Load the model state from a `kshark.config.model` document.
pub fn import_model(conf: &ConfigDoc) -> Option<HistoModel> {
    if !conf.type_check("kshark.config.model") {
        return None;
    }

    let range = conf.doc.get("range")?.as_array()?;
    let min = range.first()?.as_i64()?;
    let max = range.get(1)?.as_i64()?;
    let n_bins = conf.doc.get("bins")?.as_u64()? as usize;

    Some(HistoModel { min, max, n_bins })
}

/// One of the two user markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marker {
    pub is_set: bool,
    pub row: usize,
}

/// The A/B marker pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DualMarkers {
    pub mark_a: Marker,
    pub mark_b: Marker,

    /// True when marker A is the active one.
    pub active_a: bool,
}

fn marker_to_json(marker: &Marker) -> Value {
    if marker.is_set {
        json!({ "isSet": true, "row": marker.row })
    } else {
        json!({ "isSet": false })
    }
}

/// Record the markers into a `kshark.config.markers` document.
pub fn export_markers(markers: &DualMarkers) -> ConfigDoc {
    let mut conf = ConfigDoc::new("kshark.config.markers");
    conf.add("markA", ConfigDoc::from_json(marker_to_json(&markers.mark_a)));
    conf.add("markB", ConfigDoc::from_json(marker_to_json(&markers.mark_b)));
    conf.add(
        "Active",
        ConfigDoc::from_json(json!(if markers.active_a { "A" } else { "B" })),
    );

    conf
}

/// Load the markers from a `kshark.config.markers` document.
pub fn import_markers(conf: &ConfigDoc) -> Option<DualMarkers> {
    if !conf.type_check("kshark.config.markers") {
        return None;
    }

    let get_mark = |key: &str| -> Marker {
        let Some(mark) = conf.doc.get(key) else {
            return Marker::default();
        };

        let is_set = mark.get("isSet").and_then(Value::as_bool).unwrap_or(false);
        let row = mark.get("row").and_then(Value::as_u64).unwrap_or(0) as usize;

        Marker {
            is_set,
            row: if is_set { row } else { 0 },
        }
    };

    Some(DualMarkers {
        mark_a: get_mark("markA"),
        mark_b: get_mark("markB"),
        active_a: conf.doc.get("Active").and_then(Value::as_str) != Some("B"),
    })
}

/* ---------------------------------------------------------------------
 * Files
 * --------------------------------------------------------------------- */

/// Save a document into a file, pretty-printed.
pub fn save_config_file(path: &Path, conf: &ConfigDoc) -> Result<()> {
    std::fs::write(path, conf.to_pretty())?;
    Ok(())
}

/// Open a document file and verify its type. Only `.json` files are
/// probed.
pub fn open_config_file(path: &Path, type_str: &str) -> Result<ConfigDoc> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("unknown");
    if ext != "json" {
        return Err(Error::InvalidFormat(format!(
            "{}: not a json document",
            path.display()
        )));
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|_| Error::NotFound(path.display().to_string()))?;
    let doc: Value = serde_json::from_str(&raw)
        .map_err(|err| Error::Session(format!("{}: {err}", path.display())))?;

    let conf = ConfigDoc::from_json(doc);
    if !conf.type_check(type_str) {
        return Err(Error::InvalidFormat(format!(
            "{}: the document has a wrong type",
            path.display()
        )));
    }

    Ok(conf)
}

/// The directory holding the persisted last session.
///
/// `KS_USER_CACHE_DIR` overrides the platform cache location. When the
/// override points to a missing directory it is created loudly; the
/// platform default is created silently.
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("KS_USER_CACHE_DIR") {
        if !dir.is_empty() {
            let path = PathBuf::from(dir);
            if !path.exists() {
                warn!(
                    "KS_USER_CACHE_DIR {} does not exist, creating it",
                    path.display()
                );
                std::fs::create_dir_all(&path)?;
            }

            return Ok(path);
        }
    }

    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|_| {
            std::env::var("HOME").map(|home| PathBuf::from(home).join(".cache"))
        })
        .map_err(|_| Error::NotFound(String::from("no cache directory")))?;

    let path = base.join("tracescope");
    if !path.exists() {
        std::fs::create_dir_all(&path)?;
    }

    Ok(path)
}

/// Path of the last-session document.
pub fn last_session_file() -> Result<PathBuf> {
    Ok(cache_dir()?.join("lastsession.json"))
}
