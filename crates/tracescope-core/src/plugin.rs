//! Data-processing plugins and their per-stream lifecycle.
//!
//! A [`ProcessInterface`] is a bundle of `init`/`close` callbacks that a
//! plugin registers on a stream. While initializing, the plugin may hang
//! event actions (executed for matching entries during load) and draw
//! actions (stored for the GUI collaborator) on the stream.

use std::any::Any;
use std::sync::Arc;

use log::warn;

use crate::entry::{Entry, PLUGIN_UNTOUCHED_MASK};
use crate::stream::{DataStream, UNNAMED};

/// The plugin is enabled.
pub const PLUGIN_ENABLED: u8 = 1 << 0;

/// The plugin is successfully loaded.
pub const PLUGIN_LOADED: u8 = 1 << 1;

/// The plugin failed to initialize.
pub const PLUGIN_FAILED: u8 = 1 << 2;

/// Lifecycle verbs for plugin handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginAction {
    /// Load: initialize the plugin if it is enabled.
    Init,

    /// Reload: close if loaded, then initialize if enabled.
    Update,

    /// Unload: close the plugin if it is loaded.
    Close,
}

/// Per-stream data processing interface of one plugin.
pub trait ProcessInterface: Send + Sync {
    /// The plugin's short name.
    fn name(&self) -> &str;

    /// Initialize the plugin on `stream`. Returns the number of handlers
    /// installed; zero or negative means failure.
    fn init(&self, stream: &mut DataStream) -> i32;

    /// Deinitialize the plugin on `stream`. Returns the number of
    /// handlers removed.
    fn close(&self, stream: &mut DataStream) -> i32;

    /// One pass over the freshly loaded, time-sorted entries of the
    /// stream, after all event actions ran. Plugins that need to walk
    /// trailing events on the same cpu do it here.
    fn post_load(&self, stream: &DataStream, entries: &mut [Entry]) {
        let _ = (stream, entries);
    }
}

/// One plugin registered on one stream, with its status bits.
pub struct PluginAttachment {
    /// The plugin's processing interface.
    pub interface: Arc<dyn ProcessInterface>,

    /// Combination of [`PLUGIN_ENABLED`], [`PLUGIN_LOADED`] and
    /// [`PLUGIN_FAILED`].
    pub status: u8,
}

/// Event action: may mutate the entry, using the raw record it was
/// produced from and the owning stream's interface.
pub type EventHookFn = Arc<dyn Fn(&DataStream, &dyn Any, &mut Entry) + Send + Sync>;

/// A plugin-provided per-event action.
#[derive(Clone)]
pub struct EventHandler {
    /// Event Id the action applies to.
    pub id: i32,

    /// The action itself.
    pub func: EventHookFn,
}

/// Draw action for task plots.
pub const TASK_DRAW: u32 = 1 << 0;

/// Draw action for cpu plots.
pub const CPU_DRAW: u32 = 1 << 1;

/// Draw action for the host graph in virtual combos.
pub const HOST_DRAW: u32 = 1 << 2;

/// Draw action for the guest graph in virtual combos.
pub const GUEST_DRAW: u32 = 1 << 3;

/// Draw action: invoked by the GUI with its plotting context, the stream
/// id, a plot value and the draw-action bits. The engine only stores it.
pub type DrawHookFn = Arc<dyn Fn(&mut dyn Any, i16, i32, u32) + Send + Sync>;

/// A plugin-provided draw action.
#[derive(Clone)]
pub struct DrawHandler {
    /// The action itself.
    pub func: DrawHookFn,
}

/// Plugin configuration/control function, held for the GUI collaborator.
pub type CtrlFn = Arc<dyn Fn(&mut dyn Any) + Send + Sync>;

impl DataStream {
    /// Add an event action for entries with Event Id `event_id`.
    ///
    /// Actions run in registration order; each sees the mutations of the
    /// ones registered before it.
    pub fn register_event_handler(&mut self, event_id: i32, func: EventHookFn) {
        self.event_handlers.push(EventHandler { id: event_id, func });
    }

    /// Remove a previously registered event action.
    pub fn unregister_event_handler(&mut self, event_id: i32, func: &EventHookFn) {
        self.event_handlers.retain(|h| {
            h.id != event_id || !Arc::ptr_eq(&h.func, func)
        });
    }

    /// Add a draw action.
    pub fn register_draw_handler(&mut self, func: DrawHookFn) {
        self.draw_handlers.push(DrawHandler { func });
    }

    /// Remove a previously registered draw action.
    pub fn unregister_draw_handler(&mut self, func: &DrawHookFn) {
        self.draw_handlers.retain(|h| !Arc::ptr_eq(&h.func, func));
    }

    /// Register a plugin to this stream without initializing it. Use
    /// [`handle_plugin`] or [`handle_all_plugins`] to initialize it.
    ///
    /// If the same plugin is already registered, any loaded instance is
    /// closed first, guaranteeing a clean re-initialization. Returns the
    /// attachment index, stable for the life of the attachment.
    pub fn register_plugin(
        &mut self,
        plugin: Arc<dyn ProcessInterface>,
        active: bool,
    ) -> usize {
        for idx in 0..self.plugins.len() {
            let attached = &self.plugins[idx];
            if Arc::ptr_eq(&attached.interface, &plugin)
                && attached.interface.name() == plugin.name()
            {
                if self.plugins[idx].status & PLUGIN_LOADED != 0 {
                    handle_plugin(self, idx, PluginAction::Close);
                }

                self.plugins[idx].status = if active { PLUGIN_ENABLED } else { 0 };
                return idx;
            }
        }

        self.plugins.push(PluginAttachment {
            interface: plugin,
            status: if active { PLUGIN_ENABLED } else { 0 },
        });

        self.plugins.len() - 1
    }

    /// Unregister a plugin from this stream, closing it.
    pub fn unregister_plugin(&mut self, plugin: &Arc<dyn ProcessInterface>) {
        let found = self.plugins.iter().position(|attached| {
            Arc::ptr_eq(&attached.interface, plugin)
                && attached.interface.name() == plugin.name()
        });

        if let Some(idx) = found {
            let attached = self.plugins.remove(idx);
            attached.interface.close(self);
        }
    }

    /// The number of plugins attached to this stream.
    pub fn n_plugins(&self) -> usize {
        self.plugins.len()
    }
}

fn plugin_init(stream: &mut DataStream, idx: usize) -> i32 {
    let iface = Arc::clone(&stream.plugins[idx].interface);
    let handler_count = iface.init(stream);

    let status = &mut stream.plugins[idx].status;
    if handler_count > 0 {
        *status &= !PLUGIN_FAILED;
        *status |= PLUGIN_LOADED;
    } else {
        if stream.name == UNNAMED {
            warn!(
                "plugin \"{}\" failed to initialize on stream {}",
                iface.name(),
                stream.file.display()
            );
        } else {
            warn!(
                "plugin \"{}\" failed to initialize on stream {}:{}",
                iface.name(),
                stream.file.display(),
                stream.name
            );
        }

        *status |= PLUGIN_FAILED;
        *status &= !PLUGIN_LOADED;
    }

    handler_count
}

fn plugin_close(stream: &mut DataStream, idx: usize) -> i32 {
    let iface = Arc::clone(&stream.plugins[idx].interface);
    let handler_count = iface.close(stream);

    stream.plugins[idx].status &= !PLUGIN_LOADED;

    handler_count
}

/// Initialize/update/deinitialize one plugin attachment of a stream.
///
/// Returns the number of plugin handlers added (positive) or removed
/// (negative) by the action.
pub fn handle_plugin(stream: &mut DataStream, idx: usize, action: PluginAction) -> i32 {
    let mut handler_count = 0;

    match action {
        PluginAction::Init => {
            if stream.plugins[idx].status & PLUGIN_ENABLED != 0 {
                handler_count += plugin_init(stream, idx);
            }
        }

        PluginAction::Update => {
            if stream.plugins[idx].status & PLUGIN_LOADED != 0 {
                handler_count -= plugin_close(stream, idx);
            }

            stream.plugins[idx].status &= !PLUGIN_FAILED;

            if stream.plugins[idx].status & PLUGIN_ENABLED != 0 {
                handler_count += plugin_init(stream, idx);
            }
        }

        PluginAction::Close => {
            if stream.plugins[idx].status & PLUGIN_LOADED != 0 {
                handler_count -= plugin_close(stream, idx);
            }

            stream.plugins[idx].status &= !PLUGIN_FAILED;
        }
    }

    handler_count
}

/// Apply one lifecycle action to every plugin attached to a stream.
pub fn handle_all_plugins(stream: &mut DataStream, action: PluginAction) -> i32 {
    let mut handler_count = 0;

    for idx in 0..stream.plugins.len() {
        handler_count += handle_plugin(stream, idx, action);
    }

    handler_count
}

/// Execute all event actions matching the entry, in registration order.
/// The first action to run clears the plugin-untouched bit.
pub fn run_event_hooks(
    handlers: &[EventHandler],
    stream: &DataStream,
    record: &dyn Any,
    entry: &mut Entry,
) {
    for handler in handlers {
        if handler.id == i32::from(entry.event_id) {
            (handler.func)(stream, record, entry);
            entry.visible &= !PLUGIN_UNTOUCHED_MASK;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct DummyDpi {
        name: &'static str,
        init_result: i32,
        init_calls: AtomicI32,
        close_calls: AtomicI32,
    }

    impl DummyDpi {
        fn new(name: &'static str, init_result: i32) -> Arc<Self> {
            Arc::new(Self {
                name,
                init_result,
                init_calls: AtomicI32::new(0),
                close_calls: AtomicI32::new(0),
            })
        }
    }

    impl ProcessInterface for DummyDpi {
        fn name(&self) -> &str {
            self.name
        }

        fn init(&self, _stream: &mut DataStream) -> i32 {
            self.init_calls.fetch_add(1, Ordering::Relaxed);
            self.init_result
        }

        fn close(&self, _stream: &mut DataStream) -> i32 {
            self.close_calls.fetch_add(1, Ordering::Relaxed);
            self.init_result
        }
    }

    #[test]
    fn lifecycle_state_machine() {
        let mut stream = DataStream::new();
        let p1 = DummyDpi::new("dummy_dpi", 1);
        let p2 = DummyDpi::new("dummy_dpi_ctrl", 2);

        let i1 = stream.register_plugin(p1.clone(), true);
        assert_eq!(stream.plugins[i1].status, PLUGIN_ENABLED);

        let i2 = stream.register_plugin(p2.clone(), false);
        assert_eq!(stream.plugins[i2].status, 0);

        let ret = handle_plugin(&mut stream, i1, PluginAction::Init);
        assert_eq!(ret, 1);
        assert_eq!(stream.plugins[i1].status, PLUGIN_LOADED | PLUGIN_ENABLED);

        // Disabled plugin: INIT is a no-op.
        let ret = handle_plugin(&mut stream, i2, PluginAction::Init);
        assert_eq!(ret, 0);
        assert_eq!(stream.plugins[i2].status, 0);

        stream.plugins[i2].status |= PLUGIN_ENABLED;
        let ret = handle_plugin(&mut stream, i2, PluginAction::Init);
        assert_eq!(ret, 2);

        // UPDATE closes and re-inits every loaded plugin.
        let ret = handle_all_plugins(&mut stream, PluginAction::Update);
        assert_eq!(ret, 0);
        assert_eq!(stream.plugins[i1].status, PLUGIN_LOADED | PLUGIN_ENABLED);
        assert_eq!(stream.plugins[i2].status, PLUGIN_LOADED | PLUGIN_ENABLED);
        assert_eq!(p1.init_calls.load(Ordering::Relaxed), 2);
        assert_eq!(p1.close_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failing_plugin_is_marked_failed() {
        let mut stream = DataStream::new();
        let p_err = DummyDpi::new("dummy_dpi_err", 0);

        let idx = stream.register_plugin(p_err.clone(), true);
        let ret = handle_plugin(&mut stream, idx, PluginAction::Init);
        assert_eq!(ret, 0);
        assert_eq!(stream.plugins[idx].status, PLUGIN_FAILED | PLUGIN_ENABLED);

        // CLOSE clears the failure flag but never calls close() on a
        // plugin that is not loaded.
        let ret = handle_plugin(&mut stream, idx, PluginAction::Close);
        assert_eq!(ret, 0);
        assert_eq!(stream.plugins[idx].status, PLUGIN_ENABLED);
        assert_eq!(p_err.close_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn disable_then_update_unloads() {
        let mut stream = DataStream::new();
        let p = DummyDpi::new("sched_events", 1);

        let idx = stream.register_plugin(p.clone(), true);
        handle_plugin(&mut stream, idx, PluginAction::Init);
        assert_eq!(stream.plugins[idx].status, PLUGIN_LOADED | PLUGIN_ENABLED);

        stream.plugins[idx].status &= !PLUGIN_ENABLED;
        handle_plugin(&mut stream, idx, PluginAction::Update);
        assert_eq!(stream.plugins[idx].status, 0);
    }

    #[test]
    fn reattach_closes_loaded_instance() {
        let mut stream = DataStream::new();
        let p = DummyDpi::new("dummy_dpi", 1);

        let idx = stream.register_plugin(p.clone(), true);
        handle_plugin(&mut stream, idx, PluginAction::Init);
        assert_eq!(p.close_calls.load(Ordering::Relaxed), 0);

        let idx2 = stream.register_plugin(p.clone(), true);
        assert_eq!(idx, idx2);
        assert_eq!(stream.n_plugins(), 1);
        assert_eq!(p.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(stream.plugins[idx2].status, PLUGIN_ENABLED);
    }

    #[test]
    fn attachments_keep_registration_order() {
        let mut stream = DataStream::new();
        let p1 = DummyDpi::new("one", 1);
        let p2 = DummyDpi::new("two", 1);

        assert_eq!(stream.register_plugin(p1.clone(), true), 0);
        assert_eq!(stream.register_plugin(p2.clone(), true), 1);
        assert_eq!(stream.plugins[0].interface.name(), "one");
        assert_eq!(stream.plugins[1].interface.name(), "two");

        let p1_dyn: Arc<dyn ProcessInterface> = p1;
        stream.unregister_plugin(&p1_dyn);
        assert_eq!(stream.n_plugins(), 1);
        assert_eq!(stream.plugins[0].interface.name(), "two");
    }

    #[test]
    fn event_hooks_run_in_registration_order() {
        let mut stream = DataStream::new();

        stream.register_event_handler(
            7,
            Arc::new(|_s, _rec, e: &mut Entry| e.pid = 100),
        );
        stream.register_event_handler(
            7,
            Arc::new(|_s, _rec, e: &mut Entry| e.pid += 1),
        );
        stream.register_event_handler(
            8,
            Arc::new(|_s, _rec, e: &mut Entry| e.pid = -1),
        );

        let handlers = stream.event_handlers.clone();
        let mut e = Entry::new();
        e.event_id = 7;
        run_event_hooks(&handlers, &stream, &(), &mut e);

        assert_eq!(e.pid, 101);
        assert_eq!(e.visible & PLUGIN_UNTOUCHED_MASK, 0);

        let mut untouched = Entry::new();
        untouched.event_id = 9;
        run_event_hooks(&handlers, &stream, &(), &mut untouched);
        assert_ne!(untouched.visible & PLUGIN_UNTOUCHED_MASK, 0);
    }
}
