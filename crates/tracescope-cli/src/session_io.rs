//! Last-session persistence.

use tracescope_core::session;
use tracescope_core::{Context, Entry, Result};

/// Restore the session saved by the previous run.
pub fn load_last_session(ctx: &mut Context) -> Result<Vec<Entry>> {
    let path = session::last_session_file()?;
    let conf = session::open_config_file(&path, "kshark.config.session")?;

    session::import_session(ctx, &conf)
}

/// Persist the current session for the next run.
pub fn save_last_session(ctx: &Context) -> Result<()> {
    if ctx.n_streams() == 0 {
        return Ok(());
    }

    let path = session::last_session_file()?;
    let conf = session::export_session(ctx)?;

    session::save_config_file(&path, &conf)
}
