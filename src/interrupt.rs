//! Ctrl-C handling for long acquisition runs.
//!
//! The first interrupt only sets the session's flag; the driver checks it
//! between control attempts, writes what it has captured and stops. A
//! second interrupt exits immediately.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

/// Exit status for a second, forced interrupt (128 + SIGINT).
const FORCED_EXIT: i32 = 130;

/// Watch for ctrl-c on a background thread and raise `flag` on the first one.
pub fn watch_ctrl_c(flag: Arc<AtomicBool>) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    debug!("ctrl-c handler unavailable");
                    return;
                }
                warn!("interrupt received, finishing the current step and writing captured rows");
                flag.store(true, Ordering::SeqCst);

                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("second interrupt, exiting without flushing");
                    std::process::exit(FORCED_EXIT);
                }
            });
        })?;

    Ok(())
}
