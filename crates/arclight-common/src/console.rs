// console.rs — console print layer shared by every subsystem

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Fatal error: the caller misused the engine (stale handle, out-of-range
/// index). Not recoverable.
pub const ERR_FATAL: i32 = 0;
/// Non-fatal error: printed and dropped, the frame continues.
pub const ERR_DROP: i32 = 1;

static RD_BUFFER: Mutex<Option<String>> = Mutex::new(None);
static DEVELOPER: AtomicBool = AtomicBool::new(false);

/// Begin redirecting print output into a buffer (console dumps, tests).
pub fn con_begin_redirect() {
    let mut buf = RD_BUFFER.lock();
    *buf = Some(String::new());
}

/// End redirect and return the captured output.
pub fn con_end_redirect() -> Option<String> {
    let mut buf = RD_BUFFER.lock();
    buf.take()
}

/// Enable or disable developer-only prints.
pub fn con_set_developer(on: bool) {
    DEVELOPER.store(on, Ordering::Relaxed);
}

/// General-purpose print. Goes to stdout, or to the redirect buffer if
/// one is active.
pub fn con_print(msg: &str) {
    {
        let mut buf = RD_BUFFER.lock();
        if let Some(ref mut s) = *buf {
            s.push_str(msg);
            return;
        }
    }
    print!("{}", msg);
}

/// Developer-only print.
pub fn con_dev_print(msg: &str) {
    if !DEVELOPER.load(Ordering::Relaxed) {
        return;
    }
    con_print(msg);
}

/// Engine error handler.
/// - `ERR_FATAL`: prints to stderr and panics.
/// - `ERR_DROP`: prints the error, the caller recovers.
pub fn con_error(code: i32, msg: &str) {
    if code == ERR_FATAL {
        eprintln!("Error: {}", msg);
        panic!("Fatal error: {}", msg);
    }
    eprintln!("ERROR: {}", msg);
}
