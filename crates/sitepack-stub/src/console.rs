//! Operator interaction and process-level hooks.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the interrupt handler; checked between extracted entries.
pub static CANCEL: AtomicBool = AtomicBool::new(false);

/// Ask a yes/no question on stderr. An empty answer means `default`.
pub fn confirm(question: &str, default: bool) -> bool {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    eprint!("{} {} ", question, hint);
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    match std::io::stdin().lock().read_line(&mut input) {
        Ok(0) | Err(_) => false,
        Ok(_) => parse_answer(&input, default),
    }
}

fn parse_answer(input: &str, default: bool) -> bool {
    match input.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

/// Block until the operator presses Enter.
pub fn wait_for_enter() {
    eprint!("Press Enter to exit...");
    let _ = std::io::stderr().flush();
    let mut input = String::new();
    let _ = std::io::stdin().lock().read_line(&mut input);
}

/// Whether the process runs with administrative rights.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    true
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    CANCEL.store(true, Ordering::SeqCst);
}

/// Route Ctrl-C to [`CANCEL`] instead of killing the process mid-write.
#[cfg(unix)]
pub fn install_interrupt_handler() {
    let handler: extern "C" fn(libc::c_int) = on_interrupt;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        tracing::warn!("failed to install interrupt handler");
    }
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() {}

/// Whether an interrupt was received.
pub fn cancelled() -> bool {
    CANCEL.load(Ordering::SeqCst)
}
