use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use libc::c_int;

/// Exclusive upper bound on signal numbers accepted by
/// [`EventLoop::add_signal`].
///
/// [`EventLoop::add_signal`]: crate::EventLoop::add_signal
pub const NSIG: i32 = 64;

// Process-wide signal dispatch slot: the id of the event loop that owns
// it (0 = unowned) and the self-pipe write end the OS handler forwards
// signal numbers to. Signal delivery cannot carry a user cookie, so this
// is the one piece of state shared across threads; it is only ever
// updated with compare-and-swap from the owning loop's thread.
static SIGNAL_OWNER: AtomicUsize = AtomicUsize::new(0);
static SIGNAL_SENDER: AtomicI32 = AtomicI32::new(-1);

// The installed OS handler. Restricted to what is async-signal-safe: one
// atomic load and a single one-byte write(2).
extern "C" fn signal_handler(signo: c_int) {
    let fd = SIGNAL_SENDER.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = signo as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Claims the process-wide slot for the loop `id`, routing raw signal
/// bytes to `sender`. Returns `false` if another loop holds the slot.
pub(crate) fn claim(id: usize, sender: RawFd) -> bool {
    match SIGNAL_OWNER.compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            SIGNAL_SENDER.store(sender, Ordering::Release);
            true
        }
        Err(owner) => owner == id,
    }
}

pub(crate) fn current_owner() -> usize {
    SIGNAL_OWNER.load(Ordering::Acquire)
}

/// Releases the slot if `id` holds it. The sender fd is cleared first so
/// a late handler invocation never writes into a reused descriptor.
pub(crate) fn release(id: usize) {
    if SIGNAL_OWNER.load(Ordering::Acquire) == id {
        SIGNAL_SENDER.store(-1, Ordering::Release);
        let _ = SIGNAL_OWNER.compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Installs the shared handler for `signo`.
pub(crate) fn install(signo: i32) -> io::Result<()> {
    let handler = signal_handler as extern "C" fn(c_int) as libc::sighandler_t;
    if unsafe { libc::signal(signo, handler) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Restores the OS default disposition for `signo`.
pub(crate) fn restore_default(signo: i32) {
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
    }
}
