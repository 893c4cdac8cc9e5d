//! A lightweight, single-threaded event loop.
//!
//! `evloop` multiplexes three classes of events over a single
//! readiness-polling syscall:
//!
//! * **I/O readiness** for arbitrary file descriptors, registered with a
//!   read/write [`Interest`] mask ([`EventLoop::register`]).
//! * **Recurring timers** with millisecond resolution
//!   ([`EventLoop::add_timer`]).
//! * **OS signals**, delivered as ordinary in-loop callbacks through a
//!   self-pipe ([`EventLoop::add_signal`]).
//!
//! In addition, *prepare* and *check* hooks run immediately before and
//! after each readiness wait, for cooperative integration with other
//! loops ([`EventLoop::add_prepare`], [`EventLoop::add_check`]).
//!
//! The platform backend is chosen at compile time: epoll on Linux and
//! Android, kqueue on the BSDs and macOS, and `select(2)` everywhere
//! else (or anywhere when built with `--cfg evloop_force_select`).
//!
//! # Callbacks
//!
//! Every callback is a closure that receives `&mut EventLoop` and runs
//! synchronously on the thread driving [`EventLoop::run`]. Callbacks may
//! freely add and remove events, including the very event that is
//! currently being dispatched. A descriptor deleted from inside a
//! callback is not dispatched later in the same iteration, even if the
//! kernel had already reported it ready.
//!
//! On the edge-triggered backends (epoll, kqueue) readiness is reported
//! once per transition: I/O callbacks must drain the descriptor until
//! the operation fails with [`WouldBlock`].
//!
//! [`WouldBlock`]: std::io::ErrorKind::WouldBlock
//!
//! # Threading
//!
//! An [`EventLoop`] is confined to the thread that created it; it is
//! neither `Send` nor `Sync`. Programs that want one loop per thread
//! create one `EventLoop` per thread. Signal dispatch is process-wide:
//! only one loop at a time may own it.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use evloop::EventLoop;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut ev = EventLoop::new()?;
//!
//! let ticks = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&ticks);
//! ev.add_timer(Duration::from_millis(5), move |ev| {
//!     seen.set(seen.get() + 1);
//!     if seen.get() == 3 {
//!         ev.shutdown();
//!     }
//! })?;
//!
//! ev.run()?;
//! assert_eq!(ticks.get(), 3);
//! # Ok(())
//! # }
//! ```
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports,
    dead_code
)]

// Macros used internally, must come first.
#[macro_use]
mod macros;

mod event_loop;
mod hook;
mod interest;
mod signal;
mod sys;
mod timer;

pub use crate::event_loop::{EventLoop, MAX_CHECK_HOOKS, MAX_PREPARE_HOOKS};
pub use crate::hook::{Check, Prepare};
pub use crate::interest::Interest;
pub use crate::signal::NSIG;
pub use crate::timer::Timer;
