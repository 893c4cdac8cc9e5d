use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use std::{fmt, io, mem};

use log::{error, trace};

use crate::hook::{Check, HookList, Prepare};
use crate::signal::{self, NSIG};
use crate::sys;
use crate::timer::{Timer, TimerEntry, TimerHeap};
use crate::Interest;

/// Maximum number of prepare hooks registered at once.
pub const MAX_PREPARE_HOOKS: usize = 10;

/// Maximum number of check hooks registered at once.
pub const MAX_CHECK_HOOKS: usize = 10;

// Longest single readiness wait: 30 minutes.
const MAX_WAIT_MS: i64 = 1_800_000;

// Initial length of the fd-indexed io table; doubled as needed to cover
// any registered fd.
const INITIAL_IO_SLOTS: usize = 32;

// Bytes drained from the signal pipe per read(2).
const SIGNAL_BUF_LEN: usize = 512;

// Written to the self-pipe by `shutdown` to cut a pending readiness wait
// short. Outside the signal range, so the drain discards it.
const WAKE_BYTE: u8 = u8::MAX;

/// Unique id per event loop, used to claim process-wide signal dispatch.
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

type IoCallback = Box<dyn FnMut(&mut EventLoop, RawFd, Interest)>;
type SignalCallback = Box<dyn FnMut(&mut EventLoop, i32)>;

struct IoEntry {
    interests: Interest,
    callback: Rc<RefCell<IoCallback>>,
}

#[derive(Copy, Clone)]
enum HookKind {
    Prepare,
    Check,
}

/// A single-threaded event loop.
///
/// An `EventLoop` owns everything registered with it: I/O interest, the
/// timer heap, signal entries and hooks. Dropping the loop cancels all of
/// them, closes the descriptors the loop opened and, if this loop owns
/// process-wide signal dispatch, restores the default disposition of
/// every signal it installed.
///
/// One iteration of [`run`] processes events in a fixed order: expired
/// timers (earliest deadline first), prepare hooks (registration order),
/// a readiness wait bounded by the next timer deadline, I/O callbacks
/// (one per ready descriptor, in unspecified order among distinct
/// descriptors), then check hooks. Signal callbacks are delivered during
/// the I/O phase, in the order the signals arrived.
///
/// Only the readiness wait blocks; every callback runs synchronously and
/// must not block the loop.
///
/// [`run`]: EventLoop::run
pub struct EventLoop {
    id: usize,
    running: bool,
    // Guards against re-entering `run` from inside a callback.
    ticking: bool,
    origin: Instant,
    current_time: i64,
    selector: sys::Selector,
    events: sys::Events,
    // Per-iteration coalesced (fd, readiness) pairs, reused across
    // ticks.
    ready: Vec<(RawFd, Interest)>,
    io: Vec<Option<IoEntry>>,
    timers: TimerHeap,
    signals: Vec<Option<Rc<RefCell<SignalCallback>>>>,
    prepares: HookList,
    checks: HookList,
    next_hook_id: u64,
    // Self-pipe (read end, write end): the OS signal handler writes one
    // byte per signal to the write end; the read end is registered like
    // any other descriptor.
    signal_pipe: (OwnedFd, OwnedFd),
}

impl EventLoop {
    /// Creates a new event loop.
    ///
    /// This opens the platform's readiness facility and the signal
    /// self-pipe; the loop is not running until [`run`] is called.
    ///
    /// [`run`]: EventLoop::run
    pub fn new() -> io::Result<EventLoop> {
        let selector = sys::Selector::new()?;
        let signal_pipe = sys::socket_pair()?;
        let mut io = Vec::new();
        io.resize_with(INITIAL_IO_SLOTS, || None);

        let mut ev = EventLoop {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            running: true,
            ticking: false,
            origin: Instant::now(),
            current_time: 0,
            selector,
            events: sys::Events::with_capacity(1024),
            ready: Vec::new(),
            io,
            timers: TimerHeap::new(),
            signals: vec![None; NSIG as usize],
            prepares: HookList::with_capacity(MAX_PREPARE_HOOKS),
            checks: HookList::with_capacity(MAX_CHECK_HOOKS),
            next_hook_id: 1,
            signal_pipe,
        };
        ev.current_time = ev.now_ms();

        let pipe_fd = ev.signal_pipe.0.as_raw_fd();
        ev.register(pipe_fd, Interest::READABLE, move |ev, fd, _| {
            ev.drain_signal_pipe(fd)
        })?;
        Ok(ev)
    }

    /// Registers interest in readiness of `fd`.
    ///
    /// When any of the `interests` become ready, `callback` is invoked
    /// with the descriptor and the ready mask. Registering a descriptor
    /// that already has interest adds the new bits to the existing mask
    /// and replaces the callback: one callback per descriptor serves
    /// both directions.
    ///
    /// The descriptor should be non-blocking. On the edge-triggered
    /// backends the callback must drain the descriptor until the
    /// operation fails with [`WouldBlock`], and the ready mask may
    /// report readable for error or hang-up conditions even if only
    /// writable interest was registered, so that the error can be
    /// observed through an ordinary read.
    ///
    /// [`WouldBlock`]: io::ErrorKind::WouldBlock
    pub fn register<F>(&mut self, fd: RawFd, interests: Interest, callback: F) -> io::Result<()>
    where
        F: FnMut(&mut EventLoop, RawFd, Interest) + 'static,
    {
        if fd < 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        trace!("registering fd {} with {:?}", fd, interests);
        self.grow_io_table(fd as usize);

        let slot = fd as usize;
        let result = match &self.io[slot] {
            Some(entry) => {
                let combined = entry.interests.add(interests);
                self.selector.reregister(fd, combined).map(|()| combined)
            }
            None => self.selector.register(fd, interests).map(|()| interests),
        };
        let combined = result.map_err(|err| {
            error!("failed to register fd {}: {}", fd, err);
            err
        })?;

        self.io[slot] = Some(IoEntry {
            interests: combined,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        Ok(())
    }

    /// Removes `interests` from the registration of `fd`.
    ///
    /// When no interest remains the descriptor is removed entirely and
    /// its callback dropped. Removing interest the loop never had is a
    /// no-op. A descriptor deregistered from inside a callback is not
    /// dispatched later in the same iteration.
    pub fn deregister(&mut self, fd: RawFd, interests: Interest) -> io::Result<()> {
        if fd < 0 || fd as usize >= self.io.len() {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        trace!("deregistering fd {} from {:?}", fd, interests);

        let slot = fd as usize;
        let current = match &self.io[slot] {
            Some(entry) => entry.interests,
            None => return Ok(()),
        };
        match current.remove(interests) {
            Some(remaining) => {
                self.selector.reregister(fd, remaining).map_err(|err| {
                    error!("failed to deregister fd {}: {}", fd, err);
                    err
                })?;
                if let Some(entry) = self.io[slot].as_mut() {
                    entry.interests = remaining;
                }
            }
            None => {
                self.selector.deregister(fd).map_err(|err| {
                    error!("failed to deregister fd {}: {}", fd, err);
                    err
                })?;
                self.io[slot] = None;
            }
        }
        Ok(())
    }

    /// Schedules a recurring timer.
    ///
    /// `callback` is invoked every `interval`, starting one interval
    /// from the current iteration's time snapshot, until the timer is
    /// cancelled with [`del_timer`]. The interval must be at least one
    /// millisecond.
    ///
    /// [`del_timer`]: EventLoop::del_timer
    pub fn add_timer<F>(&mut self, interval: Duration, callback: F) -> io::Result<Timer>
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        let interval_ms = i64::try_from(interval.as_millis())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        if interval_ms <= 0 {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let entry = Rc::new(TimerEntry::new(
            self.current_time + interval_ms,
            interval_ms,
            Box::new(callback),
        ));
        self.timers.push(Rc::clone(&entry));
        Ok(Timer { entry })
    }

    /// Cancels a timer.
    ///
    /// Safe to call from any callback, including the timer's own.
    /// Cancelling a timer that was already cancelled fails with
    /// [`InvalidInput`] and leaves the schedule untouched.
    ///
    /// [`InvalidInput`]: io::ErrorKind::InvalidInput
    pub fn del_timer(&mut self, timer: &Timer) -> io::Result<()> {
        if self.timers.erase(&timer.entry) {
            Ok(())
        } else {
            Err(io::ErrorKind::InvalidInput.into())
        }
    }

    /// Registers a callback for an OS signal.
    ///
    /// Signal dispatch is process-wide: the first loop to register a
    /// signal claims it for the whole process, and registrations from
    /// any other loop fail until the owner is dropped. The callback runs
    /// on the loop thread during the I/O phase, never in signal context.
    ///
    /// `signo` must be in `[0, NSIG)`.
    pub fn add_signal<F>(&mut self, signo: i32, callback: F) -> io::Result<()>
    where
        F: FnMut(&mut EventLoop, i32) + 'static,
    {
        if !(0..NSIG).contains(&signo) {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let sender = self.signal_pipe.1.as_raw_fd();
        if !signal::claim(self.id, sender) {
            error!(
                "signal {} must be registered through the event loop that owns signal dispatch",
                signo
            );
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "signal dispatch is owned by another event loop",
            ));
        }
        signal::install(signo)?;
        self.signals[signo as usize] = Some(Rc::new(RefCell::new(Box::new(callback))));
        Ok(())
    }

    /// Removes the callback for `signo` and restores the OS default
    /// disposition.
    ///
    /// Fails if this loop does not own process-wide signal dispatch.
    pub fn del_signal(&mut self, signo: i32) -> io::Result<()> {
        if !(0..NSIG).contains(&signo) {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let owner = signal::current_owner();
        if owner == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no event loop owns signal dispatch",
            ));
        }
        if owner != self.id {
            error!(
                "signal {} must be removed through the event loop that owns signal dispatch",
                signo
            );
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "signal dispatch is owned by another event loop",
            ));
        }
        signal::restore_default(signo);
        self.signals[signo as usize] = None;
        Ok(())
    }

    /// Registers a prepare hook, run after timer processing and before
    /// every readiness wait, in registration order.
    ///
    /// At most [`MAX_PREPARE_HOOKS`] may be registered at once.
    pub fn add_prepare<F>(&mut self, callback: F) -> io::Result<Prepare>
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        let id = self.alloc_hook_id();
        if self.prepares.add(id, Box::new(callback)) {
            Ok(Prepare { id })
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "prepare hook capacity reached",
            ))
        }
    }

    /// Removes a prepare hook. Consumes the handle; removing a hook that
    /// is already gone is a no-op.
    pub fn del_prepare(&mut self, hook: Prepare) {
        self.prepares.remove(hook.id);
    }

    /// Registers a check hook, run after the I/O phase of every
    /// iteration, in registration order.
    ///
    /// At most [`MAX_CHECK_HOOKS`] may be registered at once.
    pub fn add_check<F>(&mut self, callback: F) -> io::Result<Check>
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        let id = self.alloc_hook_id();
        if self.checks.add(id, Box::new(callback)) {
            Ok(Check { id })
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "check hook capacity reached",
            ))
        }
    }

    /// Removes a check hook. Consumes the handle; removing a hook that
    /// is already gone is a no-op.
    pub fn del_check(&mut self, hook: Check) {
        self.checks.remove(hook.id);
    }

    /// Runs the loop until [`shutdown`] is called.
    ///
    /// Returns early with an error if the readiness wait fails
    /// persistently, or if called from inside a callback. A shut-down
    /// loop is terminal: calling `run` again returns immediately.
    ///
    /// [`shutdown`]: EventLoop::shutdown
    pub fn run(&mut self) -> io::Result<()> {
        if self.ticking {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "event loop is already running",
            ));
        }
        while self.running {
            self.tick()?;
        }
        Ok(())
    }

    /// Drives exactly one iteration of the loop.
    ///
    /// Blocks in the readiness wait like [`run`] does, bounded by the
    /// next timer deadline.
    ///
    /// [`run`]: EventLoop::run
    pub fn run_once(&mut self) -> io::Result<()> {
        if self.ticking {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "event loop is already running",
            ));
        }
        self.tick()
    }

    /// Tells the loop to exit after the current iteration completes.
    ///
    /// The running flag is observed at the top of each iteration; an
    /// in-flight callback always finishes first. A marker byte on the
    /// self-pipe cuts the iteration's readiness wait short, so exit is
    /// prompt even when `shutdown` is called before the wait begins.
    pub fn shutdown(&mut self) {
        self.running = false;
        let sender = self.signal_pipe.1.as_raw_fd();
        // Best effort: with the pipe full a wakeup is already pending.
        let _ = syscall!(write(
            sender,
            &WAKE_BYTE as *const u8 as *const libc::c_void,
            1
        ));
    }

    /// The time snapshot of the current iteration, in milliseconds since
    /// the loop was created.
    pub fn current_time_ms(&self) -> i64 {
        self.current_time
    }

    fn tick(&mut self) -> io::Result<()> {
        self.ticking = true;
        let result = self.tick_inner();
        self.ticking = false;
        result
    }

    fn tick_inner(&mut self) -> io::Result<()> {
        trace!("event loop tick");
        self.current_time = self.now_ms();

        let wait_ms = self.process_timers();
        self.run_hooks(HookKind::Prepare);

        let timeout = Duration::from_millis(wait_ms as u64);
        match self.selector.select(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // An interrupted wait is not an error; carry on with zero
            // events so hooks still run.
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                error!("readiness wait failed: {}", err);
                return Err(err);
            }
        }

        self.dispatch_io();
        self.run_hooks(HookKind::Check);
        Ok(())
    }

    /// Fires every timer expired at the current snapshot and returns the
    /// next wait in milliseconds, in `(0, MAX_WAIT_MS]`.
    fn process_timers(&mut self) -> i64 {
        let now = self.current_time;
        loop {
            match self.timers.top() {
                Some(timer) if timer.deadline() <= now => {}
                _ => break,
            }
            let timer = match self.timers.pop() {
                Some(timer) => timer,
                None => break,
            };
            // Reschedule before invoking: the callback may cancel this
            // timer by handle and must observe a consistent heap.
            timer.reschedule();
            self.timers.push(Rc::clone(&timer));
            (*timer.callback.borrow_mut())(self);
        }

        let mut wait_ms = match self.timers.top() {
            Some(timer) => timer.deadline() - now,
            None => 0,
        };
        if wait_ms <= 0 || wait_ms > MAX_WAIT_MS {
            wait_ms = MAX_WAIT_MS;
        }
        wait_ms
    }

    fn run_hooks(&mut self, kind: HookKind) {
        let snapshot = match kind {
            HookKind::Prepare => self.prepares.snapshot(),
            HookKind::Check => self.checks.snapshot(),
        };
        for (id, callback) in snapshot {
            // A hook callback may remove any hook, including one later
            // in this snapshot.
            let registered = match kind {
                HookKind::Prepare => self.prepares.contains(id),
                HookKind::Check => self.checks.contains(id),
            };
            if registered {
                (*callback.borrow_mut())(self);
            }
        }
    }

    fn dispatch_io(&mut self) {
        let mut ready = mem::take(&mut self.ready);
        ready.clear();

        // The same fd may be reported once per filter or set; fold
        // duplicates so each descriptor gets a single callback per
        // iteration with the union of its ready conditions.
        for event in self.events.iter() {
            let fd = sys::event::fd(event);
            let mut mask: Option<Interest> = None;
            if sys::event::is_readable(event) {
                mask = Some(Interest::READABLE);
            }
            if sys::event::is_writable(event) {
                mask = Some(match mask {
                    Some(mask) => mask.add(Interest::WRITABLE),
                    None => Interest::WRITABLE,
                });
            }
            let mask = match mask {
                Some(mask) => mask,
                None => continue,
            };
            match ready.iter_mut().find(|(ready_fd, _)| *ready_fd == fd) {
                Some((_, existing)) => *existing = existing.add(mask),
                None => ready.push((fd, mask)),
            }
        }

        for &(fd, mask) in ready.iter() {
            // The io table, not the kernel report, is authoritative: an
            // earlier callback in this batch may have removed or
            // replaced this entry.
            let callback = match self.io.get(fd as usize).and_then(|entry| entry.as_ref()) {
                Some(entry) => Rc::clone(&entry.callback),
                None => continue,
            };
            (*callback.borrow_mut())(self, fd, mask);
        }

        ready.clear();
        self.ready = ready;
    }

    /// Callback on the self-pipe read end: drains pending signal bytes
    /// and dispatches the registered signal callbacks in arrival order.
    fn drain_signal_pipe(&mut self, fd: RawFd) {
        let mut buf = [0u8; SIGNAL_BUF_LEN];
        loop {
            match syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())) {
                Ok(0) => {
                    error!("signal pipe closed unexpectedly");
                    panic!("signal pipe closed unexpectedly");
                }
                Ok(n) => {
                    for &byte in &buf[..n as usize] {
                        let signo = i32::from(byte);
                        if signo >= NSIG {
                            continue;
                        }
                        // Re-check per byte: a callback may remove
                        // entries mid-drain.
                        let callback = match &self.signals[signo as usize] {
                            Some(callback) => Rc::clone(callback),
                            None => continue,
                        };
                        (*callback.borrow_mut())(self, signo);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("signal pipe read failed: {}", err);
                    panic!("signal pipe read failed: {}", err);
                }
            }
        }
    }

    fn grow_io_table(&mut self, fd: usize) {
        let mut len = self.io.len();
        while len <= fd {
            len *= 2;
        }
        self.io.resize_with(len, || None);
    }

    fn alloc_hook_id(&mut self) -> u64 {
        let id = self.next_hook_id;
        self.next_hook_id += 1;
        id
    }

    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if signal::current_owner() == self.id {
            for signo in 0..NSIG {
                if self.signals[signo as usize].is_some() {
                    signal::restore_default(signo);
                }
            }
            signal::release(self.id);
        }
        // The selector and self-pipe descriptors close with their
        // OwnedFds; registered entries die with their tables.
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EventLoop")
            .field("id", &self.id)
            .field("running", &self.running)
            .field("current_time_ms", &self.current_time)
            .field("timers", &self.timers.len())
            .finish()
    }
}
