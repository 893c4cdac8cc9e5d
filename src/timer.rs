use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::event_loop::EventLoop;

pub(crate) type TimerCallback = Box<dyn FnMut(&mut EventLoop)>;

/// Index of an entry that is not currently stored in the heap.
pub(crate) const NOT_IN_HEAP: usize = usize::MAX;

/// A scheduled recurring timer.
///
/// Every entry carries its own position in the heap so that it can be
/// erased in O(log n) without a scan, which matters because user code
/// may cancel a timer from inside another callback.
pub(crate) struct TimerEntry {
    deadline: Cell<i64>,
    interval: i64,
    index: Cell<usize>,
    pub(crate) callback: RefCell<TimerCallback>,
}

impl TimerEntry {
    pub(crate) fn new(deadline: i64, interval: i64, callback: TimerCallback) -> TimerEntry {
        TimerEntry {
            deadline: Cell::new(deadline),
            interval,
            index: Cell::new(NOT_IN_HEAP),
            callback: RefCell::new(callback),
        }
    }

    pub(crate) fn deadline(&self) -> i64 {
        self.deadline.get()
    }

    /// Advances the deadline by one interval.
    pub(crate) fn reschedule(&self) {
        self.deadline.set(self.deadline.get() + self.interval);
    }
}

/// Handle to a recurring timer, returned by [`EventLoop::add_timer`].
///
/// The timer keeps firing until it is cancelled with
/// [`EventLoop::del_timer`] or the loop is dropped.
///
/// [`EventLoop::add_timer`]: crate::EventLoop::add_timer
/// [`EventLoop::del_timer`]: crate::EventLoop::del_timer
pub struct Timer {
    pub(crate) entry: Rc<TimerEntry>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Timer")
            .field("deadline_ms", &self.entry.deadline.get())
            .field("interval_ms", &self.entry.interval)
            .finish()
    }
}

/// Binary min-heap of timers ordered by next expiry time.
pub(crate) struct TimerHeap {
    entries: Vec<Rc<TimerEntry>>,
}

impl TimerHeap {
    pub(crate) fn new() -> TimerHeap {
        TimerHeap {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The entry with the earliest deadline, if any.
    pub(crate) fn top(&self) -> Option<&Rc<TimerEntry>> {
        self.entries.first()
    }

    pub(crate) fn push(&mut self, entry: Rc<TimerEntry>) {
        entry.index.set(self.entries.len());
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    pub(crate) fn pop(&mut self) -> Option<Rc<TimerEntry>> {
        if self.entries.is_empty() {
            return None;
        }
        let top = self.entries.swap_remove(0);
        top.index.set(NOT_IN_HEAP);
        if !self.entries.is_empty() {
            self.entries[0].index.set(0);
            self.sift_down(0);
        }
        Some(top)
    }

    /// Removes an entry by its stored index. Returns `false` if the
    /// entry is not in the heap (already popped or already erased).
    pub(crate) fn erase(&mut self, entry: &TimerEntry) -> bool {
        let index = entry.index.get();
        if index == NOT_IN_HEAP {
            return false;
        }
        debug_assert!(std::ptr::eq(self.entries[index].as_ref(), entry));
        entry.index.set(NOT_IN_HEAP);
        let last = self.entries.len() - 1;
        self.entries.swap(index, last);
        self.entries.pop();
        if index < self.entries.len() {
            self.entries[index].index.set(index);
            // The replacement came from the bottom; it may violate the
            // heap property in either direction.
            if index > 0
                && self.entries[(index - 1) / 2].deadline() > self.entries[index].deadline()
            {
                self.sift_up(index);
            } else {
                self.sift_down(index);
            }
        }
        true
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[parent].deadline() <= self.entries[index].deadline() {
                break;
            }
            self.entries.swap(parent, index);
            self.entries[parent].index.set(parent);
            self.entries[index].index.set(index);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            if left >= self.entries.len() {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < self.entries.len()
                && self.entries[right].deadline() < self.entries[left].deadline()
            {
                child = right;
            }
            if self.entries[index].deadline() <= self.entries[child].deadline() {
                break;
            }
            self.entries.swap(index, child);
            self.entries[index].index.set(index);
            self.entries[child].index.set(child);
            index = child;
        }
    }
}
