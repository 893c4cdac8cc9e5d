use std::cell::RefCell;
use std::rc::Rc;

use crate::event_loop::EventLoop;

pub(crate) type HookCallback = Box<dyn FnMut(&mut EventLoop)>;

/// Handle to a prepare hook, returned by [`EventLoop::add_prepare`].
///
/// [`EventLoop::add_prepare`]: crate::EventLoop::add_prepare
#[derive(Debug)]
pub struct Prepare {
    pub(crate) id: u64,
}

/// Handle to a check hook, returned by [`EventLoop::add_check`].
///
/// [`EventLoop::add_check`]: crate::EventLoop::add_check
#[derive(Debug)]
pub struct Check {
    pub(crate) id: u64,
}

/// Hooks of one kind, kept in registration order.
pub(crate) struct HookList {
    entries: Vec<(u64, Rc<RefCell<HookCallback>>)>,
    capacity: usize,
}

impl HookList {
    pub(crate) fn with_capacity(capacity: usize) -> HookList {
        HookList {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Appends a hook. Returns `false` when the list is at capacity.
    pub(crate) fn add(&mut self, id: u64, callback: HookCallback) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push((id, Rc::new(RefCell::new(callback))));
        true
    }

    /// Removes a hook by id, compacting the list leftwards. Unknown ids
    /// are ignored.
    pub(crate) fn remove(&mut self, id: u64) {
        if let Some(position) = self.entries.iter().position(|(entry_id, _)| *entry_id == id) {
            self.entries.remove(position);
        }
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Clones the current entries so the caller can iterate while hook
    /// callbacks mutate the list.
    pub(crate) fn snapshot(&self) -> Vec<(u64, Rc<RefCell<HookCallback>>)> {
        self.entries.clone()
    }
}
