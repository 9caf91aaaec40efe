//! The "current time window" context.
//!
//! A [`WindowTracker`] holds at most one window: the one the caller currently
//! cares about. Variable handles compare it against their clip cache on every
//! read. The tracker is an explicit object shared through `Rc`; each thread
//! also has a default instance ([`WindowTracker::current_thread`]) for callers
//! that do not thread one through.
//!
//! Request discipline is expressed with guards:
//!
//! - [`WindowTracker::begin_request`] opens a top-level request. It clears the
//!   tracker on entry, so nothing from a previous, unrelated request leaks in,
//!   and clears it again on drop.
//! - [`WindowTracker::begin_nested`] opens a nested request (for example a
//!   derived variable loading its sources). On drop it puts back whatever
//!   window was current when it was opened.
//! - [`RequestScope::reassert`] lets the outer request check, right before it
//!   reads clipped data, that nested work did not leave a different window in
//!   the tracker. A mismatch is a stale window leak: it is logged and healed,
//!   never fatal.

use std::cell::Cell;
use std::rc::Rc;

use log::{debug, warn};

use crate::time::TimeWindow;

thread_local! {
    static CURRENT_TRACKER: Rc<WindowTracker> = Rc::new(WindowTracker::new());
}

/// Single-slot holder of the current window.
#[derive(Debug, Default)]
pub struct WindowTracker {
    current: Cell<Option<TimeWindow>>,
    leaks_healed: Cell<u64>,
}

impl WindowTracker {
    /// A tracker with no current window.
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's default tracker.
    pub fn current_thread() -> Rc<WindowTracker> {
        CURRENT_TRACKER.with(Rc::clone)
    }

    /// Make `window` current.
    pub fn set_window(&self, window: TimeWindow) {
        self.current.set(Some(window));
    }

    /// The current window, if any.
    pub fn get_window(&self) -> Option<TimeWindow> {
        self.current.get()
    }

    /// Forget the current window; clipped reads then return full views.
    pub fn clear(&self) {
        self.current.set(None);
    }

    /// Number of stale window leaks healed by [`RequestScope::reassert`].
    pub fn leaks_healed(&self) -> u64 {
        self.leaks_healed.get()
    }

    /// Open a top-level request: clear now, clear again when dropped.
    pub fn begin_request(&self) -> RequestScope<'_> {
        if let Some(stale) = self.get_window() {
            debug!("clearing window {stale} left by a previous request");
        }
        self.clear();
        RequestScope {
            tracker: self,
            window: None,
            on_exit: Exit::Clear,
        }
    }

    /// Open a nested request that restores the enclosing window when dropped.
    pub fn begin_nested(&self) -> RequestScope<'_> {
        let outer = self.get_window();
        RequestScope {
            tracker: self,
            window: outer,
            on_exit: Exit::Restore(outer),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Exit {
    Clear,
    Restore(Option<TimeWindow>),
}

/// Guard for one request against a [`WindowTracker`].
#[derive(Debug)]
pub struct RequestScope<'a> {
    tracker: &'a WindowTracker,
    window: Option<TimeWindow>,
    on_exit: Exit,
}

impl RequestScope<'_> {
    /// Record this request's window and make it current.
    pub fn set_window(&mut self, window: TimeWindow) {
        self.window = Some(window);
        self.tracker.set_window(window);
    }

    /// The window this request asked for.
    pub fn window(&self) -> Option<TimeWindow> {
        self.window
    }

    /// The tracker this scope guards.
    pub fn tracker(&self) -> &WindowTracker {
        self.tracker
    }

    /// Put this request's window back if something else replaced it.
    ///
    /// Returns `true` when a stale window leak was detected and healed.
    pub fn reassert(&self) -> bool {
        let found = self.tracker.get_window();
        if found == self.window {
            return false;
        }
        warn!(
            "stale window leak: expected {}, tracker holds {}; re-asserting",
            describe(self.window),
            describe(found)
        );
        self.tracker.current.set(self.window);
        self.tracker.leaks_healed.set(self.tracker.leaks_healed.get() + 1);
        true
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        match self.on_exit {
            Exit::Clear => self.tracker.clear(),
            Exit::Restore(outer) => self.tracker.current.set(outer),
        }
    }
}

fn describe(window: Option<TimeWindow>) -> String {
    window.map_or_else(|| "no window".to_string(), |w| w.to_string())
}
