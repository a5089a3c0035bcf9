// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The deferred action queue `connect`/`call` push onto and `flush`
//! drains. Bounded, never blocks: a full queue drops the newest entry
//! and logs it, rather than growing or stalling the caller.

use crate::kos::Shared;
use log::warn;
use std::collections::VecDeque;
use std::rc::Rc;

pub const ACTION_QUEUE_CAPACITY: usize = 16;

/// One deferred request: a cookie to tag its eventual notification, a
/// human description for logging (the synchronous analogue of the
/// teacher's `Job::desc`), and the callback that actually performs the
/// work when `flush` reaches it.
pub struct Action {
    pub cookie: u64,
    pub desc: String,
    callback: Box<dyn FnOnce(bool, &Rc<Shared>)>,
}

impl Action {
    pub fn new(cookie: u64, desc: impl Into<String>, callback: impl FnOnce(bool, &Rc<Shared>) + 'static) -> Self {
        Self {
            cookie,
            desc: desc.into(),
            callback: Box::new(callback),
        }
    }

    pub fn run(self, sync: bool, shared: &Rc<Shared>) {
        (self.callback)(sync, shared);
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("cookie", &self.cookie).field("desc", &self.desc).finish()
    }
}

/// A `VecDeque<Action>` bounded at [`ACTION_QUEUE_CAPACITY`]. Head/tail
/// indices are touched only by `push` (client-originated calls) and
/// `pop_front` (`flush`) — never reordered.
#[derive(Default)]
pub struct ActionQueue {
    actions: VecDeque<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self { actions: VecDeque::new() }
    }

    /// Push an action. If the queue is already at capacity, the new
    /// action is dropped and logged rather than admitted — the queue
    /// never blocks and never grows past its bound.
    pub fn push(&mut self, action: Action) {
        if self.actions.len() >= ACTION_QUEUE_CAPACITY {
            warn!(
                "action queue full ({ACTION_QUEUE_CAPACITY} entries), dropping action \"{}\" (cookie {})",
                action.desc, action.cookie
            );
            return;
        }
        self.actions.push_back(action);
    }

    pub fn pop_front(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn push_past_capacity_drops_the_newest_and_keeps_the_queue_bounded() {
        let mut q = ActionQueue::new();
        let ran = Rc::new(RefCell::new(Vec::new()));

        for i in 0..ACTION_QUEUE_CAPACITY + 3 {
            let ran = ran.clone();
            q.push(Action::new(i as u64, format!("action {i}"), move |_, _| {
                ran.borrow_mut().push(i as u64);
            }));
        }

        assert_eq!(q.len(), ACTION_QUEUE_CAPACITY);
    }

    #[test]
    fn pop_front_drains_in_push_order() {
        let mut q = ActionQueue::new();
        q.push(Action::new(1, "a", |_, _| {}));
        q.push(Action::new(2, "b", |_, _| {}));

        assert_eq!(q.pop_front().unwrap().cookie, 1);
        assert_eq!(q.pop_front().unwrap().cookie, 2);
        assert!(q.pop_front().is_none());
    }
}
