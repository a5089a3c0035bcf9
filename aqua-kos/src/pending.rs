// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The pending-connection table: a client library's bookkeeping for
//! matching a later `Conn`/`ConnFail` notification back to whatever it
//! needed to remember about the call site that issued `connect`. Per
//! spec this lives at the client-library layer, not the KOS core — it's
//! a separate small module a client opts into, not baked into [`crate::Kos`].

use std::collections::HashMap;

pub type Cookie = u64;

/// One slot per outstanding `connect`, keyed by the cookie `Kos::connect`
/// returned. A slot is freed as soon as its notification is consumed;
/// freed cookies are never reused by the KOS, so stale lookups simply miss.
#[derive(Debug)]
pub struct PendingConnTable<T> {
    slots: HashMap<Cookie, T>,
}

impl<T> PendingConnTable<T> {
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    pub fn register(&mut self, cookie: Cookie, value: T) {
        self.slots.insert(cookie, value);
    }

    pub fn take(&mut self, cookie: Cookie) -> Option<T> {
        self.slots.remove(&cookie)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Default for PendingConnTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_slot_is_consumed_exactly_once() {
        let mut t: PendingConnTable<&str> = PendingConnTable::new();
        t.register(1, "window spec request");
        assert_eq!(t.take(1), Some("window spec request"));
        assert_eq!(t.take(1), None);
    }

    #[test]
    fn unregistered_cookies_miss() {
        let t: PendingConnTable<()> = PendingConnTable::new();
        assert!(t.slots.is_empty());
    }
}
