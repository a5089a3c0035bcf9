// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The single-threaded cooperative KOS runtime: handshake, VDEV discovery,
//! connect/call over either a loaded VDRIVER or a GrapeVine peer, and the
//! bounded action queue that `flush` drains.

mod action;
mod conn;
mod error;
mod interrupt;
mod kos;
mod notif;
mod pending;

pub use action::{Action, ActionQueue, ACTION_QUEUE_CAPACITY};
pub use conn::{ConnId, ConnKind, Connection, HostId, VdevId};
pub use error::{CallError, ConnError, HelloError, KOS_API_VERSION};
pub use interrupt::{ComponentId, InterruptTable, Ino, UserData};
pub use kos::{Kos, KosDescriptor};
pub use notif::{Cookie, Notification};
pub use pending::PendingConnTable;
