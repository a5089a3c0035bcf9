// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use aqua_wire::{Constant, Function, Value, VdevDescriptor};
use std::rc::Rc;

/// What a VDRIVER reports back to its loader (and, through it, to the KOS
/// notification demultiplexer). Unlike the call surface that requests
/// things of a VDEV, notifications are never answered with a `Result` —
/// a VDRIVER that hits trouble reports `ConnFail`, it doesn't propagate
/// an error past its own boundary.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A VDEV became available. Sent any number of times during `probe`.
    Attach { vdev: VdevDescriptor },
    /// A previously attached VDEV went away.
    Detach { host_id: u64, vdev_id: u64 },
    /// A `conn` request could not be satisfied.
    ConnFail,
    /// A `conn` request succeeded; here are the VDEV's constants and
    /// function table.
    Conn { conn_id: u64, consts: Vec<Constant>, fns: Vec<Function> },
    /// A `call` request returned a value.
    CallRet { value: Value },
    /// A `call` request could not be completed.
    CallFail,
}

/// The callback a VDRIVER uses to report a [`Notification`], tagged with
/// the cookie of the request it answers (or `0` for unsolicited `Attach`/
/// `Detach` notifications raised during `probe`).
///
/// `Rc`, not `Arc`: a VDRIVER runs on the KOS's single cooperative thread
/// and is never handed to another one.
pub type NotifCb = Rc<dyn Fn(u64, Notification)>;

/// The primitive a VDRIVER uses to write to memory that may live on
/// another host. Takes the host id and address of a KOS pointer and the
/// bytes to write; returns whether the write succeeded.
pub type WritePtrCb = Rc<dyn Fn(u64, u64, &[u8]) -> bool>;
