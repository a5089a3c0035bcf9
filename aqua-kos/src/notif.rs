// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The client-facing notification union. Distinct from
//! [`aqua_vdriver::Notification`]: that one is what a VDRIVER hands its
//! loader, this one is what the KOS hands its subscriber, after folding
//! in connection bookkeeping the client never sees directly (GrapeVine
//! transport details, the pending-connect cookie table, etc).

use aqua_wire::{Constant, Function, Value, VdevDescriptor};

pub type Cookie = u64;
pub type ConnId = u64;
pub type Ino = u32;

/// Everything the KOS reports to its one subscribed client callback.
/// Every variant but `Interrupt` carries the cookie of the request that
/// caused it (`0` for unsolicited attach/detach raised during `probe` or
/// a `req_vdev` synthesizing a remote match).
#[derive(Debug, Clone)]
pub enum Notification {
    Attach { cookie: Cookie, vdev: VdevDescriptor },
    Detach { cookie: Cookie, host_id: u64, vdev_id: u64 },
    ConnFail { cookie: Cookie },
    Conn {
        cookie: Cookie,
        connection_id: ConnId,
        consts: Vec<Constant>,
        fns: Vec<Function>,
    },
    CallFail { cookie: Cookie, connection_id: ConnId },
    CallRet {
        cookie: Cookie,
        connection_id: ConnId,
        value: Value,
    },
    /// A persistent asynchronous event stream fired. Not currently
    /// raised by any VDRIVER path (see DESIGN.md); the demultiplexer
    /// and registration API are implemented in full regardless, so a
    /// VDRIVER that starts driving interrupts has somewhere to land.
    Interrupt { ino: Ino, payload: Vec<u8> },
}
