// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use aqua_wire::{Constant, Function};
use std::net::TcpStream;

pub type ConnId = u64;
pub type VdevId = u64;
pub type HostId = u64;

/// How a connection reaches its VDEV.
#[derive(Debug)]
pub enum ConnKind {
    /// A VDRIVER loaded in this process.
    Local { vdev_id: VdevId },
    /// A VDEV on another host, reached through a dedicated TCP socket to
    /// its gvd. One socket per connection — GrapeVine doesn't multiplex
    /// several VDEV connections over one stream.
    Gv { stream: TcpStream, remote_conn_id: ConnId },
}

/// A live (or once-live) VDEV connection. `fns`/`consts` are fixed at
/// connect time and never change afterwards, matching the invariant that
/// a connection's function table is immutable once reported.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub alive: bool,
    pub kind: ConnKind,
    pub consts: Vec<Constant>,
    pub fns: Vec<Function>,
}

impl Connection {
    pub fn fn_count(&self) -> usize {
        self.fns.len()
    }
}
