// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! GrapeVine's wire protocol and on-disk node table, shared between the
//! `aqua-gvd` daemon and any KOS that talks to it as a client.

pub mod elp;
pub mod global_config;
pub mod ipc;
pub mod node;
pub mod proto;

pub use node::{NodeEntry, TrackedNode};
pub use proto::{PacketType, ProtoError};
