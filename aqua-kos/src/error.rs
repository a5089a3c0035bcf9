// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

/// API version this KOS speaks. The original negotiates a single version;
/// there has only ever been one, so `hello` either gets it or gets nothing.
pub const KOS_API_VERSION: u32 = 4;

#[derive(Debug, Error)]
pub enum HelloError {
    #[error("no supported API version in [{min}, {max}]; this KOS only speaks {supported}")]
    NoOverlap { min: u32, max: u32, supported: u32 },
}

/// Reasons a connect attempt fails before or while talking to a VDRIVER
/// or a remote gvd. None of these propagate to the caller of `connect` —
/// they're logged and turned into a `ConnFail` notification, matching the
/// "failure is reported, not returned" convention the VDRIVER contract
/// already uses.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("vdev {vdev_id:#x} is not owned by any loaded VDRIVER")]
    UnknownVdev { vdev_id: u64 },
    #[error("no known GrapeVine node for host {host_id:#x}")]
    UnknownHost { host_id: u64 },
    #[error("GrapeVine transport error: {0}")]
    Transport(#[from] aqua_gvd::proto::ProtoError),
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("connection {conn_id} is not alive")]
    DeadConnection { conn_id: u64 },
    #[error("function id {fn_id} is out of range for connection {conn_id} ({fn_count} functions)")]
    UnknownFunction { conn_id: u64, fn_id: u32, fn_count: usize },
    #[error("GrapeVine transport error: {0}")]
    Transport(#[from] aqua_gvd::proto::ProtoError),
}
