// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Wire codec for AQUA's typed values, function tables and VDEV descriptors.
//!
//! Every struct in this crate implements [`WireSize`], [`WireEncode`] and
//! (except bare [`Value`], which is untyped on the wire) [`WireDecode`].
//! Encoding is total and little-endian; decoding never panics on malformed
//! input, it returns a [`WireError`] instead. This is the layer GrapeVine's
//! `proto` module and the local VDEV connect/call paths both build on, so a
//! function signature negotiated locally and one negotiated over a TCP
//! connection to another host serialize identically.

mod codec;
mod constant;
mod error;
mod func;
mod param;
mod types;
mod value;
mod vdev;

pub use codec::{decode_name, encode_name, WireDecode, WireEncode, WireSize, MAX_BUF_SIZE, NAME_WIDTH};
pub use constant::Constant;
pub use error::{Result, WireError};
pub use func::Function;
pub use param::Parameter;
pub use types::Type;
pub use value::Value;
pub use vdev::{VdevDescriptor, VdevKind, HUMAN_WIDTH, LOCAL_HOST_ID};
