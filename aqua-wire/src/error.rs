// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use thiserror::Error;

/// Errors raised by the wire codec.
///
/// These are the "malformed packet" half of the protocol-violation error
/// category: callers that hit one of these should close the connection and
/// emit no notification, per the error handling design.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("name \"{0}\" does not fit in {1} bytes")]
    NameTooLong(String, usize),

    #[error("name is not valid ASCII")]
    NameNotAscii,

    #[error("unknown type tag {0}")]
    UnknownType(u8),

    #[error("unknown VDEV kind {0}")]
    UnknownVdevKind(u8),

    #[error("buf value exceeds maximum size {max}: {actual}")]
    BufTooLarge { max: u32, actual: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
