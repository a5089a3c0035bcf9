// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::error::WireError;

/// A single-byte type tag, the type of every `Value`, `Parameter` and
/// `Constant` that crosses the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    Void = 0,
    Bool = 1,
    U8 = 2,
    U16 = 3,
    U32 = 4,
    U64 = 5,
    I8 = 6,
    I16 = 7,
    I32 = 8,
    I64 = 9,
    F32 = 10,
    F64 = 11,
    Buf = 12,
    OpaquePtr = 13,
    Ptr = 14,
}

impl Type {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Result<Self, WireError> {
        Ok(match b {
            0 => Type::Void,
            1 => Type::Bool,
            2 => Type::U8,
            3 => Type::U16,
            4 => Type::U32,
            5 => Type::U64,
            6 => Type::I8,
            7 => Type::I16,
            8 => Type::I32,
            9 => Type::I64,
            10 => Type::F32,
            11 => Type::F64,
            12 => Type::Buf,
            13 => Type::OpaquePtr,
            14 => Type::Ptr,
            other => return Err(WireError::UnknownType(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_tag() {
        for b in 0..=14u8 {
            let t = Type::from_u8(b).unwrap();
            assert_eq!(t.as_u8(), b);
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(matches!(Type::from_u8(15), Err(WireError::UnknownType(15))));
    }
}
