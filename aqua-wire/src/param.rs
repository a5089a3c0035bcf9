// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::codec::{decode_name, encode_name, need, WireDecode, WireEncode, WireSize, NAME_WIDTH};
use crate::error::Result;
use crate::types::Type;

/// A single function parameter: a type and a fixed-width name.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub ty: Type,
    pub name: String,
}

impl Parameter {
    pub fn new(ty: Type, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
        }
    }
}

impl WireSize for Parameter {
    fn size_of(&self) -> usize {
        1 + NAME_WIDTH
    }
}

impl WireEncode for Parameter {
    fn write(&self, buf: &mut [u8]) -> Result<usize> {
        need(buf, self.size_of())?;
        buf[0] = self.ty.as_u8();
        encode_name(&self.name, &mut buf[1..1 + NAME_WIDTH])?;
        Ok(self.size_of())
    }
}

impl WireDecode for Parameter {
    fn read(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, 1 + NAME_WIDTH)?;
        let ty = Type::from_u8(buf[0])?;
        let name = decode_name(&buf[1..1 + NAME_WIDTH])?;
        Ok((Parameter { ty, name }, 1 + NAME_WIDTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let p = Parameter::new(Type::Buf, "cmds");
        let buf = p.to_vec();
        assert_eq!(buf.len(), p.size_of());
        let (back, consumed) = Parameter::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, p);
    }

    #[test]
    fn rejects_overlong_name() {
        let p = Parameter::new(Type::U32, "x".repeat(64));
        assert!(p.to_vec_checked().is_err());
    }

    trait ToVecChecked {
        fn to_vec_checked(&self) -> Result<Vec<u8>>;
    }

    impl ToVecChecked for Parameter {
        fn to_vec_checked(&self) -> Result<Vec<u8>> {
            let mut buf = vec![0u8; self.size_of()];
            self.write(&mut buf)?;
            Ok(buf)
        }
    }
}
