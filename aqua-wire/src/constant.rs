// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::codec::{decode_name, encode_name, need, WireDecode, WireEncode, WireSize, NAME_WIDTH};
use crate::error::Result;
use crate::types::Type;
use crate::value::Value;

/// A named constant a VDEV exposes alongside its function table, e.g.
/// a capability flag or a format enum value.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub value: Value,
}

impl Constant {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl WireSize for Constant {
    fn size_of(&self) -> usize {
        1 + NAME_WIDTH + self.value.size_of()
    }
}

impl WireEncode for Constant {
    fn write(&self, buf: &mut [u8]) -> Result<usize> {
        need(buf, 1 + NAME_WIDTH)?;

        let mut off = 0;
        buf[off] = self.value.type_tag().as_u8();
        off += 1;

        encode_name(&self.name, &mut buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        off += self.value.write_typed(&mut buf[off..])?;
        Ok(off)
    }
}

impl WireDecode for Constant {
    fn read(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, 1 + NAME_WIDTH)?;

        let mut off = 0;
        let ty = Type::from_u8(buf[off])?;
        off += 1;

        let name = decode_name(&buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        let (value, consumed) = Value::read_typed(ty, &buf[off..])?;
        off += consumed;

        Ok((Constant { name, value }, off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let c = Constant::new("max_textures", Value::U32(16));
        let buf = c.to_vec();
        assert_eq!(buf.len(), c.size_of());
        let (back, consumed) = Constant::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, c);
    }

    #[test]
    fn round_trips_buf_valued_constant() {
        let c = Constant::new("magic", Value::Buf(vec![0xde, 0xad, 0xbe, 0xef]));
        let buf = c.to_vec();
        let (back, consumed) = Constant::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, c);
    }
}
