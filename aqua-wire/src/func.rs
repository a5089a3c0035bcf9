// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::codec::{decode_name, encode_name, need, WireDecode, WireEncode, WireSize, NAME_WIDTH};
use crate::error::Result;
use crate::param::Parameter;
use crate::types::Type;

/// A function a VDEV exposes: a name, a return type, and a list of typed
/// parameters. Clients match functions by the `(name, ret_type, params)`
/// tuple and snapshot the assigned function id on connect — they never
/// compile-time bind to ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret_type: Type,
    pub params: Vec<Parameter>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_type: Type, params: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            ret_type,
            params,
        }
    }

    /// Whether this function matches the given name and call signature.
    pub fn matches(&self, name: &str, ret_type: Type, params: &[Type]) -> bool {
        self.name == name
            && self.ret_type == ret_type
            && self.params.len() == params.len()
            && self.params.iter().zip(params).all(|(p, t)| p.ty == *t)
    }
}

impl WireSize for Function {
    fn size_of(&self) -> usize {
        NAME_WIDTH + 1 + 4 + self.params.iter().map(|p| p.size_of()).sum::<usize>()
    }
}

impl WireEncode for Function {
    fn write(&self, buf: &mut [u8]) -> Result<usize> {
        need(buf, self.size_of())?;

        let mut off = 0;
        encode_name(&self.name, &mut buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        buf[off] = self.ret_type.as_u8();
        off += 1;

        buf[off..off + 4].copy_from_slice(&(self.params.len() as u32).to_le_bytes());
        off += 4;

        for p in &self.params {
            off += p.write(&mut buf[off..])?;
        }

        Ok(off)
    }
}

impl WireDecode for Function {
    fn read(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, NAME_WIDTH + 1 + 4)?;

        let mut off = 0;
        let name = decode_name(&buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        let ret_type = Type::from_u8(buf[off])?;
        off += 1;

        let param_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;

        let mut params = Vec::with_capacity(param_count as usize);

        for _ in 0..param_count {
            let (p, consumed) = Parameter::read(&buf[off..])?;
            off += consumed;
            params.push(p);
        }

        Ok((
            Function {
                name,
                ret_type,
                params,
            },
            off,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_draw_function() {
        // The §8 scenario 6 fixture.
        let f = Function::new(
            "draw",
            Type::Void,
            vec![
                Parameter::new(Type::Ptr, "tex"),
                Parameter::new(Type::Buf, "cmds"),
                Parameter::new(Type::U32, "count"),
            ],
        );

        let buf = f.to_vec();
        assert_eq!(buf.len(), f.size_of());

        let (back, consumed) = Function::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back.name, f.name);
        assert_eq!(back.ret_type, f.ret_type);
        assert_eq!(back.params, f.params);
    }

    #[test]
    fn round_trips_niladic_function() {
        let f = Function::new("ping", Type::Bool, vec![]);
        let buf = f.to_vec();
        let (back, consumed) = Function::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, f);
    }

    #[test]
    fn matches_checks_full_signature() {
        let f = Function::new("add", Type::U64, vec![
            Parameter::new(Type::U64, "a"),
            Parameter::new(Type::U64, "b"),
        ]);

        assert!(f.matches("add", Type::U64, &[Type::U64, Type::U64]));
        assert!(!f.matches("add", Type::U32, &[Type::U64, Type::U64]));
        assert!(!f.matches("add", Type::U64, &[Type::U64]));
        assert!(!f.matches("sub", Type::U64, &[Type::U64, Type::U64]));
    }
}
