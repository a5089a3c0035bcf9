// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::codec::{need, WireDecode, WireEncode, WireSize, MAX_BUF_SIZE};
use crate::error::{Result, WireError};
use crate::types::Type;

/// A tagged value, carrying the scalar its `Type` says it should, a
/// length-prefixed byte buffer (`Buf`), or a host-tagged pointer
/// (`OpaquePtr`/`Ptr`).
///
/// Values that point carry the host that owns the pointed-to memory, so a
/// value handed across a GrapeVine connection never becomes ambiguous
/// about which host's address space it refers to. `OpaquePtr` must never
/// be dereferenced by anyone but the VDRIVER that minted it; `Ptr` may be
/// dereferenced only through a host-routed write primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Buf(Vec<u8>),
    OpaquePtr { host_id: u64, ptr: u64 },
    Ptr { host_id: u64, ptr: u64 },
}

impl Value {
    pub fn type_tag(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Bool(_) => Type::Bool,
            Value::U8(_) => Type::U8,
            Value::U16(_) => Type::U16,
            Value::U32(_) => Type::U32,
            Value::U64(_) => Type::U64,
            Value::I8(_) => Type::I8,
            Value::I16(_) => Type::I16,
            Value::I32(_) => Type::I32,
            Value::I64(_) => Type::I64,
            Value::F32(_) => Type::F32,
            Value::F64(_) => Type::F64,
            Value::Buf(_) => Type::Buf,
            Value::OpaquePtr { .. } => Type::OpaquePtr,
            Value::Ptr { .. } => Type::Ptr,
        }
    }

    pub fn size_for(t: Type, v: &Value) -> usize {
        match t {
            Type::Void => 0,
            Type::Bool | Type::U8 | Type::I8 => 1,
            Type::U16 | Type::I16 => 2,
            Type::U32 | Type::I32 | Type::F32 => 4,
            Type::U64 | Type::I64 | Type::F64 => 8,
            Type::Buf => match v {
                Value::Buf(b) => 4 + b.len(),
                _ => 4,
            },
            Type::OpaquePtr | Type::Ptr => 16,
        }
    }

    /// Write this value's payload (no leading type tag) into `buf`.
    pub fn write_typed(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Value::Void => Ok(0),
            Value::Bool(b) => {
                need(buf, 1)?;
                buf[0] = *b as u8;
                Ok(1)
            }
            Value::U8(v) => {
                need(buf, 1)?;
                buf[0] = *v;
                Ok(1)
            }
            Value::I8(v) => {
                need(buf, 1)?;
                buf[0] = *v as u8;
                Ok(1)
            }
            Value::U16(v) => write_le(buf, &v.to_le_bytes()),
            Value::I16(v) => write_le(buf, &v.to_le_bytes()),
            Value::U32(v) => write_le(buf, &v.to_le_bytes()),
            Value::I32(v) => write_le(buf, &v.to_le_bytes()),
            Value::F32(v) => write_le(buf, &v.to_le_bytes()),
            Value::U64(v) => write_le(buf, &v.to_le_bytes()),
            Value::I64(v) => write_le(buf, &v.to_le_bytes()),
            Value::F64(v) => write_le(buf, &v.to_le_bytes()),
            Value::Buf(bytes) => {
                if bytes.len() as u64 > MAX_BUF_SIZE as u64 {
                    return Err(WireError::BufTooLarge {
                        max: MAX_BUF_SIZE,
                        actual: bytes.len(),
                    });
                }

                need(buf, 4 + bytes.len())?;
                buf[..4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf[4..4 + bytes.len()].copy_from_slice(bytes);
                Ok(4 + bytes.len())
            }
            Value::OpaquePtr { host_id, ptr } | Value::Ptr { host_id, ptr } => {
                need(buf, 16)?;
                buf[..8].copy_from_slice(&host_id.to_le_bytes());
                buf[8..16].copy_from_slice(&ptr.to_le_bytes());
                Ok(16)
            }
        }
    }

    /// Read a value of the given declared type out of `buf`.
    pub fn read_typed(t: Type, buf: &[u8]) -> Result<(Value, usize)> {
        Ok(match t {
            Type::Void => (Value::Void, 0),
            Type::Bool => {
                need(buf, 1)?;
                (Value::Bool(buf[0] != 0), 1)
            }
            Type::U8 => {
                need(buf, 1)?;
                (Value::U8(buf[0]), 1)
            }
            Type::I8 => {
                need(buf, 1)?;
                (Value::I8(buf[0] as i8), 1)
            }
            Type::U16 => {
                let b = read_le::<2>(buf)?;
                (Value::U16(u16::from_le_bytes(b)), 2)
            }
            Type::I16 => {
                let b = read_le::<2>(buf)?;
                (Value::I16(i16::from_le_bytes(b)), 2)
            }
            Type::U32 => {
                let b = read_le::<4>(buf)?;
                (Value::U32(u32::from_le_bytes(b)), 4)
            }
            Type::I32 => {
                let b = read_le::<4>(buf)?;
                (Value::I32(i32::from_le_bytes(b)), 4)
            }
            Type::F32 => {
                let b = read_le::<4>(buf)?;
                (Value::F32(f32::from_le_bytes(b)), 4)
            }
            Type::U64 => {
                let b = read_le::<8>(buf)?;
                (Value::U64(u64::from_le_bytes(b)), 8)
            }
            Type::I64 => {
                let b = read_le::<8>(buf)?;
                (Value::I64(i64::from_le_bytes(b)), 8)
            }
            Type::F64 => {
                let b = read_le::<8>(buf)?;
                (Value::F64(f64::from_le_bytes(b)), 8)
            }
            Type::Buf => {
                need(buf, 4)?;
                let len = u32::from_le_bytes(buf[..4].try_into().unwrap());

                if len > MAX_BUF_SIZE {
                    return Err(WireError::BufTooLarge {
                        max: MAX_BUF_SIZE,
                        actual: len as usize,
                    });
                }

                need(buf, 4 + len as usize)?;
                let payload = buf[4..4 + len as usize].to_vec();
                (Value::Buf(payload), 4 + len as usize)
            }
            Type::OpaquePtr | Type::Ptr => {
                need(buf, 16)?;
                let host_id = u64::from_le_bytes(buf[..8].try_into().unwrap());
                let ptr = u64::from_le_bytes(buf[8..16].try_into().unwrap());

                let v = if t == Type::OpaquePtr {
                    Value::OpaquePtr { host_id, ptr }
                } else {
                    Value::Ptr { host_id, ptr }
                };

                (v, 16)
            }
        })
    }
}

fn write_le(buf: &mut [u8], bytes: &[u8]) -> Result<usize> {
    need(buf, bytes.len())?;
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn read_le<const N: usize>(buf: &[u8]) -> Result<[u8; N]> {
    need(buf, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    Ok(out)
}

impl WireSize for Value {
    fn size_of(&self) -> usize {
        Value::size_for(self.type_tag(), self)
    }
}

impl WireEncode for Value {
    fn write(&self, buf: &mut [u8]) -> Result<usize> {
        self.write_typed(buf)
    }
}

impl WireDecode for Value {
    fn read(_buf: &[u8]) -> Result<(Self, usize)> {
        // A bare `Value` is untyped on the wire — values are always
        // embedded alongside the `Type` that governs their layout (as a
        // `Parameter`'s type, or the declared return type of a `Function`).
        // Use `Value::read_typed` with that type instead.
        unimplemented!("Value has no self-describing wire form; use Value::read_typed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let t = v.type_tag();
        let size = v.size_of();
        let buf = v.to_vec();
        assert_eq!(buf.len(), size, "len(serialize(v)) == size_of(v)");

        let (back, consumed) = Value::read_typed(t, &buf).unwrap();
        assert_eq!(consumed, size);
        assert_eq!(back, v, "deserialize(serialize(v)) == v");
    }

    #[test]
    fn round_trips_every_scalar() {
        round_trip(Value::Void);
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::U8(200));
        round_trip(Value::I8(-5));
        round_trip(Value::U16(40000));
        round_trip(Value::I16(-12345));
        round_trip(Value::U32(0xdead_beef));
        round_trip(Value::I32(-1));
        round_trip(Value::F32(3.5));
        round_trip(Value::U64(u64::MAX));
        round_trip(Value::I64(i64::MIN));
        round_trip(Value::F64(2.0_f64.sqrt()));
    }

    #[test]
    fn round_trips_buf() {
        round_trip(Value::Buf(vec![]));
        round_trip(Value::Buf(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn round_trips_pointers() {
        round_trip(Value::OpaquePtr {
            host_id: 0x11ad,
            ptr: 0xcafe,
        });
        round_trip(Value::Ptr {
            host_id: 0,
            ptr: 0x1000,
        });
    }

    #[test]
    fn truncated_buf_errors() {
        let buf = [5u8, 0, 0, 0, 1, 2];
        let err = Value::read_typed(Type::Buf, &buf).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn oversized_buf_len_rejected() {
        let buf = (MAX_BUF_SIZE + 1).to_le_bytes();
        let err = Value::read_typed(Type::Buf, &buf).unwrap_err();
        assert!(matches!(err, WireError::BufTooLarge { .. }));
    }
}
