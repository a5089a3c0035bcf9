// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The GrapeVine wire protocol: packet kinds and their payloads.
//!
//! Every packet on the wire is framed as a one-byte kind tag followed by
//! a four-byte little-endian body length and the body itself, so a
//! reader never needs to know a payload's internal shape to skip past
//! it. Payload fields are encoded with `aqua-wire`'s codec traits, the
//! same traits the local VDEV connect/call paths use, so a function
//! table negotiated over GrapeVine round-trips identically to one
//! negotiated in-process.
//!
//! `ConnVdevRes`, `KosCall` and `KosCallRet` each also carry their own
//! `size` field, ahead of the trailing variable-length data, matching
//! the original protocol's packed structs. It's redundant with the
//! outer frame length here since every trailing field is self-counting,
//! but kept on the wire rather than dropped, so a packet decoded in
//! isolation (outside this frame) still carries the information the
//! protocol promises it has.

use aqua_wire::{Constant, Function, Type, Value, VdevDescriptor, WireDecode, WireEncode, WireError, WireSize};
use std::io::{self, Read, Write};
use thiserror::Error;

fn need(buf: &[u8], n: usize) -> aqua_wire::Result<()> {
    if buf.len() < n {
        Err(WireError::Truncated {
            need: n,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// TCP port GrapeVine connections are accepted on.
pub const GV_PORT: u16 = 0xA55;
/// UDP port ELPs are broadcast on. Same numeric value as [`GV_PORT`]; kept
/// as a separate name because the two protocols are conceptually distinct.
pub const GV_ELP_PORT: u16 = GV_PORT;

/// Current ELP packet version.
pub const ELP_VERS: u8 = 0;
/// Ceiling we keep ELP packets under, to stay comfortably inside one UDP
/// datagram without fragmentation.
pub const UDP_BUDGET: usize = 300;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("unknown GrapeVine packet type {0}")]
    UnknownPacketType(u8),
    #[error("wire codec error: {0}")]
    Wire(#[from] aqua_wire::WireError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProtoError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Elp = 0,
    Query = 1,
    QueryRes = 2,
    ConnVdev = 3,
    ConnVdevFail = 4,
    ConnVdevRes = 5,
    KosCall = 6,
    KosCallFail = 7,
    KosCallRet = 8,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => PacketType::Elp,
            1 => PacketType::Query,
            2 => PacketType::QueryRes,
            3 => PacketType::ConnVdev,
            4 => PacketType::ConnVdevFail,
            5 => PacketType::ConnVdevRes,
            6 => PacketType::KosCall,
            7 => PacketType::KosCallFail,
            8 => PacketType::KosCallRet,
            other => return Err(ProtoError::UnknownPacketType(other)),
        })
    }
}

/// Read a `[kind: u8][len: u32 LE][body; len]` frame off a blocking reader.
pub fn read_frame<R: Read>(r: &mut R) -> Result<(PacketType, Vec<u8>)> {
    let mut kind_buf = [0u8; 1];
    r.read_exact(&mut kind_buf)?;
    let kind = PacketType::from_u8(kind_buf[0])?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;

    Ok((kind, body))
}

/// Write a `[kind: u8][len: u32 LE][body; len]` frame to a blocking writer.
pub fn write_frame<W: Write>(w: &mut W, kind: PacketType, body: &[u8]) -> Result<()> {
    w.write_all(&[kind.as_u8()])?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(body)?;
    Ok(())
}

/// Echolocation packet: periodically broadcast by every node to advertise
/// its presence, and to signal (via a changed `unique` value) that its
/// VDEV set changed and peers should re-`QUERY` it.
///
/// `unique` only ever occupies the low 56 bits on the wire, matching the
/// original's packed `uint64_t unique : 56` bitfield; values above that
/// range are truncated on encode.
#[derive(Debug, Clone, PartialEq)]
pub struct Elp {
    pub vers: u8,
    pub unique: u64,
    pub host_id: u64,
    pub name: String,
}

const ELP_NAME_WIDTH: usize = 64;
const ELP_UNIQUE_WIDTH: usize = 7;
const ELP_UNIQUE_MASK: u64 = (1u64 << 56) - 1;

impl WireSize for Elp {
    fn size_of(&self) -> usize {
        1 + ELP_UNIQUE_WIDTH + 8 + ELP_NAME_WIDTH
    }
}

impl WireEncode for Elp {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, self.size_of())?;
        let mut off = 0;
        buf[off] = self.vers;
        off += 1;
        buf[off..off + ELP_UNIQUE_WIDTH].copy_from_slice(&(self.unique & ELP_UNIQUE_MASK).to_le_bytes()[..ELP_UNIQUE_WIDTH]);
        off += ELP_UNIQUE_WIDTH;
        buf[off..off + 8].copy_from_slice(&self.host_id.to_le_bytes());
        off += 8;
        aqua_wire::encode_name(&self.name, &mut buf[off..off + ELP_NAME_WIDTH])?;
        off += ELP_NAME_WIDTH;
        Ok(off)
    }
}

impl WireDecode for Elp {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 1 + ELP_UNIQUE_WIDTH + 8 + ELP_NAME_WIDTH)?;
        let mut off = 0;
        let vers = buf[off];
        off += 1;
        let mut unique_bytes = [0u8; 8];
        unique_bytes[..ELP_UNIQUE_WIDTH].copy_from_slice(&buf[off..off + ELP_UNIQUE_WIDTH]);
        let unique = u64::from_le_bytes(unique_bytes);
        off += ELP_UNIQUE_WIDTH;
        let host_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let name = aqua_wire::decode_name(&buf[off..off + ELP_NAME_WIDTH])?;
        off += ELP_NAME_WIDTH;
        Ok((Elp { vers, unique, host_id, name }, off))
    }
}

/// Response to a `QUERY`: every VDEV the responding node currently
/// supports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryRes {
    pub vdevs: Vec<VdevDescriptor>,
}

impl WireSize for QueryRes {
    fn size_of(&self) -> usize {
        4 + self.vdevs.iter().map(|v| v.size_of()).sum::<usize>()
    }
}

impl WireEncode for QueryRes {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, 4)?;
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&(self.vdevs.len() as u32).to_le_bytes());
        off += 4;
        for v in &self.vdevs {
            off += v.write(&mut buf[off..])?;
        }
        Ok(off)
    }
}

impl WireDecode for QueryRes {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 4)?;
        let mut off = 4;
        let count = u32::from_le_bytes(buf[..4].try_into().unwrap());
        let mut vdevs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (v, consumed) = VdevDescriptor::read(&buf[off..])?;
            off += consumed;
            vdevs.push(v);
        }
        Ok((QueryRes { vdevs }, off))
    }
}

/// Request to connect to a VDEV on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnVdev {
    pub vdev_id: u64,
}

impl WireSize for ConnVdev {
    fn size_of(&self) -> usize {
        8
    }
}

impl WireEncode for ConnVdev {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, 8)?;
        buf[..8].copy_from_slice(&self.vdev_id.to_le_bytes());
        Ok(8)
    }
}

impl WireDecode for ConnVdev {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 8)?;
        let vdev_id = u64::from_le_bytes(buf[..8].try_into().unwrap());
        Ok((ConnVdev { vdev_id }, 8))
    }
}

/// Sent back once a connection to a VDEV is established, advertising its
/// constants and functions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnVdevRes {
    pub conn_id: u64,
    pub consts: Vec<Constant>,
    pub fns: Vec<Function>,
}

impl WireSize for ConnVdevRes {
    fn size_of(&self) -> usize {
        8 + 4
            + 4
            + 4
            + self.consts.iter().map(|c| c.size_of()).sum::<usize>()
            + self.fns.iter().map(|f| f.size_of()).sum::<usize>()
    }
}

impl WireEncode for ConnVdevRes {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, 20)?;
        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&self.conn_id.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&(self.size_of() as u32).to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&(self.consts.len() as u32).to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&(self.fns.len() as u32).to_le_bytes());
        off += 4;
        for c in &self.consts {
            off += c.write(&mut buf[off..])?;
        }
        for f in &self.fns {
            off += f.write(&mut buf[off..])?;
        }
        Ok(off)
    }
}

impl WireDecode for ConnVdevRes {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 20)?;
        let conn_id = u64::from_le_bytes(buf[..8].try_into().unwrap());
        // `size` (buf[8..12]) is the encoder's declared total packet size;
        // kept on the wire for parity with the original's struct layout,
        // not consulted here since every field after it is self-counting.
        let const_count = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let fn_count = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let mut off = 20;

        let mut consts = Vec::with_capacity(const_count as usize);
        for _ in 0..const_count {
            let (c, consumed) = Constant::read(&buf[off..])?;
            off += consumed;
            consts.push(c);
        }

        let mut fns = Vec::with_capacity(fn_count as usize);
        for _ in 0..fn_count {
            let (f, consumed) = Function::read(&buf[off..])?;
            off += consumed;
            fns.push(f);
        }

        Ok((ConnVdevRes { conn_id, consts, fns }, off))
    }
}

/// A call to a function on an established connection. Arguments are
/// self-describing (each is a type tag followed by its payload) so the
/// agent can decode them without consulting the function table again.
#[derive(Debug, Clone, PartialEq)]
pub struct KosCall {
    pub conn_id: u64,
    pub fn_id: u32,
    pub args: Vec<Value>,
}

impl WireSize for KosCall {
    fn size_of(&self) -> usize {
        8 + 4 + 4 + 4 + self.args.iter().map(|a| 1 + a.size_of()).sum::<usize>()
    }
}

impl WireEncode for KosCall {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, 20)?;
        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&self.conn_id.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&(self.size_of() as u32).to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.fn_id.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&(self.args.len() as u32).to_le_bytes());
        off += 4;
        for a in &self.args {
            buf[off] = a.type_tag().as_u8();
            off += 1;
            off += a.write_typed(&mut buf[off..])?;
        }
        Ok(off)
    }
}

impl WireDecode for KosCall {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 20)?;
        let conn_id = u64::from_le_bytes(buf[..8].try_into().unwrap());
        // `size` (buf[8..12]) mirrors the original's struct-size field;
        // not consulted, the arg count below is authoritative.
        let fn_id = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let arg_count = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let mut off = 20;

        let mut args = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            need(&buf[off..], 1)?;
            let ty = Type::from_u8(buf[off])?;
            off += 1;
            let (val, consumed) = Value::read_typed(ty, &buf[off..])?;
            off += consumed;
            args.push(val);
        }

        Ok((KosCall { conn_id, fn_id, args }, off))
    }
}

/// Return value of a completed call, also self-describing.
#[derive(Debug, Clone, PartialEq)]
pub struct KosCallRet {
    pub ret: Value,
}

impl WireSize for KosCallRet {
    fn size_of(&self) -> usize {
        4 + 1 + self.ret.size_of()
    }
}

impl WireEncode for KosCallRet {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        need(buf, 5)?;
        let value_size = 1 + self.ret.size_of();
        buf[0..4].copy_from_slice(&(value_size as u32).to_le_bytes());
        buf[4] = self.ret.type_tag().as_u8();
        let consumed = self.ret.write_typed(&mut buf[5..])?;
        Ok(5 + consumed)
    }
}

impl WireDecode for KosCallRet {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        need(buf, 5)?;
        // `size` (buf[0..4]) is the return value's own serialized length,
        // there so a reader can skip a buffer value without decoding it;
        // not consulted here since `Value::read_typed` already knows how
        // much to consume for every type it handles.
        let ty = Type::from_u8(buf[4])?;
        let (ret, consumed) = Value::read_typed(ty, &buf[5..])?;
        Ok((KosCallRet { ret }, 5 + consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elp_round_trips() {
        let e = Elp {
            vers: ELP_VERS,
            unique: 0xdead_beef,
            host_id: 0x11ad,
            name: "workshop-pc".to_string(),
        };
        let buf = e.to_vec();
        assert!(buf.len() < UDP_BUDGET);
        let (back, consumed) = Elp::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, e);
    }

    #[test]
    fn query_res_round_trips_empty_and_populated() {
        let empty = QueryRes::default();
        let buf = empty.to_vec();
        let (back, consumed) = QueryRes::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, empty);

        let populated = QueryRes {
            vdevs: vec![VdevDescriptor {
                host_id: 1,
                vdev_id: 2,
                spec: "aquabsd.black.add".to_string(),
                version: 1,
                human: "test VDEV".to_string(),
                vdriver_human: "test VDRIVER".to_string(),
                kind: aqua_wire::VdevKind::Gv,
                preference: 0,
            }],
        };
        let buf = populated.to_vec();
        let (back, consumed) = QueryRes::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, populated);
    }

    #[test]
    fn kos_call_round_trips_with_mixed_arg_types() {
        let call = KosCall {
            conn_id: 9,
            fn_id: 3,
            args: vec![Value::U64(40), Value::U64(2), Value::Buf(vec![1, 2, 3])],
        };
        let buf = call.to_vec();
        let (back, consumed) = KosCall::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, call);
    }

    #[test]
    fn kos_call_ret_round_trips() {
        let ret = KosCallRet { ret: Value::U64(42) };
        let buf = ret.to_vec();
        let (back, consumed) = KosCallRet::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, ret);
    }

    #[test]
    fn frame_round_trips_over_a_byte_vec() {
        let mut wire = Vec::new();
        let body = ConnVdev { vdev_id: 7 }.to_vec();
        write_frame(&mut wire, PacketType::ConnVdev, &body).unwrap();

        let mut cursor = &wire[..];
        let (kind, read_body) = read_frame(&mut cursor).unwrap();
        assert_eq!(kind, PacketType::ConnVdev);
        let (conn_vdev, _) = ConnVdev::read(&read_body).unwrap();
        assert_eq!(conn_vdev.vdev_id, 7);
    }
}
