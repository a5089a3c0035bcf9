// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::codec::{decode_name, encode_name, need, WireDecode, WireEncode, WireSize, NAME_WIDTH};
use crate::error::{Result, WireError};

/// Width of the VDEV descriptor's human-readable name fields.
pub const HUMAN_WIDTH: usize = 256;

/// The transport distance between a client and the VDEV it's talking to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VdevKind {
    /// Memory-local to the process — fastest path, no copies.
    Local = 0,
    /// System-local, reached through a UNIX domain socket / shared memory.
    Uds = 1,
    /// Only reachable through GrapeVine — slowest, explicit copies.
    Gv = 2,
}

impl VdevKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => VdevKind::Local,
            1 => VdevKind::Uds,
            2 => VdevKind::Gv,
            other => return Err(WireError::UnknownVdevKind(other)),
        })
    }
}

/// Host id reserved for the locally running KOS, before it has consulted
/// GrapeVine for a real MAC-derived id (or when running with no GrapeVine
/// daemon at all).
pub const LOCAL_HOST_ID: u64 = 0;

/// A discoverable VDEV: what spec it implements, which host and VDEV id
/// uniquely identify it, and how far away it is.
#[derive(Debug, Clone, PartialEq)]
pub struct VdevDescriptor {
    pub host_id: u64,
    pub vdev_id: u64,
    pub spec: String,
    pub version: u32,
    pub human: String,
    pub vdriver_human: String,
    pub kind: VdevKind,
    pub preference: u32,
}

impl WireSize for VdevDescriptor {
    fn size_of(&self) -> usize {
        8 + 8 + NAME_WIDTH + 4 + HUMAN_WIDTH + HUMAN_WIDTH + 1 + 4
    }
}

impl WireEncode for VdevDescriptor {
    fn write(&self, buf: &mut [u8]) -> Result<usize> {
        need(buf, self.size_of())?;

        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&self.host_id.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.vdev_id.to_le_bytes());
        off += 8;

        encode_name(&self.spec, &mut buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        buf[off..off + 4].copy_from_slice(&self.version.to_le_bytes());
        off += 4;

        encode_name(&self.human, &mut buf[off..off + HUMAN_WIDTH])?;
        off += HUMAN_WIDTH;

        encode_name(&self.vdriver_human, &mut buf[off..off + HUMAN_WIDTH])?;
        off += HUMAN_WIDTH;

        buf[off] = self.kind.as_u8();
        off += 1;

        buf[off..off + 4].copy_from_slice(&self.preference.to_le_bytes());
        off += 4;

        Ok(off)
    }
}

impl WireDecode for VdevDescriptor {
    fn read(buf: &[u8]) -> Result<(Self, usize)> {
        need(buf, 8 + 8 + NAME_WIDTH + 4 + HUMAN_WIDTH + HUMAN_WIDTH + 1 + 4)?;

        let mut off = 0;
        let host_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let vdev_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;

        let spec = decode_name(&buf[off..off + NAME_WIDTH])?;
        off += NAME_WIDTH;

        let version = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;

        let human = decode_name(&buf[off..off + HUMAN_WIDTH])?;
        off += HUMAN_WIDTH;

        let vdriver_human = decode_name(&buf[off..off + HUMAN_WIDTH])?;
        off += HUMAN_WIDTH;

        let kind = VdevKind::from_u8(buf[off])?;
        off += 1;

        let preference = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;

        Ok((
            VdevDescriptor {
                host_id,
                vdev_id,
                spec,
                version,
                human,
                vdriver_human,
                kind,
                preference,
            },
            off,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let d = VdevDescriptor {
            host_id: 0x11ad,
            vdev_id: (3u64 << 32) | 7,
            spec: "aquabsd.black.wgpu".to_string(),
            version: 1,
            human: "Default .wgpu device".to_string(),
            vdriver_human: "aquaBSD Black WGPU driver".to_string(),
            kind: VdevKind::Gv,
            preference: 10,
        };

        let buf = d.to_vec();
        assert_eq!(buf.len(), d.size_of());
        let (back, consumed) = VdevDescriptor::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, d);
    }
}
