// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The node table: what GrapeVine knows about every host it has heard
//! an ELP from, and the on-disk file the KOS reads it back out of.

use aqua_wire::{VdevDescriptor, WireDecode, WireEncode, WireSize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Instant;

use crate::proto::ProtoError;

/// One node's host information and the VDEVs it currently exposes.
///
/// Mirrors `gv_node_ent_t`: a fixed header (host id, address) followed by
/// a variable-length VDEV array. The on-disk file is a back-to-back
/// sequence of these.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub host_id: u64,
    pub addr: IpAddr,
    pub vdevs: Vec<VdevDescriptor>,
}

impl WireSize for NodeEntry {
    fn size_of(&self) -> usize {
        8 + 16 + 2 + self.vdevs.iter().map(|v| v.size_of()).sum::<usize>()
    }
}

impl WireEncode for NodeEntry {
    fn write(&self, buf: &mut [u8]) -> aqua_wire::Result<usize> {
        if buf.len() < 26 {
            return Err(aqua_wire::WireError::Truncated {
                need: 26,
                have: buf.len(),
            });
        }

        let mut off = 0;
        buf[off..off + 8].copy_from_slice(&self.host_id.to_le_bytes());
        off += 8;

        buf[off..off + 16].copy_from_slice(&addr_to_bytes(self.addr));
        off += 16;

        buf[off..off + 2].copy_from_slice(&(self.vdevs.len() as u16).to_le_bytes());
        off += 2;

        for v in &self.vdevs {
            off += v.write(&mut buf[off..])?;
        }

        Ok(off)
    }
}

impl WireDecode for NodeEntry {
    fn read(buf: &[u8]) -> aqua_wire::Result<(Self, usize)> {
        if buf.len() < 26 {
            return Err(aqua_wire::WireError::Truncated {
                need: 26,
                have: buf.len(),
            });
        }

        let host_id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let addr = addr_from_bytes(buf[8..24].try_into().unwrap());
        let vdev_count = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        let mut off = 26;

        let mut vdevs = Vec::with_capacity(vdev_count as usize);
        for _ in 0..vdev_count {
            let (v, consumed) = VdevDescriptor::read(&buf[off..])?;
            off += consumed;
            vdevs.push(v);
        }

        Ok((NodeEntry { host_id, addr, vdevs }, off))
    }
}

/// We store every address as a 16-byte IPv6 (v4-mapped when the node is
/// reached over IPv4), rather than replicating the original's untagged
/// `v4`/`v6` union — the wire form doesn't carry a discriminant otherwise.
fn addr_to_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn addr_from_bytes(bytes: [u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// A node we've heard an ELP from, with the local bookkeeping needed to
/// decide when it's gone stale and should be dropped from the table.
#[derive(Debug)]
pub struct TrackedNode {
    pub entry: NodeEntry,
    pub unique: u64,
    pub last_seen: Instant,
}

/// Read back a GrapeVine nodes file: a sequence of [`NodeEntry`] records
/// with no outer length prefix, each self-delimiting via its VDEV count.
pub fn read_nodes_file(path: &Path) -> Result<Vec<NodeEntry>, ProtoError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ProtoError::Io(e)),
    };

    let mut nodes = Vec::new();
    let mut off = 0;
    while off < bytes.len() {
        let (entry, consumed) = NodeEntry::read(&bytes[off..])?;
        off += consumed;
        nodes.push(entry);
    }

    Ok(nodes)
}

/// Rewrite the nodes file from scratch via a temp file plus atomic
/// rename, so a reader never observes a half-written file. The original
/// C just `fopen("w")`s the path directly; this closes that window
/// deliberately.
pub fn write_nodes_file_atomic(path: &Path, nodes: &[NodeEntry]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");

    let mut buf = Vec::new();
    for n in nodes {
        let mut entry_buf = vec![0u8; n.size_of()];
        n.write(&mut entry_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        buf.extend_from_slice(&entry_buf);
    }

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }

    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_wire::VdevKind;

    fn sample_entry() -> NodeEntry {
        NodeEntry {
            host_id: 0x11ad,
            addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42)),
            vdevs: vec![VdevDescriptor {
                host_id: 0x11ad,
                vdev_id: (1u64 << 32) | 3,
                spec: "aquabsd.black.add".to_string(),
                version: 1,
                human: "add VDEV".to_string(),
                vdriver_human: "add VDRIVER".to_string(),
                kind: VdevKind::Gv,
                preference: 0,
            }],
        }
    }

    #[test]
    fn node_entry_round_trips() {
        let n = sample_entry();
        let buf = n.to_vec();
        let (back, consumed) = NodeEntry::read(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(back, n);
    }

    #[test]
    fn ipv4_addresses_round_trip_through_the_v6_mapped_encoding() {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let bytes = addr_to_bytes(addr);
        assert_eq!(addr_from_bytes(bytes), addr);
    }

    #[test]
    fn nodes_file_round_trips_through_atomic_write() {
        let dir = std::env::temp_dir().join(format!("aqua-gvd-test-{:x}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gv.nodes");

        let nodes = vec![sample_entry(), sample_entry()];
        write_nodes_file_atomic(&path, &nodes).unwrap();

        let back = read_nodes_file(&path).unwrap();
        assert_eq!(back, nodes);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_nodes_file_reads_as_empty() {
        let path = Path::new("/tmp/aqua-gvd-test-definitely-missing.nodes");
        assert_eq!(read_nodes_file(path).unwrap(), Vec::new());
    }
}
