// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Echolocation (ELP): the UDP broadcast loop that discovers peer
//! GrapeVine daemons and keeps the node table (and `gv.nodes` file) in
//! sync with who's still alive.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use aqua_wire::{WireDecode, WireEncode};
use log::{debug, info, warn};

use crate::node::{write_nodes_file_atomic, NodeEntry, TrackedNode};
use crate::proto::{self, Elp, PacketType, ProtoError, QueryRes, GV_PORT};

/// How often we broadcast our own ELP.
pub const ELP_DELAY: Duration = Duration::from_secs(1);
/// How long a node is allowed to go unheard-from before we drop it.
pub const NODE_TTL: Duration = Duration::from_secs(5);

/// The set of nodes we've heard an ELP from, keyed by host id.
pub struct NodeTable {
    nodes: Mutex<HashMap<u64, TrackedNode>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Record an ELP from `entry`'s host. Returns `true` if this is a new
    /// node, or an existing one whose `unique` changed (i.e. its VDEV set
    /// may have changed and the caller should re-query and persist).
    pub fn touch(&self, host_id: u64, unique: u64, refresh: impl FnOnce() -> Option<NodeEntry>) -> bool {
        let mut nodes = self.nodes.lock().unwrap();

        if let Some(existing) = nodes.get_mut(&host_id) {
            existing.last_seen = Instant::now();

            if existing.unique == unique {
                return false;
            }
        }

        let Some(entry) = refresh() else {
            return false;
        };

        nodes.insert(
            host_id,
            TrackedNode {
                entry,
                unique,
                last_seen: Instant::now(),
            },
        );

        true
    }

    /// Drop every node whose `last_seen` is older than `ttl`. Returns
    /// whether anything was dropped.
    pub fn prune_dead(&self, ttl: Duration) -> bool {
        let mut nodes = self.nodes.lock().unwrap();
        let before = nodes.len();
        nodes.retain(|_, n| n.last_seen.elapsed() < ttl);
        nodes.len() != before
    }

    pub fn snapshot(&self) -> Vec<NodeEntry> {
        self.nodes.lock().unwrap().values().map(|n| n.entry.clone()).collect()
    }

    pub fn persist(&self, path: &Path) -> io::Result<()> {
        write_nodes_file_atomic(path, &self.snapshot())
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that changes once per process lifetime but otherwise never
/// repeats, the way the original's single `rand()` call (seeded once
/// before the broadcast loop starts) behaves in practice.
pub fn process_unique() -> u64 {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    nanos ^ ((std::process::id() as u64) << 32)
}

fn encode_elp(elp: &Elp) -> Vec<u8> {
    let mut out = vec![PacketType::Elp.as_u8()];
    out.extend(elp.to_vec());
    out
}

fn decode_elp(buf: &[u8]) -> Result<Elp, ProtoError> {
    if buf.is_empty() || buf[0] != PacketType::Elp.as_u8() {
        return Err(ProtoError::UnknownPacketType(buf.first().copied().unwrap_or(0xff)));
    }
    let (elp, _) = Elp::read(&buf[1..])?;
    Ok(elp)
}

/// Broadcast one ELP packet and prune (and persist, if anything changed)
/// dead nodes. Split out of the sender loop so it can be driven
/// one tick at a time in tests.
pub fn sender_tick(
    sock: &UdpSocket,
    broadcast_addr: SocketAddr,
    host_id: u64,
    unique: u64,
    name: &str,
    table: &NodeTable,
    nodes_path: &Path,
    node_ttl: Duration,
) -> io::Result<()> {
    let elp = Elp {
        vers: proto::ELP_VERS,
        unique,
        host_id,
        name: name.to_string(),
    };

    let packet = encode_elp(&elp);
    debug_assert!(packet.len() < proto::UDP_BUDGET);

    sock.send_to(&packet, broadcast_addr)?;
    debug!("broadcast ELP (host_id=0x{host_id:x}, unique=0x{unique:x})");

    if table.prune_dead(node_ttl) {
        table.persist(nodes_path)?;
    }

    Ok(())
}

/// Run the sender loop forever: broadcast, prune, sleep, repeat.
pub fn run_sender(
    sock: &UdpSocket,
    broadcast_addr: SocketAddr,
    host_id: u64,
    name: &str,
    table: &NodeTable,
    nodes_path: &Path,
    elp_delay: Duration,
    node_ttl: Duration,
) -> io::Result<()> {
    let unique = process_unique();

    loop {
        sender_tick(sock, broadcast_addr, host_id, unique, name, table, nodes_path, node_ttl)?;
        std::thread::sleep(elp_delay);
    }
}

/// Query a peer's current VDEV inventory over TCP.
pub fn query_vdevs_over_tcp(ip: IpAddr) -> Result<QueryRes, ProtoError> {
    let mut stream = TcpStream::connect((ip, GV_PORT))?;
    proto::write_frame(&mut stream, PacketType::Query, &[])?;
    let (kind, body) = proto::read_frame(&mut stream)?;

    if kind != PacketType::QueryRes {
        return Err(ProtoError::UnknownPacketType(kind.as_u8()));
    }

    let (res, _) = QueryRes::read(&body)?;
    Ok(res)
}

/// Handle one incoming ELP datagram: decode it, ignore our own echo,
/// and if it names a node we haven't seen (or whose VDEV set changed),
/// query and record it.
pub fn handle_elp_datagram(
    buf: &[u8],
    sender_ip: IpAddr,
    my_host_id: u64,
    table: &NodeTable,
    nodes_path: &Path,
) -> Result<(), ProtoError> {
    let elp = decode_elp(buf)?;

    if elp.host_id == my_host_id {
        return Ok(());
    }

    if elp.vers != proto::ELP_VERS {
        warn!("received ELP with unsupported version {} from 0x{:x}, ignoring", elp.vers, elp.host_id);
        return Ok(());
    }

    let changed = table.touch(elp.host_id, elp.unique, || {
        let vdevs = match query_vdevs_over_tcp(sender_ip) {
            Ok(res) => res.vdevs,
            Err(e) => {
                warn!("failed to query VDEVs from 0x{:x}: {e}", elp.host_id);
                return None;
            }
        };

        Some(NodeEntry {
            host_id: elp.host_id,
            addr: sender_ip,
            vdevs,
        })
    });

    if changed {
        info!("node 0x{:x} at {sender_ip} updated, now publishing its VDEVs", elp.host_id);
        table.persist(nodes_path)?;
    }

    Ok(())
}

/// Run the listener loop forever: receive, handle, repeat.
pub fn run_listener(sock: &UdpSocket, my_host_id: u64, table: &NodeTable, nodes_path: &Path) -> io::Result<()> {
    let mut buf = [0u8; proto::UDP_BUDGET];

    loop {
        let (len, from) = sock.recv_from(&mut buf)?;

        if let Err(e) = handle_elp_datagram(&buf[..len], from.ip(), my_host_id, table, nodes_path) {
            warn!("dropping malformed ELP datagram from {from}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_wire::VdevKind;
    use std::net::Ipv4Addr;

    fn sample_entry(host_id: u64) -> NodeEntry {
        NodeEntry {
            host_id,
            addr: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            vdevs: vec![aqua_wire::VdevDescriptor {
                host_id,
                vdev_id: 1,
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
    fn elp_packet_round_trips() {
        let elp = Elp {
            vers: proto::ELP_VERS,
            unique: 0xabc,
            host_id: 0x11ad,
            name: "test-node".to_string(),
        };
        let buf = encode_elp(&elp);
        assert_eq!(decode_elp(&buf).unwrap(), elp);
    }

    #[test]
    fn touch_reports_new_node_then_stays_quiet_on_same_unique() {
        let table = NodeTable::new();
        let entry = sample_entry(1);

        assert!(table.touch(1, 7, || Some(entry.clone())));
        assert_eq!(table.snapshot(), vec![entry]);

        assert!(!table.touch(1, 7, || panic!("refresh should not run for an unchanged unique")));
    }

    #[test]
    fn touch_refreshes_when_unique_changes() {
        let table = NodeTable::new();
        let first = sample_entry(1);
        let mut second = sample_entry(1);
        second.vdevs.push(second.vdevs[0].clone());

        assert!(table.touch(1, 1, || Some(first)));
        assert!(table.touch(1, 2, || Some(second.clone())));
        assert_eq!(table.snapshot(), vec![second]);
    }

    #[test]
    fn prune_dead_removes_stale_entries() {
        let table = NodeTable::new();
        table.touch(1, 1, || Some(sample_entry(1)));

        assert!(!table.prune_dead(Duration::from_secs(60)));
        assert!(table.prune_dead(Duration::from_secs(0)));
        assert_eq!(table.snapshot(), Vec::new());
    }

    #[test]
    fn process_unique_is_nonzero() {
        assert_ne!(process_unique(), 0);
    }
}
