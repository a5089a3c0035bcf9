// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The GrapeVine daemon: one per host. Advertises this host's VDEVs to
//! the rest of the network over UDP echolocation, answers `QUERY`
//! itself, and hands every `CONN_VDEV` off to a freshly spawned
//! `aqua-gv-agent` process that inherits the accepted socket and takes
//! the connection from there.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use aqua_vdriver::Loader;
use aqua_wire::{VdevDescriptor, WireDecode, WireEncode};
use clap::Parser;
use log::{error, info, warn};

use aqua_gvd::elp::{self, NodeTable};
use aqua_gvd::global_config;
use aqua_gvd::ipc;
use aqua_gvd::proto::{self, ConnVdev, PacketType, QueryRes, GV_PORT};

#[derive(Parser, Debug)]
#[command(name = "aqua-gvd", about = "GrapeVine daemon: cross-host VDEV discovery and RPC handoff.")]
struct Args {
    /// Network interface to bind to, e.g. eth0.
    #[arg(short = 'i', long = "interface")]
    interface: String,

    /// Override how often we broadcast our own ELP packet.
    #[arg(long = "elp-delay-ms")]
    elp_delay_ms: Option<u64>,

    /// Override how long a peer is allowed to go unheard-from before we
    /// drop it from the nodes file.
    #[arg(long = "node-ttl-secs")]
    node_ttl_secs: Option<u64>,

    /// Directory to keep the lock file, host-id file and nodes file in,
    /// overriding `GV_LOCK_PATH`/`GV_HOST_ID_PATH`/`GV_NODES_PATH`
    /// individually.
    #[arg(long = "ipc-dir")]
    ipc_dir: Option<std::path::PathBuf>,
}

fn apply_ipc_dir_override(dir: &std::path::Path) {
    std::env::set_var("GV_LOCK_PATH", dir.join("gv.lock"));
    std::env::set_var("GV_HOST_ID_PATH", dir.join("gv.host_id"));
    std::env::set_var("GV_NODES_PATH", dir.join("gv.nodes"));
}

/// Probe every local VDRIVER once at startup. The `Loader` is dropped
/// right after — gvd never keeps a VDEV connection open itself; `QUERY`
/// only needs the resulting snapshot, and `CONN_VDEV` hands off to an
/// agent process that builds its own `Loader` from scratch.
fn inventory_local_vdevs(host_id: u64) -> Vec<VdevDescriptor> {
    let notif_cb: aqua_vdriver::NotifCb = Rc::new(|_, _| {});
    let write_ptr_cb: aqua_vdriver::WritePtrCb = Rc::new(|_, _, _| false);

    let mut loader = Loader::new();
    let vdevs = loader.full_inventory(host_id, notif_cb, write_ptr_cb);
    info!("inventoried {} local VDEV(s)", vdevs.len());
    vdevs
}

fn handle_connection(mut stream: TcpStream, local_vdevs: Arc<Vec<VdevDescriptor>>) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".to_string());

    loop {
        let (kind, body) = match proto::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(_) => {
                info!("connection from {peer} closed");
                return;
            }
        };

        match kind {
            PacketType::Query => {
                if let Err(e) = handle_query(&mut stream, &local_vdevs) {
                    warn!("error serving QUERY to {peer}: {e}");
                    return;
                }
            }
            PacketType::ConnVdev => {
                if let Err(e) = handle_conn_vdev(&mut stream, &body, &local_vdevs) {
                    warn!("error serving CONN_VDEV from {peer}: {e}");
                }
                // Either handed off to an agent or failed outright; this
                // thread's job is done regardless.
                return;
            }
            other => {
                warn!("received unexpected packet type {:?} from {peer}", other);
            }
        }
    }
}

fn handle_query(stream: &mut TcpStream, local_vdevs: &[VdevDescriptor]) -> Result<()> {
    let res = QueryRes {
        vdevs: local_vdevs.to_vec(),
    };
    proto::write_frame(stream, PacketType::QueryRes, &res.to_vec())?;
    Ok(())
}

fn handle_conn_vdev(stream: &mut TcpStream, body: &[u8], local_vdevs: &[VdevDescriptor]) -> Result<()> {
    let (req, _) = ConnVdev::read(body)?;

    let Some(vdev) = local_vdevs.iter().find(|v| v.vdev_id == req.vdev_id) else {
        warn!("CONN_VDEV for unknown vdev {:#x}", req.vdev_id);
        proto::write_frame(stream, PacketType::ConnVdevFail, &[])?;
        return Ok(());
    };

    spawn_agent(stream, &vdev.spec, req.vdev_id)
}

/// Spawn `aqua-gv-agent`, duplicating the accepted connection's socket
/// onto fd 3 in the child before `exec`, matching the agent's fixed
/// expectation of where its socket lives.
fn spawn_agent(stream: &TcpStream, spec: &str, vdev_id: u64) -> Result<()> {
    let sock_fd = stream.as_raw_fd();

    let mut cmd = Command::new("aqua-gv-agent");
    cmd.arg("--spec").arg(spec).arg("--vid").arg(vdev_id.to_string());

    // SAFETY: `dup2` is async-signal-safe, the only syscall this hook
    // performs between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            let borrowed = std::os::fd::BorrowedFd::borrow_raw(sock_fd);
            nix::unistd::dup2_raw(borrowed, 3).map(|_| ()).map_err(std::io::Error::from)
        });
    }

    let mut child = cmd.spawn().with_context(|| format!("spawning aqua-gv-agent for vdev {vdev_id:#x}"))?;
    info!("spawned agent (pid {}) bridging vdev {vdev_id:#x} (spec \"{spec}\")", child.id());

    thread::spawn(move || match child.wait() {
        Ok(status) => info!("agent for vdev {vdev_id:#x} exited: {status}"),
        Err(e) => warn!("waiting on agent for vdev {vdev_id:#x}: {e}"),
    });

    Ok(())
}

fn find_interface(name: &str) -> Result<(Ipv4Addr, Ipv4Addr, u64)> {
    let mut ipv4 = None;
    let mut broadcast = None;
    let mut mac = None;

    for ifaddr in nix::ifaddrs::getifaddrs().context("getifaddrs")? {
        if ifaddr.interface_name != name {
            continue;
        }

        let Some(address) = ifaddr.address else { continue };

        if let Some(sin) = address.as_sockaddr_in() {
            ipv4 = Some(sin.ip());
            broadcast = ifaddr.broadcast.as_ref().and_then(|b| b.as_sockaddr_in()).map(|b| b.ip());
        }

        if let Some(link) = address.as_link_addr() {
            if let Some(bytes) = link.addr() {
                mac = Some(u64::from_be_bytes([0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]]));
            }
        }
    }

    match (ipv4, broadcast, mac) {
        (Some(ip), Some(bcast), Some(mac)) => Ok((ip, bcast, mac)),
        (None, _, _) | (_, None, _) => bail!("interface {name} does not have an IPv4 address"),
        (_, _, None) => bail!("interface {name} does not have a link-layer (MAC) address"),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(dir) = &args.ipc_dir {
        apply_ipc_dir_override(dir);
    }
    global_config::initialize_global_config(args.elp_delay_ms, args.node_ttl_secs);

    info!("acquiring lock file {}", ipc::lock_path().display());
    let _lock = ipc::acquire_lock()?.ok_or_else(|| anyhow::anyhow!("another instance of the GrapeVine daemon is already running"))?;

    let (ipv4, broadcast, mac) = find_interface(&args.interface)?;
    info!("found interface {} with IPv4 address {ipv4}", args.interface);

    let host_id = (mac << 16) | 0x11AD;
    info!("our host ID is 0x{host_id:x}");
    ipc::write_host_id(host_id).context("writing gv.host_id")?;

    let local_vdevs: Arc<Vec<VdevDescriptor>> = Arc::new(inventory_local_vdevs(host_id));

    let table = Arc::new(NodeTable::new());
    let elp_sock = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), proto::GV_ELP_PORT))
        .context("binding ELP socket")?;
    elp_sock.set_broadcast(true).context("SO_BROADCAST")?;

    {
        let sock = elp_sock.try_clone().context("cloning ELP socket for sender")?;
        let table = table.clone();
        let nodes_path = ipc::nodes_path();
        thread::spawn(move || {
            let broadcast_addr = SocketAddr::new(IpAddr::V4(broadcast), proto::GV_ELP_PORT);
            let elp_delay = global_config::elp_delay();
            let node_ttl = global_config::node_ttl();
            if let Err(e) = elp::run_sender(&sock, broadcast_addr, host_id, &args.interface, &table, &nodes_path, elp_delay, node_ttl) {
                error!("ELP sender thread exited: {e}");
            }
        });
    }

    {
        let sock = elp_sock.try_clone().context("cloning ELP socket for listener")?;
        let table = table.clone();
        let nodes_path = ipc::nodes_path();
        thread::spawn(move || {
            if let Err(e) = elp::run_listener(&sock, host_id, &table, &nodes_path) {
                error!("ELP listener thread exited: {e}");
            }
        });
    }

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), GV_PORT)).context("binding TCP listener")?;
    info!("GrapeVine daemon bound to port {:#x} and listening for connections", GV_PORT);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("accept: {e}");
                continue;
            }
        };

        let local_vdevs = local_vdevs.clone();
        thread::spawn(move || handle_connection(stream, local_vdevs));
    }

    Ok(())
}
