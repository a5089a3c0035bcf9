// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! GrapeVine agent: a short-lived process gvd spawns per remote
//! connection, inheriting the already-accepted socket on fd 3. It does a
//! local KOS handshake, attaches to the requested spec, connects to the
//! one VDEV the remote side asked for, and then just shuttles
//! `KOS_CALL`/`KOS_CALL_RET`/`KOS_CALL_FAIL` frames between the socket
//! and that local connection until the remote hangs up.

use std::cell::RefCell;
use std::os::fd::FromRawFd;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};

use aqua_gvd::proto::{self, ConnVdevRes, KosCall, KosCallRet, PacketType};
use aqua_kos::{ConnId, Kos, Notification, KOS_API_VERSION};
use aqua_wire::{Constant, Function, Value, WireDecode, WireEncode};

/// The socket gvd hands us is always this fd; it has already accepted
/// the remote connection and read the `CONN_VDEV` packet off it by the
/// time we're spawned.
const INHERITED_SOCKET_FD: std::os::fd::RawFd = 3;

#[derive(Parser, Debug)]
#[command(name = "aqua-gv-agent", about = "GrapeVine KOS agent: bridges one remote connection to a local VDEV.")]
struct Args {
    /// Spec of the VDRIVER the target VDEV belongs to.
    #[arg(short = 's', long = "spec")]
    spec: String,

    /// VDEV ID the remote side wants to talk to.
    #[arg(short = 'v', long = "vid")]
    vid: u64,
}

/// What the connect/call round trip is waiting on, filled in by the
/// notification callback and consumed right after each `flush(true)`.
enum Pending {
    ConnRes { conn_id: ConnId, consts: Vec<Constant>, fns: Vec<Function> },
    ConnFail,
    CallRet { value: Value },
    CallFail,
}

struct State {
    target_vid: u64,
    hid: Option<u64>,
    conn_cookie: Option<u64>,
    pending: Option<Pending>,
}

fn handle_notif(state: &Rc<RefCell<State>>, notif: Notification) {
    let mut s = state.borrow_mut();
    match notif {
        Notification::Attach { vdev, .. } => {
            if vdev.vdev_id == s.target_vid {
                info!("found our VDEV: {}", vdev.human);
                s.hid = Some(vdev.host_id);
            }
        }
        Notification::Detach { .. } => {
            s.pending = Some(Pending::ConnFail);
        }
        Notification::ConnFail { cookie } => {
            if s.conn_cookie == Some(cookie) {
                s.pending = Some(Pending::ConnFail);
            }
        }
        Notification::Conn { cookie, connection_id, consts, fns } => {
            if s.conn_cookie == Some(cookie) {
                s.pending = Some(Pending::ConnRes { conn_id: connection_id, consts, fns });
            }
        }
        Notification::CallFail { .. } => {
            s.pending = Some(Pending::CallFail);
        }
        Notification::CallRet { value, .. } => {
            s.pending = Some(Pending::CallRet { value });
        }
        Notification::Interrupt { .. } => {}
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // SAFETY: gvd spawns us with the already-accepted connection
    // duplicated onto this exact fd before exec, per the CONN_VDEV
    // handling contract; it is ours alone from here on.
    let mut stream = unsafe { std::net::TcpStream::from_raw_fd(INHERITED_SOCKET_FD) };

    let (kos, descr) = Kos::hello(KOS_API_VERSION, KOS_API_VERSION).context("KOS handshake failed")?;
    debug!("negotiated KOS API version {} ({})", descr.version, descr.human);

    let state = Rc::new(RefCell::new(State {
        target_vid: args.vid,
        hid: None,
        conn_cookie: None,
        pending: None,
    }));

    {
        let state = state.clone();
        kos.sub_to_notif(move |n| handle_notif(&state, n));
    }

    info!("requesting spec \"{}\"", args.spec);
    kos.req_vdev(&args.spec);

    let hid = match state.borrow().hid {
        Some(hid) => hid,
        None => {
            warn!("couldn't find VDEV {:#x} under spec \"{}\"", args.vid, args.spec);
            proto::write_frame(&mut stream, PacketType::ConnVdevFail, &[])?;
            bail!("no matching local VDEV");
        }
    };

    let cookie = kos.connect(hid, args.vid);
    state.borrow_mut().conn_cookie = Some(cookie);
    kos.flush(true);

    let conn_id = match state.borrow_mut().pending.take() {
        Some(Pending::ConnRes { conn_id, consts, fns }) => {
            let res = ConnVdevRes { conn_id, consts, fns };
            proto::write_frame(&mut stream, PacketType::ConnVdevRes, &res.to_vec())?;
            conn_id
        }
        _ => {
            warn!("connection to VDEV {:#x} failed", args.vid);
            proto::write_frame(&mut stream, PacketType::ConnVdevFail, &[])?;
            bail!("VDEV connect failed");
        }
    };

    info!("bridging connection {conn_id} for VDEV {:#x}", args.vid);

    loop {
        let (kind, body) = match proto::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("remote closed: {e}");
                break;
            }
        };

        match kind {
            PacketType::KosCall => {
                let (req, _) = KosCall::read(&body)?;
                kos.call(req.conn_id, req.fn_id, req.args);
                kos.flush(true);

                match state.borrow_mut().pending.take() {
                    Some(Pending::CallRet { value }) => {
                        let ret = KosCallRet { ret: value };
                        proto::write_frame(&mut stream, PacketType::KosCallRet, &ret.to_vec())?;
                    }
                    _ => {
                        proto::write_frame(&mut stream, PacketType::KosCallFail, &[])?;
                    }
                }
            }
            other => {
                warn!("unexpected packet {other:?} on an established agent connection");
            }
        }
    }

    kos.disconnect(conn_id);
    Ok(())
}
