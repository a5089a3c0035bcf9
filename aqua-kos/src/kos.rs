// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The KOS runtime itself: handshake, subscription, VDEV discovery,
//! connect/call/disconnect, and the action queue that defers all of it
//! to `flush`.
//!
//! `Kos` is intentionally `!Sync` (its internals are `Rc`/`RefCell`, not
//! `Arc`/`Mutex`) — the single-threaded cooperative model in the
//! concurrency design is encoded in the type, not just documented.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::{IpAddr, TcpStream};
use std::rc::Rc;

use aqua_vdriver::{Loader, NotifCb, WritePtrCb};
use aqua_wire::{VdevDescriptor, VdevKind, WireDecode, WireEncode, LOCAL_HOST_ID};
use aqua_gvd::node::NodeEntry;
use aqua_gvd::proto::{self, ConnVdev, ConnVdevRes, KosCall, KosCallRet, PacketType};
use log::{debug, warn};

use crate::action::{Action, ActionQueue};
use crate::conn::{ConnId, ConnKind, Connection, HostId, VdevId};
use crate::error::{CallError, ConnError, HelloError, KOS_API_VERSION};
use crate::interrupt::{ComponentId, InterruptTable, Ino, UserData};
use crate::notif::{Cookie, Notification};

/// What `hello` hands back alongside the negotiated [`Kos`] handle.
#[derive(Debug, Clone)]
pub struct KosDescriptor {
    pub version: u32,
    pub human: String,
}

/// What a cookie is currently waiting on, so the one VDRIVER-facing
/// notification callback can translate a bare `ConnFail`/`CallRet`/...
/// back into a client notification carrying the right connection id.
enum Waiting {
    Connect { conn_id: ConnId, vdev_id: VdevId },
    Call { conn_id: ConnId },
}

/// Everything the KOS owns, split into two separately-borrowed cells so
/// a VDRIVER's synchronous `conn`/`call` callback — invoked from inside
/// `loader.find_by_vid(..)`'s borrow of `loader` — can still record
/// bookkeeping in `state` without re-entering the same `RefCell`.
pub struct Shared {
    loader: RefCell<Loader>,
    state: RefCell<State>,
}

struct State {
    host_id: HostId,
    human: String,
    client_cb: Option<Rc<dyn Fn(Notification)>>,
    conns: HashMap<ConnId, Connection>,
    waiting: HashMap<Cookie, Waiting>,
    next_cookie: Cookie,
    next_conn_id: ConnId,
    queue: ActionQueue,
    interrupts: InterruptTable,
    known_nodes: Vec<NodeEntry>,
}

impl State {
    fn emit(&self, notif: Notification) {
        if let Some(cb) = &self.client_cb {
            cb(notif);
        }
    }

    fn next_cookie(&mut self) -> Cookie {
        let c = self.next_cookie;
        self.next_cookie += 1;
        c
    }

    fn next_conn_id(&mut self) -> ConnId {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }
}

/// A handle to a running KOS. Cloning shares the same underlying state —
/// every clone sees the same connections, queue, and subscription.
#[derive(Clone)]
pub struct Kos(Rc<Shared>);

impl Kos {
    /// Negotiate an API version in `[min, max]`. This KOS only ever
    /// speaks [`KOS_API_VERSION`]; any overlap with it succeeds.
    pub fn hello(min: u32, max: u32) -> Result<(Kos, KosDescriptor), HelloError> {
        if min > KOS_API_VERSION || max < KOS_API_VERSION {
            return Err(HelloError::NoOverlap {
                min,
                max,
                supported: KOS_API_VERSION,
            });
        }

        let host_id = aqua_gvd::ipc::read_host_id().unwrap_or(LOCAL_HOST_ID);
        let human = "aqua-kos".to_string();

        let state = State {
            host_id,
            human: human.clone(),
            client_cb: None,
            conns: HashMap::new(),
            waiting: HashMap::new(),
            next_cookie: 1,
            next_conn_id: 1,
            queue: ActionQueue::new(),
            interrupts: InterruptTable::new(),
            known_nodes: Vec::new(),
        };

        let shared = Rc::new(Shared {
            loader: RefCell::new(Loader::new()),
            state: RefCell::new(state),
        });

        debug!("hello negotiated API version {KOS_API_VERSION}, host_id=0x{host_id:x}");

        Ok((Kos(shared), KosDescriptor { version: KOS_API_VERSION, human }))
    }

    /// Register the one client notification callback. Replaces any
    /// previously registered one.
    pub fn sub_to_notif(&self, cb: impl Fn(Notification) + 'static) {
        self.0.state.borrow_mut().client_cb = Some(Rc::new(cb));
    }

    /// The VDRIVER-facing callback every loader operation is given. Built
    /// fresh per call (cheap — it's just an `Rc` closure) so it always
    /// closes over the current `Shared`.
    fn vdriver_notif_cb(&self) -> NotifCb {
        let shared = self.0.clone();
        Rc::new(move |cookie, notif| handle_vdriver_notif(&shared, cookie, notif))
    }

    fn write_ptr_cb(&self) -> WritePtrCb {
        let my_host_id = self.0.state.borrow().host_id;
        Rc::new(move |host_id, ptr, data| {
            if host_id != my_host_id {
                warn!("cross-host pointer write to host 0x{host_id:x} is not supported");
                return false;
            }
            if data.is_empty() {
                return true;
            }
            // SAFETY: `ptr` was handed to the VDRIVER earlier as a
            // `Value::Ptr { host_id: my_host_id, .. }`; the VDRIVER
            // contract requires it never dereference a pointer whose
            // host doesn't match its own, which this check enforces on
            // the writer's side too.
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            }
            true
        })
    }

    /// Request the local VDRIVER owning `spec`, then fold in any
    /// matching VDEVs GrapeVine already knows about. Every match —
    /// local or remote — is also delivered as an `Attach` notification,
    /// which is why this is guaranteed to surface everything
    /// synchronously rather than relying on the subscriber to wait.
    pub fn req_vdev(&self, spec: &str) -> Vec<VdevDescriptor> {
        let host_id = self.0.state.borrow().host_id;
        let notif_cb = self.vdriver_notif_cb();
        let write_ptr_cb = self.write_ptr_cb();

        let mut local = self.0.loader.borrow_mut().request_local_vdev(spec, host_id, notif_cb, write_ptr_cb);

        let nodes_path = aqua_gvd::ipc::nodes_path();
        let nodes = aqua_gvd::node::read_nodes_file(&nodes_path).unwrap_or_else(|e| {
            warn!("failed to read GrapeVine nodes file: {e}");
            Vec::new()
        });

        let mut remote = Vec::new();
        for node in &nodes {
            for vdev in &node.vdevs {
                if vdev.spec != spec {
                    continue;
                }
                let mut vdev = vdev.clone();
                vdev.kind = VdevKind::Gv;
                self.0.state.borrow().emit(Notification::Attach { cookie: 0, vdev: vdev.clone() });
                remote.push(vdev);
            }
        }

        self.0.state.borrow_mut().known_nodes = nodes;

        local.extend(remote);
        local
    }

    /// Probe every local VDRIVER and return its full inventory — used by
    /// gvd-style callers that want every VDEV on this host rather than
    /// one spec at a time.
    pub fn full_inventory(&self) -> Vec<VdevDescriptor> {
        let host_id = self.0.state.borrow().host_id;
        let notif_cb = self.vdriver_notif_cb();
        let write_ptr_cb = self.write_ptr_cb();
        self.0.loader.borrow_mut().full_inventory(host_id, notif_cb, write_ptr_cb)
    }

    /// Mint a cookie and queue a `connect`. Returns the cookie
    /// immediately; the connection only becomes live once `flush` runs
    /// the action and the resulting `Conn`/`ConnFail` notification fires.
    pub fn connect(&self, host_id: HostId, vdev_id: VdevId) -> Cookie {
        let my_host_id = self.0.state.borrow().host_id;
        let cookie = self.0.state.borrow_mut().next_cookie();

        let shared = self.0.clone();
        let desc = format!("connect to vdev {vdev_id:#x} on host {host_id:#x}");

        self.0.state.borrow_mut().queue.push(Action::new(cookie, desc, move |_sync, _shared| {
            if host_id == my_host_id || host_id == LOCAL_HOST_ID {
                local_connect(&shared, cookie, vdev_id);
            } else {
                gv_connect(&shared, cookie, host_id, vdev_id);
            }
        }));

        cookie
    }

    /// Mint a cookie and queue a `call`. Validates `(connection_id,
    /// fn_id)` up front — an invalid pair queues an action that does
    /// nothing but emit `CallFail`, matching the spec's "direct
    /// call_fail emitter" wording.
    pub fn call(&self, conn_id: ConnId, fn_id: u32, args: Vec<aqua_wire::Value>) -> Cookie {
        let cookie = self.0.state.borrow_mut().next_cookie();
        let shared = self.0.clone();
        let desc = format!("call fn {fn_id} on connection {conn_id}");

        let validity = {
            let state = self.0.state.borrow();
            match state.conns.get(&conn_id) {
                None => Err(CallError::DeadConnection { conn_id }),
                Some(c) if !c.alive => Err(CallError::DeadConnection { conn_id }),
                Some(c) if fn_id as usize >= c.fn_count() => Err(CallError::UnknownFunction {
                    conn_id,
                    fn_id,
                    fn_count: c.fn_count(),
                }),
                Some(_) => Ok(()),
            }
        };

        if let Err(e) = validity {
            warn!("rejecting call: {e}");
            self.0.state.borrow_mut().queue.push(Action::new(cookie, desc, move |_sync, shared| {
                shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
            }));
            return cookie;
        }

        self.0.state.borrow_mut().queue.push(Action::new(cookie, desc, move |_sync, _shared| {
            local_or_gv_call(&shared, cookie, conn_id, fn_id, args);
        }));

        cookie
    }

    /// Drain the action queue head-to-tail. GrapeVine actions are always
    /// synchronous regardless of `sync` (a known limitation — see
    /// DESIGN.md); local actions ignore it entirely.
    pub fn flush(&self, sync: bool) {
        loop {
            let next = self.0.state.borrow_mut().queue.pop_front();
            let Some(action) = next else { break };
            action.run(sync, &self.0);
        }
    }

    /// Mark a connection dead. For `gv` connections this also shuts down
    /// the socket, which unblocks anyone mid-`recv` on it. The id is
    /// never reused; further `call`s on it fail immediately.
    pub fn disconnect(&self, conn_id: ConnId) {
        let mut state = self.0.state.borrow_mut();
        if let Some(conn) = state.conns.get_mut(&conn_id) {
            conn.alive = false;
            if let ConnKind::Gv { stream, .. } = &conn.kind {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    /// Register a new interrupt source and get back its INO. There is no
    /// unregister path, matching `lib/component.h` in the original.
    pub fn register_interrupt(&self, component: ComponentId, user_data: UserData) -> Ino {
        self.0.state.borrow_mut().interrupts.register(component, user_data)
    }

    /// Deliver an interrupt payload for `ino` to the subscriber, looking
    /// up which component it belongs to first. No VDRIVER path currently
    /// drives this (see DESIGN.md); it exists so one can plug in later
    /// without touching the demultiplexer itself.
    pub fn deliver_interrupt(&self, ino: Ino, payload: Vec<u8>) {
        let state = self.0.state.borrow();
        if state.interrupts.lookup(ino).is_some() {
            state.emit(Notification::Interrupt { ino, payload });
        } else {
            warn!("interrupt for unregistered INO {ino}, dropping");
        }
    }

    pub fn human(&self) -> String {
        self.0.state.borrow().human.clone()
    }

    pub fn host_id(&self) -> HostId {
        self.0.state.borrow().host_id
    }
}

/// The one callback every local VDEV connect/call operation is wired to.
/// Translates a VDRIVER's `Notification` into a client-facing one, using
/// `waiting` to recover context (connection id, which call it answers)
/// that the VDRIVER side of the contract doesn't carry.
fn handle_vdriver_notif(shared: &Rc<Shared>, cookie: u64, notif: aqua_vdriver::Notification) {
    use aqua_vdriver::Notification as VN;

    match notif {
        VN::Attach { vdev } => {
            shared.state.borrow().emit(Notification::Attach { cookie: 0, vdev });
        }
        VN::Detach { host_id, vdev_id } => {
            shared.state.borrow().emit(Notification::Detach { cookie: 0, host_id, vdev_id });
        }
        VN::ConnFail => {
            let waiting = shared.state.borrow_mut().waiting.remove(&cookie);
            if let Some(Waiting::Connect { conn_id, .. }) = waiting {
                shared.state.borrow_mut().conns.remove(&conn_id);
            }
            shared.state.borrow().emit(Notification::ConnFail { cookie });
        }
        VN::Conn { conn_id, consts, fns } => {
            let mut state = shared.state.borrow_mut();
            state.waiting.remove(&cookie);
            if let Some(conn) = state.conns.get_mut(&conn_id) {
                conn.alive = true;
                conn.consts = consts.clone();
                conn.fns = fns.clone();
            }
            state.emit(Notification::Conn {
                cookie,
                connection_id: conn_id,
                consts,
                fns,
            });
        }
        VN::CallFail => {
            let waiting = shared.state.borrow_mut().waiting.remove(&cookie);
            let conn_id = match waiting {
                Some(Waiting::Call { conn_id }) => conn_id,
                _ => {
                    warn!("CallFail for cookie {cookie} did not match a pending call");
                    return;
                }
            };
            shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        }
        VN::CallRet { value } => {
            let waiting = shared.state.borrow_mut().waiting.remove(&cookie);
            let conn_id = match waiting {
                Some(Waiting::Call { conn_id }) => conn_id,
                _ => {
                    warn!("CallRet for cookie {cookie} did not match a pending call");
                    return;
                }
            };
            shared.state.borrow().emit(Notification::CallRet { cookie, connection_id: conn_id, value });
        }
    }
}

fn local_connect(shared: &Rc<Shared>, cookie: Cookie, vdev_id: VdevId) {
    let conn_id = {
        let mut state = shared.state.borrow_mut();
        let conn_id = state.next_conn_id();
        state.conns.insert(
            conn_id,
            Connection {
                id: conn_id,
                alive: false,
                kind: ConnKind::Local { vdev_id },
                consts: Vec::new(),
                fns: Vec::new(),
            },
        );
        state.waiting.insert(cookie, Waiting::Connect { conn_id, vdev_id });
        conn_id
    };

    // The borrow of `loader` lives only across this call — `conn` invokes
    // the notif callback synchronously, which needs `state`, not `loader`.
    let mut loader = shared.loader.borrow_mut();
    match loader.find_by_vid(vdev_id) {
        Some((vdriver, ctx)) => vdriver.conn(ctx, cookie, vdev_id, conn_id),
        None => {
            drop(loader);
            warn!("{}", ConnError::UnknownVdev { vdev_id });
            shared.state.borrow_mut().conns.remove(&conn_id);
            shared.state.borrow_mut().waiting.remove(&cookie);
            shared.state.borrow().emit(Notification::ConnFail { cookie });
        }
    }
}

fn resolve_host_ip(shared: &Rc<Shared>, host_id: HostId) -> Option<IpAddr> {
    shared.state.borrow().known_nodes.iter().find(|n| n.host_id == host_id).map(|n| n.addr)
}

fn gv_connect(shared: &Rc<Shared>, cookie: Cookie, host_id: HostId, vdev_id: VdevId) {
    let Some(ip) = resolve_host_ip(shared, host_id) else {
        warn!("{}", ConnError::UnknownHost { host_id });
        shared.state.borrow().emit(Notification::ConnFail { cookie });
        return;
    };

    let mut stream = match TcpStream::connect((ip, proto::GV_PORT)) {
        Ok(s) => s,
        Err(e) => {
            warn!("gv connect to host 0x{host_id:x} at {ip}: {e}");
            shared.state.borrow().emit(Notification::ConnFail { cookie });
            return;
        }
    };

    if let Err(e) = proto::write_frame(&mut stream, PacketType::ConnVdev, &ConnVdev { vdev_id }.to_vec()) {
        warn!("gv connect to host 0x{host_id:x}: {e}");
        shared.state.borrow().emit(Notification::ConnFail { cookie });
        return;
    }

    let (kind, body) = match proto::read_frame(&mut stream) {
        Ok(f) => f,
        Err(e) => {
            warn!("gv connect to host 0x{host_id:x}: {e}");
            shared.state.borrow().emit(Notification::ConnFail { cookie });
            return;
        }
    };

    match kind {
        PacketType::ConnVdevRes => {
            let res = match ConnVdevRes::read(&body) {
                Ok((res, _)) => res,
                Err(e) => {
                    warn!("malformed ConnVdevRes from host 0x{host_id:x}: {e}");
                    shared.state.borrow().emit(Notification::ConnFail { cookie });
                    return;
                }
            };

            let mut state = shared.state.borrow_mut();
            let conn_id = state.next_conn_id();
            state.conns.insert(
                conn_id,
                Connection {
                    id: conn_id,
                    alive: true,
                    kind: ConnKind::Gv { stream, remote_conn_id: res.conn_id },
                    consts: res.consts.clone(),
                    fns: res.fns.clone(),
                },
            );
            state.emit(Notification::Conn {
                cookie,
                connection_id: conn_id,
                consts: res.consts,
                fns: res.fns,
            });
        }
        PacketType::ConnVdevFail => {
            shared.state.borrow().emit(Notification::ConnFail { cookie });
        }
        other => {
            warn!("unexpected packet {other:?} in reply to CONN_VDEV");
            shared.state.borrow().emit(Notification::ConnFail { cookie });
        }
    }
}

fn local_or_gv_call(shared: &Rc<Shared>, cookie: Cookie, conn_id: ConnId, fn_id: u32, args: Vec<aqua_wire::Value>) {
    let is_local_vdev = {
        let state = shared.state.borrow();
        match state.conns.get(&conn_id) {
            Some(c) => match &c.kind {
                ConnKind::Local { vdev_id } => Some(*vdev_id),
                ConnKind::Gv { .. } => None,
            },
            None => {
                warn!("{}", CallError::DeadConnection { conn_id });
                drop(state);
                shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
                return;
            }
        }
    };

    match is_local_vdev {
        Some(vdev_id) => local_call(shared, cookie, conn_id, vdev_id, fn_id, args),
        None => gv_call(shared, cookie, conn_id, fn_id, args),
    }
}

fn local_call(shared: &Rc<Shared>, cookie: Cookie, conn_id: ConnId, vdev_id: VdevId, fn_id: u32, args: Vec<aqua_wire::Value>) {
    shared.state.borrow_mut().waiting.insert(cookie, Waiting::Call { conn_id });

    let mut loader = shared.loader.borrow_mut();
    match loader.find_by_vid(vdev_id) {
        Some((vdriver, ctx)) => vdriver.call(ctx, cookie, conn_id, fn_id as u64, &args),
        None => {
            drop(loader);
            shared.state.borrow_mut().waiting.remove(&cookie);
            warn!("{}", ConnError::UnknownVdev { vdev_id });
            shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        }
    }
}

fn gv_call(shared: &Rc<Shared>, cookie: Cookie, conn_id: ConnId, fn_id: u32, args: Vec<aqua_wire::Value>) {
    let mut state = shared.state.borrow_mut();
    let Some(conn) = state.conns.get_mut(&conn_id) else {
        drop(state);
        shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        return;
    };

    let ConnKind::Gv { stream, remote_conn_id } = &mut conn.kind else {
        drop(state);
        warn!("gv_call invoked on a non-gv connection {conn_id}");
        shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        return;
    };

    let call = KosCall {
        conn_id: *remote_conn_id,
        fn_id,
        args,
    };

    // `Ok(None)` means the remote side answered with an explicit
    // `KOS_CALL_FAIL`, not a transport error — kept distinct from `Err`
    // so the two don't get reported with the same misleading message.
    let result = (|| -> proto::Result<Option<KosCallRet>> {
        proto::write_frame(stream, PacketType::KosCall, &call.to_vec())?;
        let (kind, body) = proto::read_frame(stream)?;
        match kind {
            PacketType::KosCallRet => Ok(Some(KosCallRet::read(&body)?.0)),
            PacketType::KosCallFail => Ok(None),
            other => Err(aqua_gvd::proto::ProtoError::UnknownPacketType(other.as_u8())),
        }
    })();

    drop(state);

    match result {
        Ok(Some(ret)) => {
            shared.state.borrow().emit(Notification::CallRet {
                cookie,
                connection_id: conn_id,
                value: ret.ret,
            });
        }
        Ok(None) => {
            shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        }
        Err(e) => {
            debug!("gv call on connection {conn_id}: {e}");
            shared.state.borrow().emit(Notification::CallFail { cookie, connection_id: conn_id });
        }
    }
}
