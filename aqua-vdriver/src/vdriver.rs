// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::context::VDriverContext;
use aqua_wire::Value;

/// The symbol a VDRIVER `cdylib` must export.
pub const ENTRY_SYMBOL: &[u8] = b"aqua_vdriver_entry";

/// The contract a VDRIVER implements.
///
/// `init` and `probe` are called once, at load time, in that order.
/// `conn` and `call` are called any number of times afterwards, each in
/// response to a KOS request carrying the `cookie` that must be echoed
/// back in the matching notification.
///
/// A VDRIVER never returns a `Result` across this boundary: failure is
/// reported through `ctx.notify` as `Notification::ConnFail` /
/// `Notification::CallFail`, the same way the KOS's own client-facing API
/// reports failure as a notification rather than an error return.
pub trait VDriver {
    /// The specification this VDRIVER implements, e.g. `aquabsd.black.wgpu`.
    fn spec(&self) -> &str;

    /// A human-readable description of this specific implementation.
    fn human(&self) -> &str;

    /// This VDRIVER's version.
    fn version(&self) -> u32;

    /// Called once after the VID slice and callbacks are assigned.
    fn init(&mut self, _ctx: &VDriverContext) {}

    /// Called once after `init`. Should `ctx.notify(0, Notification::Attach
    /// { .. })` for every VDEV this VDRIVER currently supports.
    fn probe(&mut self, ctx: &VDriverContext);

    /// Connect to `vdev_id`, which is guaranteed to fall within
    /// `ctx.vdev_id_lo..=ctx.vdev_id_hi`. Must answer with
    /// `Notification::Conn` or `Notification::ConnFail`.
    fn conn(&mut self, ctx: &VDriverContext, cookie: u64, vdev_id: u64, conn_id: u64);

    /// Call function `fn_id` (an index into the function table handed
    /// back by the matching `conn`) on connection `conn_id` with `args`.
    /// Must answer with `Notification::CallRet` or `Notification::CallFail`.
    fn call(&mut self, ctx: &VDriverContext, cookie: u64, conn_id: u64, fn_id: u64, args: &[Value]);
}

/// The signature of the `aqua_vdriver_entry` symbol every VDRIVER
/// `cdylib` exports. Called once per load; the loader takes ownership of
/// the returned trait object.
///
/// The return type is a fat pointer, which has no stable C ABI — this is
/// only sound because loader and VDRIVER are built with the same
/// toolchain, the same assumption the original's raw `dlopen`/`dlsym`
/// plugin contract makes about the host platform's calling convention.
pub type VDriverEntryFn = unsafe extern "C" fn() -> *mut dyn VDriver;
