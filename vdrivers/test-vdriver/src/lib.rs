// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! A VDRIVER with exactly one VDEV and one function, `add(a: u64, b: u64)
//! -> u64`. Exists only to exercise the local and GrapeVine call paths in
//! the integration tests; not something a real deployment would load.

use aqua_vdriver::{Notification, VDriver, VDriverContext};
use aqua_wire::{Function, Parameter, Type, Value, VdevDescriptor, VdevKind};

const SPEC: &str = "test";
const HUMAN: &str = "test VDEV (add)";
const VDRIVER_HUMAN: &str = "test-vdriver";
const VERSION: u32 = 1;

struct TestVDriver {
    fns: Vec<Function>,
}

impl TestVDriver {
    fn new() -> Self {
        Self {
            fns: vec![Function::new(
                "add",
                Type::U64,
                vec![Parameter::new(Type::U64, "a"), Parameter::new(Type::U64, "b")],
            )],
        }
    }

    fn vdev_id(&self, ctx: &VDriverContext) -> u64 {
        ctx.vdev_id_lo
    }
}

impl VDriver for TestVDriver {
    fn spec(&self) -> &str {
        SPEC
    }

    fn human(&self) -> &str {
        VDRIVER_HUMAN
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn probe(&mut self, ctx: &VDriverContext) {
        let vdev = VdevDescriptor {
            host_id: ctx.host_id,
            vdev_id: self.vdev_id(ctx),
            spec: SPEC.to_string(),
            version: VERSION,
            human: HUMAN.to_string(),
            vdriver_human: VDRIVER_HUMAN.to_string(),
            kind: VdevKind::Local,
            preference: 0,
        };
        ctx.notify(0, Notification::Attach { vdev });
    }

    fn conn(&mut self, ctx: &VDriverContext, cookie: u64, vdev_id: u64, conn_id: u64) {
        if vdev_id != self.vdev_id(ctx) {
            ctx.notify(cookie, Notification::ConnFail);
            return;
        }

        ctx.notify(
            cookie,
            Notification::Conn {
                conn_id,
                consts: Vec::new(),
                fns: self.fns.clone(),
            },
        );
    }

    fn call(&mut self, ctx: &VDriverContext, cookie: u64, _conn_id: u64, fn_id: u64, args: &[Value]) {
        let Some(f) = self.fns.get(fn_id as usize) else {
            ctx.notify(cookie, Notification::CallFail);
            return;
        };

        let (Some(Value::U64(a)), Some(Value::U64(b))) = (args.first(), args.get(1)) else {
            ctx.notify(cookie, Notification::CallFail);
            return;
        };

        if f.name != "add" {
            ctx.notify(cookie, Notification::CallFail);
            return;
        }

        ctx.notify(
            cookie,
            Notification::CallRet {
                value: Value::U64(a.wrapping_add(*b)),
            },
        );
    }
}

/// # Safety
///
/// Called exactly once by the loader right after `dlopen`; the returned
/// pointer is taken into a `Box` and never aliased.
#[no_mangle]
pub unsafe extern "C" fn aqua_vdriver_entry() -> *mut dyn VDriver {
    Box::into_raw(Box::new(TestVDriver::new()))
}
