// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Spawns `aqua-gvd` the same way the rest of this workspace spawns a
//! sibling binary in tests: through `cargo run -p`, rather than hunting
//! for a prebuilt path. `aqua-gv-agent` is never spawned directly by a
//! test — it only ever runs because `aqua-gvd` execs it, so it just
//! needs to be on `PATH` (a `cargo build --workspace` beforehand puts
//! `target/<profile>` there).

use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

pub struct GvdHandle {
    child: Child,
}

impl GvdHandle {
    /// Spawns `aqua-gvd -i <interface>`, waiting long enough for it to
    /// bind its sockets and write `gv.host_id` before returning.
    pub fn spawn(interface: &str) -> Self {
        let child = unsafe {
            Command::new("cargo")
                .args(["run", "-p", "aqua-gvd", "--", "--interface", interface])
                .pre_exec(|| {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                    Ok(())
                })
                .spawn()
                .expect("failed to start aqua-gvd")
        };

        thread::sleep(Duration::from_millis(500));

        Self { child }
    }
}

impl Drop for GvdHandle {
    fn drop(&mut self) {
        let pid = Pid::from_raw(self.child.id() as i32);

        let _ = signal::kill(pid, Signal::SIGTERM);

        for _ in 0..10 {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let _ = signal::kill(pid, Signal::SIGKILL);
        let _ = self.child.wait();
    }
}
