// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Stages the `test-vdriver` cdylib, built as a normal workspace member,
//! into a throwaway `VDRIVER_PATH` directory under the name `Loader`
//! expects (`<spec>.vdriver`). There is no `CARGO_BIN_EXE_`-style env
//! var for a sibling crate's cdylib, so we find it the way any other
//! build artifact is found: next to the test binary itself, walking up
//! until we see it sitting in a profile directory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aqua_vdriver::{VDRIVER_PATH_ENVVAR, VDRIVER_EXT};
use tempfile::TempDir;

const CDYLIB_FILE_NAME: &str = "libtest_vdriver.so";

/// Tests that stage the fixture all mutate the process-wide
/// `VDRIVER_PATH` environment variable; this keeps them from racing
/// each other when run with cargo's default multi-threaded test runner.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn locate_cdylib() -> PathBuf {
    let exe = std::env::current_exe().expect("current_exe");

    for dir in exe.ancestors() {
        let candidate = dir.join(CDYLIB_FILE_NAME);
        if candidate.exists() {
            return candidate;
        }
    }

    panic!("could not find {CDYLIB_FILE_NAME} near test binary {}; is test-vdriver built?", exe.display());
}

/// Copies the built `test-vdriver` cdylib into a fresh temp directory as
/// `test.vdriver` and points `VDRIVER_PATH` at it for the lifetime of
/// the returned guard. Dropping the guard restores the previous
/// `VDRIVER_PATH` (if any) and removes the temp directory.
pub struct TestVdriverFixture {
    _dir: TempDir,
    _lock: std::sync::MutexGuard<'static, ()>,
    previous_path: Option<String>,
}

impl TestVdriverFixture {
    pub fn install() -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let dir = TempDir::new().expect("create temp VDRIVER_PATH dir");
        let dest = dir.path().join(format!("test{VDRIVER_EXT}"));
        std::fs::copy(locate_cdylib(), &dest).expect("stage test-vdriver cdylib");

        let previous_path = std::env::var(VDRIVER_PATH_ENVVAR).ok();
        std::env::set_var(VDRIVER_PATH_ENVVAR, dir.path());

        Self {
            _dir: dir,
            _lock: lock,
            previous_path,
        }
    }

    pub fn path(&self) -> &Path {
        self._dir.path()
    }
}

impl Drop for TestVdriverFixture {
    fn drop(&mut self) {
        match &self.previous_path {
            Some(v) => std::env::set_var(VDRIVER_PATH_ENVVAR, v),
            None => std::env::remove_var(VDRIVER_PATH_ENVVAR),
        }
    }
}
