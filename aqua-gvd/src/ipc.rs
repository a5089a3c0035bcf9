// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Paths and the singleton lock for GrapeVine's file-based IPC with the
//! KOS: a lock file, a host id file, and the nodes file itself.

use nix::fcntl::{Flock, FlockArg};
use std::fs::File;
use std::io;
use std::path::PathBuf;

/// Path to the lock file that proves a GrapeVine daemon holds this host,
/// honoring `GV_LOCK_PATH`.
pub fn lock_path() -> PathBuf {
    std::env::var_os("GV_LOCK_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/gv.lock"))
}

/// Path to the file holding this host's id, honoring `GV_HOST_ID_PATH`.
pub fn host_id_path() -> PathBuf {
    std::env::var_os("GV_HOST_ID_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/gv.host_id"))
}

/// Path to the discovered-nodes file, honoring `GV_NODES_PATH`.
pub fn nodes_path() -> PathBuf {
    std::env::var_os("GV_NODES_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/gv.nodes"))
}

/// Whether a GrapeVine daemon currently holds the lock file, i.e. is
/// running on this host. Never blocks.
pub fn is_gvd_running() -> io::Result<bool> {
    let file = File::options().write(true).create(true).open(lock_path())?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => {
            // We just proved nobody else holds it; release immediately,
            // we were only probing.
            let _ = locked.unlock();
            Ok(false)
        }
        Err((_file, errno)) if errno == nix::errno::Errno::EWOULDBLOCK => Ok(true),
        Err((_file, errno)) => Err(io::Error::from(errno)),
    }
}

/// Acquire the lock file for the lifetime of the returned guard. Returns
/// `None` if another daemon already holds it.
pub fn acquire_lock() -> io::Result<Option<Flock<File>>> {
    let file = File::options().write(true).create(true).open(lock_path())?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) => Ok(Some(locked)),
        Err((_file, errno)) if errno == nix::errno::Errno::EWOULDBLOCK => Ok(None),
        Err((_file, errno)) => Err(io::Error::from(errno)),
    }
}

/// Read back this host's id, as previously written by the daemon.
pub fn read_host_id() -> io::Result<u64> {
    let bytes = std::fs::read(host_id_path())?;
    if bytes.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "gv.host_id file too short"));
    }
    Ok(u64::from_le_bytes(bytes[..8].try_into().unwrap()))
}

/// Persist this host's id for clients to read back.
pub fn write_host_id(host_id: u64) -> io::Result<()> {
    std::fs::write(host_id_path(), host_id.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_default_when_env_unset() {
        std::env::remove_var("GV_LOCK_PATH");
        std::env::remove_var("GV_HOST_ID_PATH");
        std::env::remove_var("GV_NODES_PATH");
        assert_eq!(lock_path(), PathBuf::from("/tmp/gv.lock"));
        assert_eq!(host_id_path(), PathBuf::from("/tmp/gv.host_id"));
        assert_eq!(nodes_path(), PathBuf::from("/tmp/gv.nodes"));
    }

    #[test]
    fn paths_honor_env_overrides() {
        std::env::set_var("GV_LOCK_PATH", "/tmp/aqua-gvd-test.lock");
        assert_eq!(lock_path(), PathBuf::from("/tmp/aqua-gvd-test.lock"));
        std::env::remove_var("GV_LOCK_PATH");
    }

    #[test]
    fn host_id_round_trips_through_the_file() {
        let dir = std::env::temp_dir().join(format!("aqua-gvd-hostid-test-{:x}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::env::set_var("GV_HOST_ID_PATH", dir.join("gv.host_id"));

        write_host_id(0xdead_beef).unwrap();
        assert_eq!(read_host_id().unwrap(), 0xdead_beef);

        std::env::remove_var("GV_HOST_ID_PATH");
        std::fs::remove_dir_all(&dir).ok();
    }
}
