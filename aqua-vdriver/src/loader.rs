// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::context::VDriverContext;
use crate::error::LoaderError;
use crate::notif::{NotifCb, Notification, WritePtrCb};
use crate::vdriver::{VDriver, VDriverEntryFn, ENTRY_SYMBOL};
use aqua_wire::VdevDescriptor;
use libloading::{Library, Symbol};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const VDRIVER_PATH_ENVVAR: &str = "VDRIVER_PATH";
pub const DEFAULT_VDRIVER_PATH: &str = "/usr/local/share/aqua/vdriver";
pub const VDRIVER_EXT: &str = ".vdriver";

/// A VDRIVER that has been `dlopen`'d and handed its context. The
/// `Library` must outlive the boxed trait object — dropping it while
/// `vdriver` is alive would leave `vdriver`'s vtable pointing at
/// unmapped memory.
struct LoadedVDriver {
    vdriver: Box<dyn VDriver>,
    ctx: VDriverContext,
    _lib: Library,
}

/// Resolves `spec` strings to loaded VDRIVERs, assigns each one a VID
/// slice, and remembers the assignment so call-time VDEV ids can be
/// routed back to their VDRIVER.
pub struct Loader {
    search_path: Vec<PathBuf>,
    cur_vid_slice: u64,
    loaded: Vec<LoadedVDriver>,
}

impl Loader {
    /// Build a loader, resolving the search path from `VDRIVER_PATH` or
    /// falling back to [`DEFAULT_VDRIVER_PATH`].
    pub fn new() -> Self {
        let search_path = match std::env::var(VDRIVER_PATH_ENVVAR) {
            Ok(val) if !val.is_empty() => val.split(':').map(PathBuf::from).collect(),
            _ => vec![PathBuf::from(DEFAULT_VDRIVER_PATH)],
        };

        log::debug!("VDRIVER search path: {search_path:?}");

        Self {
            search_path,
            cur_vid_slice: 0,
            loaded: Vec::new(),
        }
    }

    fn wrap_recording(notif_cb: NotifCb, sink: Rc<RefCell<Vec<VdevDescriptor>>>) -> NotifCb {
        Rc::new(move |cookie, notif| {
            if let Notification::Attach { ref vdev } = notif {
                sink.borrow_mut().push(vdev.clone());
            }
            notif_cb(cookie, notif);
        })
    }

    fn load_from_path(
        &mut self,
        path: &Path,
        host_id: u64,
        notif_cb: NotifCb,
        write_ptr_cb: WritePtrCb,
    ) -> Result<usize, LoaderError> {
        log::debug!("trying to load VDRIVER from {}", path.display());

        let lib = unsafe { Library::new(path) }.map_err(|source| LoaderError::Dlopen {
            path: path.to_path_buf(),
            source,
        })?;

        let entry: Symbol<VDriverEntryFn> = unsafe { lib.get(ENTRY_SYMBOL) }.map_err(|_| {
            LoaderError::MissingEntrySymbol {
                path: path.to_path_buf(),
            }
        })?;

        if self.cur_vid_slice >= u32::MAX as u64 {
            return Err(LoaderError::VidSliceSpaceExhausted);
        }

        let vdev_id_lo = self.cur_vid_slice << 32;
        let vdev_id_hi = ((self.cur_vid_slice + 1) << 32) - 1;
        self.cur_vid_slice += 1;

        let vdriver = unsafe { Box::from_raw(entry()) };
        let ctx = VDriverContext::new(vdev_id_lo, vdev_id_hi, host_id, notif_cb, write_ptr_cb);

        let mut loaded = LoadedVDriver {
            vdriver,
            ctx,
            _lib: lib,
        };
        loaded.vdriver.init(&loaded.ctx);

        log::info!(
            "VDRIVER '{}' loaded from {} (VID slice [{:#x}, {:#x}])",
            loaded.vdriver.spec(),
            path.display(),
            vdev_id_lo,
            vdev_id_hi,
        );

        self.loaded.push(loaded);
        Ok(self.loaded.len() - 1)
    }

    fn candidate_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.search_path.iter()
    }

    /// Find and load the VDRIVER providing `spec` on the search path,
    /// probe it, and return every VDEV it reported.
    pub fn request_local_vdev(
        &mut self,
        spec: &str,
        host_id: u64,
        notif_cb: NotifCb,
        write_ptr_cb: WritePtrCb,
    ) -> Vec<VdevDescriptor> {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut seen = Vec::new();

        for dir in self.candidate_dirs().cloned().collect::<Vec<_>>() {
            let candidate = dir.join(format!("{spec}{VDRIVER_EXT}"));
            if seen.contains(&candidate) || !candidate.exists() {
                continue;
            }
            seen.push(candidate.clone());

            let recording = Self::wrap_recording(notif_cb.clone(), sink.clone());
            let idx = match self.load_from_path(&candidate, host_id, recording, write_ptr_cb.clone()) {
                Ok(idx) => idx,
                Err(err) => {
                    log::warn!("failed to load VDRIVER at {}: {err}", candidate.display());
                    continue;
                }
            };

            let loaded = &mut self.loaded[idx];
            log::debug!("probing VDRIVER '{}' for '{spec}' VDEVs", loaded.vdriver.spec());
            loaded.vdriver.probe(&loaded.ctx);
        }

        let result = sink.borrow().clone();
        result
    }

    /// Load every VDRIVER on the search path and probe each one,
    /// returning the full set of VDEVs found on this host.
    pub fn full_inventory(
        &mut self,
        host_id: u64,
        notif_cb: NotifCb,
        write_ptr_cb: WritePtrCb,
    ) -> Vec<VdevDescriptor> {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut seen_dirs = Vec::new();

        for dir in self.candidate_dirs().cloned().collect::<Vec<_>>() {
            if seen_dirs.contains(&dir) {
                continue;
            }
            seen_dirs.push(dir.clone());

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!("opendir({}): {err}", dir.display());
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(&VDRIVER_EXT[1..]) {
                    continue;
                }

                let recording = Self::wrap_recording(notif_cb.clone(), sink.clone());
                let idx = match self.load_from_path(&path, host_id, recording, write_ptr_cb.clone()) {
                    Ok(idx) => idx,
                    Err(err) => {
                        log::warn!("failed to load VDRIVER at {}: {err}", path.display());
                        continue;
                    }
                };

                let loaded = &mut self.loaded[idx];
                log::debug!("probing VDRIVER '{}'", loaded.vdriver.spec());
                loaded.vdriver.probe(&loaded.ctx);
            }
        }

        let result = sink.borrow().clone();
        result
    }

    /// Route a call or connect request for `vdev_id` to its VDRIVER.
    pub fn find_by_vid(&mut self, vdev_id: u64) -> Option<(&mut dyn VDriver, &VDriverContext)> {
        let loaded = self
            .loaded
            .iter_mut()
            .find(|l| l.ctx.owns(vdev_id))?;
        Some((loaded.vdriver.as_mut(), &loaded.ctx))
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
