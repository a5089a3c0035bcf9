// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or probing a VDRIVER.
///
/// None of these propagate to a VDRIVER's own `conn`/`call` callers —
/// they only ever surface to whoever drives the loader directly (the KOS
/// runtime at startup, or `gvd` taking local inventory).
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to load VDRIVER from {}: {source}", path.display())]
    Dlopen {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{} does not export the `{symbol}` symbol", path.display(), symbol = String::from_utf8_lossy(crate::vdriver::ENTRY_SYMBOL))]
    MissingEntrySymbol { path: PathBuf },

    #[error("VID slice space exhausted, cannot load another VDRIVER")]
    VidSliceSpaceExhausted,
}
