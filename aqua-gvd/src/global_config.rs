// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The daemon's resolved configuration, set once from CLI flags in
//! `main` and read from everywhere else — the sender and listener
//! threads in particular, which have no other way back to `Args`.

use std::sync::OnceLock;
use std::time::Duration;

use crate::elp::{ELP_DELAY, NODE_TTL};

#[derive(Debug)]
pub struct GlobalConfig {
    pub elp_delay: Duration,
    pub node_ttl: Duration,
}

pub static CONFIG: OnceLock<GlobalConfig> = OnceLock::new();

pub fn initialize_global_config(elp_delay_ms: Option<u64>, node_ttl_secs: Option<u64>) {
    let config = GlobalConfig {
        elp_delay: elp_delay_ms.map(Duration::from_millis).unwrap_or(ELP_DELAY),
        node_ttl: node_ttl_secs.map(Duration::from_secs).unwrap_or(NODE_TTL),
    };

    if CONFIG.set(config).is_err() {
        panic!("global config initialized twice");
    }
}

pub fn elp_delay() -> Duration {
    CONFIG.get().expect("global config not initialized").elp_delay
}

pub fn node_ttl() -> Duration {
    CONFIG.get().expect("global config not initialized").node_ttl
}
