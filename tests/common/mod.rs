#![allow(dead_code)]

pub(crate) mod followers;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod mem_log;

pub(crate) mod mem_store;

use std::time::{Duration, Instant};

/// Poll `condition` every millisecond until it holds or `timeout` passes. Returns whether it held.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
