//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Periodic segment cleanup scheduler, ticking `SegmentStore::purge` on a
//! fixed interval and stopping when told to shut down. Ported from
//! `viseron/cleanup.py`'s `SegmentCleanup`, which runs the same purge loop on
//! a background thread independent of recording activity (the pause/resume
//! gate lives in `SegmentStore` itself).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{tick, Receiver};

use crate::segment::SegmentStore;

/// Run the purge loop on `interval` until `shutdown` fires.
pub fn run(store: Arc<SegmentStore>, interval: Duration, shutdown: &Receiver<()>) {
    let ticker = tick(interval);
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                store.purge(now);
            }
            recv(shutdown) -> _ => return,
        }
    }
}
