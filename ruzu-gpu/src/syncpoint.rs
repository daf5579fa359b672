// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host1x syncpoints.
//!
//! A syncpoint is a wrapping 32-bit counter the GPU bumps from the
//! pushbuffer and the CPU blocks on. Each one also carries a max value: the
//! count it reaches once every increment queued so far has run. Channels
//! reserve increments against the max and hand the result out as a fence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Syncpoints exposed by the Tegra X1 host1x.
pub const NUM_SYNCPOINTS: usize = 192;

#[derive(Default)]
struct Syncpoint {
    value: AtomicU32,
    max: AtomicU32,
}

impl Syncpoint {
    /// Raise the max to `target` unless it is already ahead.
    fn raise_max(&self, target: u32) {
        let _ = self
            .max
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |max| {
                (!syncpoint_reached(max, target)).then_some(target)
            });
    }
}

pub struct SyncpointManager {
    points: Vec<Syncpoint>,
    /// Taken around increments so a waiter between its check and its sleep
    /// cannot miss the notification.
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl SyncpointManager {
    pub fn new() -> Self {
        Self {
            points: (0..NUM_SYNCPOINTS).map(|_| Syncpoint::default()).collect(),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn get(&self, id: u32) -> Option<&Syncpoint> {
        let point = self.points.get(id as usize);
        if point.is_none() {
            log::warn!("Syncpoint: id {} out of range", id);
        }
        point
    }

    /// Increment and wake waiters. Returns the new value, or 0 for a bad id.
    pub fn increment(&self, id: u32) -> u32 {
        let Some(point) = self.get(id) else {
            return 0;
        };
        let value = {
            let _guard = self.wake_lock.lock();
            point.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
        };
        self.wake.notify_all();
        point.raise_max(value);
        log::trace!("Syncpoint: {} -> {}", id, value);
        value
    }

    pub fn value(&self, id: u32) -> u32 {
        self.get(id)
            .map_or(0, |point| point.value.load(Ordering::Acquire))
    }

    /// Reserve `count` increments and return the value the syncpoint will
    /// hold after they run.
    pub fn increment_max(&self, id: u32, count: u32) -> u32 {
        self.get(id).map_or(0, |point| {
            point
                .max
                .fetch_add(count, Ordering::AcqRel)
                .wrapping_add(count)
        })
    }

    pub fn max_value(&self, id: u32) -> u32 {
        self.get(id)
            .map_or(0, |point| point.max.load(Ordering::Acquire))
    }

    pub fn is_expired(&self, id: u32, threshold: u32) -> bool {
        syncpoint_reached(self.value(id), threshold)
    }

    /// Block until syncpoint `id` reaches `threshold`. False on timeout or a
    /// bad id.
    pub fn wait(&self, id: u32, threshold: u32, timeout: Duration) -> bool {
        let Some(point) = self.get(id) else {
            return false;
        };
        let reached = || syncpoint_reached(point.value.load(Ordering::Acquire), threshold);
        if reached() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.wake_lock.lock();
        loop {
            if reached() {
                return true;
            }
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                return reached();
            }
        }
    }
}

impl Default for SyncpointManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap-aware comparison: `value` has reached `threshold` when it is at most
/// 2^31 increments past it.
pub fn syncpoint_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}
